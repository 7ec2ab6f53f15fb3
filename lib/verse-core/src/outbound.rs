//! Outbound queue (§3, §4.3): 256 priority buckets plus a per-opcode address-keyed map, run
//! metadata for address-sharing within a bucket, and a weighted budget-aware pop used by the
//! stream loop's pack cycle.
use crate::alloc::SlotPool;
use crate::codec::run_packed_len;
use crate::command::{AddressKey, Command};
use crate::descriptor::{descriptor, Descriptor};
use crate::error::CoreError;
use hashbrown::HashMap;
use lazy_static::lazy_static;
use std::collections::VecDeque;

/// Mirrors `MAX_PRIORITY` (`examples/original_source/include/v_out_queue.h`).
pub const MAX_PRIORITY: u8 = 255;
/// Mirrors `VRS_DEFAULT_PRIORITY` (§6 Defaults: "default command priority 128").
pub const DEFAULT_PRIORITY: u8 = 128;
/// Mirrors `OUT_QUEUE_DEFAULT_MAX_SIZE`.
pub const OUT_QUEUE_DEFAULT_MAX_SIZE: usize = 1_048_576;

const REAL_PRIO_MUL: f64 = 0.1;
const MAX_REAL_PRIO_VAL: f64 = DEFAULT_PRIORITY as f64 * 1000.0;
const MIN_REAL_PRIO_VAL: f64 = 1.0;

/// The real-priority curve (§3 "Real priority ... clamped"): geometric growth above
/// `DEFAULT_PRIORITY`, geometric decay below it, built once at startup exactly as
/// `v_out_queue_init` seeds `queues[prio]->r_prio`.
fn build_real_prio_table() -> [f64; 256] {
    let mut table = [0.0f64; 256];

    let mut r_prio = DEFAULT_PRIORITY as f64;
    for prio in (DEFAULT_PRIORITY as usize)..=(MAX_PRIORITY as usize) {
        table[prio] = r_prio.min(MAX_REAL_PRIO_VAL);
        r_prio += r_prio * REAL_PRIO_MUL;
    }

    let mut r_prio = DEFAULT_PRIORITY as f64 - 1.0;
    for prio in (0..DEFAULT_PRIORITY as usize).rev() {
        table[prio] = r_prio.max(MIN_REAL_PRIO_VAL);
        r_prio -= r_prio * REAL_PRIO_MUL;
    }

    table
}

lazy_static! {
    static ref REAL_PRIO: [f64; 256] = build_real_prio_table();
}

/// The fixed real-priority value assigned to priority slot `prio` (§3, §8 scenario S6).
#[inline]
pub fn real_prio(prio: u8) -> f64 {
    REAL_PRIO[prio as usize]
}

/// Shared run metadata for a maximal contiguous run of same-opcode, address-sharing commands in
/// one bucket (§3 "shared counters {count, share, len}"); one record per run, index-referenced
/// from every member `Entry`.
#[derive(Debug, Clone, Copy)]
struct Run {
    count: u16,
    share: u8,
    len: u16,
}

struct Entry {
    cmd: Command,
    prio: u8,
    run: Option<usize>,
}

#[derive(Default)]
struct Bucket {
    order: VecDeque<usize>,
    count: u32,
    size: u32,
}

/// Run/budget metadata reported back to the caller of `pop` (§4.3 "Pop-with-budget semantics").
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PopReport {
    /// Number of commands (including the one just popped) that belong to this run and can be
    /// packed within the caller's budget; `0` for a solo (non-sharing) command.
    pub run_count: u16,
    /// Leading address bytes shared across the run.
    pub share: u8,
    /// Total packed byte length of the `run_count` commands, for `run_count > 0`.
    pub packed_len: u16,
}

pub struct OutboundQueue {
    entries: SlotPool<Entry>,
    runs: SlotPool<Run>,
    buckets: Vec<Bucket>,
    index: HashMap<AddressKey, usize>,
    count: u32,
    size: u32,
    max_size: usize,
    min_prio: u8,
    max_prio: u8,
    prio_sum_high: f64,
    prio_sum_low: f64,
}

impl OutboundQueue {
    pub fn new(max_size: usize) -> OutboundQueue {
        let mut buckets = Vec::with_capacity(MAX_PRIORITY as usize + 1);
        buckets.resize_with(MAX_PRIORITY as usize + 1, Bucket::default);

        OutboundQueue {
            entries: SlotPool::new(),
            runs: SlotPool::new(),
            buckets,
            index: HashMap::new(),
            count: 0,
            size: 0,
            max_size,
            min_prio: DEFAULT_PRIORITY,
            max_prio: DEFAULT_PRIORITY,
            prio_sum_high: 0.0,
            prio_sum_low: 0.0,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }

    pub fn count_prio(&self, prio: u8) -> u32 {
        self.buckets[prio as usize].count
    }

    pub fn size_prio(&self, prio: u8) -> u32 {
        self.buckets[prio as usize].size
    }

    pub fn min_prio(&self) -> u8 {
        self.min_prio
    }

    pub fn max_prio(&self) -> u8 {
        self.max_prio
    }

    pub fn prio_sum_high(&self) -> f64 {
        self.prio_sum_high
    }

    pub fn prio_sum_low(&self) -> f64 {
        self.prio_sum_low
    }

    /// Pushes `cmd` to the tail of priority `prio`'s bucket (§4.3 `push_tail`). When
    /// `respect_max_size` is set and the push would exceed `max_size`, the command is dropped and
    /// `CoreError::QueueFull` is returned (§4.3 "Fails with QueueFull").
    pub fn push_tail(
        &mut self,
        prio: u8,
        cmd: Command,
        respect_max_size: bool,
    ) -> Result<(), CoreError> {
        self.push(prio, cmd, true, respect_max_size)
    }

    /// Pushes `cmd` to the head of priority `prio`'s bucket, used only for NAK-triggered resends
    /// (§4.4 `resend_packet`). If a newer equi-addressed command is already enqueued, the resend
    /// is silently dropped (§4.4: "silently drops the stale resend if found") and `false` is
    /// returned.
    pub fn push_head(&mut self, prio: u8, cmd: Command) -> bool {
        let rem_dup = cmd.descriptor().map(|d| d.rem_dup()).unwrap_or(false);
        if rem_dup {
            if let Some(key) = cmd.address_key() {
                if self.index.contains_key(&key) {
                    return false;
                }
                return self.insert_fresh(prio, cmd, false, false, Some(key)).is_ok();
            }
        }
        self.insert_fresh(prio, cmd, false, false, None).is_ok()
    }

    fn push(
        &mut self,
        prio: u8,
        cmd: Command,
        to_tail: bool,
        respect_max_size: bool,
    ) -> Result<(), CoreError> {
        let rem_dup = cmd.descriptor().map(|d| d.rem_dup()).unwrap_or(false);
        let key = if rem_dup { cmd.address_key() } else { None };

        if let Some(key) = key {
            if let Some(&slot) = self.index.get(&key) {
                let existing_prio = self.entries.get(slot).expect("dangling outbound slot").prio;

                if existing_prio == prio {
                    // Same priority: replace in place, order preserved (§4.3).
                    self.entries.get_mut(slot).expect("dangling outbound slot").cmd = cmd;
                    return Ok(());
                }

                // Different priority: detach fully, then insert fresh as if new (§4.3).
                self.detach(slot, existing_prio);
                self.index.remove(&key);
                return self.insert_fresh(prio, cmd, to_tail, respect_max_size, Some(key));
            }
        }

        self.insert_fresh(prio, cmd, to_tail, respect_max_size, key)
    }

    fn insert_fresh(
        &mut self,
        prio: u8,
        cmd: Command,
        to_tail: bool,
        respect_max_size: bool,
        dedup_key: Option<AddressKey>,
    ) -> Result<(), CoreError> {
        let cmd_len = cmd.wire_size();
        if respect_max_size && self.size as usize + cmd_len > self.max_size {
            return Err(CoreError::QueueFull);
        }

        let opcode = cmd.opcode;
        let share_addr = descriptor(opcode).map(|d| d.share_addr()).unwrap_or(false);

        let border_slot = {
            let bucket = &self.buckets[prio as usize];
            if to_tail {
                bucket.order.back().copied()
            } else {
                bucket.order.front().copied()
            }
        };

        let run = match border_slot {
            Some(border) if share_addr => {
                let border_opcode = self.entries.get(border).expect("dangling outbound slot").cmd.opcode;
                if border_opcode == opcode {
                    Some(self.extend_or_create_run(border, &cmd))
                } else {
                    None
                }
            }
            _ => None,
        };

        let slot = self.entries.push(Entry { cmd, prio, run });

        let bucket = &mut self.buckets[prio as usize];
        if bucket.count == 0 {
            if prio >= DEFAULT_PRIORITY {
                self.prio_sum_high += real_prio(prio);
            } else {
                self.prio_sum_low += real_prio(prio);
            }
        }
        if to_tail {
            bucket.order.push_back(slot);
        } else {
            bucket.order.push_front(slot);
        }
        bucket.count += 1;
        bucket.size += cmd_len as u32;

        self.count += 1;
        self.size += cmd_len as u32;

        if prio > self.max_prio {
            self.max_prio = prio;
        }
        if prio < self.min_prio {
            self.min_prio = prio;
        }

        if let Some(key) = dedup_key {
            self.index.insert(key, slot);
        }

        Ok(())
    }

    /// Extends the run anchored at `border_slot` with one more (the about-to-be-inserted)
    /// command, allocating a fresh `Run` record the first time two commands share a bucket
    /// (§4.3 "Run metadata maintenance").
    fn extend_or_create_run(&mut self, border_slot: usize, new_cmd: &Command) -> usize {
        let d = descriptor(new_cmd.opcode).expect("share_addr implies a known descriptor");
        let new_addr = new_cmd.address().expect("share_addr implies an addressed command");
        let border_addr = self
            .entries
            .get(border_slot)
            .expect("dangling outbound slot")
            .cmd
            .address()
            .expect("share_addr implies an addressed command");
        let border_run = self.entries.get(border_slot).expect("dangling outbound slot").run;

        match border_run {
            None => {
                let share = border_addr.common_prefix(&new_addr, d.key_size as usize) as u8;
                let len = run_packed_len(d, 2, share);
                let run_slot = self.runs.push(Run { count: 2, share, len });
                self.entries.get_mut(border_slot).expect("dangling outbound slot").run = Some(run_slot);
                run_slot
            }
            Some(run_slot) => {
                let run = self.runs.get_mut(run_slot).expect("dangling run slot");
                if run.share > 0 {
                    run.share = border_addr.common_prefix(&new_addr, run.share as usize) as u8;
                }
                run.count += 1;
                let (count, share) = (run.count, run.share);
                self.runs.get_mut(run_slot).expect("dangling run slot").len = run_packed_len(d, count, share);
                run_slot
            }
        }
    }

    fn release_run_member(&mut self, run_slot: usize) {
        let run = self.runs.get_mut(run_slot).expect("dangling run slot");
        run.count -= 1;
        if run.count == 0 {
            self.runs.reclaim(run_slot);
        }
    }

    fn detach(&mut self, slot: usize, prio: u8) {
        let entry = self.entries.reclaim(slot).expect("dangling outbound slot");
        let cmd_len = entry.cmd.wire_size() as u32;

        {
            let bucket = &mut self.buckets[prio as usize];
            if let Some(pos) = bucket.order.iter().position(|&s| s == slot) {
                bucket.order.remove(pos);
            }
            bucket.count -= 1;
            bucket.size -= cmd_len;
        }

        self.count -= 1;
        self.size -= cmd_len;

        if let Some(run_slot) = entry.run {
            self.release_run_member(run_slot);
        }

        if self.buckets[prio as usize].count == 0 {
            self.on_bucket_emptied(prio);
        }
    }

    fn on_bucket_emptied(&mut self, prio: u8) {
        if prio >= DEFAULT_PRIORITY {
            self.prio_sum_high -= real_prio(prio);
        } else {
            self.prio_sum_low -= real_prio(prio);
        }

        if self.max_prio == prio && self.min_prio != prio {
            for p in (self.min_prio..=prio).rev() {
                if self.buckets[p as usize].count != 0 {
                    self.max_prio = p;
                    break;
                }
            }
        } else if self.min_prio == prio && self.max_prio != prio {
            for p in prio..=self.max_prio {
                if self.buckets[p as usize].count != 0 {
                    self.min_prio = p;
                    break;
                }
            }
        } else if self.min_prio == prio && self.max_prio == prio {
            self.min_prio = DEFAULT_PRIORITY;
            self.max_prio = DEFAULT_PRIORITY;
        }
    }

    /// Pops the head of priority `prio`'s bucket (§4.3 "Pop-with-budget semantics").
    ///
    /// `len_budget == 0` means "no budget constraint" (report and pop the whole run). Otherwise,
    /// when the run's full packed length exceeds `len_budget`, this computes the maximal prefix
    /// of the run that fits, and still pops exactly one command — the caller calls `pop` again
    /// to drain the rest of the same run. Returns `None` when the bucket is empty, or when even
    /// one command of the head run does not fit in `len_budget`.
    pub fn pop(&mut self, prio: u8, len_budget: u16) -> Option<(Command, PopReport)> {
        let head_slot = *self.buckets[prio as usize].order.front()?;
        let run_slot = self.entries.get(head_slot).expect("dangling outbound slot").run;

        let report = match run_slot {
            None => {
                let cmd_len = self.entries.get(head_slot).expect("dangling outbound slot").cmd.wire_size() as u16;
                if len_budget != 0 && cmd_len > len_budget {
                    return None;
                }
                PopReport { run_count: 0, share: 0, packed_len: 0 }
            }
            Some(run_slot) => {
                let run = *self.runs.get(run_slot).expect("dangling run slot");
                if len_budget == 0 || len_budget >= run.len {
                    PopReport { run_count: run.count, share: run.share, packed_len: run.len }
                } else {
                    let opcode = self.entries.get(head_slot).expect("dangling outbound slot").cmd.opcode;
                    let d = descriptor(opcode).expect("run implies a known descriptor");
                    let k = max_count_within_budget(d, run.share, len_budget).min(run.count);
                    if k == 0 {
                        return None;
                    }
                    let actual_len = run_packed_len(d, k, run.share);
                    PopReport { run_count: k, share: run.share, packed_len: actual_len }
                }
            }
        };

        let slot = self.buckets[prio as usize].order.pop_front().expect("checked non-empty above");
        let entry = self.entries.reclaim(slot).expect("dangling outbound slot");
        let cmd_len = entry.cmd.wire_size() as u32;

        if entry.cmd.descriptor().map(|d| d.rem_dup()).unwrap_or(false) {
            if let Some(key) = entry.cmd.address_key() {
                self.index.remove(&key);
            }
        }

        {
            let bucket = &mut self.buckets[prio as usize];
            bucket.count -= 1;
            bucket.size -= cmd_len;
        }
        self.count -= 1;
        self.size -= cmd_len;

        if let Some(run_slot) = entry.run {
            self.release_run_member(run_slot);
        }

        if self.buckets[prio as usize].count == 0 {
            self.on_bucket_emptied(prio);
        }

        Some((entry.cmd, report))
    }
}

/// Largest `k` such that `run_packed_len(descriptor, k, share) <= budget`; `0` if even one
/// command does not fit (§4.3 "compute max K commands from this run packable into len_in bytes").
fn max_count_within_budget(d: &Descriptor, share: u8, budget: u16) -> u16 {
    let mut k = 0u16;
    while k < u16::MAX && run_packed_len(d, k + 1, share) <= budget {
        k += 1;
    }
    k
}
