//! Inbound queue (§3, §4.2): an ordered FIFO of commands destined for the application, deduping
//! by address for opcodes whose descriptor requests it.
use crate::alloc::SlotPool;
use crate::command::{AddressKey, Command};
use hashbrown::HashMap;
use std::collections::VecDeque;

/// Default memory budget, mirroring the original implementation's `IN_QUEUE_DEFAULT_MAX_SIZE`
/// (`examples/original_source/include/v_in_queue.h`).
pub const IN_QUEUE_DEFAULT_MAX_SIZE: usize = 1_048_576;

pub struct InboundQueue {
    commands: SlotPool<Command>,
    order: VecDeque<usize>,
    index: HashMap<AddressKey, usize>,
    count: usize,
    size: usize,
    max_size: usize,
}

impl InboundQueue {
    pub fn new(max_size: usize) -> InboundQueue {
        InboundQueue {
            commands: SlotPool::new(),
            order: VecDeque::new(),
            index: HashMap::new(),
            count: 0,
            size: 0,
            max_size,
        }
    }

    /// Push always succeeds (§4.2): dedup is conflict resolution, not failure.
    pub fn push(&mut self, cmd: Command) {
        let dedup_key = cmd
            .descriptor()
            .filter(|d| d.rem_dup())
            .and_then(|_| cmd.address_key());

        if let Some(key) = dedup_key {
            if let Some(&slot) = self.index.get(&key) {
                let resident = self.commands.get_mut(slot).expect("dangling inbound slot");
                self.size = self.size - resident.payload.len() + cmd.payload.len();
                *resident = cmd;
                return;
            }
        }

        self.size += cmd.payload.len();
        let slot = self.commands.push(cmd);
        self.order.push_back(slot);
        if let Some(key) = dedup_key {
            self.index.insert(key, slot);
        }
        self.count += 1;
    }

    /// Removes and returns the head of the FIFO, or `None` if empty.
    pub fn pop(&mut self) -> Option<Command> {
        let slot = self.order.pop_front()?;
        let cmd = self.commands.reclaim(slot).expect("dangling inbound slot");

        if let Some(key) = cmd
            .descriptor()
            .filter(|d| d.rem_dup())
            .and_then(|_| cmd.address_key())
        {
            self.index.remove(&key);
        }

        self.count -= 1;
        self.size -= cmd.payload.len();
        Some(cmd)
    }

    pub fn cmd_count(&self) -> usize {
        self.count
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }
}
