//! Packet history and retransmission (§4.4): tracks which commands are still outstanding in
//! which sent packet, obsoletes history entries when a newer equi-addressed command supersedes
//! them, and drives ack/nak-triggered cleanup and resend. Grounded in
//! `examples/original_source/src/common/v_history.c`.
use crate::alloc::SlotPool;
use crate::command::{AddressKey, Command};
use crate::fake;
use crate::inbound::InboundQueue;
use crate::outbound::OutboundQueue;
use byteorder::{BigEndian, ByteOrder};
use hashbrown::HashMap;

struct SentCommand {
    prio: u8,
    /// Back-reference into `hist_entries`; set to `None` when a newer equi-addressed command
    /// obsoletes this one (§3: "Obsoleting a command ... nulls that back-reference").
    hist_slot: Option<usize>,
}

struct HistEntry {
    cmd: Command,
    /// Owning `SentCommand` slot, so obsoletion can null it out (`vbucket->ptr` in the original).
    owner: usize,
}

struct SentPacket {
    commands: Vec<usize>,
}

/// One compressed boundary in an `AckNakHistory` (§3 "Ack/Nak History").
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AckNakKind {
    Ack,
    Nak,
}

#[derive(Debug, Clone, Copy)]
struct Boundary {
    kind: AckNakKind,
    pay_id: u32,
}

/// A run-length-compressed record of which payload ids were ACK'd or NAK'd (§3, §4.4).
///
/// `examples/original_source/src/common/v_history.c`'s `v_ack_nak_history_add_cmd` implements
/// this compression with several special-cased branches whose net effect, traced through, is
/// exactly "extend the trailing boundary when the new report agrees with it, otherwise open a
/// new one" — so that is what this implements directly, rather than porting the branch-by-branch
/// array-shifting version.
pub struct AckNakHistory {
    boundaries: Vec<Boundary>,
}

impl AckNakHistory {
    pub fn new() -> AckNakHistory {
        AckNakHistory { boundaries: Vec::new() }
    }

    pub fn add_cmd(&mut self, kind: AckNakKind, pay_id: u32) {
        match self.boundaries.last_mut() {
            Some(last) if last.kind == kind => last.pay_id = pay_id,
            _ => self.boundaries.push(Boundary { kind, pay_id }),
        }
    }

    /// Drops every boundary fully covered by `ank_id` (§4.4 "the list shrinks when cumulative
    /// acknowledgement advances").
    pub fn remove_cmds(&mut self, ank_id: u32) {
        self.boundaries.retain(|b| b.pay_id > ank_id);
    }

    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    pub fn boundaries(&self) -> impl Iterator<Item = (AckNakKind, u32)> + '_ {
        self.boundaries.iter().map(|b| (b.kind, b.pay_id))
    }
}

/// Per-session packet history: which commands were sent in which packet, and the compressed
/// ack/nak record for the payload stream.
pub struct PacketHistory {
    packets: HashMap<u32, SentPacket>,
    sent_commands: SlotPool<SentCommand>,
    hist_entries: SlotPool<HistEntry>,
    hist_index: HashMap<AddressKey, usize>,
    ack_nak: AckNakHistory,
    outstanding_bytes: usize,
}

impl PacketHistory {
    pub fn new() -> PacketHistory {
        PacketHistory {
            packets: HashMap::new(),
            sent_commands: SlotPool::new(),
            hist_entries: SlotPool::new(),
            hist_index: HashMap::new(),
            ack_nak: AckNakHistory::new(),
            outstanding_bytes: 0,
        }
    }

    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding_bytes
    }

    pub fn ack_nak(&mut self) -> &mut AckNakHistory {
        &mut self.ack_nak
    }

    /// Appends an empty `SentPacket` with id `id` (§4.4 `add_packet`).
    pub fn add_packet(&mut self, id: u32) {
        self.packets.insert(id, SentPacket { commands: Vec::new() });
    }

    /// Records one transmitted command against `packet_id` (§4.4 `add_cmd`). If the opcode has
    /// REM_DUP, any address-equal command already in history is obsoleted first: its owning
    /// `SentCommand`'s back-reference is nulled (so it is skipped on resend) and the stale
    /// history entry is destroyed.
    pub fn add_cmd(&mut self, packet_id: u32, cmd: Command, prio: u8) {
        let rem_dup = cmd.descriptor().map(|d| d.rem_dup()).unwrap_or(false);
        let dedup_key = if rem_dup { cmd.address_key() } else { None };

        if let Some(key) = dedup_key {
            if let Some(old_slot) = self.hist_index.remove(&key) {
                if let Some(old_entry) = self.hist_entries.reclaim(old_slot) {
                    if let Some(owner) = self.sent_commands.get_mut(old_entry.owner) {
                        owner.hist_slot = None;
                    }
                }
            }
        }

        let cmd_len = cmd.wire_size();
        let sent_cmd_slot = self.sent_commands.push(SentCommand { prio, hist_slot: None });
        let hist_slot = self.hist_entries.push(HistEntry { cmd, owner: sent_cmd_slot });
        self.sent_commands.get_mut(sent_cmd_slot).expect("just inserted").hist_slot = Some(hist_slot);

        if let Some(key) = dedup_key {
            self.hist_index.insert(key, hist_slot);
        }

        if let Some(packet) = self.packets.get_mut(&packet_id) {
            packet.commands.push(sent_cmd_slot);
        }
        self.outstanding_bytes += cmd_len;
    }

    /// Invoked on ACK for `id` (§4.4 `remove_packet`). For each `SentCommand` still backed by a
    /// live history entry, decrements outstanding bytes, optionally emits a synthetic server-side
    /// ack command into `inbound`, and frees the history entry. Returns `false` if `id` was not
    /// found (e.g. a keep-alive packet with no commands).
    pub fn remove_packet(&mut self, id: u32, inbound: &mut InboundQueue, is_server: bool) -> bool {
        let packet = match self.packets.remove(&id) {
            Some(p) => p,
            None => return false,
        };

        for sent_cmd_slot in packet.commands {
            let sent_cmd = match self.sent_commands.reclaim(sent_cmd_slot) {
                Some(sc) => sc,
                None => continue,
            };
            let hist_slot = match sent_cmd.hist_slot {
                Some(slot) => slot,
                None => continue, // already obsoleted by a newer command
            };
            let entry = match self.hist_entries.reclaim(hist_slot) {
                Some(e) => e,
                None => continue,
            };

            self.outstanding_bytes -= entry.cmd.wire_size();

            if let Some(key) = entry.cmd.address_key() {
                self.hist_index.remove(&key);
            }

            if is_server {
                if let Some(ack) = server_ack_for(&entry.cmd) {
                    inbound.push(ack);
                }
            }
        }

        true
    }

    /// Invoked on NAK for `id` (§4.4 `resend_packet`). For each `SentCommand` still backed by a
    /// live history entry, requeues its command at the head of `out_queue` at its original
    /// priority; `OutboundQueue::push_head` silently drops the resend if a newer equi-addressed
    /// command has since superseded it. Returns `false` if `id` was not found.
    pub fn resend_packet(&mut self, id: u32, out_queue: &mut OutboundQueue) -> bool {
        let packet = match self.packets.remove(&id) {
            Some(p) => p,
            None => return false,
        };

        for sent_cmd_slot in packet.commands {
            let sent_cmd = match self.sent_commands.reclaim(sent_cmd_slot) {
                Some(sc) => sc,
                None => continue,
            };
            let hist_slot = match sent_cmd.hist_slot {
                Some(slot) => slot,
                None => continue,
            };
            let entry = match self.hist_entries.reclaim(hist_slot) {
                Some(e) => e,
                None => continue,
            };

            self.outstanding_bytes -= entry.cmd.wire_size();
            if let Some(key) = entry.cmd.address_key() {
                self.hist_index.remove(&key);
            }

            out_queue.push_head(sent_cmd.prio, entry.cmd);
        }

        true
    }
}

/// Builds the synthetic server-side ack command for a durably-acknowledged create/destroy
/// command, reading the exact payload offsets `v_packet_history_rem_packet` reads (§4.4 ADDED).
/// Returns `None` for opcodes that carry no synthetic ack (everything but the eight
/// create/destroy commands this mirrors).
fn server_ack_for(cmd: &Command) -> Option<Command> {
    let p = &cmd.payload;
    match cmd.opcode {
        32 => Some(fake::node_create_ack(BigEndian::read_u32(&p[6..10]))),
        33 => Some(fake::node_destroy_ack(BigEndian::read_u32(&p[0..4]))),
        64 => Some(fake::taggroup_create_ack(
            BigEndian::read_u32(&p[0..4]),
            BigEndian::read_u16(&p[4..6]),
        )),
        65 => Some(fake::taggroup_destroy_ack(
            BigEndian::read_u32(&p[0..4]),
            BigEndian::read_u16(&p[4..6]),
        )),
        68 => Some(fake::tag_create_ack(
            BigEndian::read_u32(&p[0..4]),
            BigEndian::read_u16(&p[4..6]),
            BigEndian::read_u16(&p[6..8]),
        )),
        69 => Some(fake::tag_destroy_ack(
            BigEndian::read_u32(&p[0..4]),
            BigEndian::read_u16(&p[4..6]),
            BigEndian::read_u16(&p[6..8]),
        )),
        128 => Some(fake::layer_create_ack(
            BigEndian::read_u32(&p[0..4]),
            BigEndian::read_u16(&p[6..8]),
        )),
        129 => Some(fake::layer_destroy_ack(
            BigEndian::read_u32(&p[0..4]),
            BigEndian::read_u16(&p[4..6]),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbound::IN_QUEUE_DEFAULT_MAX_SIZE;
    use crate::outbound::OUT_QUEUE_DEFAULT_MAX_SIZE;

    fn node_priority(node_id: u32, prio: u8) -> Command {
        let mut payload = Vec::new();
        payload.extend_from_slice(&node_id.to_be_bytes());
        payload.push(prio);
        Command::new(43, payload)
    }

    fn node_destroy(node_id: u32) -> Command {
        Command::new(33, node_id.to_be_bytes().to_vec())
    }

    fn node_create(user: u16, parent: u32, node: u32, kind: u16) -> Command {
        let mut payload = Vec::new();
        payload.extend_from_slice(&user.to_be_bytes());
        payload.extend_from_slice(&parent.to_be_bytes());
        payload.extend_from_slice(&node.to_be_bytes());
        payload.extend_from_slice(&kind.to_be_bytes());
        Command::new(32, payload)
    }

    #[test]
    fn test_s4_nak_resend_with_obsoletion() {
        let mut history = PacketHistory::new();
        let mut out = OutboundQueue::new(OUT_QUEUE_DEFAULT_MAX_SIZE);

        history.add_packet(1);
        history.add_cmd(1, node_priority(0xdead_beef, 10), 9);

        // Before P1 is ACK'd, a newer command for the same node obsoletes the P1 entry.
        history.add_packet(2);
        history.add_cmd(2, node_priority(0xdead_beef, 20), 9);

        // A NAK for P1 must resend nothing: its sole command was obsoleted.
        let mut inbound = InboundQueue::new(IN_QUEUE_DEFAULT_MAX_SIZE);
        let _ = &mut inbound;
        let found = history.resend_packet(1, &mut out);
        assert!(found);
        assert_eq!(out.count(), 0);

        // P2's ack does fire normally.
        let mut in_q = InboundQueue::new(IN_QUEUE_DEFAULT_MAX_SIZE);
        assert!(history.remove_packet(2, &mut in_q, false));
        assert_eq!(history.outstanding_bytes(), 0);
    }

    #[test]
    fn test_nak_resend_without_obsoletion_requeues() {
        let mut history = PacketHistory::new();
        let mut out = OutboundQueue::new(OUT_QUEUE_DEFAULT_MAX_SIZE);

        history.add_packet(1);
        history.add_cmd(1, node_destroy(7), 9);

        assert!(history.resend_packet(1, &mut out));
        assert_eq!(out.count_prio(9), 1);
        let (cmd, _) = out.pop(9, 0).unwrap();
        assert_eq!(cmd.opcode, 33);
    }

    #[test]
    fn test_remove_packet_emits_server_ack() {
        let mut history = PacketHistory::new();
        let mut inbound = InboundQueue::new(IN_QUEUE_DEFAULT_MAX_SIZE);

        history.add_packet(1);
        history.add_cmd(1, node_create(1001, 1, 501, 301), 128);

        assert!(history.remove_packet(1, &mut inbound, true));
        let fake_ack = inbound.pop().unwrap();
        assert_eq!(fake_ack.opcode, fake::op::NODE_CREATE_ACK);
        assert_eq!(fake_ack.payload, 501u32.to_be_bytes().to_vec());
    }

    #[test]
    fn test_remove_packet_without_server_role_emits_nothing() {
        let mut history = PacketHistory::new();
        let mut inbound = InboundQueue::new(IN_QUEUE_DEFAULT_MAX_SIZE);

        history.add_packet(1);
        history.add_cmd(1, node_create(1001, 1, 501, 301), 128);

        assert!(history.remove_packet(1, &mut inbound, false));
        assert!(inbound.pop().is_none());
    }

    #[test]
    fn test_remove_unknown_packet_returns_false() {
        let mut history = PacketHistory::new();
        let mut inbound = InboundQueue::new(IN_QUEUE_DEFAULT_MAX_SIZE);
        assert!(!history.remove_packet(999, &mut inbound, false));
    }

    #[test]
    fn test_s5_ack_nak_compression() {
        let mut history = AckNakHistory::new();
        history.add_cmd(AckNakKind::Ack, 5);
        history.add_cmd(AckNakKind::Ack, 6);
        history.add_cmd(AckNakKind::Ack, 7);
        history.add_cmd(AckNakKind::Nak, 8);
        history.add_cmd(AckNakKind::Ack, 9);
        history.add_cmd(AckNakKind::Ack, 10);

        let boundaries: Vec<_> = history.boundaries().collect();
        assert_eq!(
            boundaries,
            vec![(AckNakKind::Ack, 7), (AckNakKind::Nak, 8), (AckNakKind::Ack, 10)]
        );

        history.remove_cmds(7);
        let boundaries: Vec<_> = history.boundaries().collect();
        assert_eq!(boundaries, vec![(AckNakKind::Nak, 8), (AckNakKind::Ack, 10)]);

        history.remove_cmds(10);
        assert!(history.is_empty());
    }
}
