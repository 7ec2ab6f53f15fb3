//! Synthetic "FAKE" commands (§3 GLOSSARY: "opcode < 32, synthesized locally to deliver events
//! ... across the queue boundary; never on the wire"). These are produced directly by
//! `Session`/`PacketHistory`/the stream loop and pushed straight into an `InboundQueue` — they
//! never pass through `descriptor::descriptor`, `codec::pack_run`, or the outbound queue, so they
//! carry no descriptor entry and no address-dedup/sharing behavior (§4.1 policy: "FAKE commands
//! ... must never reach the packer").
//!
//! Opcode values below intentionally reuse the same byte range as the real system wire commands
//! (1..9); the two spaces never mix because fake commands are constructed here and consumed by
//! the application's `Dispatcher::update`, while wire commands are constructed by `codec`.
use crate::command::Command;
use byteorder::{BigEndian, ByteOrder};

/// Client-local synthetic opcodes (§3: "0..15 client-local synthetic commands").
pub mod op {
    pub const CONNECT_ACCEPT: u8 = 0;
    pub const CONNECT_TERMINATE: u8 = 1;
    pub const USER_AUTHENTICATE: u8 = 2;
    pub const FPS: u8 = 3;
    pub const SECURITY_INFO: u8 = 4;

    /// Server-local synthetic opcodes (§3: "16..31 server-local synthetic commands"), emitted by
    /// `PacketHistory::remove_packet` (§4.4 ADDED) when a create/destroy command is durably
    /// acknowledged.
    pub const NODE_CREATE_ACK: u8 = 16;
    pub const NODE_DESTROY_ACK: u8 = 17;
    pub const TAGGROUP_CREATE_ACK: u8 = 20;
    pub const TAGGROUP_DESTROY_ACK: u8 = 21;
    pub const TAG_CREATE_ACK: u8 = 22;
    pub const TAG_DESTROY_ACK: u8 = 23;
    pub const LAYER_CREATE_ACK: u8 = 24;
    pub const LAYER_DESTROY_ACK: u8 = 25;
}

/// Reason codes carried by `connect_terminate` (§6 "Terminate reason codes").
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TerminateReason {
    Reserved = 0,
    HostUnknown = 1,
    HostDown = 2,
    ServerDown = 3,
    AuthFailed = 4,
    Timeout = 5,
    Error = 6,
    ClientTerminate = 7,
    ServerTerminate = 8,
}

/// The fake command delivered on session termination (§5 "a synthetic connect-terminate command
/// is delivered to the application's inbound"), regardless of which of the four terminating
/// conditions triggered it.
pub fn connect_terminate(reason: TerminateReason) -> Command {
    Command::new(op::CONNECT_TERMINATE, vec![reason as u8])
}

pub fn connect_accept(session_id: u16, user_id: u32) -> Command {
    let mut payload = vec![0u8; 6];
    BigEndian::write_u16(&mut payload[0..2], session_id);
    BigEndian::write_u32(&mut payload[2..6], user_id);
    Command::new(op::CONNECT_ACCEPT, payload)
}

pub fn fps(value: f32, peer: u32, host_desired: u32) -> Command {
    let mut payload = vec![0u8; 12];
    BigEndian::write_f32(&mut payload[0..4], value);
    BigEndian::write_u32(&mut payload[4..8], peer);
    BigEndian::write_u32(&mut payload[8..12], host_desired);
    Command::new(op::FPS, payload)
}

fn u32_cmd(opcode: u8, node_id: u32) -> Command {
    Command::new(opcode, node_id.to_be_bytes().to_vec())
}

fn u32_u16_cmd(opcode: u8, node_id: u32, group_id: u16) -> Command {
    let mut payload = vec![0u8; 6];
    BigEndian::write_u32(&mut payload[0..4], node_id);
    BigEndian::write_u16(&mut payload[4..6], group_id);
    Command::new(opcode, payload)
}

fn u32_u16_u16_cmd(opcode: u8, node_id: u32, group_id: u16, tag_id: u16) -> Command {
    let mut payload = vec![0u8; 8];
    BigEndian::write_u32(&mut payload[0..4], node_id);
    BigEndian::write_u16(&mut payload[4..6], group_id);
    BigEndian::write_u16(&mut payload[6..8], tag_id);
    Command::new(opcode, payload)
}

/// Per `examples/original_source/src/common/v_history.c`'s `v_packet_history_rem_packet`, the
/// node id of a `node_create_ack` is read from the freshly-acknowledged `node_create` command's
/// `node_id` field, not its address — node_create's address is `(user_id, parent_id)`.
pub fn node_create_ack(node_id: u32) -> Command {
    u32_cmd(op::NODE_CREATE_ACK, node_id)
}

pub fn node_destroy_ack(node_id: u32) -> Command {
    u32_cmd(op::NODE_DESTROY_ACK, node_id)
}

pub fn taggroup_create_ack(node_id: u32, group_id: u16) -> Command {
    u32_u16_cmd(op::TAGGROUP_CREATE_ACK, node_id, group_id)
}

pub fn taggroup_destroy_ack(node_id: u32, group_id: u16) -> Command {
    u32_u16_cmd(op::TAGGROUP_DESTROY_ACK, node_id, group_id)
}

pub fn tag_create_ack(node_id: u32, group_id: u16, tag_id: u16) -> Command {
    u32_u16_u16_cmd(op::TAG_CREATE_ACK, node_id, group_id, tag_id)
}

pub fn tag_destroy_ack(node_id: u32, group_id: u16, tag_id: u16) -> Command {
    u32_u16_u16_cmd(op::TAG_DESTROY_ACK, node_id, group_id, tag_id)
}

pub fn layer_create_ack(node_id: u32, layer_id: u16) -> Command {
    u32_u16_cmd(op::LAYER_CREATE_ACK, node_id, layer_id)
}

pub fn layer_destroy_ack(node_id: u32, layer_id: u16) -> Command {
    u32_u16_cmd(op::LAYER_DESTROY_ACK, node_id, layer_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_terminate_carries_reason() {
        let cmd = connect_terminate(TerminateReason::Timeout);
        assert_eq!(cmd.opcode, op::CONNECT_TERMINATE);
        assert_eq!(cmd.payload, vec![5]);
    }

    #[test]
    fn test_fake_opcodes_never_have_a_wire_descriptor() {
        use crate::descriptor::descriptor;
        assert!(descriptor(op::CONNECT_TERMINATE).is_none());
        assert!(descriptor(op::NODE_CREATE_ACK).is_none());
    }

    #[test]
    fn test_taggroup_create_ack_layout() {
        let cmd = taggroup_create_ack(10000, 3);
        assert_eq!(cmd.payload[0..4], 10000u32.to_be_bytes());
        assert_eq!(cmd.payload[4..6], 3u16.to_be_bytes());
    }
}
