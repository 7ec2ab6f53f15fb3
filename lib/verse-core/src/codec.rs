//! Command packing and unpacking (§4.1). A "run" is a contiguous sequence of same-opcode
//! commands sharing a common address prefix of `share` bytes; `pack_run`/`unpack_run` frame
//! exactly one run at a time. The outbound queue decides run boundaries and `share`; the stream
//! loop repeatedly calls `pack_run` until its byte budget for the current pack cycle is spent,
//! and `unpack_batch` drives `unpack_run` in a loop over an entire received message body.
use crate::command::Command;
use crate::descriptor::{descriptor, Descriptor};
use crate::error::{CoreError, MalformedReason};
use crate::inbound::InboundQueue;
use crate::wire;

/// The on-wire byte count of a run of `count` same-opcode commands sharing `share` leading
/// address bytes, without having to hold the commands themselves — used by the outbound queue's
/// run tracker (§3 "OutCommand ... shared counters {count, share, len}") to cost out a run as
/// commands are appended or popped.
pub fn run_packed_len(descriptor: &Descriptor, count: u16, share: u8) -> u16 {
    let key_size = descriptor.key_size as usize;
    let share = (share as usize).min(key_size);
    let item_size = descriptor.fixed_size - key_size;
    let body_len = share + (count as usize) * (key_size - share + item_size);
    let total_len = (body_len + 1) as u16; // +1 for the opcode byte.
    (wire::header_size(total_len) + 1 + body_len) as u16
}

/// Packs `commands` (all same opcode, sharing `share` leading address bytes) into `out`.
/// Returns the number of bytes appended.
///
/// `commands` must be non-empty. System wire commands (opcodes 1..9) and node/taggroup/tag/layer
/// commands (32..255) both have descriptor rows and both pack the same way; a pure FAKE command
/// (one with no descriptor row at all — §4.1 policy: "FAKE commands ... must never reach the
/// packer") is caught below as `UnknownOpcode`, not by a numeric range check, since FAKE opcodes
/// happen to alias the same byte range as the system wire commands (see `crate::fake`).
pub fn pack_run(out: &mut Vec<u8>, opcode: u8, share: u8, commands: &[&Command]) -> Result<usize, CoreError> {
    debug_assert!(!commands.is_empty());

    let descriptor = descriptor(opcode)
        .ok_or(CoreError::Malformed(MalformedReason::UnknownOpcode(opcode)))?;

    let key_size = descriptor.key_size as usize;
    let share = (share as usize).min(key_size) as u8;

    // body = shared prefix once, plus for each command: (key_size - share) suffix bytes + data.
    let mut body = Vec::new();
    if share > 0 {
        body.extend_from_slice(&commands[0].payload[..share as usize]);
    }
    for cmd in commands {
        body.extend_from_slice(&cmd.payload[share as usize..]);
    }

    let total_len = (body.len() + 1) as u16; // +1 for the opcode byte, per §4.1 step 2-3.
    let header_size = wire::write_header(out, total_len, share);
    out.push(opcode);
    out.extend_from_slice(&body);

    Ok(header_size + 1 + body.len())
}

/// Unpacks one run from the front of `data`, pushing each reconstructed command into
/// `inbound`. Returns the number of bytes consumed.
pub fn unpack_run(data: &[u8], inbound: &mut InboundQueue) -> Result<usize, CoreError> {
    let (length, share, header_size) = wire::read_header(data)?;

    let total = header_size + length as usize; // length already counts the opcode byte.
    if data.len() < total {
        return Err(CoreError::Malformed(MalformedReason::Truncated));
    }

    let opcode = *data
        .get(header_size)
        .ok_or(CoreError::Malformed(MalformedReason::Truncated))?;

    let descriptor = descriptor(opcode)
        .ok_or(CoreError::Malformed(MalformedReason::UnknownOpcode(opcode)))?;

    let key_size = descriptor.key_size as usize;
    let share = share as usize;
    if share > key_size {
        return Err(CoreError::Malformed(MalformedReason::BadLengthHeader));
    }

    let body_start = header_size + 1;
    let body_end = header_size + length as usize;
    let body = &data[body_start..body_end];

    let shared_prefix = &body[..share];
    let rest = &body[share..];

    let suffix_size = key_size - share;
    let item_size = descriptor.fixed_size - key_size;

    if descriptor.var_len() {
        // Variable-length opcodes never share beyond the fixed prefix (§4.1 policy); there is
        // exactly one command per run.
        let mut payload = Vec::with_capacity(key_size + rest.len());
        payload.extend_from_slice(shared_prefix);
        payload.extend_from_slice(rest);
        inbound.push(Command::new(opcode, payload));
    } else {
        let stride = suffix_size + item_size;
        if stride == 0 || rest.len() % stride != 0 {
            return Err(CoreError::Malformed(MalformedReason::Truncated));
        }
        for chunk in rest.chunks(stride) {
            let mut payload = Vec::with_capacity(key_size + item_size);
            payload.extend_from_slice(shared_prefix);
            payload.extend_from_slice(chunk);
            inbound.push(Command::new(opcode, payload));
        }
    }

    Ok(total)
}

/// Repeatedly unpacks runs from `data` until it is exhausted, pushing every reconstructed command
/// into `inbound`. Used by the stream loop to decode a whole message body in one call.
pub fn unpack_batch(mut data: &[u8], inbound: &mut InboundQueue) -> Result<(), CoreError> {
    while !data.is_empty() {
        let consumed = unpack_run(data, inbound)?;
        data = &data[consumed..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_pack_unpack_single_command_roundtrip() {
        let cmd = node_destroy(10000);
        let mut buf = Vec::new();
        pack_run(&mut buf, 33, 0, &[&cmd]).unwrap();

        let mut inbound = InboundQueue::new(1_048_576);
        let consumed = unpack_run(&buf, &mut inbound).unwrap();
        assert_eq!(consumed, buf.len());

        let popped = inbound.pop().unwrap();
        assert_eq!(popped.opcode, 33);
        assert_eq!(popped.payload, cmd.payload);
    }

    #[test]
    fn test_pack_unpack_run_with_sharing() {
        // S2/S3: four node_create commands sharing (user_id, parent_id) = 6 bytes.
        let cmds = vec![
            node_create(1001, 1, 501, 301),
            node_create(1001, 1, 502, 302),
            node_create(1001, 1, 503, 303),
            node_create(1001, 1, 504, 304),
        ];
        let refs: Vec<&Command> = cmds.iter().collect();

        let mut buf = Vec::new();
        pack_run(&mut buf, 32, 6, &refs).unwrap();

        let mut inbound = InboundQueue::new(1_048_576);
        let consumed = unpack_run(&buf, &mut inbound).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(inbound.cmd_count(), 4);

        for original in &cmds {
            let popped = inbound.pop().unwrap();
            assert_eq!(popped.payload, original.payload);
        }
        assert!(inbound.pop().is_none());
    }

    #[test]
    fn test_unpack_batch_multiple_runs() {
        let destroy_a = node_destroy(1);
        let destroy_b = node_destroy(2);

        let mut buf = Vec::new();
        pack_run(&mut buf, 33, 0, &[&destroy_a]).unwrap();
        pack_run(&mut buf, 33, 0, &[&destroy_b]).unwrap();

        let mut inbound = InboundQueue::new(1_048_576);
        unpack_batch(&buf, &mut inbound).unwrap();
        assert_eq!(inbound.cmd_count(), 2);
    }

    #[test]
    fn test_unknown_opcode_is_malformed() {
        let mut buf = Vec::new();
        wire::write_header(&mut buf, 1, 0); // length 1: the opcode byte, no body
        buf.push(200); // unassigned opcode

        let mut inbound = InboundQueue::new(1_048_576);
        let err = unpack_run(&buf, &mut inbound).unwrap_err();
        assert_eq!(err, CoreError::Malformed(MalformedReason::UnknownOpcode(200)));
    }

    #[test]
    fn test_share_beyond_three_bytes_round_trips_through_pack_unpack() {
        // Regression: a run sharing more bytes than a clamped 2-bit wire field can hold used to
        // come back truncated to share=3 and desynchronize the whole run's reframing. tag_create
        // shares (node_id, taggroup_id) = 6 address bytes, already past the old 0..=3 clamp; three
        // distinct tag_ids under that shared prefix must all come back intact and in order.
        let tag_create = |node: u32, taggroup: u16, tag: u16, custom_type: u8| {
            let mut p = Vec::new();
            p.extend_from_slice(&node.to_be_bytes());
            p.extend_from_slice(&taggroup.to_be_bytes());
            p.extend_from_slice(&tag.to_be_bytes());
            p.push(custom_type);
            Command::new(68, p) // tag_create
        };
        let cmds = vec![
            tag_create(1, 2, 501, 1),
            tag_create(1, 2, 502, 1),
            tag_create(1, 2, 503, 1),
        ];
        let refs: Vec<&Command> = cmds.iter().collect();

        let mut buf = Vec::new();
        pack_run(&mut buf, 68, 6, &refs).unwrap(); // full (node_id, taggroup_id) = 6 bytes

        let mut inbound = InboundQueue::new(1_048_576);
        let consumed = unpack_run(&buf, &mut inbound).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(inbound.cmd_count(), 3);
        for original in &cmds {
            assert_eq!(inbound.pop().unwrap().payload, original.payload);
        }
    }
}
