//! Producer API command builders (§6 "Producer API (abstract)"): typed constructors for the
//! create/destroy/subscribe/unsubscribe/set family of node, tag group, tag and layer commands.
//! Each returns an owned `Command` ready to be handed to `Session::push`/`OutboundQueue::push_tail`
//! — constructing a command never touches a queue, matching §3 "Commands are value-owned by
//! whichever queue or buffer currently holds them".
//!
//! The fixed-arity commands (node/taggroup/layer lifecycle) are built directly from their known
//! byte layout, mirroring the descriptor table in `crate::descriptor` one field at a time. The
//! `tag_set`/`layer_set` families (4 arities × 7 numeric kinds each) are instead built generically
//! against a runtime `Value`, since hand-writing 112 near-identical functions per family would just
//! be the `build_set_family` loop unrolled by hand.
use crate::command::Command;
use crate::descriptor::NUMERIC_KINDS;
use crate::wire::ValueKind;
use byteorder::{BigEndian, ByteOrder};

#[derive(Debug, Eq, PartialEq)]
pub enum ApiError {
    /// `tag_set`/`layer_set` was called with zero or more than 4 values.
    InvalidArity,
    /// Every value in a `tag_set`/`layer_set` call must share one numeric kind.
    MixedKinds,
    /// A `String8` payload longer than 255 bytes (§6 "max string8 255 bytes").
    StringTooLong,
}

/// A numeric tag/layer value of one of the seven wire kinds (§6 "Value-type identifiers").
#[derive(Debug, Clone, Copy)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    R16(half::f16),
    R32(f32),
    R64(f64),
}

impl Value {
    fn kind(&self) -> ValueKind {
        match self {
            Value::U8(_) => ValueKind::U8,
            Value::U16(_) => ValueKind::U16,
            Value::U32(_) => ValueKind::U32,
            Value::U64(_) => ValueKind::U64,
            Value::R16(_) => ValueKind::R16,
            Value::R32(_) => ValueKind::R32,
            Value::R64(_) => ValueKind::R64,
        }
    }

    fn write_be(&self, buf: &mut Vec<u8>) {
        match *self {
            Value::U8(v) => buf.push(v),
            Value::U16(v) => {
                let mut b = [0u8; 2];
                BigEndian::write_u16(&mut b, v);
                buf.extend_from_slice(&b);
            }
            Value::U32(v) => {
                let mut b = [0u8; 4];
                BigEndian::write_u32(&mut b, v);
                buf.extend_from_slice(&b);
            }
            Value::U64(v) => {
                let mut b = [0u8; 8];
                BigEndian::write_u64(&mut b, v);
                buf.extend_from_slice(&b);
            }
            Value::R16(v) => crate::wire::write_r16(buf, v),
            Value::R32(v) => {
                let mut b = [0u8; 4];
                BigEndian::write_f32(&mut b, v);
                buf.extend_from_slice(&b);
            }
            Value::R64(v) => {
                let mut b = [0u8; 8];
                BigEndian::write_f64(&mut b, v);
                buf.extend_from_slice(&b);
            }
        }
    }
}

fn kind_index(kind: ValueKind) -> usize {
    NUMERIC_KINDS.iter().position(|k| *k == kind).expect("ValueKind always appears in NUMERIC_KINDS")
}

/// Validates a `tag_set`/`layer_set` value list and returns the opcode offset
/// (`kind_index * 4 + (arity - 1)`) to add to the family's first opcode.
fn set_family_offset(values: &[Value]) -> Result<u8, ApiError> {
    if values.is_empty() || values.len() > 4 {
        return Err(ApiError::InvalidArity);
    }
    let kind = values[0].kind();
    if !values.iter().all(|v| v.kind() == kind) {
        return Err(ApiError::MixedKinds);
    }
    Ok((kind_index(kind) * 4 + (values.len() - 1)) as u8)
}

fn u32_cmd(opcode: u8, a: u32) -> Command {
    Command::new(opcode, a.to_be_bytes().to_vec())
}

fn u32_u8_cmd(opcode: u8, a: u32, b: u8) -> Command {
    let mut p = Vec::with_capacity(5);
    p.extend_from_slice(&a.to_be_bytes());
    p.push(b);
    Command::new(opcode, p)
}

fn u32_u16_cmd(opcode: u8, a: u32, b: u16) -> Command {
    let mut p = Vec::with_capacity(6);
    p.extend_from_slice(&a.to_be_bytes());
    p.extend_from_slice(&b.to_be_bytes());
    Command::new(opcode, p)
}

fn u32_u32_cmd(opcode: u8, a: u32, b: u32) -> Command {
    let mut p = Vec::with_capacity(8);
    p.extend_from_slice(&a.to_be_bytes());
    p.extend_from_slice(&b.to_be_bytes());
    Command::new(opcode, p)
}

fn u32_u16_u8_cmd(opcode: u8, a: u32, b: u16, c: u8) -> Command {
    let mut p = Vec::with_capacity(7);
    p.extend_from_slice(&a.to_be_bytes());
    p.extend_from_slice(&b.to_be_bytes());
    p.push(c);
    Command::new(opcode, p)
}

fn u32_u32_u32_cmd(opcode: u8, a: u32, b: u32, c: u32) -> Command {
    let mut p = Vec::with_capacity(12);
    p.extend_from_slice(&a.to_be_bytes());
    p.extend_from_slice(&b.to_be_bytes());
    p.extend_from_slice(&c.to_be_bytes());
    Command::new(opcode, p)
}

// --- Node commands (32..43) ---

pub fn node_create(user_id: u16, parent_id: u32, node_id: u32, node_type: u16) -> Command {
    let mut p = Vec::with_capacity(12);
    p.extend_from_slice(&user_id.to_be_bytes());
    p.extend_from_slice(&parent_id.to_be_bytes());
    p.extend_from_slice(&node_id.to_be_bytes());
    p.extend_from_slice(&node_type.to_be_bytes());
    Command::new(32, p)
}

pub fn node_destroy(node_id: u32) -> Command {
    u32_cmd(33, node_id)
}

pub fn node_subscribe(node_id: u32, version_a: u32, version_b: u32) -> Command {
    u32_u32_u32_cmd(34, node_id, version_a, version_b)
}

pub fn node_unsubscribe(node_id: u32, version_a: u32, version_b: u32) -> Command {
    u32_u32_u32_cmd(35, node_id, version_a, version_b)
}

pub fn node_link(node_id: u32, parent_id: u32) -> Command {
    u32_u32_cmd(37, node_id, parent_id)
}

pub fn node_permission(node_id: u32, user_id: u16, perm: u8) -> Command {
    u32_u16_u8_cmd(38, node_id, user_id, perm)
}

pub fn default_permission(node_id: u32, perm: u8) -> Command {
    u32_u8_cmd(39, node_id, perm)
}

pub fn node_owner(node_id: u32, user_id: u16) -> Command {
    u32_u16_cmd(40, node_id, user_id)
}

pub fn node_lock(node_id: u32, avatar_id: u32) -> Command {
    u32_u32_cmd(41, node_id, avatar_id)
}

pub fn node_unlock(node_id: u32, avatar_id: u32) -> Command {
    u32_u32_cmd(42, node_id, avatar_id)
}

pub fn node_priority(node_id: u32, priority: u8) -> Command {
    u32_u8_cmd(43, node_id, priority)
}

// --- Tag group commands (64..67) ---

pub fn taggroup_create(node_id: u32, group_id: u16) -> Command {
    u32_u16_cmd(64, node_id, group_id)
}

pub fn taggroup_destroy(node_id: u32, group_id: u16) -> Command {
    u32_u16_cmd(65, node_id, group_id)
}

pub fn taggroup_subscribe(node_id: u32, group_id: u16) -> Command {
    u32_u16_cmd(66, node_id, group_id)
}

pub fn taggroup_unsubscribe(node_id: u32, group_id: u16) -> Command {
    u32_u16_cmd(67, node_id, group_id)
}

// --- Tag commands (68..98) ---

pub fn tag_create(node_id: u32, group_id: u16, tag_type: u16, data_type: u8) -> Command {
    let mut p = Vec::with_capacity(9);
    p.extend_from_slice(&node_id.to_be_bytes());
    p.extend_from_slice(&group_id.to_be_bytes());
    p.extend_from_slice(&tag_type.to_be_bytes());
    p.push(data_type);
    Command::new(68, p)
}

pub fn tag_destroy(node_id: u32, group_id: u16, tag_id: u16) -> Command {
    let mut p = Vec::with_capacity(8);
    p.extend_from_slice(&node_id.to_be_bytes());
    p.extend_from_slice(&group_id.to_be_bytes());
    p.extend_from_slice(&tag_id.to_be_bytes());
    Command::new(69, p)
}

fn tag_key(node_id: u32, group_id: u16, tag_id: u16) -> Vec<u8> {
    let mut p = Vec::with_capacity(8);
    p.extend_from_slice(&node_id.to_be_bytes());
    p.extend_from_slice(&group_id.to_be_bytes());
    p.extend_from_slice(&tag_id.to_be_bytes());
    p
}

/// `tag_set` (opcodes 70..97): 1..=4 same-kind numeric values.
pub fn tag_set(node_id: u32, group_id: u16, tag_id: u16, values: &[Value]) -> Result<Command, ApiError> {
    let offset = set_family_offset(values)?;
    let mut payload = tag_key(node_id, group_id, tag_id);
    for v in values {
        v.write_be(&mut payload);
    }
    Ok(Command::new(70 + offset, payload))
}

/// `tag_set_string8` (opcode 98, §6 "max string8 255 bytes").
pub fn tag_set_string8(node_id: u32, group_id: u16, tag_id: u16, data: &[u8]) -> Result<Command, ApiError> {
    if data.len() > crate::defaults::MAX_STRING8_LEN {
        return Err(ApiError::StringTooLong);
    }
    let mut payload = tag_key(node_id, group_id, tag_id);
    crate::wire::write_string8(&mut payload, data);
    Ok(Command::new(98, payload))
}

// --- Layer commands (128..160) ---

pub fn layer_create(
    node_id: u32,
    parent_layer_id: u16,
    data_type: u16,
    value_type: u8,
    count: u8,
    default_layer_id: u16,
) -> Command {
    let mut p = Vec::with_capacity(12);
    p.extend_from_slice(&node_id.to_be_bytes());
    p.extend_from_slice(&parent_layer_id.to_be_bytes());
    p.extend_from_slice(&data_type.to_be_bytes());
    p.push(value_type);
    p.push(count);
    p.extend_from_slice(&default_layer_id.to_be_bytes());
    Command::new(128, p)
}

pub fn layer_destroy(node_id: u32, layer_id: u16) -> Command {
    u32_u16_cmd(129, node_id, layer_id)
}

pub fn layer_subscribe(node_id: u32, layer_id: u16) -> Command {
    u32_u16_cmd(130, node_id, layer_id)
}

pub fn layer_unsubscribe(node_id: u32, layer_id: u16) -> Command {
    u32_u16_cmd(131, node_id, layer_id)
}

fn layer_key(node_id: u32, layer_id: u16, item_id: u32) -> Vec<u8> {
    let mut p = Vec::with_capacity(10);
    p.extend_from_slice(&node_id.to_be_bytes());
    p.extend_from_slice(&layer_id.to_be_bytes());
    p.extend_from_slice(&item_id.to_be_bytes());
    p
}

pub fn layer_unset_value(node_id: u32, layer_id: u16, item_id: u32) -> Command {
    Command::new(132, layer_key(node_id, layer_id, item_id))
}

/// `layer_set` (opcodes 133..160): 1..=4 same-kind numeric values at `item_id`.
pub fn layer_set(
    node_id: u32,
    layer_id: u16,
    item_id: u32,
    values: &[Value],
) -> Result<Command, ApiError> {
    let offset = set_family_offset(values)?;
    let mut payload = layer_key(node_id, layer_id, item_id);
    for v in values {
        v.write_be(&mut payload);
    }
    Ok(Command::new(133 + offset, payload))
}
