//! The opcode descriptor table (§4.1, §6). Every real wire opcode — system (1..9) and
//! node/taggroup/tag/layer (32..255) — has exactly one entry here describing its address (key)
//! layout, its flags, and its payload item layout. FAKE opcodes (< 32, see `crate::fake`) are
//! deliberately absent: they never reach the codec and share numeric values with the system
//! commands. The codec, the inbound/outbound queues and the dispatcher all consult this table
//! instead of switching on the opcode directly, mirroring the typed accessor layer called for in
//! the design notes.
use crate::wire::ValueKind;
use lazy_static::lazy_static;

/// Bit flags from the original `Cmd_Struct.flag` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdFlags(u8);

impl CmdFlags {
    pub const NODE_CMD: CmdFlags = CmdFlags(1);
    pub const SHARE_ADDR: CmdFlags = CmdFlags(4);
    pub const REM_DUP: CmdFlags = CmdFlags(8);
    pub const VAR_LEN: CmdFlags = CmdFlags(16);
    pub const NONE: CmdFlags = CmdFlags(0);

    pub const fn union(self, other: CmdFlags) -> CmdFlags {
        CmdFlags(self.0 | other.0)
    }

    #[inline]
    pub fn contains(self, flag: CmdFlags) -> bool {
        self.0 & flag.0 == flag.0
    }
}

impl std::ops::BitOr for CmdFlags {
    type Output = CmdFlags;
    fn bitor(self, rhs: CmdFlags) -> CmdFlags {
        self.union(rhs)
    }
}

/// One field of a command's payload.
#[derive(Debug, Clone, Copy)]
pub struct Item {
    pub kind: ValueKind,
    pub offset: u8,
}

/// Descriptor for a single opcode.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub opcode: u8,
    pub name: &'static str,
    pub flags: CmdFlags,
    /// Number of leading payload bytes that form the address.
    pub key_size: u8,
    /// How many of `items` fall within the address (`items[..key_count]`).
    pub key_count: u8,
    pub items: Vec<Item>,
    /// Fixed payload size; for `VAR_LEN` opcodes this is the size excluding the trailing
    /// variable-length field.
    pub fixed_size: usize,
}

impl Descriptor {
    pub fn is_node_cmd(&self) -> bool {
        self.flags.contains(CmdFlags::NODE_CMD)
    }

    pub fn share_addr(&self) -> bool {
        self.flags.contains(CmdFlags::SHARE_ADDR)
    }

    pub fn rem_dup(&self) -> bool {
        self.flags.contains(CmdFlags::REM_DUP)
    }

    pub fn var_len(&self) -> bool {
        self.flags.contains(CmdFlags::VAR_LEN)
    }
}

fn item(kind: ValueKind, offset: u8) -> Item {
    Item { kind, offset }
}

fn fixed_size_of(items: &[Item]) -> usize {
    items
        .iter()
        .map(|it| it.kind.fixed_size().unwrap_or(0))
        .sum()
}

fn simple(
    opcode: u8,
    name: &'static str,
    flags: CmdFlags,
    key_count: u8,
    items: Vec<Item>,
) -> Descriptor {
    let key_size: u8 = items[..key_count as usize]
        .iter()
        .map(|it| it.kind.fixed_size().unwrap_or(0) as u8)
        .sum();
    let fixed_size = fixed_size_of(&items);
    Descriptor {
        opcode,
        name,
        flags,
        key_size,
        key_count,
        items,
        fixed_size,
    }
}

/// Order the `tag_set`/`layer_set` families are laid out in by `build_set_family`: opcode =
/// `first_opcode + kind_index * 4 + (arity - 1)`. Exposed so `crate::api` can compute an opcode
/// for a requested (kind, arity) pair without re-deriving the table by hand.
pub const NUMERIC_KINDS: [ValueKind; 7] = [
    ValueKind::U8,
    ValueKind::U16,
    ValueKind::U32,
    ValueKind::U64,
    ValueKind::R16,
    ValueKind::R32,
    ValueKind::R64,
];

/// Builds the `tag_set`/`layer_set` family of opcodes: 4 arities (1..=4 components) times 7
/// numeric kinds, addressed the same way as their parent `destroy`/`unset` opcode.
fn build_set_family(
    first_opcode: u8,
    name_prefix: &'static str,
    key_items: &[Item],
) -> Vec<Descriptor> {
    let mut out = Vec::with_capacity(28);
    let mut opcode = first_opcode;

    for kind in NUMERIC_KINDS.iter() {
        for arity in 1..=4u8 {
            let mut items: Vec<Item> = key_items.to_vec();
            let mut offset = key_items
                .last()
                .map(|it| it.offset + it.kind.fixed_size().unwrap_or(0) as u8)
                .unwrap_or(0);
            let size = kind.fixed_size().unwrap() as u8;
            for _ in 0..arity {
                items.push(item(*kind, offset));
                offset += size;
            }
            out.push(simple(
                opcode,
                name_prefix,
                CmdFlags::NODE_CMD | CmdFlags::REM_DUP,
                key_items.len() as u8,
                items,
            ));
            opcode += 1;
        }
    }

    out
}

fn build_table() -> Vec<Option<Descriptor>> {
    let mut table: Vec<Option<Descriptor>> = (0..=255).map(|_| None).collect();
    let mut put = |d: Descriptor| {
        let op = d.opcode as usize;
        table[op] = Some(d);
    };

    // Note: FAKE commands (opcode < 32, never transmitted) draw from the same low end of the u8
    // range as the system wire commands below and are therefore NOT entered into this table —
    // `fake_connect_terminate` (id 1) would otherwise collide with `ack` (id 1), etc. Fake
    // commands are synthesized straight into an `InboundQueue` by `crate::fake` and never pass
    // through `descriptor()`, the codec, or the outbound queue's dedup/sharing machinery.

    // --- System commands (§6) ---
    put(simple(1, "ack", CmdFlags::NONE, 0, vec![item(ValueKind::U32, 0)]));
    put(simple(2, "nak", CmdFlags::NONE, 0, vec![item(ValueKind::U32, 0)]));
    put(simple(3, "change_l", CmdFlags::NONE, 1,
        vec![item(ValueKind::U8, 0), item(ValueKind::R32, 1)]));
    put(simple(4, "change_r", CmdFlags::NONE, 1,
        vec![item(ValueKind::U8, 0), item(ValueKind::R32, 1)]));
    put(simple(5, "confirm_l", CmdFlags::NONE, 1,
        vec![item(ValueKind::U8, 0), item(ValueKind::R32, 1)]));
    put(simple(6, "confirm_r", CmdFlags::NONE, 1,
        vec![item(ValueKind::U8, 0), item(ValueKind::R32, 1)]));
    put(simple(7, "user_auth_request", CmdFlags::VAR_LEN, 0, vec![item(ValueKind::U8, 0)]));
    put(simple(8, "user_auth_failure", CmdFlags::NONE, 0, vec![item(ValueKind::U8, 0)]));
    put(simple(9, "user_auth_success", CmdFlags::NONE, 0,
        vec![item(ValueKind::U64, 0), item(ValueKind::U32, 8)]));

    // --- Node commands (32..43), opcode 36 is an unused gap in the source table ---
    put(simple(32, "node_create", CmdFlags::NODE_CMD | CmdFlags::SHARE_ADDR, 2,
        vec![item(ValueKind::U16, 0), item(ValueKind::U32, 2), item(ValueKind::U32, 6), item(ValueKind::U16, 10)]));
    put(simple(33, "node_destroy", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 1,
        vec![item(ValueKind::U32, 0)]));
    put(simple(34, "node_subscribe", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 1,
        vec![item(ValueKind::U32, 0), item(ValueKind::U32, 4), item(ValueKind::U32, 8)]));
    put(simple(35, "node_unsubscribe", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 1,
        vec![item(ValueKind::U32, 0), item(ValueKind::U32, 4), item(ValueKind::U32, 8)]));
    put(simple(37, "node_link", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 1,
        vec![item(ValueKind::U32, 0), item(ValueKind::U32, 4)]));
    put(simple(38, "node_permission", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 2,
        vec![item(ValueKind::U32, 0), item(ValueKind::U16, 4), item(ValueKind::U8, 6)]));
    put(simple(39, "default_permission", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 1,
        vec![item(ValueKind::U32, 0), item(ValueKind::U8, 4)]));
    put(simple(40, "node_owner", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 1,
        vec![item(ValueKind::U32, 0), item(ValueKind::U16, 4)]));
    put(simple(41, "node_lock", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 1,
        vec![item(ValueKind::U32, 0), item(ValueKind::U32, 4)]));
    put(simple(42, "node_unlock", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 1,
        vec![item(ValueKind::U32, 0), item(ValueKind::U32, 4)]));
    put(simple(43, "node_priority", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 1,
        vec![item(ValueKind::U32, 0), item(ValueKind::U8, 4)]));

    // --- TagGroup commands (64..67) ---
    put(simple(64, "taggroup_create", CmdFlags::NODE_CMD | CmdFlags::SHARE_ADDR, 1,
        vec![item(ValueKind::U32, 0), item(ValueKind::U16, 4)]));
    put(simple(65, "taggroup_destroy", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 2,
        vec![item(ValueKind::U32, 0), item(ValueKind::U16, 4)]));
    put(simple(66, "taggroup_subscribe", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 2,
        vec![item(ValueKind::U32, 0), item(ValueKind::U16, 4)]));
    put(simple(67, "taggroup_unsubscribe", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 2,
        vec![item(ValueKind::U32, 0), item(ValueKind::U16, 4)]));

    // --- Tag commands (68..98) ---
    put(simple(68, "tag_create", CmdFlags::NODE_CMD | CmdFlags::SHARE_ADDR, 2,
        vec![item(ValueKind::U32, 0), item(ValueKind::U16, 4), item(ValueKind::U16, 6), item(ValueKind::U8, 8)]));
    put(simple(69, "tag_destroy", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 3,
        vec![item(ValueKind::U32, 0), item(ValueKind::U16, 4), item(ValueKind::U16, 6)]));

    let tag_key = vec![item(ValueKind::U32, 0), item(ValueKind::U16, 4), item(ValueKind::U16, 6)];
    for d in build_set_family(70, "tag_set", &tag_key) {
        put(d);
    }
    put(simple(98, "tag_set_string8", CmdFlags::NODE_CMD | CmdFlags::REM_DUP | CmdFlags::VAR_LEN, 3,
        tag_key.clone()));

    // --- Layer commands (128..160) ---
    put(simple(128, "layer_create", CmdFlags::NODE_CMD | CmdFlags::SHARE_ADDR, 2,
        vec![item(ValueKind::U32, 0), item(ValueKind::U16, 4), item(ValueKind::U16, 6), item(ValueKind::U8, 8), item(ValueKind::U8, 9), item(ValueKind::U16, 10)]));
    put(simple(129, "layer_destroy", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 2,
        vec![item(ValueKind::U32, 0), item(ValueKind::U16, 4)]));
    put(simple(130, "layer_subscribe", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 2,
        vec![item(ValueKind::U32, 0), item(ValueKind::U16, 4)]));
    put(simple(131, "layer_unsubscribe", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 2,
        vec![item(ValueKind::U32, 0), item(ValueKind::U16, 4)]));

    let layer_key = vec![item(ValueKind::U32, 0), item(ValueKind::U16, 4), item(ValueKind::U32, 6)];
    put(simple(132, "layer_unset_value", CmdFlags::NODE_CMD | CmdFlags::REM_DUP, 3, layer_key.clone()));

    for d in build_set_family(133, "layer_set", &layer_key) {
        put(d);
    }

    table
}

lazy_static! {
    static ref DESCRIPTORS: Vec<Option<Descriptor>> = build_table();
}

/// Looks up the descriptor for `opcode`, or `None` for unassigned/reserved opcodes.
pub fn descriptor(opcode: u8) -> Option<&'static Descriptor> {
    DESCRIPTORS[opcode as usize].as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_create_key_size() {
        let d = descriptor(32).unwrap();
        assert_eq!(d.key_size, 6); // user_id(2) + parent_id(4)
        assert!(!d.rem_dup());
        assert!(d.share_addr());
    }

    #[test]
    fn test_node_destroy_rem_dup() {
        let d = descriptor(33).unwrap();
        assert_eq!(d.key_size, 4);
        assert!(d.rem_dup());
    }

    #[test]
    fn test_tag_set_family_populated() {
        for opcode in 70..=97u8 {
            assert!(descriptor(opcode).is_some(), "opcode {} missing", opcode);
        }
        let d = descriptor(77).unwrap(); // tag_set_vec4_uint16
        assert_eq!(d.fixed_size, 8 /* key */ + 8 /* 4 * u16 */);
    }

    #[test]
    fn test_layer_set_family_has_no_string_variant() {
        assert!(descriptor(160).is_some());
        assert!(descriptor(161).is_none());
    }

    #[test]
    fn test_unknown_opcode_is_none() {
        assert!(descriptor(36).is_none());
        assert!(descriptor(200).is_none());
    }

    #[test]
    fn test_fake_opcode_range_has_no_wire_descriptor_except_ack_nak() {
        // Opcodes 0 and 10..15 are reserved/unassigned on the wire; fake commands live here but
        // are never looked up through this table (see `crate::fake`).
        assert!(descriptor(0).is_none());
        assert!(descriptor(10).is_none());
        assert!(descriptor(15).is_none());
        assert!(descriptor(16).is_none());
        assert!(descriptor(25).is_none());
        // 1..9 are real system wire commands and must resolve normally.
        assert_eq!(descriptor(1).unwrap().name, "ack");
    }
}
