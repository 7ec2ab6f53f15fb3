//! The `Command` value type (§3 "Command (Generic)") and `Address`, its deduplication/sharing
//! key.
use crate::descriptor::{descriptor, Descriptor};

/// Largest `key_size` across the whole descriptor table; `Address` inlines its bytes up to this
/// bound instead of heap-allocating one small buffer per command.
pub const MAX_ADDRESS_LEN: usize = 16;

/// The leading `key_size` bytes of a command's payload (§3 "Address").
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct Address {
    len: u8,
    bytes: [u8; MAX_ADDRESS_LEN],
}

impl Address {
    pub fn from_slice(slice: &[u8]) -> Address {
        debug_assert!(slice.len() <= MAX_ADDRESS_LEN, "address exceeds inline capacity");
        let mut bytes = [0u8; MAX_ADDRESS_LEN];
        bytes[..slice.len()].copy_from_slice(slice);
        Address {
            len: slice.len() as u8,
            bytes,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Length of the common prefix between `self` and `other`, capped at `max`.
    pub fn common_prefix(&self, other: &Address, max: usize) -> usize {
        let max = max.min(self.len()).min(other.len());
        self.bytes[..max]
            .iter()
            .zip(other.bytes[..max].iter())
            .take_while(|(a, b)| a == b)
            .count()
    }
}

/// A full key for per-opcode maps: opcodes never compare equal across different wire commands, so
/// a command is address-equal to another only when both opcode and address bytes match (§3).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct AddressKey {
    pub opcode: u8,
    pub address: Address,
}

/// A tagged command record: opcode plus an owned byte payload whose layout the descriptor table
/// defines. Commands are value-owned by whichever queue or buffer currently holds them.
#[derive(Clone, Debug)]
pub struct Command {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

impl Command {
    pub fn new(opcode: u8, payload: Vec<u8>) -> Command {
        Command { opcode, payload }
    }

    pub fn descriptor(&self) -> Option<&'static Descriptor> {
        descriptor(self.opcode)
    }

    /// The address this command carries, or `None` for 0-key-size opcodes (system/fake commands
    /// that have no unique identity to dedup or share on).
    pub fn address(&self) -> Option<Address> {
        let d = self.descriptor()?;
        if d.key_size == 0 {
            return None;
        }
        Some(Address::from_slice(&self.payload[..d.key_size as usize]))
    }

    pub fn address_key(&self) -> Option<AddressKey> {
        self.address().map(|address| AddressKey {
            opcode: self.opcode,
            address,
        })
    }

    /// Total on-wire size of this command's data (excluding the shared opcode byte but including
    /// its full address, i.e. `key_size` as if `share == 0`).
    pub fn wire_size(&self) -> usize {
        self.payload.len()
    }
}
