//! Message framing (§4.5 step 1, §6 "Wire framing"): the fixed-size header that precedes every
//! message body (zero or more system commands, then zero or more node commands, both packed with
//! the length-header scheme of §4.1).
use crate::error::{CoreError, MalformedReason};
use byteorder::{BigEndian, ByteOrder};

/// `version(1) + flags(1) + length(2) + pay_id(4)`, network byte order.
pub const HEADER_SIZE: usize = 8;

pub const PROTOCOL_VERSION: u8 = 1;

/// Per-message flags. Only `ACK_REQUIRED` (the header's `pay_id` names a packet the peer should
/// acknowledge) is defined by this core; transport-level flags (TLS/compression negotiation) are
/// attached once, at connect time, to the `Session`'s `ConnectFlags` rather than repeated on every
/// frame.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MessageFlags(u8);

impl MessageFlags {
    pub const NONE: MessageFlags = MessageFlags(0);
    pub const ACK_REQUIRED: MessageFlags = MessageFlags(1);

    pub fn contains(self, other: MessageFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    pub fn from_raw(raw: u8) -> MessageFlags {
        MessageFlags(raw)
    }
}

impl std::ops::BitOr for MessageFlags {
    type Output = MessageFlags;
    fn bitor(self, rhs: MessageFlags) -> MessageFlags {
        MessageFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MessageHeader {
    pub version: u8,
    pub flags: MessageFlags,
    /// Length of the body that follows this header, in bytes.
    pub length: u16,
    /// Identifies this packet for the peer's `PacketHistory` (§4.4): the sender's own packet id,
    /// assigned the same way `StreamLoop::send` assigns ids to entries in its local history, so
    /// an ack/nak the peer sends back can name it.
    pub pay_id: u32,
}

impl MessageHeader {
    pub fn encode(self, out: &mut Vec<u8>) {
        out.push(self.version);
        out.push(self.flags.raw());
        let mut len_buf = [0u8; 2];
        BigEndian::write_u16(&mut len_buf, self.length);
        out.extend_from_slice(&len_buf);
        let mut id_buf = [0u8; 4];
        BigEndian::write_u32(&mut id_buf, self.pay_id);
        out.extend_from_slice(&id_buf);
    }

    /// Decodes the header from the front of `data` (§4.5: "Reject when the buffer is smaller than
    /// a fixed header").
    pub fn decode(data: &[u8]) -> Result<MessageHeader, CoreError> {
        if data.len() < HEADER_SIZE {
            return Err(CoreError::Malformed(MalformedReason::ShortHeader));
        }
        Ok(MessageHeader {
            version: data[0],
            flags: MessageFlags::from_raw(data[1]),
            length: BigEndian::read_u16(&data[2..4]),
            pay_id: BigEndian::read_u32(&data[4..8]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = MessageHeader {
            version: PROTOCOL_VERSION,
            flags: MessageFlags::ACK_REQUIRED,
            length: 42,
            pay_id: 7,
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);

        let decoded = MessageHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_short_buffer_is_malformed() {
        let err = MessageHeader::decode(&[1, 2, 3]).unwrap_err();
        assert_eq!(err, CoreError::Malformed(MalformedReason::ShortHeader));
    }

    #[test]
    fn test_flags_contains() {
        let flags = MessageFlags::ACK_REQUIRED;
        assert!(flags.contains(MessageFlags::ACK_REQUIRED));
        assert!(!MessageFlags::NONE.contains(MessageFlags::ACK_REQUIRED));
    }
}
