//! Fixed packet header, flag bits and frequency-class message ids.
//!
//! ```text
//! ┌───────┬──────────────────┬───────────┬───────────────┬──────────────┐
//! │ flags │ sequence (u32 BE)│ extra_len │ extra[..]     │ body ...     │
//! │ 1 B   │ 4 B              │ 1 B       │ extra_len B   │              │
//! └───────┴──────────────────┴───────────┴───────────────┴──────────────┘
//! ```
//!
//! The body starts with the message id, whose width depends on how often
//! the message is sent (high/medium/low frequency, or a fixed id).

use crate::error::{DecodeError, EncodeError};
use bitflags::bitflags;
use std::fmt;

/// Size of the header before any extra bytes: flags, sequence, extra length.
pub const HEADER_LEN: usize = 6;

/// Smallest datagram that can carry a message (header plus one id byte).
pub const MIN_PACKET_LEN: usize = HEADER_LEN + 1;

/// Sequence numbers wrap back to 1 once they reach this value.
pub const MAX_SEQUENCE: u32 = 0x00FF_FFFF;

bitflags! {
    /// Flag byte at the start of every datagram.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u8 {
        /// Body is zero-coded.
        const ZEROCODED = 0x80;
        /// Receiver must acknowledge this sequence number.
        const RELIABLE = 0x40;
        /// This is a retransmission of an earlier send.
        const RESENT = 0x20;
        /// An ack list and count byte trail the body.
        const ACK = 0x10;
    }
}

/// Decoded fixed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub flags: PacketFlags,
    pub sequence: u32,
    pub extra: Vec<u8>,
}

impl PacketHeader {
    pub fn new(flags: PacketFlags, sequence: u32) -> Self {
        Self {
            flags,
            sequence,
            extra: Vec::new(),
        }
    }

    /// Number of bytes this header occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.extra.len()
    }

    pub fn is_reliable(&self) -> bool {
        self.flags.contains(PacketFlags::RELIABLE)
    }

    pub fn is_resent(&self) -> bool {
        self.flags.contains(PacketFlags::RESENT)
    }

    /// Fails if the extra bytes do not fit the one-byte length.
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let extra_len =
            u8::try_from(self.extra.len()).map_err(|_| EncodeError::ExtraTooLong { len: self.extra.len() })?;
        out.push(self.flags.bits());
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.push(extra_len);
        out.extend_from_slice(&self.extra);
        Ok(())
    }

    /// Parses the header at the start of `data`.
    ///
    /// Unknown flag bits are discarded rather than rejected.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < MIN_PACKET_LEN {
            return Err(DecodeError::TooShort {
                len: data.len(),
                min: MIN_PACKET_LEN,
            });
        }

        let flags = PacketFlags::from_bits_truncate(data[0]);
        let sequence = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        let extra_len = data[5] as usize;
        if HEADER_LEN + extra_len >= data.len() {
            return Err(DecodeError::ExtraHeaderOverrun { extra_len });
        }

        Ok(Self {
            flags,
            sequence,
            extra: data[HEADER_LEN..HEADER_LEN + extra_len].to_vec(),
        })
    }
}

/// Message id tagged with its frequency class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// One byte, 1..=254.
    High(u8),
    /// `0xFF` then one byte.
    Medium(u8),
    /// `0xFF 0xFF` then a big-endian u16 below `0xFFFA`.
    Low(u16),
    /// `0xFF 0xFF 0xFF` then one byte, used by circuit-control messages.
    Fixed(u8),
}

impl MessageId {
    /// Encoded width in bytes.
    pub fn wire_len(&self) -> usize {
        match self {
            MessageId::High(_) => 1,
            MessageId::Medium(_) => 2,
            MessageId::Low(_) | MessageId::Fixed(_) => 4,
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        match *self {
            MessageId::High(n) => out.push(n),
            MessageId::Medium(n) => out.extend_from_slice(&[0xFF, n]),
            MessageId::Low(n) => {
                out.extend_from_slice(&[0xFF, 0xFF]);
                out.extend_from_slice(&n.to_be_bytes());
            }
            MessageId::Fixed(n) => out.extend_from_slice(&[0xFF, 0xFF, 0xFF, n]),
        }
    }

    /// Reads an id from the start of a (zero-decoded) body.
    ///
    /// Returns the id and the number of bytes it used.
    pub fn read(body: &[u8]) -> Result<(Self, usize), DecodeError> {
        let truncated = || DecodeError::Truncated {
            context: "message id",
        };

        let first = *body.first().ok_or_else(truncated)?;
        if first != 0xFF {
            if first == 0 {
                return Err(DecodeError::UnknownMessage {
                    id: MessageId::High(0),
                });
            }
            return Ok((MessageId::High(first), 1));
        }

        let second = *body.get(1).ok_or_else(truncated)?;
        if second != 0xFF {
            return Ok((MessageId::Medium(second), 2));
        }

        if body.len() < 4 {
            return Err(truncated());
        }
        if body[2] == 0xFF {
            return Ok((MessageId::Fixed(body[3]), 4));
        }
        Ok((MessageId::Low(u16::from_be_bytes([body[2], body[3]])), 4))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::High(n) => write!(f, "High {}", n),
            MessageId::Medium(n) => write!(f, "Medium {}", n),
            MessageId::Low(n) => write!(f, "Low {}", n),
            MessageId::Fixed(n) => write!(f, "Fixed 0x{:02X}", n),
        }
    }
}

/// Advances an outbound sequence counter, wrapping at [`MAX_SEQUENCE`].
pub fn next_sequence(current: u32) -> u32 {
    if current >= MAX_SEQUENCE {
        1
    } else {
        current + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut header = PacketHeader::new(PacketFlags::RELIABLE | PacketFlags::ACK, 0x0102_0304);
        header.extra = vec![9, 8];

        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        bytes.push(1); // message id so the header is not the whole datagram

        assert_eq!(&bytes[..6], &[0x50, 0x01, 0x02, 0x03, 0x04, 0x02]);
        let parsed = PacketHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.wire_len(), 8);
    }

    #[test]
    fn test_oversized_extra_rejected() {
        let mut header = PacketHeader::new(PacketFlags::empty(), 1);
        header.extra = vec![0; 256];

        let mut bytes = Vec::new();
        let err = header.write_to(&mut bytes).unwrap_err();
        assert!(matches!(err, EncodeError::ExtraTooLong { len: 256 }));
        assert!(bytes.is_empty());

        header.extra.truncate(255);
        header.write_to(&mut bytes).unwrap();
        assert_eq!(bytes[5], 255);
        assert_eq!(bytes.len(), 6 + 255);
    }

    #[test]
    fn test_header_too_short() {
        let err = PacketHeader::parse(&[0x01, 0x02, 0x03, 0x04]).unwrap_err();
        assert!(matches!(err, DecodeError::TooShort { len: 4, .. }));
    }

    #[test]
    fn test_extra_header_overrun() {
        let err = PacketHeader::parse(&[0, 0, 0, 0, 1, 200, 1]).unwrap_err();
        assert!(matches!(err, DecodeError::ExtraHeaderOverrun { extra_len: 200 }));
    }

    #[test]
    fn test_message_id_widths() {
        let cases = [
            (MessageId::High(4), vec![0x04]),
            (MessageId::Medium(7), vec![0xFF, 0x07]),
            (MessageId::Low(139), vec![0xFF, 0xFF, 0x00, 0x8B]),
            (MessageId::Fixed(0xFB), vec![0xFF, 0xFF, 0xFF, 0xFB]),
        ];

        for (id, expected) in cases {
            let mut out = Vec::new();
            id.write_to(&mut out);
            assert_eq!(out, expected);
            assert_eq!(out.len(), id.wire_len());
            assert_eq!(MessageId::read(&out).unwrap(), (id, expected.len()));
        }
    }

    #[test]
    fn test_message_id_truncated() {
        assert!(MessageId::read(&[]).is_err());
        assert!(MessageId::read(&[0xFF]).is_err());
        assert!(MessageId::read(&[0xFF, 0xFF, 0x01]).is_err());
    }

    #[test]
    fn test_sequence_wraps_to_one() {
        assert_eq!(next_sequence(0), 1);
        assert_eq!(next_sequence(41), 42);
        assert_eq!(next_sequence(MAX_SEQUENCE), 1);
    }
}
