//! Wire protocol shared by the region and the viewer.
//!
//! Datagrams carry one message each, described by a static template table.
//! The header gives reliability and sequencing; acknowledgements ride either
//! at the tail of any datagram or in a dedicated `PacketAck` message.

pub mod codec;
pub mod error;
pub mod header;
pub mod message;
pub mod messages;
pub mod template;
pub mod window;
pub mod zerocode;

pub use codec::{decode, encode, encode_body, frame, mark_resent, EncodedBody, Packet};
pub use error::{DecodeError, EncodeError, TemplateError};
pub use header::{next_sequence, MessageId, PacketFlags, PacketHeader, MAX_SEQUENCE};
pub use message::{Block, Message, Value};
pub use template::{FieldKind, MessageTemplate, Quantity, TemplateRegistry};
pub use window::SequenceWindow;

/// Default number of queued acks piggybacked onto an outgoing datagram.
pub const MAX_APPENDED_ACKS: usize = 10;

/// Retransmit timeout used when nothing else is configured.
pub const RESEND_TIMEOUT_MS: u64 = 4000;
