use crate::header::MessageId;
use crate::template::FieldKind;
use thiserror::Error;

/// Reasons a datagram could not be turned into a [`Packet`](crate::Packet).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("extra header of {extra_len} bytes overruns the packet")]
    ExtraHeaderOverrun { extra_len: usize },

    #[error("appended ack count {count} exceeds the {available} bytes available")]
    AckOverrun { count: usize, available: usize },

    #[error("zero-coded run has no count byte")]
    ZeroRunTruncated,

    #[error("zero-decoded body exceeds {max} bytes")]
    ZeroExpansionTooLarge { max: usize },

    #[error("unknown message id {id}")]
    UnknownMessage { id: MessageId },

    #[error("truncated while reading {context}")]
    Truncated { context: &'static str },

    #[error("{remaining} trailing bytes after message {message}")]
    TrailingBytes {
        message: &'static str,
        remaining: usize,
    },
}

/// Reasons a packet could not be framed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{count} appended acks do not fit the one-byte count")]
    TooManyAcks { count: usize },

    #[error("extra header of {len} bytes does not fit the one-byte length")]
    ExtraTooLong { len: usize },

    #[error("message {message} is missing block {block}")]
    MissingBlock {
        message: &'static str,
        block: &'static str,
    },
}

/// Reasons a message could not be assembled against its template.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("no template named {0}")]
    UnknownMessage(String),

    #[error("message {message} has no block {block}")]
    UnknownBlock { message: &'static str, block: String },

    #[error("block {block} expects {expected} fields, got {got}")]
    FieldCount {
        block: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("field {field} expects {expected:?}")]
    FieldKind {
        field: &'static str,
        expected: FieldKind,
    },

    #[error("block {block} already holds its maximum of {max} entries")]
    BlockFull { block: &'static str, max: usize },

    #[error("a template with id {0} is already registered")]
    DuplicateId(MessageId),

    #[error("a template named {0} is already registered")]
    DuplicateName(&'static str),
}
