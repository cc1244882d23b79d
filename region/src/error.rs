use crate::throttle::ThrottleCategory;
use protocol::{DecodeError, EncodeError};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from the region transport. All of them are local to one datagram
/// or one send; none stops the server.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("malformed packet: {0}")]
    Malformed(#[from] DecodeError),

    #[error("no circuit for {0}")]
    UnknownCircuit(SocketAddr),

    #[error("circuit code {0} is not authorized")]
    Unauthorized(u32),

    #[error("circuit {0} already exists")]
    AlreadyExists(u32),

    #[error("endpoint {0} already belongs to another circuit")]
    EndpointInUse(SocketAddr),

    #[error("circuit {0} not found")]
    CircuitNotFound(u32),

    #[error("circuit {0} is closed")]
    CircuitClosed(u32),

    #[error("{category:?} throttle full on circuit {code}")]
    ThrottleExceeded {
        code: u32,
        category: ThrottleCategory,
    },

    #[error("circuit {0} has too many unacknowledged packets")]
    CircuitOverloaded(u32),

    #[error("failed to encode packet: {0}")]
    Encode(#[from] EncodeError),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}
