//! # Region Transport Library
//!
//! The region side of the client circuit protocol. A region accepts one
//! circuit per connected viewer over UDP, decodes the datagram stream,
//! keeps reliable traffic reliable, throttles what it sends, and hands
//! decoded messages to simulation handlers.
//!
//! ## Core Responsibilities
//!
//! ### Circuit Lifecycle
//! A circuit starts when a client presents a `UseCircuitCode` that the
//! [`Authorizer`] recognises, and ends on logout, `CloseCircuit`, idle
//! timeout, overload or an explicit removal. Every change is published on
//! the event bus as a [`RegionEvent`].
//!
//! ### Reliable Delivery
//! Reliable packets are tracked until acked and resent with exponential
//! backoff. Acks owed to the client ride on outgoing packets or go out in
//! dedicated `PacketAck` messages. Inbound sequence numbers pass through a
//! bounded duplicate window.
//!
//! ### Throttling
//! Each circuit has token buckets per traffic category. Packets over budget
//! are queued or dropped according to configuration, and the client can
//! retune its rates with `AgentThrottle`.
//!
//! ## Module Organization
//!
//! - `config`: TOML configuration and validation
//! - `registry`, `circuit`: live circuits and their per-circuit state
//! - `reliability`, `throttle`: the two per-circuit state machines
//! - `server`, `receive`, `send`: the I/O-free packet server
//! - `dispatch`: handler table and worker pool
//! - `network`: the tokio runtime binding it all to a socket
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use region::{OpenAuthorizer, RegionConfig, RegionServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RegionConfig::load("region.toml")?;
//!     let server = RegionServer::bind(config, Arc::new(OpenAuthorizer)).await?;
//!
//!     server.handlers().register("ChatFromViewer", |circuit, message| {
//!         println!("{} says {:?}", circuit.agent_id, message.field("ChatData", "Message"));
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod circuit;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod network;
pub mod receive;
pub mod registry;
pub mod reliability;
pub mod send;
pub mod server;
pub mod stats;
pub mod throttle;
pub mod transport;

pub use auth::{AgentCircuitData, AgentCircuitManager, Authorizer, OpenAuthorizer};
pub use circuit::{Circuit, CircuitInfo};
pub use config::{ConfigError, OverflowPolicy, RegionConfig, ThrottleConfig};
pub use dispatch::{Dispatcher, HandlerId, HandlerTable};
pub use error::TransportError;
pub use events::{EventBus, RegionEvent, RemoveReason};
pub use network::{RegionServer, ShutdownHandle};
pub use receive::Received;
pub use reliability::Inbound;
pub use send::{RetransmitSweep, SendOutcome};
pub use server::PacketServer;
pub use stats::{StatsSnapshot, TransportStats};
pub use throttle::ThrottleCategory;
pub use transport::{DatagramSink, MemorySink};
