//! # Viewer Library
//!
//! A headless client for the region circuit protocol. It opens a circuit
//! with `UseCircuitCode`, acks what the region sends, answers pings, and
//! can chat and log out. The region's end-to-end tests drive it, and the
//! `viewer` binary wraps it for manual runs against a live region.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use uuid::Uuid;
//! use viewer::ViewerConnection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let region = "127.0.0.1:9000".parse()?;
//!     let mut viewer = ViewerConnection::connect(region, 1234, Uuid::new_v4(), Uuid::new_v4()).await?;
//!
//!     viewer.use_circuit_code(Duration::from_secs(5)).await?;
//!     println!("ping {:?}", viewer.ping(Duration::from_secs(2)).await?);
//!     viewer.chat("hello region").await?;
//!     viewer.logout(Duration::from_secs(5)).await?;
//!     Ok(())
//! }
//! ```

pub mod network;

pub use network::{ViewerConnection, ViewerError};
