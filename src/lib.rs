//! # basex-client - An Async Client for the BaseX Server Protocol
//!
//! A client for the line-oriented, zero-terminated protocol BaseX speaks on
//! its client port (1984 by default). One connection carries one session;
//! requests on it are answered strictly in order.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          basex-client                            │
//! │                                                                  │
//! │  ┌─────────────┐     ┌──────────────────────────────────────┐    │
//! │  │   Client    │────>│        ConnectionHandler (task)      │    │
//! │  │   Query     │     │                                      │    │
//! │  └─────────────┘     │  ┌────────────────────────────────┐  │    │
//! │                      │  │            Session             │  │    │
//! │                      │  │  handshake, pending FIFO,      │  │    │
//! │                      │  │  prepared query handles        │  │    │
//! │                      │  │ ┌────────────┐ ┌─────────────┐ │  │    │
//! │                      │  │ │  Pipeline  │ │FrameDecoder │ │  │    │
//! │                      │  │ └────────────┘ └─────────────┘ │  │    │
//! │                      │  └────────────────────────────────┘  │    │
//! │                      └──────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use basex_client::{Client, Config};
//!
//! #[tokio::main]
//! async fn main() -> basex_client::Result<()> {
//!     let client = Client::connect(&Config::default()).await?;
//!     let output = client.execute("xquery 1 + 1").await?;
//!     assert_eq!(output.result, "2");
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: wire framing, escape-aware decoding and request encoding
//! - [`session`]: the sans-IO session state machine and prepared queries
//! - [`connection`]: the tokio driver and async handles
//! - [`config`]: connection settings
//! - [`error`]: error type
//!
//! The [`session`] layer performs no I/O and can be driven by any event
//! loop through the [`Transport`] trait.

pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod session;

pub use config::Config;
pub use connection::{Client, ConnectionStats, Query};
pub use error::{Error, Result};
pub use session::{Binding, CommandOutput, Flow, QueryHandle, Session, SessionObserver, State, Transport};

/// Version of basex-client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
