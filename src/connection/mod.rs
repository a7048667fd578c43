//! Tokio Connection Driver
//!
//! Runs a [`Session`](crate::session::Session) over a TCP stream (or any
//! async byte stream) and exposes it through cloneable async handles.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  ┌──────────┐
//! │ Client   │  │ Client   │   (clones)
//! └────┬─────┘  └────┬─────┘
//!      │ operation   │            reply via oneshot
//!      ▼             ▼                   ▲
//! ┌─────────────────────────────────────────────┐
//! │ ConnectionHandler task                      │
//! │                                             │
//! │   Session<WriteBuffer>  ◄── socket reads    │
//! │        │                                    │
//! │        ▼                                    │
//! │   WriteBuffer ──────────► socket writes     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use basex_client::{Binding, Client, Config};
//!
//! # async fn run() -> basex_client::Result<()> {
//! let client = Client::connect(&Config::from_env()).await?;
//! let output = client.execute("xquery 1 to 3").await?;
//! println!("{}", output.result);
//!
//! let query = client.query("declare variable $n external; $n * 2");
//! let doubled = query.execute_with(vec![Binding::new("n", 21)]).await?;
//! assert_eq!(doubled, "42");
//! query.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod handler;

pub use client::{Client, Query};
pub use handler::{ConnectionHandler, ConnectionStats, WriteBuffer, HIGH_WATER};
