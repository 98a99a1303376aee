//! A RESP3 client core: an incremental codec plus a connection that
//! multiplexes commands over one TCP stream.
//!
//! This crate covers the two hard parts of talking to a RESP3 server:
//! parsing the wire protocol and correlating replies on a shared
//! connection. It deliberately stops short of a full client (no typed
//! command helpers, no cluster/sentinel support, no auto-reconnect). See
//! [`session`] and [`decoder`] for the two halves.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use resp3_core::config::SessionOptions;
//! use resp3_core::session::Session;
//! use resp3_core::value::Arg;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = SessionOptions::new().with_host("localhost").with_port(6379);
//!     let (session, mut pushes) = Session::connect(options).await?;
//!
//!     tokio::spawn(async move {
//!         while let Some(push) = pushes.recv().await {
//!             println!("push: {:?}", push.value);
//!         }
//!     });
//!
//!     let reply = session.send("PING", vec![Arg::from("hello")]).await?;
//!     println!("{reply:?}");
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod session;
pub mod transport;
pub mod value;

#[cfg(test)]
mod tests;

pub use error::{RespError, RespResult};
pub use session::{ConnectionState, PendingCommand, Session};
pub use value::{Arg, Reply, Value};
