//! # mprpc
//!
//! Request/response RPC sessions over a framed MessagePack transport.
//!
//! A [`ClientSession`] gives application threads a blocking
//! `call(method, params)` and a fire-and-forget `async_call`; a
//! [`ServerSession`] serves any number of peers and hands every request to a
//! [`ServerCallback`] (typically a [`MethodRouter`]).
//!
//! ## Architecture
//!
//! - **Network thread** (one per session): owns the transport, correlates
//!   replies with waiting calls, exchanges heartbeats, detects dead peers
//! - **Callback thread** (one per session): runs application callbacks one
//!   at a time, in arrival order
//! - **Wire**: `u32` big-endian length prefix, then one MessagePack map
//!   (`{method, params, id}` / `{id, result}` / `{id, error}`)
//!
//! ## Example
//!
//! ```no_run
//! use mprpc::handler::{CallContext, MethodRouter};
//! use mprpc::transport::MemHub;
//! use mprpc::{ClientSession, ServerSession};
//!
//! # fn main() -> mprpc::Result<()> {
//! let hub = MemHub::new();
//! let router = MethodRouter::new()
//!     .method("add", |(a, b): (i64, i64), _ctx: &CallContext| Ok(a + b));
//!
//! let _server = ServerSession::listen(hub.acceptor(), "calc", router)?;
//! let client = ClientSession::connect(hub.connector(), "calc", ())?;
//!
//! let reply = client.call("add", &(2, 3))?;
//! assert_eq!(reply.result_as::<i64>()?, 5);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod message;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;
pub mod writer;

mod client;

pub use client::{ClientBuilder, ClientCallback, ClientSession, SessionState};
pub use config::{ClientConfig, ServerConfig};
pub use error::{Result, RpcError};
pub use handler::{CallContext, MethodRouter};
pub use message::{codes, CallId, ErrorObject, Message, HEARTBEAT_METHOD};
pub use server::{Connection, ConnectionRef, ServerBuilder, ServerCallback, ServerSession};
