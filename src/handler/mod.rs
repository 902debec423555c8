//! Handler module - method routing for server sessions.
//!
//! Provides:
//! - [`MethodRouter`] - a [`ServerCallback`](crate::ServerCallback) mapping method names to handlers
//! - [`CallContext`] - lets handlers reply early or push notifications
//!
//! # Example
//!
//! ```ignore
//! use mprpc::handler::{CallContext, MethodRouter};
//!
//! let router = MethodRouter::new()
//!     .method("echo", |params: rmpv::Value, _ctx: &CallContext| Ok(params))
//!     .method("progress", |job: u32, ctx: &CallContext| {
//!         ctx.notify("started", &job)?;
//!         Ok(job)
//!     });
//!
//! let server = ServerSession::listen(PipeAcceptor::new(), &path, router)?;
//! ```

mod context;
mod router;

pub use context::CallContext;
pub use router::{Handler, HandlerResult, MethodRouter, TypedHandler};
