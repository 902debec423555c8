//! Method router: dispatches calls to handlers by method name.
//!
//! # Example
//!
//! ```
//! use mprpc::handler::{CallContext, MethodRouter};
//! use mprpc::ErrorObject;
//!
//! let router = MethodRouter::new()
//!     .method("add", |(a, b): (i64, i64), _ctx: &CallContext| Ok(a + b))
//!     .method("fail", |_: (), _ctx: &CallContext| {
//!         Err::<(), _>(ErrorObject::new(1, "nope"))
//!     });
//!
//! assert!(router.has_method("add"));
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;

use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::CallContext;
use crate::message::{ErrorObject, Message};
use crate::server::{ConnectionRef, ServerCallback};

/// Result type for handler functions.
pub type HandlerResult = std::result::Result<Value, ErrorObject>;

/// Trait for handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle one call and produce its result value.
    fn call(&self, msg: &Message, ctx: &CallContext) -> HandlerResult;
}

/// Wrapper that deserializes params before calling the handler and turns its
/// return value into a value tree.
pub struct TypedHandler<F, T, R>
where
    F: Fn(T, &CallContext) -> std::result::Result<R, ErrorObject> + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
    R: Serialize + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> R>,
}

impl<F, T, R> TypedHandler<F, T, R>
where
    F: Fn(T, &CallContext) -> std::result::Result<R, ErrorObject> + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
    R: Serialize + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R> Handler for TypedHandler<F, T, R>
where
    F: Fn(T, &CallContext) -> std::result::Result<R, ErrorObject> + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
    R: Serialize + 'static,
{
    fn call(&self, msg: &Message, ctx: &CallContext) -> HandlerResult {
        let params: T = msg
            .params_as()
            .map_err(|e| ErrorObject::invalid_params(e.to_string()))?;

        let result = (self.handler)(params, ctx)?;
        rmpv::ext::to_value(&result).map_err(|e| ErrorObject::internal(e.to_string()))
    }
}

type CloseHook = Box<dyn Fn(&ConnectionRef) + Send + Sync>;

/// [`ServerCallback`] that maps method names to handlers.
///
/// Unknown methods are answered with `METHOD_NOT_FOUND`, params that fail to
/// deserialize with `INVALID_PARAMS`. Notifications never get a reply.
#[derive(Default)]
pub struct MethodRouter {
    methods: HashMap<String, Box<dyn Handler>>,
    on_close: Option<CloseHook>,
}

impl MethodRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler. A later registration under the same name
    /// replaces the earlier one.
    pub fn method<F, T, R>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(T, &CallContext) -> std::result::Result<R, ErrorObject> + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
        R: Serialize + 'static,
    {
        self.methods
            .insert(name.to_string(), Box::new(TypedHandler::new(handler)));
        self
    }

    /// Register a handler object.
    pub fn handler<H: Handler>(mut self, name: &str, handler: H) -> Self {
        self.methods.insert(name.to_string(), Box::new(handler));
        self
    }

    /// Observe closed connections.
    pub fn close_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ConnectionRef) + Send + Sync + 'static,
    {
        self.on_close = Some(Box::new(hook));
        self
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run the handler for `msg` and send its reply on `conn`.
    pub fn dispatch(&self, conn: ConnectionRef, msg: Message) {
        let Some(method) = msg.method() else {
            tracing::debug!(call_id = msg.id(), "ignoring reply sent to server");
            return;
        };

        let ctx = CallContext::new(conn, msg.id(), method);
        let outcome = match self.methods.get(method) {
            Some(handler) => handler.call(&msg, &ctx),
            None => {
                tracing::debug!(method, "method not found");
                Err(ErrorObject::method_not_found(method))
            }
        };

        if ctx.is_notification() {
            if let Err(err) = outcome {
                tracing::debug!(method, %err, "notification handler failed");
            }
            return;
        }
        if ctx.has_replied() {
            return;
        }

        let sent = match &outcome {
            Ok(result) => ctx.respond(result),
            Err(err) => ctx.error(err),
        };
        match sent {
            Ok(true) => {}
            Ok(false) => tracing::debug!(call_id = ctx.id(), method, "reply not delivered"),
            Err(e) => {
                // the caller still gets an answer instead of waiting out its timeout
                tracing::error!(call_id = ctx.id(), method, error = %e, "failed to send reply");
                let fallback = ErrorObject::internal(e.to_string());
                if let Err(e) = ctx.connection().reply_error(ctx.id(), &fallback) {
                    tracing::error!(call_id = ctx.id(), method, error = %e, "failed to send error reply");
                }
            }
        }
    }
}

impl ServerCallback for MethodRouter {
    fn on_call(&self, conn: ConnectionRef, msg: Message) {
        self.dispatch(conn, msg);
    }

    fn on_close(&self, conn: ConnectionRef) {
        if let Some(hook) = &self.on_close {
            hook(&conn);
        }
    }
}
