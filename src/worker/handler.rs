//! # Worker handlers.
//!
//! A [`Handler`] turns a JSON input into a JSON output. The runtime uses the
//! same shape for named tasks, the initial-data hook and the metrics hook.
//!
//! [`HandlerFn`] wraps a closure `F: Fn(Value) -> Fut`, producing a fresh
//! future per call; share state between calls with an explicit `Arc<...>`
//! captured by the closure.
//!
//! ## Example
//! ```rust
//! use serde_json::{Value, json};
//! use forkvisor::{HandlerFn, HandlerRef};
//!
//! let double: HandlerRef = HandlerFn::arc(|args: Value| async move {
//!     let n = args["n"].as_i64().unwrap_or(0);
//!     anyhow::Ok(json!({"n": n * 2}))
//! });
//! # let _ = double;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use serde_json::Value;

/// Boxed future returned by [`Handler::call`].
pub type BoxHandlerFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// Shared handle to a handler.
pub type HandlerRef = Arc<dyn Handler>;

/// Asynchronous JSON-in, JSON-out unit of work.
pub trait Handler: Send + Sync + 'static {
    /// Starts one invocation. Errors are encoded with
    /// [`WireError::from_anyhow`](crate::WireError::from_anyhow) before they
    /// cross the channel.
    fn call(&self, input: Value) -> BoxHandlerFuture;
}

/// Function-backed handler.
pub struct HandlerFn<F> {
    f: F,
}

impl<F, Fut> HandlerFn<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the handler and returns it as a [`HandlerRef`].
    pub fn arc(f: F) -> HandlerRef {
        Arc::new(Self::new(f))
    }
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn call(&self, input: Value) -> BoxHandlerFuture {
        Box::pin((self.f)(input))
    }
}

/// Named task handlers. Cheap to clone; clones share the table, so tasks can
/// be registered or removed while the runtime is serving.
#[derive(Clone, Default)]
pub struct HandlerTable {
    inner: Arc<RwLock<HashMap<String, HandlerRef>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any previous one.
    pub fn insert(&self, name: impl Into<String>, handler: HandlerRef) -> Option<HandlerRef> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), handler)
    }

    pub fn remove(&self, name: &str) -> Option<HandlerRef> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn get(&self, name: &str) -> Option<HandlerRef> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
