//! # Events emitted by a supervisor.
//!
//! The event set is fixed: [`EventKind`] has exactly one variant per observable
//! moment in a worker's life. There is no free-form emitter.
//!
//! | Kind      | When                                         | Carries                 |
//! |-----------|----------------------------------------------|-------------------------|
//! | `Ready`   | handshake accepted, initial data pushed      | –                       |
//! | `Close`   | worker closed (or module missing on spawn)   | `reason`                |
//! | `Restart` | right before an automatic respawn attempt    | `attempt`               |
//! | `Message` | every envelope received from the worker      | `message`               |
//! | `Metrics` | every metrics reply received from the worker | `payload`               |
//!
//! ## Ordering guarantees
//! Each event has a process-wide sequence number (`seq`) that increases
//! monotonically; use it to restore order across subscribers.
//!
//! ## Example
//! ```rust
//! use forkvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::Close, "lineage-1").with_reason("exited: 1");
//! assert_eq!(ev.kind, EventKind::Close);
//! assert_eq!(ev.reason.as_deref(), Some("exited: 1"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use serde_json::Value;

use crate::protocol::Envelope;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of supervisor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The worker completed the handshake and is connected.
    Ready,
    /// The worker closed, or a spawn failed before a process existed.
    ///
    /// Sets `reason`.
    Close,
    /// An automatic respawn is about to be attempted.
    ///
    /// Sets `attempt` (1-based count of consecutive restarts).
    Restart,
    /// An envelope arrived from the worker (raw, before dispatch).
    ///
    /// Sets `message`.
    Message,
    /// A metrics reply arrived from the worker.
    ///
    /// Sets `payload` (metrics on success, the encoded error otherwise).
    Metrics,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Ready => "ready",
            EventKind::Close => "close",
            EventKind::Restart => "restart",
            EventKind::Message => "message",
            EventKind::Metrics => "metrics",
        }
    }
}

/// Supervisor event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Process-wide, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Lineage of the supervisor that emitted the event.
    pub lineage: Arc<str>,
    /// Human-readable reason (close cause).
    pub reason: Option<Arc<str>>,
    /// Consecutive restart count for `Restart`.
    pub attempt: Option<u32>,
    /// JSON payload (metrics).
    pub payload: Option<Arc<Value>>,
    /// Raw inbound envelope (message).
    pub message: Option<Arc<Envelope>>,
}

impl Event {
    /// Creates a new event with the current timestamp and next sequence number.
    pub fn new(kind: EventKind, lineage: impl Into<Arc<str>>) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            lineage: lineage.into(),
            reason: None,
            attempt: None,
            payload: None,
            message: None,
        }
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    #[inline]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    #[inline]
    pub fn with_message(mut self, message: Envelope) -> Self {
        self.message = Some(Arc::new(message));
        self
    }
}
