//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for plugging observers into a
//! supervisor. Each subscriber is driven by a dedicated worker loop fed by a
//! bounded queue owned by the [`SubscriberSet`](crate::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow; they block neither the supervisor nor other subscribers.
//! - [`Subscribe::accepts`] narrows the fixed event set to the kinds a subscriber
//!   cares about (all by default).
//! - On queue overflow, events for that subscriber are **dropped** (warn).
//!
//! ## Example
//! ```rust
//! use forkvisor::{Event, EventKind, Subscribe};
//!
//! struct ReadyCounter(std::sync::atomic::AtomicUsize);
//!
//! #[async_trait::async_trait]
//! impl Subscribe for ReadyCounter {
//!     async fn on_event(&self, _ev: &Event) {
//!         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!     }
//!     fn accepts(&self, kind: EventKind) -> bool {
//!         kind == EventKind::Ready
//!     }
//!     fn name(&self) -> &'static str { "ready-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};

/// Contract for event subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event.
    async fn on_event(&self, event: &Event);

    /// Whether this subscriber wants events of `kind`.
    fn accepts(&self, kind: EventKind) -> bool {
        let _ = kind;
        true
    }

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
