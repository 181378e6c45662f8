//! Supervisor events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`]: the fixed event set and its metadata
//! - [`Bus`]: thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor` operations and its link tasks (reader, exit watch,
//!   restart timer).
//! - **Consumers**: raw receivers from `Supervisor::subscribe`, the supervisor's
//!   `SubscriberSet`, and `Host` observers (the host lends its bus to every
//!   supervisor it creates).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
