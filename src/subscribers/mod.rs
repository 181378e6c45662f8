//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait and the [`SubscriberSet`]
//! fan-out that drives subscribers from a supervisor's [`Bus`](crate::events::Bus).
//!
//! ```text
//!   Supervisor ── publish(Event) ──► Bus ──► SubscriberSet::listen
//!                                                 │
//!                                   ┌─────────────┼─────────────┐
//!                                   ▼             ▼             ▼
//!                               LogWriter      Metrics        Custom
//! ```
//!
//! Subscribers observe; they cannot influence the supervisor. For a pull-style
//! observer use [`Supervisor::subscribe`](crate::Supervisor::subscribe) instead.

mod set;
mod subscribe;

#[cfg(feature = "logging")]
mod embedded;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
