//! Supervisor core: process lifecycle, request correlation and the work queue.
//!
//! The only public API from this module is [`Supervisor`] (with its builder
//! and configuration) and the observable [`ConnectionState`].
//!
//! Internal modules:
//! - [`lifecycle`]: pure connection state machine with spawn generations;
//! - [`link`]: child process start, pipe reader/writer and exit watch;
//! - [`ledger`]: identifier → one-shot completion table with overflow clearing;
//! - [`queue`]: bounded FIFO work queue under a resizable semaphore;
//! - [`supervisor`]: ties the above together and publishes events.

mod builder;
mod config;
mod ledger;
mod lifecycle;
mod link;
mod queue;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use config::{DEFAULT_CAPACITY, SupervisorConfig};
pub use lifecycle::ConnectionState;
pub use supervisor::Supervisor;
