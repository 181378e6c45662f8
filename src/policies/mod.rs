//! Restart policies.
//!
//! This module groups the knobs that control **whether** a worker is respawned
//! after its process closes and **how long** to wait before respawning.
//!
//! ## Contents
//! - [`RestartPolicy`] whether to respawn after an unexpected close (never / always)
//! - [`BackoffPolicy`] how the respawn delay evolves over consecutive restarts
//! - [`JitterPolicy`]  randomization so that a fleet of supervisors does not respawn in lockstep
//!
//! ## Quick wiring
//! ```text
//! SupervisorConfig { restart: RestartPolicy, backoff: BackoffPolicy, .. }
//!      └─► core::lifecycle::Lifecycle::close() consults:
//!           - restart (and the kill-armed suppression flag) to decide respawn/terminal
//!           - backoff.next(consecutive_restarts) to schedule the respawn
//! ```
//!
//! ## Defaults
//! - `RestartPolicy::Never`.
//! - `BackoffPolicy::default()` → first=100ms, factor=1.0 (constant), max=30s, jitter=None.

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::RestartPolicy;
