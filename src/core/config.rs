//! # Supervisor configuration.
//!
//! [`SupervisorConfig`] centralizes every knob of a [`Supervisor`](crate::Supervisor):
//! restart behavior, default deadlines, queue sizing and the ledger cap.
//! It is validated once by [`SupervisorBuilder::build`](crate::SupervisorBuilder::build).

use std::time::Duration;

use crate::error::SupervisorError;
use crate::policies::{BackoffPolicy, RestartPolicy};

/// Default cap for outstanding task/metrics requests and for waiting queue jobs.
pub const DEFAULT_CAPACITY: usize = 100_000;

/// Configuration of one supervisor.
///
/// ## Field semantics
/// - `restart` / `backoff`: respawn decision and delay after a close
/// - `task_timeout` / `metrics_timeout`: used when a call passes `None`
/// - `queue_concurrency`: jobs of the work queue allowed in flight (`>= 1`)
/// - `max_queue`: waiting jobs before `QueueFull` (`>= 1`)
/// - `max_pending`: ledger size above which all outstanding entries are dropped (`>= 1`)
/// - `kill_grace`: wait between the `kill` message and a forced kill (`0s` = force at once)
/// - `bus_capacity`: event ring buffer size (clamped to at least 1)
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Whether a closed worker is respawned.
    pub restart: RestartPolicy,

    /// Delay before each automatic respawn.
    pub backoff: BackoffPolicy,

    /// Default deadline of `run_task` and `run_queue_task`.
    pub task_timeout: Duration,

    /// Default deadline of `pull_metrics`.
    pub metrics_timeout: Duration,

    /// Number of queued jobs allowed to run at once.
    pub queue_concurrency: usize,

    /// Maximum number of jobs waiting in the work queue.
    pub max_queue: usize,

    /// Outstanding requests above which the correlation ledger is cleared.
    pub max_pending: usize,

    /// How long a killed worker may take to exit on its own.
    pub kill_grace: Duration,

    /// Capacity of the event bus.
    pub bus_capacity: usize,
}

impl SupervisorConfig {
    /// Configuration with automatic respawn after a constant `delay`.
    pub fn auto_restart(delay: Duration) -> Self {
        Self {
            restart: RestartPolicy::Always,
            backoff: BackoffPolicy::constant(delay),
            ..Self::default()
        }
    }

    /// Checks ranges; called by the builder.
    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.queue_concurrency == 0 {
            return Err(SupervisorError::validation("queue_concurrency", "must be at least 1"));
        }
        if self.max_queue == 0 {
            return Err(SupervisorError::validation("max_queue", "must be at least 1"));
        }
        if self.max_pending == 0 {
            return Err(SupervisorError::validation("max_pending", "must be at least 1"));
        }
        if !(self.backoff.factor.is_finite() && self.backoff.factor > 0.0) {
            return Err(SupervisorError::validation(
                "backoff.factor",
                format!("must be a positive finite number, got {}", self.backoff.factor),
            ));
        }
        Ok(())
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for SupervisorConfig {
    /// - `restart = Never`, `backoff = constant 100ms`
    /// - `task_timeout = 100ms`, `metrics_timeout = 2s`
    /// - `queue_concurrency = 1` (strictly sequential)
    /// - `max_queue = max_pending = 100_000`
    /// - `kill_grace = 2s`, `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            restart: RestartPolicy::Never,
            backoff: BackoffPolicy::default(),
            task_timeout: Duration::from_millis(100),
            metrics_timeout: Duration::from_secs(2),
            queue_concurrency: 1,
            max_queue: DEFAULT_CAPACITY,
            max_pending: DEFAULT_CAPACITY,
            kill_grace: Duration::from_secs(2),
            bus_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(SupervisorConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let cfg = SupervisorConfig {
            queue_concurrency: 0,
            ..SupervisorConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.as_label(), "validation");
        assert!(err.to_string().contains("queue_concurrency"));
    }

    #[test]
    fn auto_restart_sets_policy_and_delay() {
        let cfg = SupervisorConfig::auto_restart(Duration::from_millis(30));
        assert_eq!(cfg.restart, RestartPolicy::Always);
        assert_eq!(cfg.backoff.next(0), Duration::from_millis(30));
    }
}
