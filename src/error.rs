//! Error types used by the supervisor and the worker runtime.
//!
//! - [`SupervisorError`]: everything a caller of [`Supervisor`](crate::Supervisor)
//!   or [`Host`](crate::Host) can observe.
//! - [`WorkerError`]: failures of the child-side [`WorkerRuntime`](crate::WorkerRuntime).
//!
//! Malformed channel traffic is a [`ProtocolError`](crate::ProtocolError): it is
//! logged where it is received and never reaches a caller.
//!
//! Both enums provide `as_label` (stable snake_case, for logs/metrics) and
//! `as_message`.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::WireError;

/// Operation that ran out of time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// A task round trip (`run_task` / `run_queue_task`).
    Task,
    /// A metrics round trip (`pull_metrics`).
    Metrics,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Task => "task",
            Operation::Metrics => "metrics",
        }
    }
}

/// # Errors produced by the supervisor.
///
/// - `Validation`: bad construction or tuning arguments (returned synchronously).
/// - `AlreadyRunning` / `Disconnected`: state errors (returned before any await).
/// - `Timeout`, `RemoteTask`, `QueueFull`: resolve the caller's future exactly once.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// A configuration or argument value is out of range.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Offending field or argument.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// `spawn` was called while a worker of this lineage is spawning or connected.
    #[error("worker {lineage} is already running, cannot spawn another")]
    AlreadyRunning {
        /// Lineage of the supervisor that rejected the call.
        lineage: Arc<str>,
    },

    /// A message had to be sent but there is no live worker.
    #[error("worker {lineage} has no live process, cannot send")]
    Disconnected {
        /// Lineage of the supervisor that rejected the call.
        lineage: Arc<str>,
    },

    /// No reply arrived before the deadline.
    #[error("took too long to run {} {identifier} for worker {lineage} (timeout {timeout:?})", .op.as_str())]
    Timeout {
        /// Which round trip timed out.
        op: Operation,
        /// Correlation id of the request.
        identifier: String,
        /// Lineage of the worker.
        lineage: Arc<str>,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// The worker reported a failure; the error is propagated verbatim.
    #[error("remote task failed: {0}")]
    RemoteTask(#[source] WireError),

    /// The work queue is at capacity.
    #[error("the queue has reached its size limit ({capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use forkvisor::SupervisorError;
    ///
    /// let err = SupervisorError::QueueFull { capacity: 8 };
    /// assert_eq!(err.as_label(), "queue_full");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::Validation { .. } => "validation",
            SupervisorError::AlreadyRunning { .. } => "state_already_running",
            SupervisorError::Disconnected { .. } => "state_disconnected",
            SupervisorError::Timeout { .. } => "timeout",
            SupervisorError::RemoteTask(_) => "remote_task",
            SupervisorError::QueueFull { .. } => "queue_full",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            SupervisorError::Validation { field, reason } => format!("{field}: {reason}"),
            SupervisorError::AlreadyRunning { lineage } => format!("already running: {lineage}"),
            SupervisorError::Disconnected { lineage } => format!("disconnected: {lineage}"),
            SupervisorError::Timeout {
                op,
                identifier,
                lineage,
                timeout,
            } => format!("{} {identifier} of {lineage} timed out after {timeout:?}", op.as_str()),
            SupervisorError::RemoteTask(e) => format!("{}: {}", e.name, e.message),
            SupervisorError::QueueFull { capacity } => format!("queue full: capacity={capacity}"),
        }
    }

    /// True for errors describing the supervisor's state rather than a request.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            SupervisorError::AlreadyRunning { .. } | SupervisorError::Disconnected { .. }
        )
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        SupervisorError::Validation {
            field,
            reason: reason.into(),
        }
    }
}

/// # Errors produced by the worker runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The process was started without its lineage id argument.
    #[error("missing lineage id argument")]
    MissingLineage,

    /// `connect` was called twice.
    #[error("runtime is already connected")]
    AlreadyConnected,

    /// `run` was called before `connect`.
    #[error("runtime must be connected before it runs")]
    NotConnected,

    /// The channel could not be read.
    #[error("channel i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::MissingLineage => "worker_missing_lineage",
            WorkerError::AlreadyConnected => "worker_already_connected",
            WorkerError::NotConnected => "worker_not_connected",
            WorkerError::Io(_) => "worker_io",
        }
    }
}
