//! # Request correlation ledger.
//!
//! A [`Ledger`] maps outstanding request identifiers to one-shot completions.
//! The supervisor keeps two of them: one for tasks and one for metrics pulls.
//!
//! ```text
//! admit() ──► Pending ──► send request ──► Pending::wait(timeout)
//!                                             ├─ reply:   resolve(identifier, outcome) ─► caller
//!                                             └─ timeout: Timeout
//! drop(Pending) ──► forget(identifier)
//! ```
//!
//! ## Rules
//! - Each identifier resolves **at most once**: a reply removes the entry, so a
//!   late reply after a timeout finds nothing and is reported as unknown.
//! - An entry lives exactly as long as its [`Pending`] guard, so a caller that
//!   abandons its future (an outer `timeout`, a lost `select!` branch) leaves
//!   nothing behind.
//! - Overflow: when an insert finds more than `cap` entries, every outstanding
//!   entry is dropped first. Their callers still observe a `Timeout` at their
//!   own deadline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Operation, SupervisorError};

/// Outcome delivered to a waiting caller.
pub(crate) type Outcome = Result<Value, SupervisorError>;

pub(crate) struct Ledger {
    op: Operation,
    lineage: Arc<str>,
    cap: usize,
    pending: Mutex<HashMap<String, oneshot::Sender<Outcome>>>,
}

impl Ledger {
    pub(crate) fn new(op: Operation, lineage: Arc<str>, cap: usize) -> Self {
        Self {
            op,
            lineage,
            cap,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a fresh identifier. The entry is removed when the returned
    /// guard drops.
    pub(crate) fn admit(&self) -> Pending<'_> {
        let identifier = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        let mut pending = self.lock();
        if pending.len() > self.cap {
            tracing::warn!(
                lineage = %self.lineage,
                op = self.op.as_str(),
                dropped = pending.len(),
                "too many outstanding requests, clearing ledger"
            );
            pending.clear();
        }
        pending.insert(identifier.clone(), tx);
        Pending {
            ledger: self,
            identifier,
            rx,
        }
    }

    /// Completes an entry. Returns `false` if the identifier is unknown.
    pub(crate) fn resolve(&self, identifier: &str, outcome: Outcome) -> bool {
        let Some(tx) = self.lock().remove(identifier) else {
            return false;
        };
        // The caller may have dropped its future; that is not an unknown reply.
        let _ = tx.send(outcome);
        true
    }

    fn forget(&self, identifier: &str) {
        self.lock().remove(identifier);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn timed_out(&self, identifier: &str, timeout: Duration) -> SupervisorError {
        SupervisorError::Timeout {
            op: self.op,
            identifier: identifier.to_owned(),
            lineage: Arc::clone(&self.lineage),
            timeout,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Outcome>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One outstanding request. Dropping it removes the ledger entry.
pub(crate) struct Pending<'a> {
    ledger: &'a Ledger,
    identifier: String,
    rx: oneshot::Receiver<Outcome>,
}

impl Pending<'_> {
    pub(crate) fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Waits for the entry to resolve or for `timeout` to elapse.
    pub(crate) async fn wait(mut self, timeout: Duration) -> Outcome {
        let deadline = Instant::now() + timeout;
        match tokio::time::timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_cleared)) => {
                tokio::time::sleep_until(deadline).await;
                Err(self.ledger.timed_out(&self.identifier, timeout))
            }
            Err(_elapsed) => Err(self.ledger.timed_out(&self.identifier, timeout)),
        }
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        self.ledger.forget(&self.identifier);
    }
}
