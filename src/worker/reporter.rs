use tokio::sync::mpsc;

use crate::protocol::{Envelope, LogRecord, WireError};

/// Sends diagnostics to the parent. Cheap to clone.
///
/// Sends never fail loudly: once the channel is gone there is nobody left
/// to read them.
#[derive(Clone, Debug)]
pub struct Reporter {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Reporter {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { tx }
    }

    /// Sends a `log` line at `level` (`debug`, `info`, `warn`, `error`).
    pub fn log(&self, level: &str, message: impl Into<String>) {
        self.send(Envelope::log(&LogRecord::new(level, message)));
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log("debug", message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log("info", message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log("warn", message);
    }

    /// Sends an `error` report.
    pub fn error(&self, error: &WireError) {
        self.send(Envelope::error(error));
    }

    /// Encodes and sends an `anyhow` error with its cause chain.
    pub fn report(&self, error: &anyhow::Error) {
        self.error(&WireError::from_anyhow(error));
    }

    pub(crate) fn send(&self, envelope: Envelope) {
        let _ = self.tx.send(envelope);
    }
}
