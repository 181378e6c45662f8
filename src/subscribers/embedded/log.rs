//! # LogWriter: events rendered through `tracing`
//!
//! A minimal subscriber that turns supervisor events into log lines. Useful
//! for demos and for services that want lifecycle lines without writing a
//! subscriber of their own.
//!
//! ## Example output
//! ```text
//! INFO  [ready] lineage=6f1c…
//! WARN  [close] lineage=6f1c… reason="exited: exit status: 3"
//! INFO  [restart] lineage=6f1c… attempt=1
//! DEBUG [metrics] lineage=6f1c… payload={"rss":1234}
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::Ready => {
                tracing::info!(lineage = %e.lineage, seq = e.seq, "[ready]");
            }
            EventKind::Close => {
                tracing::warn!(lineage = %e.lineage, seq = e.seq, reason = ?e.reason, "[close]");
            }
            EventKind::Restart => {
                tracing::info!(lineage = %e.lineage, seq = e.seq, attempt = ?e.attempt, "[restart]");
            }
            EventKind::Metrics => {
                tracing::debug!(lineage = %e.lineage, seq = e.seq, payload = ?e.payload, "[metrics]");
            }
            EventKind::Message => {
                let kind = e.message.as_ref().map(|m| m.kind.as_str());
                tracing::trace!(lineage = %e.lineage, seq = e.seq, kind = ?kind, "[message]");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
