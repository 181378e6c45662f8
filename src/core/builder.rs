use std::sync::Arc;

use crate::{
    core::SupervisorConfig,
    error::SupervisorError,
    events::Bus,
    subscribers::{Subscribe, SubscriberSet},
};
use super::supervisor::Supervisor;

/// Builder for constructing a [`Supervisor`] with optional features.
pub struct SupervisorBuilder {
    cfg: SupervisorConfig,
    lineage: Option<String>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    bus: Option<Bus>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: SupervisorConfig) -> Self {
        Self {
            cfg,
            lineage: None,
            subscribers: Vec::new(),
            bus: None,
        }
    }

    /// Uses a fixed lineage id instead of a fresh uuid v4.
    pub fn with_lineage(mut self, lineage: impl Into<String>) -> Self {
        self.lineage = Some(lineage.into());
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive supervisor events through dedicated workers with
    /// bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Publishes on an existing bus instead of creating one.
    pub(crate) fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Validates the configuration and starts the supervisor's background
    /// tasks (subscriber workers, queue drain).
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// - `Validation` for an out-of-range config value or an empty lineage.
    pub fn build(self) -> Result<Supervisor, SupervisorError> {
        self.cfg.validate()?;
        let lineage: Arc<str> = match self.lineage {
            Some(l) if l.trim().is_empty() => {
                return Err(SupervisorError::validation("lineage", "must not be empty"));
            }
            Some(l) => Arc::from(l),
            None => Arc::from(uuid::Uuid::new_v4().to_string()),
        };

        let bus = self
            .bus
            .unwrap_or_else(|| Bus::new(self.cfg.bus_capacity_clamped()));
        let subs = Arc::new(SubscriberSet::new(self.subscribers));
        subs.listen(&bus);

        Ok(Supervisor::new_internal(self.cfg, lineage, bus, subs))
    }
}
