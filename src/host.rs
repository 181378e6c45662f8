//! # Host: a restartable slot for one worker module.
//!
//! [`Host`] holds at most one [`Supervisor`] for a fixed module path and
//! recreates it on demand. Each `start` after a `stop` gets a fresh supervisor
//! (and a fresh lineage id). Events from every supervisor the host creates go
//! through the host's own bus, so a receiver from [`Host::subscribe`] keeps
//! working across restarts.
//!
//! ```text
//! start(data) ──► held? ─no─► Supervisor::builder(cfg).with_bus(host bus).build()
//!                  └────────► spawn(module, data)
//! stop()      ──► take held ──► kill(suppress_restart = true)
//!                  └─ live worker? ─► hold the supervisor until its Close
//! restart()   ──► stop() + start()
//! ```
//!
//! A supervisor's child tasks only reference it weakly, so `stop` keeps the
//! dropped supervisor alive until the worker's `Close` has been published.

use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::core::{ConnectionState, Supervisor, SupervisorConfig};
use crate::error::SupervisorError;
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Lineage reported by errors when no supervisor is held.
const NO_WORKER: &str = "<none>";

/// Slack on top of `kill_grace` before a stopped worker's `Close` is given up on.
const CLOSE_SLACK: Duration = Duration::from_secs(5);

pub struct Host {
    module: PathBuf,
    cfg: SupervisorConfig,
    bus: Bus,
    subscribers: Mutex<Vec<Arc<dyn Subscribe>>>,
    subs: OnceLock<Arc<SubscriberSet>>,
    current: Mutex<Option<Supervisor>>,
}

impl Host {
    /// Creates an idle host. Nothing is spawned until [`start`](Self::start).
    pub fn new(module: impl Into<PathBuf>, cfg: SupervisorConfig) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        Self {
            module: module.into(),
            cfg,
            bus,
            subscribers: Mutex::new(Vec::new()),
            subs: OnceLock::new(),
            current: Mutex::new(None),
        }
    }

    /// Subscribers attached to the host bus on the first `start`.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = Mutex::new(subscribers);
        self
    }

    pub fn module(&self) -> &Path {
        &self.module
    }

    /// Spawns the worker, creating a supervisor if none is held.
    ///
    /// # Errors
    /// - `Validation` if the configuration is invalid.
    /// - `AlreadyRunning` if the held supervisor's worker is live.
    pub fn start(&self, data: Value) -> Result<Supervisor, SupervisorError> {
        self.ensure_subscribers();
        let sup = {
            let mut current = self.lock();
            match current.as_ref() {
                Some(sup) => sup.clone(),
                None => {
                    let sup = Supervisor::builder(self.cfg.clone())
                        .with_bus(self.bus.clone())
                        .build()?;
                    *current = Some(sup.clone());
                    sup
                }
            }
        };
        sup.spawn(&self.module, data)?;
        Ok(sup)
    }

    /// Kills the worker with restart suppressed and releases the supervisor.
    ///
    /// A live worker's `Close` still reaches [`subscribe`](Self::subscribe)
    /// receivers even if no other handle to the supervisor exists.
    pub fn stop(&self) {
        let Some(sup) = self.lock().take() else {
            return;
        };
        tracing::info!(lineage = %sup.lineage(), "stopping hosted worker");

        let events = sup.subscribe();
        let live = matches!(sup.state(), ConnectionState::Spawning | ConnectionState::Connected);
        sup.kill(true);
        if !live {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let wait = self.cfg.kill_grace + CLOSE_SLACK;
                rt.spawn(hold_until_closed(sup, events, wait));
            }
            Err(_) => tracing::debug!(lineage = %sup.lineage(), "no runtime, stopped supervisor dropped at once"),
        }
    }

    /// `stop` followed by `start`.
    pub fn restart(&self, data: Value) -> Result<Supervisor, SupervisorError> {
        self.stop();
        self.start(data)
    }

    pub fn supervisor(&self) -> Option<Supervisor> {
        self.lock().clone()
    }

    /// Receiver for events of every supervisor this host creates.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    pub async fn run_task(&self, task: &str, args: Value, timeout: Option<Duration>) -> Result<Value, SupervisorError> {
        self.held()?.run_task(task, args, timeout).await
    }

    pub async fn pull_metrics(&self, description: Value, timeout: Option<Duration>) -> Result<Value, SupervisorError> {
        self.held()?.pull_metrics(description, timeout).await
    }

    /// Submits through the held supervisor's work queue.
    pub fn queue_task(
        &self,
        task: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> BoxFuture<'static, Result<Value, SupervisorError>> {
        match self.held() {
            Ok(sup) => sup.run_queue_task(task, args, timeout),
            Err(e) => future::ready(Err(e)).boxed(),
        }
    }

    fn held(&self) -> Result<Supervisor, SupervisorError> {
        self.lock().clone().ok_or_else(|| SupervisorError::Disconnected {
            lineage: Arc::from(NO_WORKER),
        })
    }

    fn ensure_subscribers(&self) {
        self.subs.get_or_init(|| {
            let subscribers = mem::take(&mut *self.subscribers.lock().unwrap_or_else(PoisonError::into_inner));
            let set = Arc::new(SubscriberSet::new(subscribers));
            set.listen(&self.bus);
            set
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Supervisor>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps `sup` alive until its `Close` is published or `wait` elapses.
async fn hold_until_closed(sup: Supervisor, mut events: broadcast::Receiver<Event>, wait: Duration) {
    let closed = async {
        loop {
            match events.recv().await {
                Ok(ev) if ev.kind == EventKind::Close && &*ev.lineage == sup.lineage() => return,
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    if sup.state() == ConnectionState::Terminal {
                        return;
                    }
                }
                Err(RecvError::Closed) => return,
            }
        }
    };
    if tokio::time::timeout(wait, closed).await.is_err() {
        tracing::warn!(lineage = %sup.lineage(), ?wait, "stopped worker did not close in time");
    }
}
