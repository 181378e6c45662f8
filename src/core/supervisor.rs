//! # Supervisor: owns one worker process and everything around it.
//!
//! A [`Supervisor`] spawns a worker executable, watches it through a
//! [`Link`](super::link), correlates task and metrics requests with their
//! replies, feeds a bounded work queue, and respawns the worker according to
//! its [`RestartPolicy`](crate::RestartPolicy).
//!
//! ## High-level architecture
//! ```text
//! spawn(module, data)
//!   └─► Lifecycle::begin_spawn ──► launch(): try_exists ──► link::launch ──► attach ──► watch
//!
//! Link tasks (per child):
//!   reader ──► on_message(gen, env) ──► Bus.publish(Message)
//!                 ├─ id      ─► Lifecycle::handshake ─► send data ─► Bus.publish(Ready)
//!                 ├─ task    ─► tasks.resolve(identifier)
//!                 ├─ metrics ─► Bus.publish(Metrics) ─► metrics.resolve(identifier)
//!                 └─ log / error ─► tracing
//!   reader EOF / exit watch ──► on_close(gen, reason)
//!                 └─ Lifecycle::close ─► Bus.publish(Close)
//!                                     └─ Respawn ─► sleep(backoff) ─► Bus.publish(Restart) ─► launch()
//!
//! Requests:
//!   run_task ─────────► tasks.admit ─► send task ─► Pending::wait(timeout)
//!   pull_metrics ─────► metrics.admit ─► send metrics ─► Pending::wait(timeout)
//!   run_queue_task ───► WorkQueue.submit ─► drain (semaphore) ─► run_task
//! ```
//!
//! ## Rules
//! - State sits behind a short `std::sync::Mutex`, never held across an await.
//! - `spawn`, `kill`, `queue_size` and `set_queue_concurrency` never wait;
//!   state errors are returned before anything is sent.
//! - `kill` never touches pending requests: they resolve by reply or timeout.
//! - Malformed replies are logged and dropped; their callers hit the deadline.
//! - Dropping a request future removes its ledger entry.
//! - The lineage id is fixed for the supervisor's life and survives restarts.
//!
//! ## Example
//! ```rust,no_run
//! use std::time::Duration;
//! use serde_json::json;
//! use forkvisor::{EventKind, Supervisor, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sup = Supervisor::builder(SupervisorConfig::auto_restart(Duration::from_millis(100))).build()?;
//!     let mut events = sup.subscribe();
//!
//!     sup.spawn("my-worker", json!({"mode": "fast"}))?;
//!     while events.recv().await?.kind != EventKind::Ready {}
//!
//!     let out = sup.run_task("echo", json!({"n": 1}), Some(Duration::from_secs(1))).await?;
//!     assert_eq!(out, json!({"n": 1}));
//!
//!     sup.kill(true);
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::core::{
    builder::SupervisorBuilder,
    config::SupervisorConfig,
    ledger::{Ledger, Outcome},
    lifecycle::{AfterClose, ConnectionState, Handshake, Lifecycle},
    link::{self, LinkEvents},
    queue::{JobRunner, JobSpec, WorkQueue},
};
use crate::error::{Operation, SupervisorError};
use crate::events::{Bus, Event, EventKind};
use crate::protocol::{Envelope, LogRecord, MessageType, MetricsReply, MetricsRequest, TaskReply, TaskRequest, WireError};
use crate::subscribers::SubscriberSet;

/// Handle to a supervised worker. Cheap to clone; clones share the worker.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Shared>,
}

pub(crate) struct Shared {
    cfg: SupervisorConfig,
    lineage: Arc<str>,
    bus: Bus,
    _subs: Arc<SubscriberSet>,
    lifecycle: Mutex<Lifecycle>,
    tasks: Ledger,
    metrics: Ledger,
    queue: WorkQueue,
}

impl Supervisor {
    /// Starts building a supervisor with `cfg`.
    pub fn builder(cfg: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(cfg: SupervisorConfig, lineage: Arc<str>, bus: Bus, subs: Arc<SubscriberSet>) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Shared>| Shared {
            tasks: Ledger::new(Operation::Task, Arc::clone(&lineage), cfg.max_pending),
            metrics: Ledger::new(Operation::Metrics, Arc::clone(&lineage), cfg.max_pending),
            queue: WorkQueue::start(weak.clone(), cfg.max_queue, cfg.queue_concurrency),
            lifecycle: Mutex::new(Lifecycle::new()),
            cfg,
            lineage,
            bus,
            _subs: subs,
        });
        Self { inner }
    }

    /// Lineage id passed to every process this supervisor spawns.
    pub fn lineage(&self) -> &str {
        &self.inner.lineage
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.cfg
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state()
    }

    /// True once the current worker completed the handshake.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// OS process id of the current worker, if one is running.
    pub fn pid(&self) -> Option<u32> {
        self.inner.lock().pid()
    }

    /// Receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.bus.subscribe()
    }

    /// Spawns the worker executable `module` and remembers `data` as the
    /// payload pushed after every successful handshake.
    ///
    /// Relative paths are resolved against the directory of the current
    /// executable. A missing module is not an error here: it is logged and a
    /// `Close` event is published.
    ///
    /// # Errors
    /// - `AlreadyRunning` if a worker is spawning or connected.
    pub fn spawn(&self, module: impl AsRef<Path>, data: Value) -> Result<(), SupervisorError> {
        let module = link::resolve_module(module.as_ref())
            .map_err(|e| SupervisorError::validation("module", e.to_string()))?;

        let generation = self.inner.lock().begin_spawn(module.clone(), data);
        let generation = generation.ok_or_else(|| SupervisorError::AlreadyRunning {
            lineage: Arc::clone(&self.inner.lineage),
        })?;

        tracing::info!(lineage = %self.inner.lineage, module = %module.display(), generation, "spawning worker");
        let shared = Arc::clone(&self.inner);
        tokio::spawn(async move { shared.launch(generation, module).await });
        Ok(())
    }

    /// Asks the worker to exit, then force-kills it after `kill_grace`.
    ///
    /// With `suppress_restart` the resulting close is terminal regardless of
    /// the restart policy. Does nothing if no worker is running.
    pub fn kill(&self, suppress_restart: bool) {
        self.inner.kill(suppress_restart);
    }

    /// Runs task `task` on the worker and waits for its reply.
    ///
    /// `timeout = None` uses `task_timeout` from the configuration.
    ///
    /// # Errors
    /// - `Disconnected` if no worker is running.
    /// - `RemoteTask` with the worker's error.
    /// - `Timeout` naming the request identifier and lineage.
    pub async fn run_task(&self, task: &str, args: Value, timeout: Option<Duration>) -> Result<Value, SupervisorError> {
        self.inner.run_task(task.to_owned(), args, timeout).await
    }

    /// Pulls metrics from the worker. `description` is forwarded verbatim.
    ///
    /// Each reply is also published as a `Metrics` event.
    pub async fn pull_metrics(&self, description: Value, timeout: Option<Duration>) -> Result<Value, SupervisorError> {
        self.inner.pull_metrics(description, timeout).await
    }

    /// Submits a task through the bounded work queue.
    ///
    /// Admission happens before this returns, so the order of calls is the
    /// order of execution. A full queue yields a future that resolves to
    /// `QueueFull` at once.
    pub fn run_queue_task(
        &self,
        task: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> BoxFuture<'static, Result<Value, SupervisorError>> {
        let spec = JobSpec {
            name: task.to_owned(),
            args,
            timeout,
        };
        let rx = match self.inner.queue.submit(spec) {
            Ok(rx) => rx,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        let lineage = Arc::clone(&self.inner.lineage);
        async move { rx.await.unwrap_or(Err(SupervisorError::Disconnected { lineage })) }.boxed()
    }

    /// Number of queued jobs not yet running.
    pub fn queue_size(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn queue_concurrency(&self) -> usize {
        self.inner.queue.concurrency()
    }

    /// Changes how many queued jobs may run at once.
    ///
    /// # Errors
    /// - `Validation` if `n == 0`.
    pub fn set_queue_concurrency(&self, n: usize) -> Result<(), SupervisorError> {
        self.inner.queue.set_concurrency(n)
    }

    /// Number of task requests waiting for a reply.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.len()
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("lineage", &self.inner.lineage)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn disconnected(&self) -> SupervisorError {
        SupervisorError::Disconnected {
            lineage: Arc::clone(&self.lineage),
        }
    }

    fn outbound(&self) -> Result<mpsc::UnboundedSender<Envelope>, SupervisorError> {
        let outbound = self.lock().outbound();
        outbound.ok_or_else(|| self.disconnected())
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind, Arc::clone(&self.lineage))
    }

    /// Probes the module, starts the child and attaches its link.
    async fn launch(self: &Arc<Self>, generation: u64, module: PathBuf) {
        match tokio::fs::try_exists(&module).await {
            Ok(true) => {}
            Ok(false) => return self.abort_spawn(generation, &module, "no such file".to_owned()),
            Err(e) => return self.abort_spawn(generation, &module, e.to_string()),
        }

        let (link, unwatched) = match link::launch(&module, &self.lineage, generation) {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(lineage = %self.lineage, module = %module.display(), error = %e, "failed to start worker");
                self.on_close(generation, format!("spawn failed: {e}"));
                return;
            }
        };

        let pid = link.pid();
        let attached = self.lock().attach(link);
        match attached {
            Ok(kill_now) => {
                tracing::info!(lineage = %self.lineage, pid = ?pid, generation, "worker started");
                unwatched.watch(Arc::downgrade(self));
                if kill_now {
                    self.kill(false);
                }
            }
            Err(stale) => {
                tracing::debug!(lineage = %self.lineage, generation, "spawn superseded, killing child");
                stale.kill_token().cancel();
                unwatched.watch(Arc::downgrade(self));
            }
        }
    }

    fn abort_spawn(&self, generation: u64, module: &Path, cause: String) {
        tracing::error!(lineage = %self.lineage, module = %module.display(), cause, "worker module is not available");
        let failed = self.lock().fail_spawn(generation);
        if failed {
            let reason = format!("module not found: {}", module.display());
            self.bus.publish(self.event(EventKind::Close).with_reason(reason));
        }
    }

    fn kill(&self, suppress_restart: bool) {
        let armed = self.lock().arm_kill(suppress_restart);
        let Some((outbound, token)) = armed else {
            tracing::debug!(lineage = %self.lineage, "kill requested without a running worker");
            return;
        };
        tracing::info!(lineage = %self.lineage, suppress_restart, "killing worker");

        let _ = outbound.send(Envelope::kill());
        let grace = self.cfg.kill_grace;
        if grace.is_zero() {
            token.cancel();
            return;
        }
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(grace) => token.cancel(),
                _ = token.cancelled() => {}
            }
        });
    }

    fn schedule_respawn(self: &Arc<Self>, closed: u64, attempt: u32) {
        let delay = self.cfg.backoff.next(attempt.saturating_sub(1));
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let next = shared.lock().take_respawn(closed);
            let Some((generation, module)) = next else {
                tracing::debug!(lineage = %shared.lineage, "scheduled restart was superseded");
                return;
            };
            tracing::info!(lineage = %shared.lineage, attempt, generation, "restarting worker");
            shared.bus.publish(shared.event(EventKind::Restart).with_attempt(attempt));
            shared.launch(generation, module).await;
        });
    }

    async fn run_task(&self, task: String, args: Value, timeout: Option<Duration>) -> Outcome {
        let outbound = self.outbound()?;
        let timeout = timeout.unwrap_or(self.cfg.task_timeout);
        let pending = self.tasks.admit();
        tracing::debug!(lineage = %self.lineage, task = %task, identifier = %pending.identifier(), "sending task");

        let request = TaskRequest {
            task,
            identifier: pending.identifier().to_owned(),
            args,
        };
        if outbound.send(Envelope::task_request(&request)).is_err() {
            return Err(self.disconnected());
        }
        pending.wait(timeout).await
    }

    async fn pull_metrics(&self, description: Value, timeout: Option<Duration>) -> Outcome {
        let outbound = self.outbound()?;
        let timeout = timeout.unwrap_or(self.cfg.metrics_timeout);
        let pending = self.metrics.admit();

        let request = MetricsRequest {
            identifier: pending.identifier().to_owned(),
            description,
        };
        if outbound.send(Envelope::metrics_request(&request)).is_err() {
            return Err(self.disconnected());
        }
        pending.wait(timeout).await
    }

    fn on_handshake(&self, generation: u64, envelope: &Envelope) {
        let presented = envelope.content.as_str();
        let outcome = self.lock().handshake(generation, presented, &self.lineage);
        match outcome {
            Handshake::Accepted { data, outbound } => {
                tracing::info!(lineage = %self.lineage, generation, "worker connected");
                let _ = outbound.send(Envelope::data(data));
                self.bus.publish(self.event(EventKind::Ready));
            }
            Handshake::Mismatch => {
                tracing::error!(
                    lineage = %self.lineage,
                    presented = ?envelope.content,
                    "handshake lineage mismatch, terminating worker"
                );
                self.kill(true);
            }
            Handshake::Duplicate => {
                tracing::warn!(lineage = %self.lineage, "duplicate handshake ignored");
            }
            Handshake::Stale => {
                tracing::debug!(lineage = %self.lineage, generation, "handshake from superseded worker ignored");
            }
        }
    }

    fn on_log(&self, envelope: &Envelope) {
        let record = match LogRecord::from_content(&envelope.content) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(lineage = %self.lineage, error = %e, "malformed log message from worker");
                return;
            }
        };
        let lineage = &*self.lineage;
        let message = record.message.as_str();
        match record.level.as_str() {
            "trace" => tracing::trace!(lineage, "{message}"),
            "debug" => tracing::debug!(lineage, "{message}"),
            "info" => tracing::info!(lineage, "{message}"),
            "warn" | "warning" => tracing::warn!(lineage, "{message}"),
            "error" => tracing::error!(lineage, "{message}"),
            other => tracing::info!(lineage, level = other, "{message} (unknown log level)"),
        }
    }

    fn on_task_reply(&self, envelope: &Envelope) {
        match envelope.decode::<TaskReply>() {
            Ok(reply) => {
                let identifier = reply.identifier.clone();
                let outcome = reply.into_result().map_err(SupervisorError::RemoteTask);
                if self.tasks.resolve(&identifier, outcome) {
                    tracing::debug!(lineage = %self.lineage, identifier = %identifier, "task reply received");
                } else {
                    tracing::error!(lineage = %self.lineage, identifier = %identifier, "reply for unknown task");
                }
            }
            Err(e) => {
                tracing::warn!(
                    lineage = %self.lineage,
                    identifier = envelope.str_field("identifier"),
                    error = %e,
                    "malformed task reply dropped"
                );
            }
        }
    }

    fn on_metrics_reply(&self, envelope: &Envelope) {
        let reply = match envelope.decode::<MetricsReply>() {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    lineage = %self.lineage,
                    identifier = envelope.str_field("identifier"),
                    error = %e,
                    "malformed metrics reply dropped"
                );
                return;
            }
        };

        let payload = match (&reply.metrics, &reply.error) {
            (_, Some(error)) => serde_json::to_value(error).unwrap_or(Value::Null),
            (Some(metrics), None) => metrics.clone(),
            (None, None) => Value::Null,
        };
        self.bus.publish(self.event(EventKind::Metrics).with_payload(payload));

        let identifier = reply.identifier.clone();
        let outcome = reply.into_result().map_err(SupervisorError::RemoteTask);
        if !self.metrics.resolve(&identifier, outcome) {
            tracing::warn!(lineage = %self.lineage, identifier = %identifier, "reply for unknown metrics request");
        }
    }
}

impl LinkEvents for Shared {
    fn on_message(self: &Arc<Self>, generation: u64, envelope: Envelope) {
        let current = self.lock().is_current(generation);
        if !current {
            tracing::debug!(lineage = %self.lineage, generation, kind = envelope.kind.as_str(), "message from superseded worker dropped");
            return;
        }
        self.bus.publish(self.event(EventKind::Message).with_message(envelope.clone()));

        match envelope.kind {
            MessageType::Id => self.on_handshake(generation, &envelope),
            MessageType::Log => self.on_log(&envelope),
            MessageType::Error => {
                let error = WireError::from_content(&envelope.content);
                tracing::error!(lineage = %self.lineage, error = %error, causes = ?error.causes, "worker reported an error");
            }
            MessageType::Metrics => self.on_metrics_reply(&envelope),
            MessageType::Task => self.on_task_reply(&envelope),
            MessageType::Data | MessageType::Kill => {
                tracing::warn!(lineage = %self.lineage, kind = envelope.kind.as_str(), "unexpected message from worker");
            }
        }
    }

    fn on_close(self: &Arc<Self>, generation: u64, reason: String) {
        let after = self.lock().close(generation, self.cfg.restart);
        match after {
            AfterClose::Ignored => {}
            AfterClose::Terminal => {
                tracing::warn!(lineage = %self.lineage, generation, reason = %reason, "worker closed");
                self.bus.publish(self.event(EventKind::Close).with_reason(reason));
            }
            AfterClose::Respawn { attempt } => {
                tracing::warn!(lineage = %self.lineage, generation, reason = %reason, attempt, "worker closed, restart scheduled");
                self.bus.publish(self.event(EventKind::Close).with_reason(reason));
                self.schedule_respawn(generation, attempt);
            }
        }
    }
}

impl JobRunner for Shared {
    fn run_job(self: Arc<Self>, job: JobSpec) -> BoxFuture<'static, Outcome> {
        async move { self.run_task(job.name, job.args, job.timeout).await }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn malformed_replies_are_dropped_not_delivered() {
        let sup = Supervisor::builder(SupervisorConfig::default()).build().unwrap();
        let shared = &sup.inner;
        let task = shared.tasks.admit();
        let metrics = shared.metrics.admit();

        let bad_task = json!({"identifier": task.identifier(), "error": 42});
        shared.on_message(0, Envelope::new(MessageType::Task, bad_task));
        let bad_metrics = json!({"identifier": metrics.identifier(), "metrics": 1, "error": "x"});
        shared.on_message(0, Envelope::new(MessageType::Metrics, bad_metrics));

        assert_eq!(shared.tasks.len(), 1);
        assert_eq!(shared.metrics.len(), 1);
        let err = task.wait(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err.as_label(), "timeout");
    }

    #[tokio::test]
    async fn late_reply_after_drop_is_unknown() {
        let sup = Supervisor::builder(SupervisorConfig::default()).build().unwrap();
        let shared = &sup.inner;
        let pending = shared.tasks.admit();
        let identifier = pending.identifier().to_owned();
        drop(pending);

        let reply = TaskReply::ok(identifier.clone(), json!(1));
        shared.on_message(0, Envelope::task_reply(&reply));
        assert_eq!(sup.pending_tasks(), 0);
        assert!(!shared.tasks.resolve(&identifier, Ok(Value::Null)));
    }
}
