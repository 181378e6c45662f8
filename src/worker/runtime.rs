//! # Worker runtime.
//!
//! [`WorkerRuntime`] is the child side of the channel. It announces itself
//! with the lineage id it was started with, then serves parent messages until
//! it is killed, the parent goes away, a termination signal arrives, or too
//! many handlers panic in a row.
//!
//! ```text
//! connect(on_data, on_metrics) ──► send id
//! run():
//!   loop select {
//!     line ──► dispatch
//!               ├─ data    ─► spawn guarded(on_data)     ─► error on failure
//!               ├─ metrics ─► spawn guarded(on_metrics)  ─► metrics reply
//!               ├─ task    ─► lookup ─► spawn guarded(h) ─► task reply
//!               └─ kill    ─► WorkerExit::Killed
//!     EOF          ──► WorkerExit::Disconnected
//!     fault trip   ──► WorkerExit::Faulted
//!     signal       ──► WorkerExit::Signalled
//!   }
//! ```
//!
//! Handlers run concurrently, each in its own tokio task, with panics caught
//! and reported as `error` messages.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::LinesCodecError;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::protocol::{
    Envelope, KILL_EXIT_CODE, MessageType, MetricsReply, MetricsRequest, ProtocolError, TaskReply, TaskRequest,
    WireError, decode_line, frame_reader, spawn_writer,
};

use super::handler::{HandlerFn, HandlerRef, HandlerTable};
use super::reporter::Reporter;
use super::shutdown;

/// Exit status used after too many consecutive handler faults.
pub const FAULT_EXIT_CODE: i32 = 70;

/// Worker runtime settings.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Consecutive handler panics after which the runtime stops with
    /// [`WorkerExit::Faulted`]. `0` disables the check.
    pub fault_threshold: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { fault_threshold: 5 }
    }
}

/// Why [`WorkerRuntime::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    /// The parent sent `kill`.
    Killed,
    /// The channel reached end of file.
    Disconnected,
    /// Too many consecutive handler panics.
    Faulted,
    /// A termination signal was received.
    Signalled,
}

impl WorkerExit {
    /// Process exit status for this outcome.
    pub fn code(&self) -> i32 {
        match self {
            WorkerExit::Killed => KILL_EXIT_CODE,
            WorkerExit::Faulted => FAULT_EXIT_CODE,
            WorkerExit::Disconnected | WorkerExit::Signalled => 0,
        }
    }
}

struct Hooks {
    on_data: HandlerRef,
    on_metrics: HandlerRef,
}

struct FaultTracker {
    consecutive: AtomicU32,
    threshold: u32,
    tripped: Notify,
}

impl FaultTracker {
    fn new(threshold: u32) -> Self {
        Self {
            consecutive: AtomicU32::new(0),
            threshold,
            tripped: Notify::new(),
        }
    }

    /// Counts a fault; trips once the threshold is reached.
    fn record(&self) {
        let n = self.consecutive.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if self.threshold > 0 && n >= self.threshold {
            tracing::error!(consecutive = n, threshold = self.threshold, "fault threshold reached");
            self.tripped.notify_one();
        }
    }

    fn clear(&self) {
        self.consecutive.store(0, Ordering::Release);
    }
}

/// Child side of a supervised worker.
pub struct WorkerRuntime {
    lineage: Arc<str>,
    cfg: WorkerConfig,
    reporter: Reporter,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    handlers: HandlerTable,
    hooks: Mutex<Option<Hooks>>,
    signals: bool,
    writer: JoinHandle<()>,
    stop_writer: CancellationToken,
}

impl WorkerRuntime {
    /// Builds a runtime over stdin/stdout, taking the lineage id from the
    /// first command-line argument. Listens for termination signals.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// - `MissingLineage` if the argument is absent or empty.
    pub fn from_args() -> Result<Self, WorkerError> {
        let lineage = std::env::args()
            .nth(1)
            .filter(|arg| !arg.is_empty())
            .ok_or(WorkerError::MissingLineage)?;
        let mut runtime = Self::with_io(lineage, tokio::io::stdin(), tokio::io::stdout());
        runtime.signals = true;
        Ok(runtime)
    }

    /// Builds a runtime over arbitrary async streams. Signals are not handled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_io<R, W>(lineage: impl Into<Arc<str>>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let stop_writer = CancellationToken::new();
        let writer = spawn_writer(writer, rx, stop_writer.clone());
        Self {
            lineage: lineage.into(),
            cfg: WorkerConfig::default(),
            reporter: Reporter::new(tx),
            reader: Box::new(reader),
            handlers: HandlerTable::new(),
            hooks: Mutex::new(None),
            signals: false,
            writer,
            stop_writer,
        }
    }

    pub fn with_config(mut self, cfg: WorkerConfig) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn lineage(&self) -> &str {
        &self.lineage
    }

    pub fn reporter(&self) -> Reporter {
        self.reporter.clone()
    }

    /// Shared view of the task table, usable while the runtime is serving.
    pub fn handlers(&self) -> HandlerTable {
        self.handlers.clone()
    }

    /// Registers a closure as the handler of task `name`.
    pub fn register<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.handlers.insert(name, HandlerFn::arc(f));
    }

    pub fn register_handler(&self, name: impl Into<String>, handler: HandlerRef) {
        self.handlers.insert(name, handler);
    }

    /// Unregisters task `name`. Returns `false` if it was not registered.
    pub fn remove(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    /// Installs the data and metrics hooks and sends the handshake.
    ///
    /// # Errors
    /// - `AlreadyConnected` on a second call.
    pub fn connect<D, DF, M, MF>(&self, on_data: D, on_metrics: M) -> Result<(), WorkerError>
    where
        D: Fn(Value) -> DF + Send + Sync + 'static,
        DF: Future<Output = anyhow::Result<Value>> + Send + 'static,
        M: Fn(Value) -> MF + Send + Sync + 'static,
        MF: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.connect_handlers(HandlerFn::arc(on_data), HandlerFn::arc(on_metrics))
    }

    /// [`connect`](Self::connect) with prebuilt handlers.
    pub fn connect_handlers(&self, on_data: HandlerRef, on_metrics: HandlerRef) -> Result<(), WorkerError> {
        {
            let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
            if hooks.is_some() {
                return Err(WorkerError::AlreadyConnected);
            }
            *hooks = Some(Hooks { on_data, on_metrics });
        }
        self.reporter.send(Envelope::id(&self.lineage));
        Ok(())
    }

    /// Serves parent messages until the runtime stops.
    ///
    /// # Errors
    /// - `NotConnected` if [`connect`](Self::connect) was not called.
    /// - `Io` if the channel cannot be read.
    pub async fn run(self) -> Result<WorkerExit, WorkerError> {
        let WorkerRuntime {
            lineage,
            cfg,
            reporter,
            reader,
            handlers,
            hooks,
            signals,
            writer,
            stop_writer,
        } = self;
        let hooks = hooks
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or(WorkerError::NotConnected)?;

        let dispatch = Dispatch {
            reporter,
            handlers,
            hooks,
            faults: Arc::new(FaultTracker::new(cfg.fault_threshold)),
        };
        let mut frames = frame_reader(reader);

        let termination = async move {
            if signals {
                match shutdown::wait_for_termination().await {
                    Ok(()) => return,
                    Err(e) => tracing::warn!(error = %e, "termination signals are unavailable"),
                }
            }
            std::future::pending::<()>().await
        };
        tokio::pin!(termination);

        let exit = loop {
            tokio::select! {
                frame = frames.next() => match frame {
                    Some(Ok(line)) => {
                        if let Some(exit) = dispatch.dispatch(&line) {
                            break exit;
                        }
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        let error = ProtocolError::from(LinesCodecError::MaxLineLengthExceeded);
                        dispatch.reporter.error(&WireError::protocol(error.to_string()));
                    }
                    Some(Err(LinesCodecError::Io(e))) => {
                        stop_writer.cancel();
                        return Err(WorkerError::Io(e));
                    }
                    None => break WorkerExit::Disconnected,
                },
                _ = dispatch.faults.tripped.notified() => break WorkerExit::Faulted,
                _ = &mut termination => break WorkerExit::Signalled,
            }
        };
        drop(dispatch);
        stop_writer.cancel();
        if let Err(e) = writer.await {
            tracing::warn!(lineage = %lineage, error = %e, "channel writer failed");
        }
        tracing::debug!(lineage = %lineage, exit = ?exit, "worker runtime stopped");
        Ok(exit)
    }
}

struct Dispatch {
    reporter: Reporter,
    handlers: HandlerTable,
    hooks: Hooks,
    faults: Arc<FaultTracker>,
}

impl Dispatch {
    fn dispatch(&self, line: &str) -> Option<WorkerExit> {
        if line.trim().is_empty() {
            return None;
        }
        let envelope = match decode_line(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.reporter.error(&WireError::protocol(e.to_string()));
                return None;
            }
        };

        match envelope.kind {
            MessageType::Kill => return Some(WorkerExit::Killed),
            MessageType::Data => self.on_data(envelope.content),
            MessageType::Metrics => self.on_metrics(&envelope),
            MessageType::Task => self.on_task(&envelope),
            MessageType::Id | MessageType::Log | MessageType::Error => {
                self.reporter
                    .warn(format!("unexpected {} message from parent", envelope.kind.as_str()));
            }
        }
        None
    }

    fn on_data(&self, payload: Value) {
        let reporter = self.reporter.clone();
        self.guarded(Arc::clone(&self.hooks.on_data), payload, move |result| {
            if let Err(e) = result {
                reporter.error(&e);
            }
        });
    }

    fn on_metrics(&self, envelope: &Envelope) {
        let request = match envelope.decode::<MetricsRequest>() {
            Ok(request) => request,
            Err(e) => {
                return self.reject(envelope, e, |identifier, error| {
                    Envelope::metrics_reply(&MetricsReply::err(identifier, error))
                });
            }
        };

        let reporter = self.reporter.clone();
        let identifier = request.identifier;
        self.guarded(Arc::clone(&self.hooks.on_metrics), request.description, move |result| {
            let reply = match result {
                Ok(metrics) => MetricsReply::ok(identifier, metrics),
                Err(error) => MetricsReply::err(identifier, error),
            };
            reporter.send(Envelope::metrics_reply(&reply));
        });
    }

    fn on_task(&self, envelope: &Envelope) {
        let request = match envelope.decode::<TaskRequest>() {
            Ok(request) => request,
            Err(e) => {
                return self.reject(envelope, e, |identifier, error| {
                    Envelope::task_reply(&TaskReply::err(identifier, error))
                });
            }
        };

        let Some(handler) = self.handlers.get(&request.task) else {
            let error = WireError::remote_task(format!("task '{}' is not registered", request.task));
            self.reporter
                .send(Envelope::task_reply(&TaskReply::err(request.identifier, error)));
            return;
        };

        let reporter = self.reporter.clone();
        let identifier = request.identifier;
        self.guarded(handler, request.args, move |result| {
            let reply = match result {
                Ok(value) => TaskReply::ok(identifier, value),
                Err(error) => TaskReply::err(identifier, error),
            };
            reporter.send(Envelope::task_reply(&reply));
        });
    }

    /// Answers a malformed request: as a reply when its identifier can be
    /// recovered, as an `error` message otherwise.
    fn reject(&self, envelope: &Envelope, error: ProtocolError, reply: impl FnOnce(String, WireError) -> Envelope) {
        let wire = WireError::protocol(error.to_string());
        match envelope.str_field("identifier") {
            Some(identifier) => self.reporter.send(reply(identifier.to_owned(), wire)),
            None => self.reporter.error(&wire),
        }
    }

    /// Runs `handler` in its own task with panic isolation, then hands the
    /// encoded outcome to `done`.
    fn guarded<D>(&self, handler: HandlerRef, input: Value, done: D)
    where
        D: FnOnce(Result<Value, WireError>) + Send + 'static,
    {
        let faults = Arc::clone(&self.faults);
        let reporter = self.reporter.clone();
        tokio::spawn(async move {
            let call = async move { handler.call(input).await };
            let (result, panicked) = match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(value)) => {
                    faults.clear();
                    (Ok(value), false)
                }
                Ok(Err(e)) => {
                    faults.clear();
                    (Err(WireError::from_anyhow(&e)), false)
                }
                Err(panic) => {
                    let error = WireError::new(WireError::PANIC, panic_message(panic.as_ref()));
                    tracing::error!(error = %error, "handler panicked");
                    reporter.error(&error);
                    (Err(error), true)
                }
            };
            done(result);
            // Counted after the reply is queued: a trip stops the runtime.
            if panicked {
                faults.record();
            }
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{DuplexStream, ReadHalf};
    use tokio_util::codec::{FramedRead, LinesCodec};

    struct Parent {
        reader: FramedRead<ReadHalf<DuplexStream>, LinesCodec>,
        tx: mpsc::UnboundedSender<Envelope>,
    }

    impl Parent {
        async fn recv(&mut self) -> Envelope {
            let line = tokio::time::timeout(Duration::from_secs(5), self.reader.next())
                .await
                .expect("no message from worker")
                .expect("channel closed")
                .expect("framing error");
            decode_line(&line).unwrap()
        }

        fn send(&self, envelope: Envelope) {
            self.tx.send(envelope).unwrap();
        }
    }

    fn pair(lineage: &str) -> (WorkerRuntime, Parent) {
        let (worker_io, parent_io) = tokio::io::duplex(64 * 1024);
        let (wr, ww) = tokio::io::split(worker_io);
        let (pr, pw) = tokio::io::split(parent_io);
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_writer(pw, rx, CancellationToken::new());
        let runtime = WorkerRuntime::with_io(lineage, wr, ww);
        let parent = Parent {
            reader: frame_reader(pr),
            tx,
        };
        (runtime, parent)
    }

    fn connect_noop(rt: &WorkerRuntime) {
        rt.connect(
            |_data| async { anyhow::Ok(Value::Null) },
            |description| async move { anyhow::Ok(json!({"description": description})) },
        )
        .unwrap();
    }

    fn task(name: &str, identifier: &str, args: Value) -> Envelope {
        Envelope::task_request(&TaskRequest {
            task: name.to_owned(),
            identifier: identifier.to_owned(),
            args,
        })
    }

    #[tokio::test]
    async fn connect_sends_handshake_once() {
        let (rt, mut parent) = pair("lineage-1");
        connect_noop(&rt);
        assert_eq!(parent.recv().await, Envelope::id("lineage-1"));

        let again = rt.connect(|_d| async { anyhow::Ok(Value::Null) }, |_d| async { anyhow::Ok(Value::Null) });
        assert!(matches!(again, Err(WorkerError::AlreadyConnected)));
    }

    #[tokio::test]
    async fn run_requires_connect() {
        let (rt, _parent) = pair("lineage-1");
        assert!(matches!(rt.run().await, Err(WorkerError::NotConnected)));
    }

    #[tokio::test]
    async fn data_reaches_hook_and_tasks_reply_with_own_identifier() {
        let (rt, mut parent) = pair("lineage-1");
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        rt.connect(
            move |data| {
                let seen_tx = seen_tx.clone();
                async move {
                    let _ = seen_tx.send(data);
                    anyhow::Ok(Value::Null)
                }
            },
            |_d| async { anyhow::Ok(Value::Null) },
        )
        .unwrap();
        rt.register("echo", |args| async move { anyhow::Ok(args) });
        let running = tokio::spawn(rt.run());
        parent.recv().await;

        parent.send(Envelope::data(json!({"mode": "fast"})));
        assert_eq!(seen_rx.recv().await.unwrap(), json!({"mode": "fast"}));

        parent.send(task("echo", "t-1", json!({"n": 1})));
        let reply: TaskReply = parent.recv().await.decode().unwrap();
        assert_eq!(reply, TaskReply::ok("t-1", json!({"n": 1})));

        parent.send(Envelope::kill());
        let exit = running.await.unwrap().unwrap();
        assert_eq!(exit, WorkerExit::Killed);
        assert_eq!(exit.code(), 3);
    }

    #[tokio::test]
    async fn unregistered_task_is_remote_task_error() {
        let (rt, mut parent) = pair("lineage-1");
        connect_noop(&rt);
        let _running = tokio::spawn(rt.run());
        parent.recv().await;

        parent.send(task("bogus", "t-2", Value::Null));
        let reply: TaskReply = parent.recv().await.decode().unwrap();
        let error = reply.into_result().unwrap_err();
        assert_eq!(error.name, WireError::REMOTE_TASK);
        assert_eq!(error.message, "task 'bogus' is not registered");
    }

    #[tokio::test]
    async fn malformed_task_gets_protocol_error() {
        let (rt, mut parent) = pair("lineage-1");
        connect_noop(&rt);
        let _running = tokio::spawn(rt.run());
        parent.recv().await;

        parent.send(Envelope::new(MessageType::Task, json!({"identifier": "t-3"})));
        let reply: TaskReply = parent.recv().await.decode().unwrap();
        assert_eq!(reply.identifier, "t-3");
        assert_eq!(reply.into_result().unwrap_err().name, WireError::PROTOCOL);

        parent.send(Envelope::new(MessageType::Task, json!("garbage")));
        let report = parent.recv().await;
        assert_eq!(report.kind, MessageType::Error);
        assert_eq!(WireError::from_content(&report.content).name, WireError::PROTOCOL);
    }

    #[tokio::test]
    async fn handler_errors_are_encoded() {
        let (rt, mut parent) = pair("lineage-1");
        connect_noop(&rt);
        rt.register("fail", |_args| async { Err::<Value, _>(anyhow::anyhow!("disk full").context("writing report")) });
        let _running = tokio::spawn(rt.run());
        parent.recv().await;

        parent.send(task("fail", "t-4", Value::Null));
        let reply: TaskReply = parent.recv().await.decode().unwrap();
        let error = reply.into_result().unwrap_err();
        assert_eq!(error.message, "writing report");
        assert_eq!(error.causes, vec!["disk full".to_owned()]);
    }

    #[tokio::test]
    async fn metrics_reply_carries_identifier() {
        let (rt, mut parent) = pair("lineage-1");
        connect_noop(&rt);
        let _running = tokio::spawn(rt.run());
        parent.recv().await;

        parent.send(Envelope::metrics_request(&MetricsRequest {
            identifier: "m-1".into(),
            description: json!("rss"),
        }));
        let reply: MetricsReply = parent.recv().await.decode().unwrap();
        assert_eq!(reply, MetricsReply::ok("m-1", json!({"description": "rss"})));
    }

    #[tokio::test]
    async fn consecutive_panics_trip_fault_threshold() {
        let (rt, mut parent) = pair("lineage-1");
        let rt = rt.with_config(WorkerConfig { fault_threshold: 2 });
        connect_noop(&rt);
        rt.register("panic", |args: Value| async move {
            if args.get("boom").is_some() {
                panic!("handler exploded");
            }
            anyhow::Ok(args)
        });
        let running = tokio::spawn(rt.run());
        parent.recv().await;

        for identifier in ["p-1", "p-2"] {
            parent.send(task("panic", identifier, json!({"boom": 1})));
            let report = parent.recv().await;
            assert_eq!(report.kind, MessageType::Error);
            assert_eq!(WireError::from_content(&report.content).message, "handler exploded");

            let reply: TaskReply = parent.recv().await.decode().unwrap();
            assert_eq!(reply.identifier, identifier);
            assert_eq!(reply.into_result().unwrap_err().name, WireError::PANIC);
        }

        let exit = tokio::time::timeout(Duration::from_secs(5), running).await.unwrap().unwrap().unwrap();
        assert_eq!(exit, WorkerExit::Faulted);
        assert_eq!(exit.code(), FAULT_EXIT_CODE);
        assert!(parent.reader.next().await.is_none());
    }

    #[tokio::test]
    async fn parent_eof_disconnects() {
        let (rt, mut parent) = pair("lineage-1");
        connect_noop(&rt);
        let running = tokio::spawn(rt.run());
        parent.recv().await;

        drop(parent);
        let exit = tokio::time::timeout(Duration::from_secs(5), running).await.unwrap().unwrap().unwrap();
        assert_eq!(exit, WorkerExit::Disconnected);
    }
}
