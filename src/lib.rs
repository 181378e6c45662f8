//! # forkvisor
//!
//! **Forkvisor** supervises child worker processes over a private,
//! line-delimited JSON channel on the child's stdin/stdout.
//!
//! The parent side ([`Supervisor`]) spawns a worker executable, verifies it
//! with an id handshake, dispatches named tasks and metrics pulls with
//! per-call timeouts, buffers submissions in a bounded queue, and respawns the
//! worker after it dies. The child side ([`WorkerRuntime`]) registers task
//! handlers and answers the parent.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  ┌───────────────────────────────────────────────────────────────────┐
//!  │  Supervisor (one per worker, lineage id fixed across restarts)    │
//!  │  - Lifecycle (state machine with spawn generations)               │
//!  │  - Ledger ×2 (task / metrics correlation, overflow clearing)      │
//!  │  - WorkQueue (bounded FIFO, resizable semaphore)                  │
//!  │  - Bus (broadcast events) ──► SubscriberSet (per-sub queues)      │
//!  └──────┬───────────────────────────────────────────────▲────────────┘
//!         │ stdin: data / task / metrics / kill           │ stdout: id / task / metrics / log / error
//!         ▼                                               │
//!  ┌──────────────────────────────────────────────────────┴────────────┐
//!  │  child process: WorkerRuntime                                     │
//!  │  - HandlerTable (named tasks)                                     │
//!  │  - data / metrics hooks                                           │
//!  │  - panic isolation + fault threshold                              │
//!  └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! spawn(module, data) ──► child started with argv[1] = lineage
//!   ├─► child: connect() ──► id(lineage)
//!   ├─► parent: id matches ──► Connected ──► data(payload) ──► Ready
//!   │          id differs  ──► error log ──► kill(suppress_restart)
//!   └─► close (EOF / exit / forced kill) ──► Close
//!          ├─ RestartPolicy::Always && not suppressed ─► sleep(backoff) ─► Restart ─► spawn
//!          └─ otherwise ─► Terminal
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                        |
//! |-------------------|---------------------------------------------------------------|-------------------------------------------|
//! | **Supervision**   | Spawn, handshake, kill, auto-restart of one worker process.   | [`Supervisor`], [`ConnectionState`]       |
//! | **Requests**      | Tasks and metrics with per-call deadlines; bounded queue.     | [`Supervisor::run_task`], [`Supervisor::run_queue_task`] |
//! | **Policies**      | Restart decision and respawn delay.                           | [`RestartPolicy`], [`BackoffPolicy`]      |
//! | **Subscriber API**| Observe a fixed set of lifecycle events.                      | [`Subscribe`], [`Event`], [`EventKind`]   |
//! | **Worker side**   | Handler registration, replies, diagnostics.                   | [`WorkerRuntime`], [`Reporter`]           |
//! | **Wire**          | Envelope types and explicit error encoding.                   | [`Envelope`], [`WireError`]               |
//! | **Errors**        | Typed errors with stable labels.                              | [`SupervisorError`], [`WorkerError`]      |
//! | **Configuration** | Centralized knobs with defaults.                              | [`SupervisorConfig`], [`WorkerConfig`]    |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] subscriber.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::json;
//! use forkvisor::{EventKind, Supervisor, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = SupervisorConfig::auto_restart(Duration::from_millis(100));
//!
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn forkvisor::Subscribe>> = vec![Arc::new(forkvisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn forkvisor::Subscribe>> = Vec::new();
//!
//!     let sup = Supervisor::builder(cfg).with_subscribers(subs).build()?;
//!     let mut events = sup.subscribe();
//!
//!     sup.spawn("my-worker", json!({"threads": 2}))?;
//!     while events.recv().await?.kind != EventKind::Ready {}
//!
//!     let done = sup.run_queue_task("resize", json!({"w": 64}), Some(Duration::from_secs(2)));
//!     println!("{}", done.await?);
//!
//!     let metrics = sup.pull_metrics(json!("memory"), None).await?;
//!     println!("{metrics}");
//!
//!     sup.kill(true);
//!     Ok(())
//! }
//! ```

mod core;
mod error;
mod events;
mod host;
mod policies;
mod protocol;
mod subscribers;
mod worker;

// ---- Public re-exports ----

pub use self::core::{ConnectionState, DEFAULT_CAPACITY, Supervisor, SupervisorBuilder, SupervisorConfig};
pub use error::{Operation, SupervisorError, WorkerError};
pub use events::{Bus, Event, EventKind};
pub use host::Host;
pub use policies::{BackoffPolicy, JitterPolicy, RestartPolicy};
pub use protocol::{
    Envelope, KILL_EXIT_CODE, LogRecord, MessageType, MetricsReply, MetricsRequest, ProtocolError, TaskReply,
    TaskRequest, WireError,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use worker::{
    BoxHandlerFuture, FAULT_EXIT_CODE, Handler, HandlerFn, HandlerRef, HandlerTable, Reporter, WorkerConfig,
    WorkerExit, WorkerRuntime,
};

#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
