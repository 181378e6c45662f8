//! Child-side runtime for supervised workers.
//!
//! A worker binary builds a [`WorkerRuntime`], registers its tasks, connects,
//! and runs until the parent stops it:
//!
//! ```rust,no_run
//! use serde_json::{Value, json};
//! use forkvisor::WorkerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = WorkerRuntime::from_args()?;
//!     let reporter = runtime.reporter();
//!
//!     runtime.register("echo", |args| async move { anyhow::Ok(args) });
//!     runtime.connect(
//!         move |data: Value| {
//!             let reporter = reporter.clone();
//!             async move {
//!                 reporter.info(format!("started with {data}"));
//!                 anyhow::Ok(Value::Null)
//!             }
//!         },
//!         |_description| async { anyhow::Ok(json!({"ok": true})) },
//!     )?;
//!
//!     let exit = runtime.run().await?;
//!     std::process::exit(exit.code());
//! }
//! ```

mod handler;
mod reporter;
mod runtime;
mod shutdown;

pub use handler::{BoxHandlerFuture, Handler, HandlerFn, HandlerRef, HandlerTable};
pub use reporter::Reporter;
pub use runtime::{FAULT_EXIT_CODE, WorkerConfig, WorkerExit, WorkerRuntime};
