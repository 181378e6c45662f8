//! # Wire protocol shared by the supervisor and the worker runtime.
//!
//! Every message crossing the channel is an [`Envelope`]: a tag plus
//! tag-dependent JSON content, written as one line of JSON.
//!
//! ```text
//!   parent (Supervisor)                              child (WorkerRuntime)
//!   ───────────────────                              ─────────────────────
//!                      ◄──── id       {lineage}
//!   data {payload}     ────►
//!   task {task, identifier, args}  ────►
//!                      ◄──── task     {identifier, result? | error?}
//!   metrics {identifier, description} ────►
//!                      ◄──── metrics  {identifier, metrics? | error?}
//!                      ◄──── log      {level, message}
//!                      ◄──── error    <string | encoded error>
//!   kill               ────►          (worker exits with status 3)
//! ```
//!
//! ## Contents
//! - [`Envelope`], [`MessageType`]: the tagged union
//! - [`TaskRequest`], [`TaskReply`], [`MetricsRequest`], [`MetricsReply`], [`LogRecord`]: typed contents
//! - [`WireError`]: explicit error-to-wire encoder
//! - [`ProtocolError`]: malformed inbound traffic (logged, never surfaced to callers)

mod codec;
mod envelope;
mod wire_error;

pub(crate) use codec::{decode_line, frame_reader, spawn_writer};
pub use envelope::{
    Envelope, LogRecord, MessageType, MetricsReply, MetricsRequest, TaskReply, TaskRequest,
};
pub use wire_error::{ProtocolError, WireError};

/// Exit status used by a worker that stops because the parent sent `kill`.
pub const KILL_EXIT_CODE: i32 = 3;
