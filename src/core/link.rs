//! # Child process link.
//!
//! [`launch`] starts a worker process and wires its pipes:
//!
//! ```text
//!            ┌──────── outbound (mpsc) ──► writer task ──► child stdin
//! Supervisor ┤
//!            └──◄ LinkEvents::on_message ◄── reader task ◄── child stdout
//!                 LinkEvents::on_close   ◄── reader EOF / exit watch
//! ```
//!
//! Both the reader and the exit watch report a close; the receiver dedupes by
//! generation. The link holds its receiver weakly so a dropped supervisor lets
//! the tasks wind down instead of keeping it alive.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Weak};

use futures::StreamExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::codec::LinesCodecError;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Envelope, ProtocolError, decode_line, frame_reader, spawn_writer};

/// Receiver of link signals, tagged with the spawn generation.
pub(crate) trait LinkEvents: Send + Sync + 'static {
    fn on_message(self: &Arc<Self>, generation: u64, envelope: Envelope);
    fn on_close(self: &Arc<Self>, generation: u64, reason: String);
}

/// Handle to one spawned child.
#[derive(Debug)]
pub(crate) struct Link {
    generation: u64,
    outbound: mpsc::UnboundedSender<Envelope>,
    kill: CancellationToken,
    pid: Option<u32>,
}

impl Link {
    pub(crate) fn new(
        generation: u64,
        outbound: mpsc::UnboundedSender<Envelope>,
        kill: CancellationToken,
        pid: Option<u32>,
    ) -> Self {
        Self {
            generation,
            outbound,
            kill,
            pid,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn outbound(&self) -> &mpsc::UnboundedSender<Envelope> {
        &self.outbound
    }

    /// Cancelling this token force-kills the child.
    pub(crate) fn kill_token(&self) -> &CancellationToken {
        &self.kill
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// A started child whose inbound side is not being watched yet.
///
/// Attach the [`Link`] first, then call [`Unwatched::watch`], so that no
/// message can arrive before the supervisor knows about the child.
pub(crate) struct Unwatched {
    child: Child,
    stdout: ChildStdout,
    kill: CancellationToken,
    generation: u64,
}

/// Resolves a module path. Relative paths are taken relative to the directory
/// of the running executable.
pub(crate) fn resolve_module(module: &Path) -> io::Result<PathBuf> {
    if module.is_absolute() {
        return Ok(module.to_path_buf());
    }
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "executable has no parent directory"))?;
    Ok(dir.join(module))
}

/// Starts `module` with `lineage` as its only argument.
///
/// The child gets its own process group on Unix and is not killed when its
/// handle drops; only the kill token terminates it.
pub(crate) fn launch(module: &Path, lineage: &str, generation: u64) -> io::Result<(Link, Unwatched)> {
    let mut cmd = Command::new(module);
    cmd.arg(lineage)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn()?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "child stdin is not piped"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "child stdout is not piped"))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let kill = CancellationToken::new();
    spawn_writer(stdin, rx, kill.clone());

    let link = Link::new(generation, tx, kill.clone(), child.id());
    let unwatched = Unwatched {
        child,
        stdout,
        kill,
        generation,
    };
    Ok((link, unwatched))
}

impl Unwatched {
    /// Spawns the reader and exit-watch tasks.
    pub(crate) fn watch<H: LinkEvents>(self, events: Weak<H>) {
        let Unwatched {
            child,
            stdout,
            kill,
            generation,
        } = self;
        spawn_reader(stdout, generation, events.clone());
        spawn_exit_watch(child, generation, kill, events);
    }
}

fn spawn_reader<H: LinkEvents>(stdout: ChildStdout, generation: u64, events: Weak<H>) {
    tokio::spawn(async move {
        let mut frames = frame_reader(stdout);
        let reason = loop {
            match frames.next().await {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let envelope = match decode_line(&line) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            tracing::warn!(generation, error = %e, "dropping malformed line from worker");
                            continue;
                        }
                    };
                    let Some(handler) = events.upgrade() else {
                        return;
                    };
                    handler.on_message(generation, envelope);
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    let error = ProtocolError::from(LinesCodecError::MaxLineLengthExceeded);
                    tracing::warn!(generation, error = %error, "dropping oversized line from worker");
                }
                Some(Err(e)) => break ProtocolError::from(e).to_string(),
                None => break "disconnected".to_owned(),
            }
        };
        if let Some(handler) = events.upgrade() {
            handler.on_close(generation, reason);
        }
    });
}

fn spawn_exit_watch<H: LinkEvents>(mut child: Child, generation: u64, kill: CancellationToken, events: Weak<H>) {
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill.cancelled() => {
                if let Err(e) = child.start_kill() {
                    tracing::debug!(generation, error = %e, "force kill failed");
                }
                child.wait().await
            }
        };
        // Releases a pending grace timer.
        kill.cancel();

        let reason = match status {
            Ok(status) => status.to_string(),
            Err(e) => format!("wait failed: {e}"),
        };
        if let Some(handler) = events.upgrade() {
            handler.on_close(generation, reason);
        }
    });
}
