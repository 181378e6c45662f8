//! # Connection state machine.
//!
//! [`Lifecycle`] is the single owner of a supervisor's connection state. It is
//! pure bookkeeping: no I/O, no awaits. The supervisor calls it under a short
//! lock and acts on the returned decision.
//!
//! ```text
//!  Unspawned ─spawn─► Spawning ─handshake─► Connected
//!                        │                      │
//!                        └──────── close ───────┴─► Closed
//!                                                     ├─ Always && !halted ─► Respawning ─(delay)─► Spawning
//!                                                     └─ otherwise ────────► Terminal
//! ```
//!
//! ## Generations
//! Every spawn (manual or automatic) bumps the generation. Signals carry the
//! generation of the child they came from; anything from an older generation
//! is ignored. This makes `close` idempotent per spawn and lets a manual spawn
//! during the restart delay cancel the pending respawn.

use std::path::PathBuf;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::policies::RestartPolicy;
use crate::protocol::Envelope;

use super::link::Link;

/// Observable connection state of a supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// `spawn` was never called.
    Unspawned,
    /// A process is being started or has not completed the handshake yet.
    Spawning,
    /// The handshake succeeded.
    Connected,
    /// The worker closed; the restart decision is being made.
    Closed,
    /// A respawn is scheduled.
    Respawning,
    /// The worker closed and will not be respawned.
    Terminal,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Unspawned => "unspawned",
            ConnectionState::Spawning => "spawning",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
            ConnectionState::Respawning => "respawning",
            ConnectionState::Terminal => "terminal",
        }
    }
}

/// Result of an inbound `id` message.
#[derive(Debug)]
pub(crate) enum Handshake {
    /// Lineage matched; push `data` and announce readiness.
    Accepted {
        data: Value,
        outbound: mpsc::UnboundedSender<Envelope>,
    },
    /// Lineage did not match.
    Mismatch,
    /// Already connected; the message is ignored.
    Duplicate,
    /// Came from a superseded child.
    Stale,
}

/// Decision taken on a close signal.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AfterClose {
    /// Older generation or already closed.
    Ignored,
    Terminal,
    /// Respawn after the backoff delay; `attempt` is 1-based.
    Respawn { attempt: u32 },
}

pub(crate) struct Lifecycle {
    state: ConnectionState,
    generation: u64,
    module: Option<PathBuf>,
    data: Value,
    halted: bool,
    kill_pending: bool,
    restarts: u32,
    link: Option<Link>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: ConnectionState::Unspawned,
            generation: 0,
            module: None,
            data: Value::Null,
            halted: false,
            kill_pending: false,
            restarts: 0,
            link: None,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.link.as_ref().and_then(Link::pid)
    }

    /// Starts a manual spawn. Returns `None` while a worker is spawning or connected.
    ///
    /// Clears restart suppression and the consecutive restart count.
    pub(crate) fn begin_spawn(&mut self, module: PathBuf, data: Value) -> Option<u64> {
        if matches!(self.state, ConnectionState::Spawning | ConnectionState::Connected) {
            return None;
        }
        self.generation += 1;
        self.state = ConnectionState::Spawning;
        self.module = Some(module);
        self.data = data;
        self.halted = false;
        self.kill_pending = false;
        self.restarts = 0;
        self.link = None;
        Some(self.generation)
    }

    /// Claims a scheduled respawn. Returns the new generation and the module
    /// path, or `None` if the respawn was superseded or cancelled.
    pub(crate) fn take_respawn(&mut self, closed_generation: u64) -> Option<(u64, PathBuf)> {
        if self.state != ConnectionState::Respawning || self.generation != closed_generation {
            return None;
        }
        let module = self.module.clone()?;
        self.generation += 1;
        self.state = ConnectionState::Spawning;
        self.kill_pending = false;
        Some((self.generation, module))
    }

    /// Stores the link of a started child. Hands it back if the spawn is no
    /// longer current.
    ///
    /// Returns `true` when a kill arrived before the child existed; the
    /// caller must kill it now.
    pub(crate) fn attach(&mut self, link: Link) -> Result<bool, Link> {
        if link.generation() != self.generation || self.state != ConnectionState::Spawning {
            return Err(link);
        }
        self.link = Some(link);
        Ok(std::mem::take(&mut self.kill_pending))
    }

    /// A spawn failed before any process existed. Never schedules a restart.
    pub(crate) fn fail_spawn(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != ConnectionState::Spawning {
            return false;
        }
        self.state = ConnectionState::Terminal;
        self.link = None;
        true
    }

    pub(crate) fn handshake(&mut self, generation: u64, presented: Option<&str>, expected: &str) -> Handshake {
        if generation != self.generation {
            return Handshake::Stale;
        }
        match self.state {
            ConnectionState::Connected => return Handshake::Duplicate,
            ConnectionState::Spawning => {}
            _ => return Handshake::Stale,
        }
        if presented != Some(expected) {
            return Handshake::Mismatch;
        }
        let Some(outbound) = self.link.as_ref().map(|l| l.outbound().clone()) else {
            return Handshake::Stale;
        };
        self.state = ConnectionState::Connected;
        self.restarts = 0;
        Handshake::Accepted {
            data: self.data.clone(),
            outbound,
        }
    }

    /// Handles a close signal of `generation`. Idempotent per generation.
    pub(crate) fn close(&mut self, generation: u64, policy: RestartPolicy) -> AfterClose {
        if generation != self.generation
            || !matches!(self.state, ConnectionState::Spawning | ConnectionState::Connected)
        {
            return AfterClose::Ignored;
        }
        self.state = ConnectionState::Closed;
        self.link = None;

        if policy.restarts() && !self.halted {
            self.restarts = self.restarts.saturating_add(1);
            self.state = ConnectionState::Respawning;
            AfterClose::Respawn {
                attempt: self.restarts,
            }
        } else {
            self.state = ConnectionState::Terminal;
            AfterClose::Terminal
        }
    }

    /// Prepares a kill. Returns the channel and kill token of the live child.
    ///
    /// With `suppress_restart`, the next close goes terminal and a respawn
    /// that is already scheduled is cancelled. A kill during spawn, before the
    /// child exists, is deferred until [`attach`](Self::attach).
    pub(crate) fn arm_kill(
        &mut self,
        suppress_restart: bool,
    ) -> Option<(mpsc::UnboundedSender<Envelope>, CancellationToken)> {
        if suppress_restart {
            self.halted = true;
            if self.state == ConnectionState::Respawning {
                self.state = ConnectionState::Terminal;
            }
        }
        if self.link.is_none() && self.state == ConnectionState::Spawning {
            self.kill_pending = true;
        }
        self.link
            .as_ref()
            .map(|l| (l.outbound().clone(), l.kill_token().clone()))
    }

    /// Channel of the live child, if any.
    pub(crate) fn outbound(&self) -> Option<mpsc::UnboundedSender<Envelope>> {
        self.link.as_ref().map(|l| l.outbound().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn link(generation: u64) -> (Link, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Link::new(generation, tx, CancellationToken::new(), None), rx)
    }

    fn connected(lc: &mut Lifecycle) -> u64 {
        let generation = lc.begin_spawn(PathBuf::from("/bin/worker"), json!({"k": 1})).unwrap();
        let (l, _rx) = link(generation);
        assert!(!lc.attach(l).unwrap());
        assert!(matches!(
            lc.handshake(generation, Some("me"), "me"),
            Handshake::Accepted { .. }
        ));
        generation
    }

    #[test]
    fn spawn_while_live_is_rejected() {
        let mut lc = Lifecycle::new();
        assert!(lc.begin_spawn(PathBuf::from("a"), Value::Null).is_some());
        assert!(lc.begin_spawn(PathBuf::from("a"), Value::Null).is_none());
        assert_eq!(lc.state(), ConnectionState::Spawning);
    }

    #[test]
    fn handshake_accepts_once_and_returns_data() {
        let mut lc = Lifecycle::new();
        let generation = lc.begin_spawn(PathBuf::from("a"), json!({"k": 1})).unwrap();
        let (l, _rx) = link(generation);
        lc.attach(l).unwrap();

        match lc.handshake(generation, Some("me"), "me") {
            Handshake::Accepted { data, .. } => assert_eq!(data, json!({"k": 1})),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(lc.state(), ConnectionState::Connected);
        assert!(matches!(lc.handshake(generation, Some("me"), "me"), Handshake::Duplicate));
    }

    #[test]
    fn handshake_mismatch_does_not_connect() {
        let mut lc = Lifecycle::new();
        let generation = lc.begin_spawn(PathBuf::from("a"), Value::Null).unwrap();
        let (l, _rx) = link(generation);
        lc.attach(l).unwrap();

        assert!(matches!(lc.handshake(generation, Some("other"), "me"), Handshake::Mismatch));
        assert!(matches!(lc.handshake(generation, None, "me"), Handshake::Mismatch));
        assert_eq!(lc.state(), ConnectionState::Spawning);
    }

    #[test]
    fn close_is_idempotent_per_generation() {
        let mut lc = Lifecycle::new();
        let generation = connected(&mut lc);

        assert_eq!(lc.close(generation, RestartPolicy::Never), AfterClose::Terminal);
        assert_eq!(lc.close(generation, RestartPolicy::Never), AfterClose::Ignored);
        assert_eq!(lc.state(), ConnectionState::Terminal);
        assert!(lc.outbound().is_none());
    }

    #[test]
    fn suppressed_kill_prevents_restart() {
        let mut lc = Lifecycle::new();
        let generation = connected(&mut lc);

        assert!(lc.arm_kill(true).is_some());
        assert_eq!(lc.close(generation, RestartPolicy::Always), AfterClose::Terminal);
    }

    #[test]
    fn unsuppressed_close_schedules_one_respawn() {
        let mut lc = Lifecycle::new();
        let generation = connected(&mut lc);

        assert!(lc.arm_kill(false).is_some());
        assert_eq!(
            lc.close(generation, RestartPolicy::Always),
            AfterClose::Respawn { attempt: 1 }
        );
        let (next, module) = lc.take_respawn(generation).unwrap();
        assert_eq!(next, generation + 1);
        assert_eq!(module, PathBuf::from("/bin/worker"));
        assert!(lc.take_respawn(generation).is_none());
    }

    #[test]
    fn consecutive_restarts_count_until_handshake() {
        let mut lc = Lifecycle::new();
        let first = lc.begin_spawn(PathBuf::from("a"), Value::Null).unwrap();
        assert_eq!(lc.close(first, RestartPolicy::Always), AfterClose::Respawn { attempt: 1 });
        let (second, _) = lc.take_respawn(first).unwrap();
        assert_eq!(lc.close(second, RestartPolicy::Always), AfterClose::Respawn { attempt: 2 });
        let (third, _) = lc.take_respawn(second).unwrap();

        let (l, _rx) = link(third);
        lc.attach(l).unwrap();
        assert!(matches!(lc.handshake(third, Some("me"), "me"), Handshake::Accepted { .. }));
        assert_eq!(lc.close(third, RestartPolicy::Always), AfterClose::Respawn { attempt: 1 });
    }

    #[test]
    fn manual_spawn_supersedes_pending_respawn() {
        let mut lc = Lifecycle::new();
        let generation = connected(&mut lc);
        assert!(matches!(lc.close(generation, RestartPolicy::Always), AfterClose::Respawn { .. }));

        assert!(lc.begin_spawn(PathBuf::from("b"), Value::Null).is_some());
        assert!(lc.take_respawn(generation).is_none());
    }

    #[test]
    fn suppressed_kill_cancels_scheduled_respawn() {
        let mut lc = Lifecycle::new();
        let generation = connected(&mut lc);
        assert!(matches!(lc.close(generation, RestartPolicy::Always), AfterClose::Respawn { .. }));

        assert!(lc.arm_kill(true).is_none());
        assert_eq!(lc.state(), ConnectionState::Terminal);
        assert!(lc.take_respawn(generation).is_none());
    }

    #[test]
    fn kill_before_attach_is_deferred() {
        let mut lc = Lifecycle::new();
        let generation = lc.begin_spawn(PathBuf::from("a"), Value::Null).unwrap();
        assert!(lc.arm_kill(true).is_none());

        let (l, _rx) = link(generation);
        assert!(lc.attach(l).unwrap());
        assert!(lc.arm_kill(true).is_some());
        assert_eq!(lc.close(generation, RestartPolicy::Always), AfterClose::Terminal);
    }

    #[test]
    fn failed_spawn_is_terminal_and_stale_links_are_returned() {
        let mut lc = Lifecycle::new();
        let generation = lc.begin_spawn(PathBuf::from("missing"), Value::Null).unwrap();
        assert!(lc.fail_spawn(generation));
        assert_eq!(lc.state(), ConnectionState::Terminal);

        let (l, _rx) = link(generation);
        assert!(lc.attach(l).is_err());
    }
}
