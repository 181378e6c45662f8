#![allow(dead_code)]

use std::time::Duration;

use forkvisor::{Event, EventKind, Supervisor, SupervisorConfig};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

/// Upper bound for any single wait on the fixture worker.
pub const WAIT: Duration = Duration::from_secs(10);

/// Path of the test worker binary.
pub fn fixture() -> &'static str {
    env!("CARGO_BIN_EXE_forkvisor-fixture")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Receives events until one of `kind` arrives.
pub async fn next_of(rx: &mut broadcast::Receiver<Event>, kind: EventKind) -> Event {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(ev) if ev.kind == kind => return ev,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("bus closed while waiting for {kind:?}"),
            }
        }
    };
    tokio::time::timeout(WAIT, wait)
        .await
        .unwrap_or_else(|_| panic!("no {kind:?} event within {WAIT:?}"))
}

/// Asserts that no event of `kind` arrives within `window`.
pub async fn none_of(rx: &mut broadcast::Receiver<Event>, kind: EventKind, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Err(_) => return,
            Ok(Ok(ev)) => assert_ne!(ev.kind, kind, "unexpected event: {ev:?}"),
            Ok(Err(RecvError::Lagged(_))) => continue,
            Ok(Err(RecvError::Closed)) => return,
        }
    }
}

/// Builds a supervisor, spawns the fixture and waits for `Ready`.
pub async fn spawn_ready(cfg: SupervisorConfig, data: Value) -> (Supervisor, broadcast::Receiver<Event>) {
    init_tracing();
    let sup = Supervisor::builder(cfg).build().expect("valid config");
    let mut events = sup.subscribe();
    sup.spawn(fixture(), data).expect("spawn");
    next_of(&mut events, EventKind::Ready).await;
    (sup, events)
}
