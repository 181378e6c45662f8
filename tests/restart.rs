mod common;

use std::time::Duration;

use forkvisor::{ConnectionState, EventKind, SupervisorConfig};
use serde_json::json;

use common::{next_of, none_of, spawn_ready};

fn auto_restart() -> SupervisorConfig {
    SupervisorConfig::auto_restart(Duration::from_millis(100))
}

#[tokio::test(flavor = "multi_thread")]
async fn suppressed_kill_never_restarts() {
    let (sup, mut events) = spawn_ready(auto_restart(), json!({})).await;

    sup.kill(true);
    next_of(&mut events, EventKind::Close).await;
    none_of(&mut events, EventKind::Restart, Duration::from_millis(500)).await;
    assert_eq!(sup.state(), ConnectionState::Terminal);
}

#[tokio::test(flavor = "multi_thread")]
async fn kill_restarts_once_with_same_lineage() {
    let (sup, mut events) = spawn_ready(auto_restart(), json!({"v": 1})).await;
    let lineage = sup.lineage().to_owned();
    let first_pid = sup.pid();

    sup.kill(false);
    next_of(&mut events, EventKind::Close).await;
    let restart = next_of(&mut events, EventKind::Restart).await;
    assert_eq!(restart.attempt, Some(1));
    let ready = next_of(&mut events, EventKind::Ready).await;
    assert_eq!(&*ready.lineage, lineage);

    assert_ne!(sup.pid(), first_pid);
    assert_eq!(
        sup.run_task("initial", json!(null), Some(Duration::from_secs(5))).await.unwrap(),
        json!({"v": 1})
    );

    none_of(&mut events, EventKind::Restart, Duration::from_millis(300)).await;
    sup.kill(true);
    next_of(&mut events, EventKind::Close).await;
    none_of(&mut events, EventKind::Restart, Duration::from_millis(300)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn crashed_worker_is_respawned() {
    let (sup, mut events) = spawn_ready(auto_restart(), json!({})).await;

    let _ = sup.run_task("crash", json!({"code": 9}), Some(Duration::from_millis(200))).await;
    let close = next_of(&mut events, EventKind::Close).await;
    assert!(close.reason.is_some());
    next_of(&mut events, EventKind::Restart).await;
    next_of(&mut events, EventKind::Ready).await;

    assert_eq!(sup.run_task("echo", json!("back"), Some(Duration::from_secs(5))).await.unwrap(), json!("back"));
    sup.kill(true);
}

#[tokio::test(flavor = "multi_thread")]
async fn without_restart_policy_close_is_terminal() {
    let (sup, mut events) = spawn_ready(SupervisorConfig::default(), json!({})).await;

    let _ = sup.run_task("crash", json!({"code": 1}), Some(Duration::from_millis(200))).await;
    next_of(&mut events, EventKind::Close).await;
    none_of(&mut events, EventKind::Restart, Duration::from_millis(300)).await;
    assert_eq!(sup.state(), ConnectionState::Terminal);
}
