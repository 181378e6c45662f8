mod common;

use std::time::Duration;

use forkvisor::{EventKind, Host, SupervisorConfig};
use serde_json::json;

use common::{fixture, next_of};

#[tokio::test(flavor = "multi_thread")]
async fn host_start_stop_start() {
    common::init_tracing();
    let host = Host::new(fixture(), SupervisorConfig::default());
    let mut events = host.subscribe();

    let first = host.start(json!({"round": 1})).unwrap();
    next_of(&mut events, EventKind::Ready).await;
    assert_eq!(
        host.run_task("initial", json!(null), Some(Duration::from_secs(5))).await.unwrap(),
        json!({"round": 1})
    );

    host.stop();
    let close = next_of(&mut events, EventKind::Close).await;
    assert_eq!(&*close.lineage, first.lineage());
    assert!(host.supervisor().is_none());

    let second = host.start(json!({"round": 2})).unwrap();
    assert_ne!(second.lineage(), first.lineage());
    next_of(&mut events, EventKind::Ready).await;
    let metrics = host.pull_metrics(json!("cpu"), None).await.unwrap();
    assert_eq!(metrics["description"], json!("cpu"));

    host.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn host_restart_replaces_the_worker() {
    common::init_tracing();
    let host = Host::new(fixture(), SupervisorConfig::default());
    let mut events = host.subscribe();

    let first = host.start(json!({})).unwrap();
    next_of(&mut events, EventKind::Ready).await;

    let second = host.restart(json!({"fresh": true})).unwrap();
    assert_ne!(first.lineage(), second.lineage());
    let ready = tokio::time::timeout(common::WAIT, async {
        loop {
            let ev = next_of(&mut events, EventKind::Ready).await;
            if &*ev.lineage == second.lineage() {
                return ev;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(&*ready.lineage, second.lineage());

    let out = host.queue_task("echo", json!([1, 2]), Some(Duration::from_secs(5))).await.unwrap();
    assert_eq!(out, json!([1, 2]));
    host.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_publishes_close_when_no_handle_is_held() {
    common::init_tracing();
    let host = Host::new(fixture(), SupervisorConfig::default());
    let mut events = host.subscribe();

    let lineage = {
        let sup = host.start(json!({})).unwrap();
        sup.lineage().to_owned()
    };
    let ready = next_of(&mut events, EventKind::Ready).await;
    assert_eq!(&*ready.lineage, lineage);

    host.stop();
    let close = next_of(&mut events, EventKind::Close).await;
    assert_eq!(&*close.lineage, lineage);
}
