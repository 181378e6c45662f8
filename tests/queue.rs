mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use forkvisor::{SupervisorConfig, SupervisorError};
use serde_json::json;

use common::{WAIT, spawn_ready};

const CALL: Option<Duration> = Some(Duration::from_secs(5));

#[tokio::test(flavor = "multi_thread")]
async fn jobs_run_in_submission_order() {
    let (sup, _events) = spawn_ready(SupervisorConfig::default(), json!({})).await;
    let finished = Arc::new(Mutex::new(Vec::new()));

    // Earlier jobs sleep longer; with concurrency 1 they still finish first.
    let jobs: Vec<_> = (0..5u64)
        .map(|i| {
            let done = sup.run_queue_task("sleep", json!({"ms": 50 - i * 10, "i": i}), CALL);
            let finished = Arc::clone(&finished);
            async move {
                let out = done.await.unwrap();
                finished.lock().unwrap().push(out["i"].as_u64().unwrap());
            }
        })
        .collect();
    futures::future::join_all(jobs).await;

    assert_eq!(*finished.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert_eq!(sup.queue_size(), 0);
    sup.kill(true);
}

#[tokio::test(flavor = "multi_thread")]
async fn full_queue_rejects_at_once() {
    let mut cfg = SupervisorConfig::default();
    cfg.max_queue = 2;
    let (sup, _events) = spawn_ready(cfg, json!({})).await;

    let running = sup.run_queue_task("sleep", json!({"ms": 500}), CALL);
    tokio::time::timeout(WAIT, async {
        while sup.queue_size() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let second = sup.run_queue_task("echo", json!(2), CALL);
    let third = sup.run_queue_task("echo", json!(3), CALL);
    assert_eq!(sup.queue_size(), 2);

    let err = sup.run_queue_task("echo", json!(4), CALL).await.unwrap_err();
    assert!(matches!(err, SupervisorError::QueueFull { capacity: 2 }));

    assert_eq!(running.await.unwrap(), json!({"ms": 500}));
    assert_eq!(second.await.unwrap(), json!(2));
    assert_eq!(third.await.unwrap(), json!(3));
    sup.kill(true);
}

#[tokio::test(flavor = "multi_thread")]
async fn raised_concurrency_overlaps_jobs() {
    let (sup, _events) = spawn_ready(SupervisorConfig::default(), json!({})).await;
    sup.set_queue_concurrency(4).unwrap();
    assert_eq!(sup.queue_concurrency(), 4);

    let started = tokio::time::Instant::now();
    let jobs: Vec<_> = (0..4).map(|_| sup.run_queue_task("sleep", json!({"ms": 300}), CALL)).collect();
    for out in futures::future::join_all(jobs).await {
        out.unwrap();
    }
    assert!(started.elapsed() < Duration::from_millis(1100), "jobs ran serially: {:?}", started.elapsed());

    let err = sup.set_queue_concurrency(0).unwrap_err();
    assert_eq!(err.as_label(), "validation");
    sup.kill(true);
}

#[tokio::test(flavor = "multi_thread")]
async fn queued_job_reports_task_errors() {
    let (sup, _events) = spawn_ready(SupervisorConfig::default(), json!({})).await;

    let err = sup.run_queue_task("bogus", json!(null), CALL).await.unwrap_err();
    assert_eq!(err.as_label(), "remote_task");
    let err = sup
        .run_queue_task("slow", json!(null), Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert_eq!(err.as_label(), "timeout");
    sup.kill(true);
}
