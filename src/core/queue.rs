//! # Bounded work queue.
//!
//! The queue sits in front of the task ledger. Submissions are admitted
//! synchronously (so call order is queue order) and drained in FIFO order by a
//! single loop that holds a semaphore permit per running job.
//!
//! ```text
//! submit() ──► waiting += 1 ──► [mpsc] ──► drain loop
//!                                             ├─ acquire permit (FIFO)
//!                                             ├─ waiting -= 1
//!                                             └─ spawn: runner.run_job() ──► reply ──► drop permit
//! ```
//!
//! ## Rules
//! - `submit` fails with `QueueFull` when `waiting == capacity`; nothing is enqueued.
//! - A running job always releases its permit, whatever its outcome.
//! - The drain loop holds the runner weakly and stops once it is gone.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc, oneshot};

use crate::error::SupervisorError;

use super::ledger::Outcome;

/// Executes queued jobs.
pub(crate) trait JobRunner: Send + Sync + 'static {
    fn run_job(self: Arc<Self>, job: JobSpec) -> BoxFuture<'static, Outcome>;
}

/// What a queued job asks for.
#[derive(Debug)]
pub(crate) struct JobSpec {
    pub(crate) name: String,
    pub(crate) args: Value,
    pub(crate) timeout: Option<Duration>,
}

struct Job {
    spec: JobSpec,
    reply: oneshot::Sender<Outcome>,
}

pub(crate) struct WorkQueue {
    tx: mpsc::UnboundedSender<Job>,
    waiting: Arc<AtomicUsize>,
    capacity: usize,
    permits: Arc<Semaphore>,
    concurrency: AtomicUsize,
}

impl WorkQueue {
    /// Creates the queue and spawns its drain loop.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn start<R: JobRunner>(runner: Weak<R>, capacity: usize, concurrency: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let waiting = Arc::new(AtomicUsize::new(0));
        let permits = Arc::new(Semaphore::new(concurrency));

        tokio::spawn(drain(runner, rx, Arc::clone(&waiting), Arc::clone(&permits)));

        Self {
            tx,
            waiting,
            capacity,
            permits,
            concurrency: AtomicUsize::new(concurrency),
        }
    }

    /// Enqueues a job and returns the receiver of its outcome.
    pub(crate) fn submit(&self, spec: JobSpec) -> Result<oneshot::Receiver<Outcome>, SupervisorError> {
        let capacity = self.capacity;
        self.waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < capacity).then_some(n + 1))
            .map_err(|_| SupervisorError::QueueFull { capacity })?;

        let (reply, rx) = oneshot::channel();
        if self.tx.send(Job { spec, reply }).is_err() {
            // Drain loop is gone; the dropped reply surfaces to the caller.
            self.waiting.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(rx)
    }

    /// Jobs admitted but not yet running.
    pub(crate) fn len(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    pub(crate) fn concurrency(&self) -> usize {
        self.concurrency.load(Ordering::Acquire)
    }

    /// Retunes the number of jobs allowed to run at once.
    ///
    /// Growing takes effect immediately. Shrinking retires permits as running
    /// jobs release them.
    pub(crate) fn set_concurrency(&self, n: usize) -> Result<(), SupervisorError> {
        if n == 0 {
            return Err(SupervisorError::validation("queue_concurrency", "must be at least 1"));
        }
        let previous = self.concurrency.swap(n, Ordering::AcqRel);
        if n > previous {
            self.permits.add_permits(n - previous);
        } else if n < previous {
            let retire = u32::try_from(previous - n)
                .map_err(|_| SupervisorError::validation("queue_concurrency", "change is too large"))?;
            let permits = Arc::clone(&self.permits);
            tokio::spawn(async move {
                if let Ok(p) = permits.acquire_many_owned(retire).await {
                    p.forget();
                }
            });
        }
        Ok(())
    }
}

async fn drain<R: JobRunner>(
    runner: Weak<R>,
    mut rx: mpsc::UnboundedReceiver<Job>,
    waiting: Arc<AtomicUsize>,
    permits: Arc<Semaphore>,
) {
    while let Some(job) = rx.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        waiting.fetch_sub(1, Ordering::AcqRel);

        let Some(runner) = runner.upgrade() else {
            break;
        };
        tokio::spawn(async move {
            let _permit = permit;
            let outcome = runner.run_job(job.spec).await;
            let _ = job.reply.send(outcome);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Records start order and finishes each job after `delay`, or blocks on
    /// `gate` when the job is named "block".
    struct Recorder {
        started: Mutex<Vec<String>>,
        gate: Notify,
        delay: Duration,
    }

    impl JobRunner for Recorder {
        fn run_job(self: Arc<Self>, job: JobSpec) -> BoxFuture<'static, Outcome> {
            async move {
                self.started.lock().unwrap().push(job.name.clone());
                if job.name == "block" {
                    self.gate.notified().await;
                } else {
                    tokio::time::sleep(self.delay).await;
                }
                Ok(job.args)
            }
            .boxed()
        }
    }

    fn recorder(delay: Duration) -> Arc<Recorder> {
        Arc::new(Recorder {
            started: Mutex::new(Vec::new()),
            gate: Notify::new(),
            delay,
        })
    }

    fn job(name: &str, n: u64) -> JobSpec {
        JobSpec {
            name: name.to_owned(),
            args: json!(n),
            timeout: None,
        }
    }

    async fn settle(queue: &WorkQueue, waiting: usize) {
        while queue.len() != waiting {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_queue_completes_in_submission_order() {
        let runner = recorder(Duration::from_millis(10));
        let queue = WorkQueue::start(Arc::downgrade(&runner), 16, 1);

        let receivers: Vec<_> = (0..5).map(|n| queue.submit(job(&format!("t{n}"), n)).unwrap()).collect();
        for (n, rx) in receivers.into_iter().enumerate() {
            assert_eq!(rx.await.unwrap().unwrap(), json!(n));
        }
        assert_eq!(*runner.started.lock().unwrap(), vec!["t0", "t1", "t2", "t3", "t4"]);
    }

    #[tokio::test]
    async fn full_queue_rejects_immediately() {
        let runner = recorder(Duration::ZERO);
        let queue = WorkQueue::start(Arc::downgrade(&runner), 1, 1);

        let _running = queue.submit(job("block", 0)).unwrap();
        settle(&queue, 0).await;
        let _waiting = queue.submit(job("block", 1)).unwrap();
        assert_eq!(queue.len(), 1);

        let err = queue.submit(job("block", 2)).unwrap_err();
        assert!(matches!(err, SupervisorError::QueueFull { capacity: 1 }));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn growing_concurrency_admits_waiting_jobs() {
        let runner = recorder(Duration::ZERO);
        let queue = WorkQueue::start(Arc::downgrade(&runner), 8, 1);

        let _a = queue.submit(job("block", 0)).unwrap();
        let _b = queue.submit(job("block", 1)).unwrap();
        settle(&queue, 1).await;

        queue.set_concurrency(2).unwrap();
        settle(&queue, 0).await;
        let both_started = async {
            while runner.started.lock().unwrap().len() < 2 {
                tokio::task::yield_now().await;
            }
        };
        tokio::time::timeout(Duration::from_secs(1), both_started).await.unwrap();
        assert_eq!(queue.concurrency(), 2);
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let runner = recorder(Duration::ZERO);
        let queue = WorkQueue::start(Arc::downgrade(&runner), 8, 1);
        let err = queue.set_concurrency(0).unwrap_err();
        assert_eq!(err.as_label(), "validation");
        assert_eq!(queue.concurrency(), 1);
    }
}
