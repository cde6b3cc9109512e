//! Bounded, pausable job queue with a fixed worker pool.
//!
//! Jobs are boxed futures delivered FIFO over a bounded channel to a
//! pool of worker tasks. The queue is a single process-wide instance;
//! pause/resume act globally. A worker is either idle (waiting on the
//! channel), gated (dequeued a job while paused) or running; pausing
//! never cancels a job that has already started.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A unit of work executed by the pool.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("job queue is closed")]
    Closed,
}

type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<Job>>>;

/// Bounded FIFO of jobs drained by `workers` tasks.
///
/// Construction spawns the pool immediately. The `cancel` token passed
/// at construction is the parent of every job: cancelling it makes
/// workers exit at their next await point and discards jobs that were
/// queued but never dequeued. [`JobQueue::shutdown`] is the orderly
/// alternative — stop intake, drain, wait for the pool.
pub struct JobQueue {
    tx: Arc<Mutex<Option<mpsc::Sender<Job>>>>,
    gate: Arc<watch::Sender<bool>>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
    /// Create the queue and start its worker pool.
    pub fn new(cancel: CancellationToken, capacity: usize, workers: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Job>(capacity);
        let rx: SharedReceiver = Arc::new(AsyncMutex::new(rx));
        let (gate, _) = watch::channel(false);
        let gate = Arc::new(gate);

        let handles = (1..=workers)
            .map(|worker_id| {
                let rx = rx.clone();
                let gate = gate.subscribe();
                let cancel = cancel.clone();
                tokio::spawn(worker_loop(worker_id, rx, gate, cancel))
            })
            .collect();

        info!(capacity, workers, "job queue started");

        Arc::new(Self {
            tx: Arc::new(Mutex::new(Some(tx))),
            gate,
            cancel,
            workers: Mutex::new(handles),
        })
    }

    /// Submit a job. Blocks while the queue is at capacity; fails with
    /// [`QueueError::Closed`] once [`JobQueue::shutdown`] has run.
    pub async fn enqueue<F>(&self, job: F) -> Result<(), QueueError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tx = self
            .tx
            .lock()
            .unwrap()
            .as_ref()
            .cloned()
            .ok_or(QueueError::Closed)?;

        tx.send(Box::pin(job)).await.map_err(|_| QueueError::Closed)
    }

    /// Submit a job after `delay`. Fire-and-forget: a submission that
    /// finds the queue closed by then is logged and dropped.
    pub fn schedule_job<F>(&self, job: F, delay: Duration)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tx_slot = self.tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let tx = tx_slot.lock().unwrap().as_ref().cloned();
            match tx {
                Some(tx) => {
                    if tx.send(Box::pin(job)).await.is_err() {
                        warn!("scheduled job dropped: queue closed");
                    }
                }
                None => warn!("scheduled job dropped: queue closed"),
            }
        });
    }

    /// Pause the queue. Jobs dequeued from this point on park at the
    /// gate instead of running; in-flight jobs are unaffected.
    pub fn pause(&self) {
        if !self.gate.send_replace(true) {
            debug!("job queue paused");
        }
    }

    /// Release every worker parked at the gate in one broadcast. The
    /// gate is immediately reusable for the next pause.
    pub fn resume(&self) {
        if self.gate.send_replace(false) {
            debug!("job queue resumed");
        }
    }

    /// [`JobQueue::pause`] now, [`JobQueue::resume`] after `delay`.
    pub fn pause_and_resume(&self, delay: Duration) {
        self.pause();
        let gate = self.gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if gate.send_replace(false) {
                debug!("job queue resumed after timed pause");
            }
        });
    }

    /// Orderly shutdown: stop accepting work, let the queue drain, wait
    /// for every worker to exit. Idempotent — a second call returns at
    /// once.
    pub async fn shutdown(&self) {
        // Dropping the intake sender closes the channel once in-flight
        // enqueue clones are gone; workers drain what is buffered.
        let tx = self.tx.lock().unwrap().take();
        drop(tx);

        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        if handles.is_empty() {
            return;
        }

        for handle in handles {
            let _ = handle.await;
        }
        info!("job queue drained and stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: SharedReceiver,
    mut gate: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let recv = async {
                let mut rx = rx.lock().await;
                rx.recv().await
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(worker_id, "worker cancelled");
                    return;
                }
                job = recv => match job {
                    Some(job) => job,
                    None => {
                        debug!(worker_id, "intake closed, worker exiting");
                        return;
                    }
                },
            }
        };

        // The gate sits between dequeue and execution: a pause issued
        // before this point holds the job here until resume.
        if *gate.borrow() {
            debug!(worker_id, "worker gated");
            tokio::select! {
                _ = cancel.cancelled() => return,
                res = gate.wait_for(|paused| !*paused) => {
                    if res.is_err() {
                        return;
                    }
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(worker_id, "worker cancelled mid-job");
                return;
            }
            () = job => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, timeout, Instant};

    fn queue(capacity: usize, workers: usize) -> (Arc<JobQueue>, CancellationToken) {
        let cancel = CancellationToken::new();
        (JobQueue::new(cancel.clone(), capacity, workers), cancel)
    }

    #[tokio::test]
    async fn jobs_run_in_fifo_order_on_a_single_worker() {
        let (queue, _cancel) = queue(16, 1);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = seen.clone();
            queue
                .enqueue(async move {
                    seen.lock().unwrap().push(i);
                })
                .await
                .unwrap();
        }

        queue.shutdown().await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn pause_gates_dequeued_jobs_until_resume() {
        let (queue, _cancel) = queue(16, 2);
        let ran = Arc::new(AtomicUsize::new(0));

        queue.pause();
        for _ in 0..2 {
            let ran = ran.clone();
            queue
                .enqueue(async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }

        sleep(Duration::from_millis(100)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0, "paused jobs must not run");

        queue.resume();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 2, "resume releases all gated workers");
    }

    #[tokio::test]
    async fn pause_and_resume_releases_after_the_delay() {
        let (queue, _cancel) = queue(16, 1);
        let ran_at = Arc::new(Mutex::new(None));

        let start = Instant::now();
        queue.pause_and_resume(Duration::from_millis(200));

        let ran_at_clone = ran_at.clone();
        queue
            .enqueue(async move {
                *ran_at_clone.lock().unwrap() = Some(Instant::now());
            })
            .await
            .unwrap();

        sleep(Duration::from_millis(100)).await;
        assert!(ran_at.lock().unwrap().is_none());

        sleep(Duration::from_millis(300)).await;
        let ran_at = ran_at.lock().unwrap().expect("job must run after resume");
        assert!(ran_at.duration_since(start) >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn pause_resume_cycles_are_reusable() {
        let (queue, _cancel) = queue(16, 1);
        let ran = Arc::new(AtomicUsize::new(0));

        for round in 1..=3 {
            queue.pause();
            let ran_clone = ran.clone();
            queue
                .enqueue(async move {
                    ran_clone.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();

            sleep(Duration::from_millis(50)).await;
            assert_eq!(ran.load(Ordering::SeqCst), round - 1);

            queue.resume();
            sleep(Duration::from_millis(50)).await;
            assert_eq!(ran.load(Ordering::SeqCst), round);
        }
    }

    #[tokio::test]
    async fn enqueue_blocks_while_the_queue_is_full() {
        let (queue, _cancel) = queue(1, 1);

        // Occupy the single worker, then fill the single buffer slot.
        queue
            .enqueue(async {
                sleep(Duration::from_secs(5)).await;
            })
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;
        queue.enqueue(async {}).await.unwrap();

        let blocked = queue.enqueue(async {});
        assert!(
            timeout(Duration::from_millis(100), blocked).await.is_err(),
            "enqueue must block on a full queue"
        );
    }

    #[tokio::test]
    async fn shutdown_drains_queued_jobs_and_is_idempotent() {
        let (queue, _cancel) = queue(16, 2);
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let ran = ran.clone();
            queue
                .enqueue(async move {
                    sleep(Duration::from_millis(20)).await;
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }

        queue.shutdown().await;
        assert_eq!(ran.load(Ordering::SeqCst), 6, "shutdown waits for the drain");

        // Second call is a no-op.
        queue.shutdown().await;

        assert_eq!(queue.enqueue(async {}).await, Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn schedule_job_submits_after_the_delay() {
        let (queue, _cancel) = queue(16, 1);
        let ran = Arc::new(AtomicUsize::new(0));

        let ran_clone = ran.clone();
        queue.schedule_job(
            async move {
                ran_clone.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(150),
        );

        sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(250)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_discards_undequeued_jobs() {
        let (queue, cancel) = queue(16, 1);
        let ran = Arc::new(AtomicUsize::new(0));

        // First job holds the worker; the second stays buffered.
        queue
            .enqueue(async {
                sleep(Duration::from_secs(5)).await;
            })
            .await
            .unwrap();
        let ran_clone = ran.clone();
        queue
            .enqueue(async move {
                ran_clone.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        queue.shutdown().await;

        assert_eq!(
            ran.load(Ordering::SeqCst),
            0,
            "queued-but-unstarted jobs are discarded on cancellation"
        );
    }
}
