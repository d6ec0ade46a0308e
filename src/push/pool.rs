//! Push Worker Pool
//!
//! Fan-out jobs triggered by application events run on a fixed set of
//! workers fed by a bounded queue. Submission never waits: a full queue is
//! reported to the caller. Every job's completion is observable through its
//! [`JobHandle`], and shutdown drains queued jobs within a deadline.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::dispatcher::DeliveryReport;
use super::router::PushRouter;
use super::{DeviceToken, PushPayload};

/// Pool errors
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Push queue is full")]
    QueueFull,

    #[error("Push pool is shut down")]
    Closed,

    #[error("Push job {0} was abandoned before completion")]
    Abandoned(Uuid),
}

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub drain_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// One fan-out of a payload to a recipient set
#[derive(Debug, Clone)]
pub struct PushJob {
    pub id: Uuid,
    /// Trigger name for logs
    pub kind: &'static str,
    pub recipients: Vec<DeviceToken>,
    pub payload: PushPayload,
}

impl PushJob {
    pub fn new(kind: &'static str, recipients: Vec<DeviceToken>, payload: PushPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            recipients,
            payload,
        }
    }
}

/// Completion handle for a submitted job
#[derive(Debug)]
pub struct JobHandle {
    id: Uuid,
    done: oneshot::Receiver<DeliveryReport>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the job's delivery report
    pub async fn wait(self) -> Result<DeliveryReport, PoolError> {
        self.done.await.map_err(|_| PoolError::Abandoned(self.id))
    }
}

/// Pool counters
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub submitted: u64,
    pub completed: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

struct Envelope {
    job: PushJob,
    done: oneshot::Sender<DeliveryReport>,
}

/// Fixed-size pool of push workers
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Envelope>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    config: PoolConfig,
}

impl WorkerPool {
    /// Spawn the workers; must be called from within a tokio runtime
    pub fn start(router: Arc<PushRouter>, config: PoolConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let workers = (0..config.workers.max(1))
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    Arc::clone(&rx),
                    Arc::clone(&router),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        tracing::info!(
            workers = config.workers.max(1),
            queue_capacity = config.queue_capacity,
            "Push worker pool started"
        );

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            counters,
            config,
        }
    }

    /// Queue a job without waiting for space
    pub async fn submit(&self, job: PushJob) -> Result<JobHandle, PoolError> {
        let guard = self.sender.lock().await;
        let sender = guard.as_ref().ok_or(PoolError::Closed)?;

        let id = job.id;
        let (done_tx, done_rx) = oneshot::channel();

        match sender.try_send(Envelope { job, done: done_tx }) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(job_id = %id, "Push job queued");
                Ok(JobHandle { id, done: done_rx })
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(job_id = %id, "Push queue full, rejecting job");
                Err(PoolError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PoolError::Closed),
        }
    }

    /// Stop accepting jobs and drain the queue.
    ///
    /// Returns `false` when workers had to be aborted at the drain deadline.
    pub async fn shutdown(&self) -> bool {
        // Dropping the sender lets workers finish the queue and exit
        self.sender.lock().await.take();

        let mut workers = std::mem::take(&mut *self.workers.lock().await);
        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            for worker in workers.iter_mut() {
                let _ = worker.await;
            }
        })
        .await
        .is_ok();

        if drained {
            tracing::info!("Push worker pool drained");
        } else {
            tracing::warn!(
                timeout_ms = self.config.drain_timeout.as_millis() as u64,
                "Push worker pool drain timed out, aborting workers"
            );
            for worker in &workers {
                worker.abort();
            }
        }
        drained
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.counters;
        PoolStats {
            workers: self.config.workers.max(1),
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }
}

async fn worker_loop(
    index: usize,
    queue: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    router: Arc<PushRouter>,
    counters: Arc<Counters>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(Envelope { job, done }) = next else {
            break;
        };

        let report = router.fan_out(&job.recipients, &job.payload).await;

        counters.completed.fetch_add(1, Ordering::Relaxed);
        counters
            .delivered
            .fetch_add(report.delivered.len() as u64, Ordering::Relaxed);
        counters
            .failed
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);

        tracing::info!(
            job_id = %job.id,
            kind = job.kind,
            worker = index,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            rejected_tokens = report.rejected_tokens().len(),
            "Push job finished"
        );

        // Nobody waiting is fine
        let _ = done.send(report);
    }

    tracing::debug!(worker = index, "Push worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::{NotificationDispatcher, Platform, PushError, PushGateway};
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    /// Signals when a send starts, then waits for a permit
    struct GatedGateway {
        started: mpsc::UnboundedSender<String>,
        release: Arc<Semaphore>,
    }

    #[async_trait]
    impl PushGateway for GatedGateway {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn send(&self, token: &str, _payload: &PushPayload) -> Result<(), PushError> {
            let _ = self.started.send(token.to_string());
            let _permit = self
                .release
                .acquire()
                .await
                .map_err(|_| PushError::Transport("closed".into()))?;
            Ok(())
        }
    }

    fn gated_pool(
        config: PoolConfig,
        release_permits: usize,
    ) -> (WorkerPool, mpsc::UnboundedReceiver<String>, Arc<Semaphore>) {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Semaphore::new(release_permits));
        let gateway = Arc::new(GatedGateway {
            started: started_tx,
            release: Arc::clone(&release),
        });
        let router = PushRouter::new().with_dispatcher(
            Platform::Android,
            NotificationDispatcher::new(gateway, Duration::from_secs(60), 4),
        );
        (WorkerPool::start(Arc::new(router), config), started_rx, release)
    }

    fn job(token: &str) -> PushJob {
        PushJob::new(
            "test",
            vec![DeviceToken::android(token)],
            PushPayload::new("title", "body"),
        )
    }

    #[tokio::test]
    async fn test_job_completion_observable() {
        let (pool, _started, _release) = gated_pool(PoolConfig::default(), 100);

        let handle = pool.submit(job("device-1")).await.unwrap();
        let report = handle.wait().await.unwrap();

        assert_eq!(report.delivered, vec!["device-1".to_string()]);
        let stats = pool.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_waiting() {
        let config = PoolConfig {
            workers: 1,
            queue_capacity: 1,
            drain_timeout: Duration::from_secs(5),
        };
        let (pool, mut started, release) = gated_pool(config, 0);

        // Worker picks up the first job and blocks on the gate
        let first = pool.submit(job("a")).await.unwrap();
        assert_eq!(started.recv().await.unwrap(), "a");

        // Second job fills the queue, third is rejected
        let second = pool.submit(job("b")).await.unwrap();
        assert!(matches!(pool.submit(job("c")).await, Err(PoolError::QueueFull)));
        assert_eq!(pool.stats().rejected, 1);

        release.add_permits(10);
        assert_eq!(first.wait().await.unwrap().delivered.len(), 1);
        assert_eq!(second.wait().await.unwrap().delivered.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let config = PoolConfig {
            workers: 2,
            queue_capacity: 16,
            drain_timeout: Duration::from_secs(5),
        };
        let (pool, _started, _release) = gated_pool(config, 100);

        let mut handles = Vec::new();
        for i in 0..5 {
            handles.push(pool.submit(job(&format!("device-{}", i))).await.unwrap());
        }

        assert!(pool.shutdown().await);
        for handle in handles {
            assert!(handle.wait().await.is_ok());
        }
        assert_eq!(pool.stats().completed, 5);
        assert!(matches!(pool.submit(job("late")).await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_after_deadline() {
        let config = PoolConfig {
            workers: 1,
            queue_capacity: 4,
            drain_timeout: Duration::from_millis(50),
        };
        let (pool, mut started, _release) = gated_pool(config, 0);

        let stuck = pool.submit(job("stuck")).await.unwrap();
        started.recv().await.unwrap();

        assert!(!pool.shutdown().await);
        assert!(matches!(stuck.wait().await, Err(PoolError::Abandoned(_))));
    }
}
