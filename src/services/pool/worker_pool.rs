//! Bounded-concurrency worker pool.
//!
//! A fixed number of workers pull jobs from a bounded queue. Submission applies
//! backpressure: when the queue is full `submit` waits up to the configured
//! submit timeout and then fails with [`PoolError::Saturated`]. Callers never
//! have to lock around the pool.
//!
//! Tasks are not cancelled when the submitter goes away; the result is simply
//! discarded when nobody awaits the [`TaskHandle`].
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::observability::{Monitor, Observability};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool queue is full")]
    Saturated,
    #[error("worker pool is draining")]
    Closed,
    #[error("task was dropped before producing a result")]
    TaskDropped,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_depth: usize,
    pub submit_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_depth: 100,
            submit_timeout: Duration::from_millis(500),
        }
    }
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: usize,
    pub active: usize,
    pub completed: usize,
    pub rejected: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicUsize,
    rejected: AtomicUsize,
}

struct PoolInner {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    submit_timeout: Duration,
    monitor: Monitor,
}

/// Handle to a submitted task. Resolves once the task has run.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| PoolError::TaskDropped))
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("stats", &self.stats())
            .field("submit_timeout", &self.inner.submit_timeout)
            .finish()
    }
}

impl WorkerPool {
    /// Spawn the workers on the current tokio runtime.
    pub fn new(config: PoolConfig, obs: &Observability) -> Self {
        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>(config.queue_depth.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());
        let monitor = obs.monitor("worker_pool");

        let handles = (0..workers)
            .map(|id| tokio::spawn(run_worker(id, rx.clone(), counters.clone(), monitor)))
            .collect();

        tracing::debug!(
            workers,
            queue_depth = config.queue_depth,
            "worker pool started"
        );

        Self {
            inner: Arc::new(PoolInner {
                sender: Mutex::new(Some(tx)),
                workers: Mutex::new(handles),
                counters,
                submit_timeout: config.submit_timeout,
                monitor,
            }),
        }
    }

    /// Queue a task, waiting up to the submit timeout for queue space.
    pub async fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_until(task, Instant::now() + self.inner.submit_timeout)
            .await
    }

    async fn submit_until<F, T>(&self, task: F, deadline: Instant) -> Result<TaskHandle<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        // Clone the sender so the lock is not held across the await below.
        let sender = self.inner.sender.lock().clone().ok_or(PoolError::Closed)?;

        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            // The receiver may be gone (caller disconnected); the result is discarded.
            let _ = tx.send(task.await);
        });

        // A deadline in the past still takes a free slot without waiting.
        let permit = match tokio::time::timeout_at(deadline, sender.reserve()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                self.inner.monitor.incr("worker_pool_tasks_total", "saturated");
                return Err(PoolError::Saturated);
            }
        };
        permit.send(job);

        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.monitor.incr("worker_pool_tasks_total", "submitted");
        Ok(TaskHandle { rx })
    }

    /// Submit every task and collect the results in input order.
    ///
    /// Tasks run concurrently (bounded by the worker count) and may complete in
    /// any order. All submissions share one deadline of one submit timeout; a task
    /// that could not be queued by then yields [`PoolError::Saturated`] in its slot.
    pub async fn submit_batch<I, F, T>(&self, tasks: I) -> Vec<Result<T, PoolError>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let deadline = Instant::now() + self.inner.submit_timeout;

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(self.submit_until(task, deadline).await);
        }

        join_all(handles.into_iter().map(|handle| async move {
            match handle {
                Ok(handle) => handle.await,
                Err(err) => Err(err),
            }
        }))
        .await
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.inner.counters;
        PoolStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            active: c.active.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work, let queued and in-flight tasks finish, join the workers.
    pub async fn drain(&self) {
        // Dropping the last sender closes the queue once it is empty.
        drop(self.inner.sender.lock().take());

        let handles = std::mem::take(&mut *self.inner.workers.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "worker exited abnormally");
            }
        }

        tracing::info!(stats = ?self.stats(), "worker pool drained");
    }
}

async fn run_worker(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    counters: Arc<Counters>,
    monitor: Monitor,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let active = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        monitor.set_gauge("worker_pool_active", active as f64);

        // Run on its own task so a panicking job does not take the worker down.
        if let Err(err) = tokio::spawn(job).await {
            tracing::warn!(worker = id, error = %err, "pool task panicked");
            monitor.incr("worker_pool_tasks_total", "panicked");
        }

        let active = counters.active.fetch_sub(1, Ordering::SeqCst) - 1;
        counters.completed.fetch_add(1, Ordering::Relaxed);
        monitor.set_gauge("worker_pool_active", active as f64);
    }

    tracing::debug!(worker = id, "worker stopped");
}
