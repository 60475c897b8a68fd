//! Bounded worker pool.
//!
//! A fixed number of workers pull reconciliation units from a bounded queue.
//! Aborting or timing out stops workers from taking new units. A unit that
//! already started runs to completion; after a timeout the pool waits for
//! it up to a drain grace before giving up on it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{SyncError, SyncResult};

/// Default number of workers.
pub const DEFAULT_WORKERS: usize = 5;

/// Default wall-clock budget for one pass.
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(3600);

/// Default wait for in-flight units once the time limit has elapsed.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// One unit of work.
pub type Unit = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// How [`WorkerPool::await_completion`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolOutcome {
    /// Every submitted unit ran, or the pool was aborted and drained.
    Complete,
    /// The time limit elapsed first.
    Incomplete,
}

/// Fixed-size pool of workers over a bounded queue.
pub struct WorkerPool {
    sender: Option<mpsc::Sender<Unit>>,
    workers: JoinSet<()>,
    cancel: CancellationToken,
    drain_grace: Duration,
}

impl WorkerPool {
    /// Spawn `workers` workers over a queue holding at most `capacity` units.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Unit>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let cancel = CancellationToken::new();
        let mut set = JoinSet::new();

        for worker in 0..workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let cancel = cancel.clone();
            set.spawn(async move {
                loop {
                    let next = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        unit = async { receiver.lock().await.recv().await } => unit,
                    };
                    match next {
                        Some(unit) => unit.await,
                        None => break,
                    }
                }
                debug!(worker, "Worker stopped");
            });
        }

        Self {
            sender: Some(sender),
            workers: set,
            cancel,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    /// Set how long in-flight units may keep running after the time limit.
    #[must_use]
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Token cancelled when the pool stops taking work.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the pool still accepts units.
    pub fn is_accepting(&self) -> bool {
        self.sender.is_some() && !self.cancel.is_cancelled()
    }

    /// Queue a unit without waiting.
    pub fn submit(&self, unit: Unit) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::internal("worker pool is no longer accepting work"));
        }
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| SyncError::internal("worker pool queue is closed"))?;
        sender.try_send(unit).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SyncError::internal("worker pool queue is full"),
            mpsc::error::TrySendError::Closed(_) => {
                SyncError::internal("worker pool queue is closed")
            }
        })
    }

    /// Stop handing out queued units. In-flight units finish.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Close the queue and wait for the workers, up to `limit`.
    ///
    /// On timeout the pool stops taking work, waits up to the drain grace
    /// for units already running, and returns [`PoolOutcome::Incomplete`].
    /// A unit still running after the grace is detached: its change may land
    /// after the caller has read its counters, so a report taken then
    /// under-counts it.
    pub async fn await_completion(&mut self, limit: Duration) -> PoolOutcome {
        self.sender = None;

        if tokio::time::timeout(limit, join_all(&mut self.workers)).await.is_ok() {
            return PoolOutcome::Complete;
        }

        warn!(limit_secs = limit.as_secs(), "Time limit reached, pool stops taking work");
        self.cancel.cancel();

        let grace = self.drain_grace;
        if tokio::time::timeout(grace, join_all(&mut self.workers)).await.is_err() {
            warn!(
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                running = self.workers.len(),
                "Units still running after drain grace, detaching them"
            );
            self.workers.detach_all();
        }
        PoolOutcome::Incomplete
    }
}

async fn join_all(workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Worker terminated abnormally");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_runs_every_unit() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(3, 20);
        for _ in 0..20 {
            let done = Arc::clone(&done);
            pool.submit(Box::pin(async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        assert_eq!(pool.await_completion(Duration::from_secs(5)).await, PoolOutcome::Complete);
        assert_eq!(done.load(Ordering::SeqCst), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(2, 10);
        for _ in 0..10 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            pool.submit(Box::pin(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.await_completion(Duration::from_secs(5)).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_aborted_pool_rejects_units() {
        let pool = WorkerPool::new(1, 1);
        pool.abort();
        assert!(!pool.is_accepting());
        assert!(pool.submit(Box::pin(async {})).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_returns_incomplete() {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(1, 3);
        for _ in 0..3 {
            let finished = Arc::clone(&finished);
            pool.submit(Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        let outcome = pool.await_completion(Duration::from_millis(50)).await;
        assert_eq!(outcome, PoolOutcome::Incomplete);
        assert!(!pool.is_accepting());

        // The unit in flight finished within the grace, queued ones never start.
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unit_outliving_drain_grace_is_detached() {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(1, 1).with_drain_grace(Duration::from_millis(20));
        let done = Arc::clone(&finished);
        pool.submit(Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            done.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        let outcome = pool.await_completion(Duration::from_millis(20)).await;
        assert_eq!(outcome, PoolOutcome::Incomplete);
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abort_lets_in_flight_unit_finish() {
        let finished = Arc::new(AtomicUsize::new(0));
        let start = Arc::new(tokio::sync::Notify::new());
        let mut pool = WorkerPool::new(1, 4);
        let token = pool.cancellation_token();
        for i in 0..4 {
            let finished = Arc::clone(&finished);
            let start = Arc::clone(&start);
            let token = token.clone();
            pool.submit(Box::pin(async move {
                if i == 0 {
                    start.notified().await;
                    token.cancel();
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        start.notify_one();

        assert_eq!(pool.await_completion(Duration::from_secs(5)).await, PoolOutcome::Complete);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
