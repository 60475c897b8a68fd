//! Long-running incremental synchronization.
//!
//! [`AsyncSynchronizer::spawn`] starts one polling loop per task on the
//! runtime and hands back an [`AsyncSyncHandle`]. The loop:
//!
//! 1. asks the [`IncrementalPoller`] for the next batch
//! 2. reconciles a non-empty batch through the task's worker pool
//! 3. commits the watermark unless the cycle failed or ran out of time
//! 4. polls again right away after a non-empty batch, otherwise sleeps for
//!    the poll interval

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::poller::IncrementalPoller;
use crate::statistics::PassCounters;
use crate::task::{PassKind, PassStatus, SyncTask};

/// How to stop a running loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Seen at the next iteration or once the current sleep ends.
    Graceful,
    /// Interrupts the sleep; the loop is aborted if it does not end within
    /// the grace period.
    Forced,
}

#[derive(Debug, Default)]
struct LoopState {
    cycles: AtomicU64,
    totals: Mutex<PassCounters>,
}

/// Spawns incremental synchronization loops.
pub struct AsyncSynchronizer;

impl AsyncSynchronizer {
    /// Start the polling loop of `task` on the current runtime.
    pub fn spawn(task: SyncTask, poller: IncrementalPoller) -> AsyncSyncHandle {
        let state = Arc::new(LoopState::default());
        let stop = CancellationToken::new();
        let interrupt = CancellationToken::new();
        let grace = task.config().stop_grace();
        let name = task.name().to_string();

        info!(
            task = %name,
            poll_interval_secs = poller.poll_interval().as_secs(),
            "Starting asynchronous synchronization"
        );

        let join = tokio::spawn(run_loop(
            task,
            poller,
            Arc::clone(&state),
            stop.clone(),
            interrupt.clone(),
        ));

        AsyncSyncHandle {
            task: name,
            state,
            stop,
            interrupt,
            grace,
            join: Some(join),
        }
    }
}

async fn run_loop(
    task: SyncTask,
    mut poller: IncrementalPoller,
    state: Arc<LoopState>,
    stop: CancellationToken,
    interrupt: CancellationToken,
) {
    while !stop.is_cancelled() {
        let idle = match poller.next_batch().await {
            Ok(pivots) if pivots.is_empty() => {
                poller.commit();
                true
            }
            Ok(pivots) => {
                debug!(task = %task.name(), changed = pivots.len(), "Changes found");
                let report = task.reconcile_pivots(PassKind::Incremental, pivots).await;
                state.cycles.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut totals) = state.totals.lock() {
                    totals.merge(&report.counters);
                }
                match report.status {
                    PassStatus::Completed => {
                        poller.commit();
                        false
                    }
                    PassStatus::Incomplete | PassStatus::Failed => {
                        warn!(
                            task = %task.name(),
                            status = %report.status,
                            error = report.error.as_deref().unwrap_or_default(),
                            "Cycle did not complete, watermark kept"
                        );
                        true
                    }
                }
            }
            Err(e) => {
                error!(task = %task.name(), kind = e.kind(), error = %e, "Polling failed, retrying");
                true
            }
        };

        if idle {
            tokio::select! {
                biased;
                () = interrupt.cancelled() => break,
                () = tokio::time::sleep(poller.poll_interval()) => {}
            }
        }
    }
    info!(task = %task.name(), "Asynchronous synchronization stopped");
}

/// Handle on a running loop.
pub struct AsyncSyncHandle {
    task: String,
    state: Arc<LoopState>,
    stop: CancellationToken,
    interrupt: CancellationToken,
    grace: Duration,
    join: Option<JoinHandle<()>>,
}

impl AsyncSyncHandle {
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Whether the loop is still alive.
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Counters accumulated over every cycle so far.
    pub fn counters(&self) -> PassCounters {
        self.state
            .totals
            .lock()
            .map(|totals| totals.clone())
            .unwrap_or_default()
    }

    /// Number of non-empty batches reconciled so far.
    pub fn cycles(&self) -> u64 {
        self.state.cycles.load(Ordering::SeqCst)
    }

    /// Ask the loop to stop without waiting for it.
    pub fn request_stop(&self, mode: StopMode) {
        debug!(task = %self.task, ?mode, "Stop requested");
        self.stop.cancel();
        if mode == StopMode::Forced {
            self.interrupt.cancel();
        }
    }

    /// Stop the loop and wait for it.
    ///
    /// A graceful stop waits as long as the current cycle and sleep take. A
    /// forced stop waits for the grace period, then aborts the loop.
    pub async fn stop(&mut self, mode: StopMode) {
        self.request_stop(mode);
        let Some(mut join) = self.join.take() else {
            return;
        };

        let joined = match mode {
            StopMode::Graceful => (&mut join).await,
            StopMode::Forced => match tokio::time::timeout(self.grace, &mut join).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        task = %self.task,
                        grace_secs = self.grace.as_secs(),
                        "Loop did not stop within grace period, aborting"
                    );
                    join.abort();
                    return;
                }
            },
        };

        if let Err(e) = joined {
            error!(task = %self.task, error = %e, "Synchronization loop terminated abnormally");
        }
    }

    /// Wait for the loop to end on its own.
    pub async fn join(&mut self) {
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(task = %self.task, error = %e, "Synchronization loop terminated abnormally");
            }
        }
    }
}

impl Drop for AsyncSyncHandle {
    fn drop(&mut self) {
        self.stop.cancel();
        self.interrupt.cancel();
    }
}
