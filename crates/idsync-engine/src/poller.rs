//! Watermark-based incremental polling.
//!
//! The first batch is the full source pivot list. Every later batch only
//! holds the pivots changed since the last committed watermark. The new
//! watermark is captured before the query runs and only becomes effective
//! once the caller commits it, so a cycle that failed is polled again from
//! the same point.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use idsync_connector::{Filter, Pivot, ReadOp};
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::task::SyncTask;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Produces the pivot batches of an incremental synchronization.
pub struct IncrementalPoller {
    source: Arc<dyn ReadOp>,
    timestamp_attribute: String,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
    watermark: Option<DateTime<Utc>>,
    pending: Option<DateTime<Utc>>,
}

impl IncrementalPoller {
    pub fn new(
        source: Arc<dyn ReadOp>,
        timestamp_attribute: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            timestamp_attribute: timestamp_attribute.into(),
            poll_interval,
            clock: Arc::new(SystemClock),
            watermark: None,
            pending: None,
        }
    }

    /// Poller over a task's source, using the task's timestamp attribute
    /// and poll interval.
    pub fn for_task(task: &SyncTask) -> Self {
        let config = task.config();
        Self::new(
            Arc::clone(task.source()),
            config.timestamp_attribute.clone(),
            config.poll_interval(),
        )
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Last committed watermark. `None` until the first commit.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    /// How long to wait after a batch that came back empty or failed.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Fetch the next batch of pivots.
    pub async fn next_batch(&mut self) -> SyncResult<Vec<Pivot>> {
        // Never move backwards, even if the clock does.
        let captured = match self.watermark {
            Some(previous) => self.clock.now().max(previous),
            None => self.clock.now(),
        };
        self.pending = Some(captured);

        let listed = match self.watermark {
            None => self.source.list_pivots().await,
            Some(since) if self.source.supports_change_feed() => {
                let filter = Filter::changed_since(self.timestamp_attribute.clone(), since);
                debug!(
                    source = self.source.display_name(),
                    filter = %filter,
                    "Polling for changed entries"
                );
                self.source.list_changed_pivots(&filter).await
            }
            Some(_) => {
                debug!(
                    source = self.source.display_name(),
                    "Source has no change feed, listing every pivot"
                );
                self.source.list_pivots().await
            }
        };

        listed.map_err(|e| {
            self.pending = None;
            let lost = self.source.is_connection_lost(&e);
            SyncError::from_adapter(self.source.display_name(), e, lost)
        })
    }

    /// Make the watermark captured by the last [`next_batch`] effective.
    ///
    /// [`next_batch`]: IncrementalPoller::next_batch
    pub fn commit(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.watermark = Some(pending);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use idsync_connector::{Entity, MemoryStore};

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[tokio::test]
    async fn test_first_batch_is_full_list() {
        let store = Arc::new(MemoryStore::new("hr", "uid"));
        let old = Utc::now() - ChronoDuration::days(30);
        store
            .insert_at(Entity::new("uid=1,dc=x").with("uid", ["1"]), old)
            .await
            .unwrap();

        let mut poller = IncrementalPoller::new(store, "modifyTimestamp", Duration::from_secs(5));
        assert!(poller.watermark().is_none());
        assert_eq!(poller.next_batch().await.unwrap().len(), 1);
        poller.commit();
        assert!(poller.watermark().is_some());

        assert!(poller.next_batch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_uncommitted_batch_keeps_watermark() {
        let store = Arc::new(MemoryStore::new("hr", "uid"));
        let start = Utc::now() - ChronoDuration::hours(1);
        let mut poller = IncrementalPoller::new(store.clone(), "modifyTimestamp", Duration::from_secs(5))
            .with_clock(Arc::new(FixedClock(start)));
        poller.next_batch().await.unwrap();
        poller.commit();

        store
            .insert(Entity::new("uid=2,dc=x").with("uid", ["2"]))
            .await
            .unwrap();
        assert_eq!(poller.next_batch().await.unwrap().len(), 1);
        // Not committed: the same change is returned again.
        assert_eq!(poller.next_batch().await.unwrap().len(), 1);
        assert_eq!(poller.watermark(), Some(start));
    }

    #[tokio::test]
    async fn test_failed_query_is_not_committed() {
        let store = Arc::new(MemoryStore::new("hr", "uid"));
        let mut poller = IncrementalPoller::new(store.clone(), "modifyTimestamp", Duration::from_secs(5));
        store.set_connection_lost(true);

        let err = poller.next_batch().await.unwrap_err();
        assert!(err.is_connection_lost());
        poller.commit();
        assert!(poller.watermark().is_none());
    }

    #[tokio::test]
    async fn test_without_change_feed_falls_back_to_full_list() {
        let store = Arc::new(MemoryStore::new("db", "uid").without_change_feed());
        store
            .insert(Entity::anonymous().with("uid", ["1"]))
            .await
            .unwrap();
        let mut poller = IncrementalPoller::new(store, "modifyTimestamp", Duration::from_secs(5));
        poller.next_batch().await.unwrap();
        poller.commit();
        assert_eq!(poller.next_batch().await.unwrap().len(), 1);
    }
}
