//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use idsync_connector::{
    eq_folded, Change, Connector, ConnectorError, ConnectorResult, Entity, Filter, MemoryStore, Pivot,
    ReadOp, WriteOp,
};

pub const BASE: &str = "ou=people,dc=example,dc=com";

/// Store with `count` people, `uid=0` .. `uid=count-1`.
pub async fn people(name: &str, count: usize) -> MemoryStore {
    let store = MemoryStore::new(name, "uid");
    for i in 0..count {
        store.insert(person(&i.to_string())).await.unwrap();
    }
    store
}

pub fn person(uid: &str) -> Entity {
    Entity::new(format!("uid={uid},{BASE}"))
        .with("uid", [uid])
        .with("cn", [format!("Person {uid}")])
        .with("mail", [format!("{uid}@example.com")])
}

/// Wraps a [`MemoryStore`] with call counters and injected failures.
pub struct MockStore {
    inner: MemoryStore,
    fetch_delay_ms: AtomicU64,
    lose_connection_after: AtomicUsize,
    rejected: Mutex<Vec<String>>,
    applied: Mutex<Vec<Change>>,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    apply_calls: AtomicUsize,
}

impl MockStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fetch_delay_ms: AtomicU64::new(0),
            lose_connection_after: AtomicUsize::new(usize::MAX),
            rejected: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            apply_calls: AtomicUsize::new(0),
        }
    }

    /// Every fetch sleeps for `delay` first.
    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// The first `applies` calls to `apply` go through, the rest report a
    /// lost connection.
    pub fn lose_connection_after(self, applies: usize) -> Self {
        self.lose_connection_after.store(applies, Ordering::SeqCst);
        self
    }

    /// `apply` answers `false` for this identifier.
    pub fn reject(self, identifier: &str) -> Self {
        self.rejected.lock().unwrap().push(identifier.to_string());
        self
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn applied(&self) -> Vec<Change> {
        self.applied.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockStore {
    fn display_name(&self) -> &str {
        self.inner.display_name()
    }
}

#[async_trait]
impl ReadOp for MockStore {
    async fn list_pivots(&self) -> ConnectorResult<Vec<Pivot>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_pivots().await
    }

    async fn fetch(&self, pivot: &Pivot) -> ConnectorResult<Option<Entity>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.fetch(pivot).await
    }

    async fn list_changed_pivots(&self, filter: &Filter) -> ConnectorResult<Vec<Pivot>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_changed_pivots(filter).await
    }

    fn supports_change_feed(&self) -> bool {
        self.inner.supports_change_feed()
    }
}

#[async_trait]
impl WriteOp for MockStore {
    async fn apply(&self, change: &Change) -> ConnectorResult<bool> {
        let call = self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.lose_connection_after.load(Ordering::SeqCst) {
            return Err(ConnectorError::connection_failed("server went away"));
        }
        if self
            .rejected
            .lock()
            .unwrap()
            .iter()
            .any(|id| eq_folded(id, &change.identifier))
        {
            return Ok(false);
        }
        let applied = self.inner.apply(change).await?;
        self.applied.lock().unwrap().push(change.clone());
        Ok(applied)
    }
}
