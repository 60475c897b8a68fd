//! In-memory store adapter.
//!
//! Keeps entries in a map guarded by an async `RwLock`, correlates them by a
//! configured pivot attribute and records a modification time per entry so
//! changed-since filters can be answered. It can be loaded from and saved to
//! a JSON file through an [`EntitySchema`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::entity::{eq_folded, fold_case, Entity, Pivot};
use crate::error::{ConnectorError, ConnectorResult};
use crate::operation::{format_generalized_time, Change, Filter, ModificationType};
use crate::schema::EntitySchema;
use crate::traits::{Connector, ReadOp, WriteOp};

/// Default name of the virtual change-timestamp attribute.
pub const DEFAULT_TIMESTAMP_ATTRIBUTE: &str = "modifyTimestamp";

#[derive(Debug, Clone)]
struct StoredEntry {
    entity: Entity,
    modified_at: DateTime<Utc>,
}

/// Thread-safe in-memory store.
pub struct MemoryStore {
    name: String,
    pivot_attribute: String,
    timestamp_attribute: String,
    change_feed: bool,
    entries: RwLock<BTreeMap<String, StoredEntry>>,
    connection_lost: AtomicBool,
    applied: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store correlating entries by `pivot_attribute`.
    pub fn new(name: impl Into<String>, pivot_attribute: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pivot_attribute: pivot_attribute.into(),
            timestamp_attribute: DEFAULT_TIMESTAMP_ATTRIBUTE.to_string(),
            change_feed: true,
            entries: RwLock::new(BTreeMap::new()),
            connection_lost: AtomicBool::new(false),
            applied: AtomicUsize::new(0),
        }
    }

    /// Set the name of the virtual change-timestamp attribute.
    #[must_use]
    pub fn with_timestamp_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.timestamp_attribute = attribute.into();
        self
    }

    /// Disable changed-since queries.
    #[must_use]
    pub fn without_change_feed(mut self) -> Self {
        self.change_feed = false;
        self
    }

    pub fn pivot_attribute(&self) -> &str {
        &self.pivot_attribute
    }

    /// Simulate a dropped connection: every call fails until cleared.
    pub fn set_connection_lost(&self, lost: bool) {
        self.connection_lost.store(lost, Ordering::SeqCst);
    }

    /// Number of changes successfully applied so far.
    pub fn applied_count(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    fn check_connection(&self) -> ConnectorResult<()> {
        if self.connection_lost.load(Ordering::SeqCst) {
            return Err(ConnectorError::connection_failed(format!(
                "{}: connection lost",
                self.name
            )));
        }
        Ok(())
    }

    fn entry_key(&self, entity: &Entity) -> Option<String> {
        entity
            .identifier()
            .map(str::to_string)
            .or_else(|| entity.first_value(&self.pivot_attribute))
            .map(|key| fold_case(&key))
    }

    /// Insert or replace an entry, stamped with the current time.
    pub async fn insert(&self, entity: Entity) -> ConnectorResult<()> {
        self.insert_at(entity, Utc::now()).await
    }

    /// Insert or replace an entry with an explicit modification time.
    pub async fn insert_at(&self, entity: Entity, modified_at: DateTime<Utc>) -> ConnectorResult<()> {
        let key = self.entry_key(&entity).ok_or_else(|| {
            ConnectorError::invalid_data(format!(
                "entry has neither identifier nor '{}'",
                self.pivot_attribute
            ))
        })?;
        self.entries
            .write()
            .await
            .insert(key, StoredEntry { entity, modified_at });
        Ok(())
    }

    /// Look up an entry by identifier.
    pub async fn get(&self, identifier: &str) -> Option<Entity> {
        self.entries
            .read()
            .await
            .get(&fold_case(identifier))
            .map(|e| e.entity.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Snapshot of all entities.
    pub async fn entities(&self) -> Vec<Entity> {
        self.entries
            .read()
            .await
            .values()
            .map(|e| e.entity.clone())
            .collect()
    }

    /// Load entries from a JSON array of records.
    pub async fn load_json(&self, path: &Path, schema: &EntitySchema) -> ConnectorResult<usize> {
        let raw = tokio::fs::read_to_string(path).await?;
        let records: Vec<Value> = serde_json::from_str(&raw)?;
        let mut loaded = 0;
        for record in &records {
            self.insert(schema.map_record(record)?).await?;
            loaded += 1;
        }
        debug!(store = %self.name, path = %path.display(), loaded, "Loaded store from file");
        Ok(loaded)
    }

    /// Save entries as a JSON array of records.
    pub async fn save_json(&self, path: &Path, schema: &EntitySchema) -> ConnectorResult<()> {
        let records: Vec<Value> = self
            .entities()
            .await
            .iter()
            .map(|entity| schema.to_record(entity))
            .collect();
        let body = serde_json::to_string_pretty(&records)?;
        tokio::fs::write(path, body).await?;
        debug!(store = %self.name, path = %path.display(), saved = records.len(), "Saved store to file");
        Ok(())
    }

    /// Pivot keyed by the entry identifier, carrying the pivot attribute
    /// value used to find the counterpart on the other side.
    fn pivot_of(&self, entity: &Entity) -> Option<Pivot> {
        let value = entity.first_value(&self.pivot_attribute)?;
        let id = entity
            .identifier()
            .map_or_else(|| value.clone(), str::to_string);
        Some(Pivot::new(id).with_attribute(self.pivot_attribute.clone(), value))
    }

    /// Pivots ordered longest identifier first, so children precede parents.
    fn ordered_pivots<'a, I>(&self, entries: I) -> Vec<Pivot>
    where
        I: Iterator<Item = &'a StoredEntry>,
    {
        let mut keyed: Vec<(usize, Pivot)> = Vec::new();
        for entry in entries {
            match self.pivot_of(&entry.entity) {
                Some(pivot) => {
                    let depth = entry.entity.identifier().map_or(0, str::len);
                    keyed.push((depth, pivot));
                }
                None => warn!(
                    store = %self.name,
                    identifier = ?entry.entity.identifier(),
                    pivot_attribute = %self.pivot_attribute,
                    "Entry has no pivot value, skipping"
                ),
            }
        }
        keyed.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        keyed.into_iter().map(|(_, pivot)| pivot).collect()
    }

    fn lookup<'a>(&'a self, entry: &'a StoredEntry) -> impl Fn(&str) -> Vec<String> + 'a {
        move |attribute: &str| {
            if eq_folded(attribute, &self.timestamp_attribute) {
                vec![format_generalized_time(entry.modified_at)]
            } else {
                entry.entity.values(attribute)
            }
        }
    }
}

#[async_trait]
impl Connector for MemoryStore {
    fn display_name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl ReadOp for MemoryStore {
    async fn list_pivots(&self) -> ConnectorResult<Vec<Pivot>> {
        self.check_connection()?;
        let entries = self.entries.read().await;
        Ok(self.ordered_pivots(entries.values()))
    }

    async fn fetch(&self, pivot: &Pivot) -> ConnectorResult<Option<Entity>> {
        self.check_connection()?;
        let wanted = pivot
            .attribute(&self.pivot_attribute)
            .or_else(|| match pivot.attributes.len() {
                1 => pivot.attributes.values().next().map(String::as_str),
                _ => None,
            })
            .unwrap_or(pivot.id.as_str());
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .find(|entry| {
                entry
                    .entity
                    .values(&self.pivot_attribute)
                    .iter()
                    .any(|v| eq_folded(v, wanted))
            })
            .map(|entry| entry.entity.clone()))
    }

    async fn list_changed_pivots(&self, filter: &Filter) -> ConnectorResult<Vec<Pivot>> {
        if !self.change_feed {
            return Err(ConnectorError::unsupported("list_changed_pivots"));
        }
        self.check_connection()?;
        let entries = self.entries.read().await;
        let matching = entries
            .values()
            .filter(|entry| filter.matches(&self.lookup(entry)));
        Ok(self.ordered_pivots(matching))
    }

    fn supports_change_feed(&self) -> bool {
        self.change_feed
    }
}

#[async_trait]
impl WriteOp for MemoryStore {
    async fn apply(&self, change: &Change) -> ConnectorResult<bool> {
        self.check_connection()?;
        let key = fold_case(&change.identifier);
        let now = Utc::now();
        let mut entries = self.entries.write().await;

        match change.modification {
            ModificationType::Create => {
                if entries.contains_key(&key) {
                    return Err(ConnectorError::ObjectAlreadyExists {
                        identifier: change.identifier.clone(),
                    });
                }
                let mut entity = Entity::new(change.identifier.clone());
                change.apply_operations(&mut entity);
                entries.insert(key, StoredEntry { entity, modified_at: now });
            }
            ModificationType::Update => {
                let entry = entries
                    .get_mut(&key)
                    .ok_or_else(|| ConnectorError::ObjectNotFound {
                        identifier: change.identifier.clone(),
                    })?;
                change.apply_operations(&mut entry.entity);
                entry.modified_at = now;
            }
            ModificationType::Delete => {
                if entries.remove(&key).is_none() {
                    return Err(ConnectorError::ObjectNotFound {
                        identifier: change.identifier.clone(),
                    });
                }
            }
            ModificationType::Rename => {
                let new_identifier = change.new_identifier.clone().ok_or_else(|| {
                    ConnectorError::invalid_data("rename without new identifier")
                })?;
                let new_key = fold_case(&new_identifier);
                if new_key != key && entries.contains_key(&new_key) {
                    return Err(ConnectorError::ObjectAlreadyExists {
                        identifier: new_identifier,
                    });
                }
                let mut entry = entries
                    .remove(&key)
                    .ok_or_else(|| ConnectorError::ObjectNotFound {
                        identifier: change.identifier.clone(),
                    })?;
                entry.entity.set_identifier(new_identifier);
                entry.modified_at = now;
                entries.insert(new_key, entry);
            }
        }

        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}
