//! Audit records.
//!
//! One record is produced per applied or suppressed change. Formatting the
//! records (LDIF, CSV, ...) is left to whoever consumes the sink.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use idsync_connector::{AttributeOperation, Change, ModificationType};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Why a computed change was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    /// A dry-run flag covers this modification type.
    DryRun,
    /// The policy condition for this modification type evaluated to false.
    Condition,
}

impl SuppressionReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionReason::DryRun => "dry_run",
            SuppressionReason::Condition => "condition",
        }
    }
}

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub task: String,
    pub pivot: String,
    pub modification: ModificationType,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_identifier: Option<String>,
    #[serde(default)]
    pub operations: Vec<AttributeOperation>,
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppressed: Option<SuppressionReason>,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Record for a change that reached the destination.
    pub fn applied(task: &str, pivot: &str, change: &Change) -> Self {
        Self::build(task, pivot, change, None)
    }

    /// "Would-have" record for a suppressed change.
    pub fn suppressed(task: &str, pivot: &str, change: &Change, reason: SuppressionReason) -> Self {
        Self::build(task, pivot, change, Some(reason))
    }

    fn build(task: &str, pivot: &str, change: &Change, reason: Option<SuppressionReason>) -> Self {
        Self {
            task: task.to_string(),
            pivot: pivot.to_string(),
            modification: change.modification,
            identifier: change.identifier.clone(),
            new_identifier: change.new_identifier.clone(),
            operations: change.operations.clone(),
            applied: reason.is_none(),
            suppressed: reason,
            timestamp: Utc::now(),
        }
    }
}

/// Consumer of audit records. Must tolerate concurrent calls.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Emits each record as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        let attributes: Vec<&str> = record
            .operations
            .iter()
            .map(|op| op.attribute.as_str())
            .collect();
        info!(
            target: "idsync::audit",
            task = %record.task,
            pivot = %record.pivot,
            modification = %record.modification,
            identifier = %record.identifier,
            new_identifier = ?record.new_identifier,
            attributes = ?attributes,
            applied = record.applied,
            suppressed = record.suppressed.map(|r| r.as_str()),
            "Change audited"
        );
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all records so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Drain all records so far.
    pub fn take(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|mut records| std::mem::take(&mut *records))
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}
