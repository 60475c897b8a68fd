//! # Identity Synchronization Engine
//!
//! Policy-driven reconciliation between a source and a destination identity
//! store.
//!
//! This crate provides:
//! - The reconciler: one [`Change`](idsync_connector::Change) per entity pair
//! - Per-attribute merge policies and gating conditions
//! - Expression evaluation over Rhai
//! - Task orchestration of sync and clean passes on a bounded worker pool
//! - Incremental polling and the long-running synchronization loop
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────┐     ┌───────────────┐
//! │  Source Store   │────►│   SyncTask   │────►│  Worker Pool  │
//! │  (list pivots)  │     │              │     │  (N workers)  │
//! └────────▲────────┘     └──────────────┘     └───────┬───────┘
//!          │                                           │ one unit per pivot
//! ┌────────┴────────┐                          ┌───────▼───────┐     ┌───────────────┐
//! │  Incremental    │                          │  Reconciler   │────►│  Destination  │
//! │  Poller         │                          │  + Policy     │     │  Store        │
//! └─────────────────┘                          └───────┬───────┘     └───────────────┘
//!                                                      │
//!                         ┌──────────────┐             │
//!                         │   Counters   │◄────────────┤
//!                         └──────────────┘             │
//!                         ┌──────────────┐             │
//!                         │  Audit Sink  │◄────────────┘
//!                         └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use idsync_connector::MemoryStore;
//! use idsync_engine::{SyncTask, TaskConfig};
//!
//! let source = Arc::new(MemoryStore::new("hr", "uid"));
//! let destination = Arc::new(MemoryStore::new("ldap", "uid"));
//! let task = SyncTask::new(TaskConfig::new("people"), source, destination)?;
//!
//! let report = task.run_sync_pass().await;
//! println!("{} applied, {} errored", report.counters.applied, report.counters.errored);
//! ```

pub mod async_sync;
pub mod audit;
pub mod config;
pub mod error;
pub mod expression;
pub mod policy;
pub mod poller;
pub mod pool;
pub mod reconciler;
pub mod rhai_evaluator;
pub mod statistics;
pub mod task;
pub mod values;

pub use async_sync::{AsyncSyncHandle, AsyncSynchronizer, StopMode};
pub use audit::{AuditRecord, AuditSink, MemoryAuditSink, SuppressionReason, TracingAuditSink};
pub use config::{DryRunFlags, TaskConfig};
pub use error::{SyncError, SyncResult};
pub use expression::{Bindings, Condition, ExpressionEvaluator};
pub use policy::{AttributePolicy, AttributeStatus, Conditions, IdentifierRule, Policy};
pub use poller::{Clock, IncrementalPoller, SystemClock};
pub use pool::{PoolOutcome, WorkerPool, DEFAULT_DRAIN_GRACE, DEFAULT_TIME_LIMIT, DEFAULT_WORKERS};
pub use reconciler::{classify, PlannedChange, Reconciler};
pub use rhai_evaluator::{RhaiEvaluator, RhaiEvaluatorConfig, ScriptValidationError};
pub use statistics::{Counters, PassCounters};
pub use task::{PassKind, PassReport, PassStatus, SyncTask};
