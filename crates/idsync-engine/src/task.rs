//! Task orchestration.
//!
//! A [`SyncTask`] binds a [`TaskConfig`] to a source and a destination store
//! and drives two kinds of pass over them:
//!
//! - **sync**: one reconciliation unit per source pivot, run on the bounded
//!   [`WorkerPool`]
//! - **clean**: destination pivots missing from the source are deleted, one
//!   at a time, in the order the destination listed them
//!
//! A lost connection on either side ends the pass as failed. Any other unit
//! failure is counted and logged and the pass goes on.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use idsync_connector::{ConnectorError, Entity, Pivot, ReadOp, StoreAdapter};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink, SuppressionReason, TracingAuditSink};
use crate::config::TaskConfig;
use crate::error::{SyncError, SyncResult};
use crate::expression::ExpressionEvaluator;
use crate::pool::{PoolOutcome, WorkerPool};
use crate::reconciler::{PlannedChange, Reconciler};
use crate::policy::Policy;
use crate::rhai_evaluator::{RhaiEvaluator, ScriptValidationError};
use crate::statistics::{Counters, PassCounters};

/// Kind of pass a report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassKind {
    Sync,
    Clean,
    Incremental,
}

impl PassKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PassKind::Sync => "sync",
            PassKind::Clean => "clean",
            PassKind::Incremental => "incremental",
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassStatus {
    /// Every pivot was processed. Some units may still have errored.
    Completed,
    /// The time limit ended the pass early. Applied changes are kept.
    Incomplete,
    /// The pass could not run to the end: lost connection or empty source.
    Failed,
}

impl PassStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PassStatus::Completed => "completed",
            PassStatus::Incomplete => "incomplete",
            PassStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub run_id: Uuid,
    pub task: String,
    pub kind: PassKind,
    pub status: PassStatus,
    pub counters: PassCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl PassReport {
    /// Completed with no errored unit.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == PassStatus::Completed && self.counters.errored == 0
    }
}

/// Per-pass state shared by every unit.
struct PassContext {
    run_id: Uuid,
    kind: PassKind,
    started_at: DateTime<Utc>,
    clock: Instant,
    counters: Counters,
    failure: Mutex<Option<String>>,
    cancel: CancellationToken,
}

impl PassContext {
    fn new(kind: PassKind) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            kind,
            started_at: Utc::now(),
            clock: Instant::now(),
            counters: Counters::new(),
            failure: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Remember the first pass-ending error and stop taking work.
    fn fail(&self, error: &SyncError) {
        if let Ok(mut failure) = self.failure.lock() {
            if failure.is_none() {
                *failure = Some(error.to_string());
            }
        }
        self.cancel.cancel();
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|failure| failure.clone())
    }

    fn report(&self, task: &str, status: PassStatus, error: Option<String>) -> PassReport {
        PassReport {
            run_id: self.run_id,
            task: task.to_string(),
            kind: self.kind,
            status,
            counters: self.counters.snapshot(),
            error,
            started_at: self.started_at,
            duration_ms: u64::try_from(self.clock.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// One synchronization task bound to its stores.
#[derive(Clone)]
pub struct SyncTask {
    config: Arc<TaskConfig>,
    source: Arc<dyn ReadOp>,
    destination: Arc<dyn StoreAdapter>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    audit: Arc<dyn AuditSink>,
}

impl fmt::Debug for SyncTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncTask")
            .field("name", &self.config.name)
            .field("source", &self.source.display_name())
            .field("destination", &self.destination.display_name())
            .finish_non_exhaustive()
    }
}

impl SyncTask {
    /// Validate `config` and bind it to its stores.
    ///
    /// Expressions run on a [`RhaiEvaluator`] carrying the task library, and
    /// audit records go to a [`TracingAuditSink`] unless replaced.
    pub fn new(
        config: TaskConfig,
        source: Arc<dyn ReadOp>,
        destination: Arc<dyn StoreAdapter>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let evaluator = match &config.library {
            Some(script) => RhaiEvaluator::new().with_library(script)?,
            None => RhaiEvaluator::new(),
        };
        for (expression, problem) in expression_problems(&config.policy, &evaluator) {
            warn!(
                task = %config.name,
                expression,
                line = problem.line.unwrap_or_default(),
                column = problem.column.unwrap_or_default(),
                error = %problem.message,
                "Expression does not compile"
            );
        }
        Ok(Self {
            config: Arc::new(config),
            source,
            destination,
            evaluator: Arc::new(evaluator),
            audit: Arc::new(TracingAuditSink),
        })
    }

    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<dyn ReadOp> {
        &self.source
    }

    /// Run a full synchronization pass over every source pivot.
    #[instrument(skip(self), fields(task = %self.config.name))]
    pub async fn run_sync_pass(&self) -> PassReport {
        info!(
            source = self.source.display_name(),
            destination = self.destination.display_name(),
            workers = self.config.workers,
            "Starting synchronization pass"
        );

        let pivots = match self.source.list_pivots().await {
            Ok(pivots) => pivots,
            Err(e) => {
                let ctx = PassContext::new(PassKind::Sync);
                let err = self.source_error(e);
                return self.finish(&ctx, PassStatus::Failed, Some(err.to_string()));
            }
        };

        if pivots.is_empty() {
            let ctx = PassContext::new(PassKind::Sync);
            let err = SyncError::EmptySource {
                store: self.source.display_name().to_string(),
            };
            return self.finish(&ctx, PassStatus::Failed, Some(err.to_string()));
        }

        self.reconcile_pivots(PassKind::Sync, pivots).await
    }

    /// Reconcile the given source pivots on the worker pool.
    ///
    /// Shared by the full pass and by each incremental cycle.
    pub async fn reconcile_pivots(&self, kind: PassKind, pivots: Vec<Pivot>) -> PassReport {
        let ctx = Arc::new(PassContext::new(kind));
        let mut pool = WorkerPool::new(self.config.workers, pivots.len())
            .with_drain_grace(self.config.stop_grace());
        let pool_token = pool.cancellation_token();
        debug!(task = %self.config.name, pivots = pivots.len(), "Submitting reconciliation units");

        for pivot in pivots {
            if ctx.cancel.is_cancelled() {
                pool.abort();
            }
            if !pool.is_accepting() {
                debug!(task = %self.config.name, "Pass aborted, no further submissions");
                break;
            }

            let task = self.clone();
            let unit_ctx = Arc::clone(&ctx);
            let unit_token = pool_token.clone();
            let submitted = pool.submit(Box::pin(async move {
                task.run_unit(&pivot, &unit_ctx).await;
                if unit_ctx.cancel.is_cancelled() {
                    unit_token.cancel();
                }
            }));
            if let Err(e) = submitted {
                warn!(task = %self.config.name, error = %e, "Could not submit unit");
                break;
            }
        }

        let outcome = pool.await_completion(self.config.time_limit()).await;

        match (ctx.failure(), outcome) {
            (Some(failure), _) => self.finish(&ctx, PassStatus::Failed, Some(failure)),
            (None, PoolOutcome::Incomplete) => {
                let err = SyncError::Timeout {
                    limit: self.config.time_limit(),
                };
                self.finish(&ctx, PassStatus::Incomplete, Some(err.to_string()))
            }
            (None, PoolOutcome::Complete) => self.finish(&ctx, PassStatus::Completed, None),
        }
    }

    /// Run a clean pass: delete destination entries whose pivot is gone
    /// from the source.
    ///
    /// Runs on the calling task, in the order the destination listed its
    /// pivots.
    #[instrument(skip(self), fields(task = %self.config.name))]
    pub async fn run_clean_pass(&self) -> PassReport {
        let ctx = PassContext::new(PassKind::Clean);
        info!(
            source = self.source.display_name(),
            destination = self.destination.display_name(),
            "Starting clean pass"
        );

        let pivots = match self.destination.list_pivots().await {
            Ok(pivots) => pivots,
            Err(e) => {
                let err = self.destination_error(e);
                return self.finish(&ctx, PassStatus::Failed, Some(err.to_string()));
            }
        };

        let time_limit = self.config.time_limit();
        for pivot in &pivots {
            if ctx.clock.elapsed() >= time_limit {
                let err = SyncError::Timeout { limit: time_limit };
                warn!(task = %self.config.name, error = %err, "Clean pass stopped early");
                return self.finish(&ctx, PassStatus::Incomplete, Some(err.to_string()));
            }

            ctx.counters.record_seen();
            if let Err(e) = self.clean_unit(pivot, &ctx).await {
                if e.is_connection_lost() {
                    error!(task = %self.config.name, pivot = %pivot.id, error = %e, "Connection lost, aborting clean pass");
                    return self.finish(&ctx, PassStatus::Failed, Some(e.to_string()));
                }
                ctx.counters.record_error();
                warn!(
                    task = %self.config.name,
                    pivot = %pivot.id,
                    kind = e.kind(),
                    code = e.adapter_code().unwrap_or_default(),
                    error = %e,
                    "Clean unit failed"
                );
            }
        }

        self.finish(&ctx, PassStatus::Completed, None)
    }

    /// Unit boundary: every failure is caught here.
    async fn run_unit(&self, pivot: &Pivot, ctx: &PassContext) {
        if ctx.cancel.is_cancelled() {
            return;
        }
        ctx.counters.record_seen();

        match self.sync_unit(pivot, ctx).await {
            Ok(()) => {}
            Err(e) if e.is_connection_lost() => {
                error!(
                    task = %self.config.name,
                    pivot = %pivot.id,
                    error = %e,
                    "Connection lost, aborting pass"
                );
                ctx.fail(&e);
            }
            Err(e) => {
                ctx.counters.record_error();
                warn!(
                    task = %self.config.name,
                    pivot = %pivot.id,
                    kind = e.kind(),
                    code = e.adapter_code().unwrap_or_default(),
                    error = %e,
                    "Reconciliation unit failed"
                );
            }
        }
    }

    async fn sync_unit(&self, pivot: &Pivot, ctx: &PassContext) -> SyncResult<()> {
        let source = self
            .source
            .fetch(pivot)
            .await
            .map_err(|e| self.source_error(e))?;
        let destination = self.fetch_destination(pivot).await?;

        let Some(mut source) = source else {
            return Err(SyncError::Adapter {
                store: self.source.display_name().to_string(),
                source: ConnectorError::ObjectNotFound {
                    identifier: pivot.id.to_string(),
                },
            });
        };

        let reconciler = Reconciler::new(&self.config.policy, self.evaluator.as_ref());
        reconciler.prepare_source(&mut source)?;

        match reconciler.compute_change(Some(&source), destination.as_ref())? {
            Some(planned) => self.execute(pivot, planned, ctx).await,
            None => {
                debug!(task = %self.config.name, pivot = %pivot.id, "Nothing to do");
                Ok(())
            }
        }
    }

    async fn clean_unit(&self, pivot: &Pivot, ctx: &PassContext) -> SyncResult<()> {
        let in_source = self
            .source
            .fetch(pivot)
            .await
            .map_err(|e| self.source_error(e))?;
        if in_source.is_some() {
            return Ok(());
        }

        let reconciler = Reconciler::new(&self.config.policy, self.evaluator.as_ref());
        let destination = if reconciler.delete_needs_destination() {
            match self.fetch_destination(pivot).await? {
                Some(entity) => Some(entity),
                None => {
                    debug!(task = %self.config.name, pivot = %pivot.id, "Entry vanished before delete");
                    return Ok(());
                }
            }
        } else {
            None
        };

        let identifier = destination
            .as_ref()
            .and_then(Entity::identifier)
            .unwrap_or(pivot.id.as_str())
            .to_string();
        let planned = reconciler.plan_delete(&identifier, destination.as_ref())?;
        self.execute(pivot, planned, ctx).await
    }

    /// Fetch from the destination. Entries must come back with an identifier.
    async fn fetch_destination(&self, pivot: &Pivot) -> SyncResult<Option<Entity>> {
        let entity = self
            .destination
            .fetch(pivot)
            .await
            .map_err(|e| self.destination_error(e))?;
        match entity {
            Some(entity) if entity.identifier().is_none() => Err(SyncError::Adapter {
                store: self.destination.display_name().to_string(),
                source: ConnectorError::invalid_data(format!(
                    "entry fetched for pivot '{}' has no identifier",
                    pivot.id
                )),
            }),
            other => Ok(other),
        }
    }

    /// Apply a planned change, or report why it was held back.
    async fn execute(&self, pivot: &Pivot, planned: PlannedChange, ctx: &PassContext) -> SyncResult<()> {
        let change = planned.change;
        let modification = change.modification;
        ctx.counters.record_attempted();

        if !planned.allowed {
            debug!(
                task = %self.config.name,
                pivot = %pivot.id,
                modification = %modification,
                "Condition is false, change not applied"
            );
            self.audit.record(AuditRecord::suppressed(
                &self.config.name,
                pivot.id.as_str(),
                &change,
                SuppressionReason::Condition,
            ));
            return Ok(());
        }

        if self.config.dry_run.suppresses(modification) {
            info!(
                task = %self.config.name,
                pivot = %pivot.id,
                modification = %modification,
                identifier = %change.identifier,
                "Dry run, change not applied"
            );
            self.audit.record(AuditRecord::suppressed(
                &self.config.name,
                pivot.id.as_str(),
                &change,
                SuppressionReason::DryRun,
            ));
            return Ok(());
        }

        let applied = self
            .destination
            .apply(&change)
            .await
            .map_err(|e| self.destination_error(e))?;
        if !applied {
            return Err(SyncError::Adapter {
                store: self.destination.display_name().to_string(),
                source: ConnectorError::operation_failed(format!(
                    "{modification} of '{}' was rejected",
                    change.identifier
                )),
            });
        }

        ctx.counters.record_applied(modification);
        info!(
            task = %self.config.name,
            pivot = %pivot.id,
            modification = %modification,
            identifier = %change.identifier,
            "Change applied"
        );
        self.audit
            .record(AuditRecord::applied(&self.config.name, pivot.id.as_str(), &change));
        Ok(())
    }

    fn source_error(&self, error: ConnectorError) -> SyncError {
        let lost = self.source.is_connection_lost(&error);
        SyncError::from_adapter(self.source.display_name(), error, lost)
    }

    fn destination_error(&self, error: ConnectorError) -> SyncError {
        let lost = self.destination.is_connection_lost(&error);
        SyncError::from_adapter(self.destination.display_name(), error, lost)
    }

    fn finish(&self, ctx: &PassContext, status: PassStatus, error: Option<String>) -> PassReport {
        let report = ctx.report(&self.config.name, status, error);
        match report.status {
            PassStatus::Completed => info!(
                task = %report.task,
                kind = %report.kind,
                seen = report.counters.seen,
                attempted = report.counters.attempted,
                applied = report.counters.applied,
                errored = report.counters.errored,
                duration_ms = report.duration_ms,
                "Pass completed"
            ),
            PassStatus::Incomplete | PassStatus::Failed => warn!(
                task = %report.task,
                kind = %report.kind,
                status = %report.status,
                seen = report.counters.seen,
                applied = report.counters.applied,
                errored = report.counters.errored,
                error = report.error.as_deref().unwrap_or_default(),
                "Pass did not complete"
            ),
        }
        report
    }
}

/// Syntax problems in the policy's expressions.
///
/// Only reported. A broken expression still fails each unit that evaluates it.
fn expression_problems<'a>(
    policy: &'a Policy,
    evaluator: &RhaiEvaluator,
) -> Vec<(&'a str, ScriptValidationError)> {
    policy
        .expressions()
        .into_iter()
        .flat_map(|expression| {
            evaluator
                .validate(expression)
                .into_iter()
                .map(move |problem| (expression, problem))
        })
        .collect()
}
