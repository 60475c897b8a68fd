//! Runs the passes requested on the command line.

use std::collections::BTreeMap;
use std::sync::Arc;

use idsync_connector::MemoryStore;
use idsync_engine::{
    AsyncSyncHandle, AsyncSynchronizer, DryRunFlags, IncrementalPoller, PassReport, PassStatus,
    StopMode, SyncTask,
};
use tracing::{info, warn};

use crate::config::{StoreConfig, SyncConfig, TaskDefinition};
use crate::error::{CliError, CliResult, EXIT_PARTIAL, EXIT_PASS_FAILED, EXIT_SUCCESS};

/// Command-line settings applied on top of every task configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub dry_run: DryRunFlags,
    pub workers: Option<usize>,
    pub time_limit_secs: Option<u64>,
}

/// Owns the loaded stores and builds tasks over them.
pub struct Runner {
    config: SyncConfig,
    overrides: Overrides,
    stores: BTreeMap<String, Arc<MemoryStore>>,
}

impl Runner {
    /// Load every configured store from its file.
    ///
    /// A missing file gives an empty store, written on the first save.
    pub async fn open(config: SyncConfig, overrides: Overrides) -> CliResult<Self> {
        let mut stores = BTreeMap::new();
        for (name, store_config) in &config.stores {
            let store = open_store(&config, name, store_config).await?;
            stores.insert(name.clone(), Arc::new(store));
        }
        Ok(Self {
            config,
            overrides,
            stores,
        })
    }

    pub fn store(&self, name: &str) -> Option<&Arc<MemoryStore>> {
        self.stores.get(name)
    }

    /// Run the requested sync passes, then the requested clean passes.
    pub async fn run_passes(&self, sync: &[String], clean: &[String]) -> CliResult<Vec<PassReport>> {
        let sync_tasks = if sync.is_empty() {
            Vec::new()
        } else {
            self.config.select(sync)?
        };
        let clean_tasks = if clean.is_empty() {
            Vec::new()
        } else {
            self.config.select(clean)?
        };

        let mut reports = Vec::new();
        for definition in sync_tasks {
            let task = self.build_task(definition)?;
            reports.push(task.run_sync_pass().await);
            self.save_store(&definition.destination).await?;
        }
        for definition in clean_tasks {
            let task = self.build_task(definition)?;
            reports.push(task.run_clean_pass().await);
            self.save_store(&definition.destination).await?;
        }
        Ok(reports)
    }

    /// Run incremental synchronization until Ctrl-C, then stop forcibly.
    pub async fn run_asynchronous(&self, requested: &[String]) -> CliResult<()> {
        let definitions = self.config.select(requested)?;
        let mut handles: Vec<(AsyncSyncHandle, &TaskDefinition)> = Vec::new();
        for definition in definitions {
            let task = self.build_task(definition)?;
            let poller = IncrementalPoller::for_task(&task);
            handles.push((AsyncSynchronizer::spawn(task, poller), definition));
        }

        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupted, stopping asynchronous synchronization"),
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C, stopping now"),
        }

        for (handle, definition) in &mut handles {
            handle.stop(StopMode::Forced).await;
            let totals = handle.counters();
            info!(
                task = %handle.task(),
                cycles = handle.cycles(),
                applied = totals.applied,
                errored = totals.errored,
                "Asynchronous synchronization finished"
            );
            self.save_store(&definition.destination).await?;
        }
        Ok(())
    }

    /// Bind a task definition to its stores, with overrides applied.
    pub fn build_task(&self, definition: &TaskDefinition) -> CliResult<SyncTask> {
        let mut config = definition.task.clone();
        config.dry_run = config.dry_run.union(self.overrides.dry_run);
        if let Some(workers) = self.overrides.workers {
            config.workers = workers;
        }
        if let Some(secs) = self.overrides.time_limit_secs {
            config.time_limit_secs = secs;
        }
        // The store decides which attribute carries its change time.
        if let Some(source) = self.config.stores.get(&definition.source) {
            config.timestamp_attribute = source.timestamp_attribute.clone();
        }

        let source = self.lookup(&definition.source)?;
        let destination = self.lookup(&definition.destination)?;
        Ok(SyncTask::new(config, source, destination)?)
    }

    fn lookup(&self, name: &str) -> CliResult<Arc<MemoryStore>> {
        self.stores
            .get(name)
            .cloned()
            .ok_or_else(|| CliError::Config(format!("unknown store '{name}'")))
    }

    async fn save_store(&self, name: &str) -> CliResult<()> {
        let (Some(store), Some(store_config)) = (self.stores.get(name), self.config.stores.get(name))
        else {
            return Err(CliError::Config(format!("unknown store '{name}'")));
        };
        let path = self.config.store_path(store_config);
        store
            .save_json(&path, &store_config.schema)
            .await
            .map_err(|source| CliError::Store {
                store: name.to_string(),
                source,
            })?;
        info!(store = %name, path = %path.display(), "Store saved");
        Ok(())
    }
}

async fn open_store(config: &SyncConfig, name: &str, store_config: &StoreConfig) -> CliResult<MemoryStore> {
    let mut store = MemoryStore::new(name, store_config.pivot_attribute.clone())
        .with_timestamp_attribute(store_config.timestamp_attribute.clone());
    if !store_config.change_feed {
        store = store.without_change_feed();
    }

    let path = config.store_path(store_config);
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        let loaded = store
            .load_json(&path, &store_config.schema)
            .await
            .map_err(|source| CliError::Store {
                store: name.to_string(),
                source,
            })?;
        info!(store = %name, path = %path.display(), loaded, "Store loaded");
    } else {
        warn!(store = %name, path = %path.display(), "Store file not found, starting empty");
    }
    Ok(store)
}

/// Exit code summarizing a set of pass reports.
pub fn exit_code(reports: &[PassReport]) -> i32 {
    if reports.iter().any(|r| r.status == PassStatus::Failed) {
        EXIT_PASS_FAILED
    } else if reports.iter().all(PassReport::is_success) {
        EXIT_SUCCESS
    } else {
        EXIT_PARTIAL
    }
}

/// Human-readable one-line summary of a report.
pub fn summary_line(report: &PassReport) -> String {
    let counters = &report.counters;
    let mut line = format!(
        "{} {} {}: seen={} attempted={} applied={} errored={} ({}ms)",
        report.task,
        report.kind,
        report.status,
        counters.seen,
        counters.attempted,
        counters.applied,
        counters.errored,
        report.duration_ms
    );
    if let Some(error) = &report.error {
        line.push_str(" - ");
        line.push_str(error);
    }
    line
}
