//! Task configuration.
//!
//! One [`TaskConfig`] is built per task and passed to the task at
//! construction; nothing is read from process-wide state.

use std::time::Duration;

use idsync_connector::memory::DEFAULT_TIMESTAMP_ATTRIBUTE;
use idsync_connector::ModificationType;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::policy::Policy;
use crate::pool::{DEFAULT_TIME_LIMIT, DEFAULT_WORKERS};

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_time_limit_secs() -> u64 {
    DEFAULT_TIME_LIMIT.as_secs()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_stop_grace_secs() -> u64 {
    5
}

fn default_timestamp_attribute() -> String {
    DEFAULT_TIMESTAMP_ATTRIBUTE.to_string()
}

/// Modification types to compute and report but never apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DryRunFlags {
    pub no_create: bool,
    pub no_update: bool,
    pub no_delete: bool,
    pub no_modrdn: bool,
}

impl DryRunFlags {
    /// Suppress every modification type.
    #[must_use]
    pub fn all() -> Self {
        Self {
            no_create: true,
            no_update: true,
            no_delete: true,
            no_modrdn: true,
        }
    }

    /// Whether changes of this type are suppressed.
    pub fn suppresses(&self, modification: ModificationType) -> bool {
        match modification {
            ModificationType::Create => self.no_create,
            ModificationType::Update => self.no_update,
            ModificationType::Delete => self.no_delete,
            ModificationType::Rename => self.no_modrdn,
        }
    }

    /// Union of two flag sets.
    #[must_use]
    pub fn union(self, other: DryRunFlags) -> Self {
        Self {
            no_create: self.no_create || other.no_create,
            no_update: self.no_update || other.no_update,
            no_delete: self.no_delete || other.no_delete,
            no_modrdn: self.no_modrdn || other.no_modrdn,
        }
    }
}

/// Configuration of one synchronization task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task name, used to select the task and in logs and audit records.
    pub name: String,

    /// Number of concurrent reconciliation workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Wall-clock budget of one pass in seconds.
    #[serde(default = "default_time_limit_secs")]
    pub time_limit_secs: u64,

    /// Sleep between incremental polls that found nothing, in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// How long a forced stop waits for the loop before aborting it, and how
    /// long a timed-out pass waits for units already running.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    /// Source attribute compared against the watermark.
    #[serde(default = "default_timestamp_attribute")]
    pub timestamp_attribute: String,

    #[serde(default)]
    pub dry_run: DryRunFlags,

    #[serde(default)]
    pub policy: Policy,

    /// Script whose functions every expression of this task can call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
}

impl TaskConfig {
    /// Create a configuration with defaults for everything but the name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: default_workers(),
            time_limit_secs: default_time_limit_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            timestamp_attribute: default_timestamp_attribute(),
            dry_run: DryRunFlags::default(),
            policy: Policy::default(),
            library: None,
        }
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: DryRunFlags) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit_secs = limit.as_secs();
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_secs = interval.as_secs();
        self
    }

    #[must_use]
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Reject configurations a pass cannot start with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.name.trim().is_empty() {
            return Err(SyncError::configuration("task name must not be empty"));
        }
        if self.workers == 0 {
            return Err(SyncError::configuration(format!(
                "task '{}': workers must be at least 1",
                self.name
            )));
        }
        if self.time_limit_secs == 0 {
            return Err(SyncError::configuration(format!(
                "task '{}': time_limit_secs must be at least 1",
                self.name
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(SyncError::configuration(format!(
                "task '{}': poll_interval_secs must be at least 1",
                self.name
            )));
        }
        if self.timestamp_attribute.trim().is_empty() {
            return Err(SyncError::configuration(format!(
                "task '{}': timestamp_attribute must not be empty",
                self.name
            )));
        }
        self.policy.validate().map_err(|e| match e {
            SyncError::Configuration { message } => {
                SyncError::configuration(format!("task '{}': {message}", self.name))
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let config: TaskConfig = serde_yaml::from_str("name: people").unwrap();
        assert_eq!(config.workers, 5);
        assert_eq!(config.time_limit(), Duration::from_secs(3600));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.stop_grace(), Duration::from_secs(5));
        assert_eq!(config.timestamp_attribute, "modifyTimestamp");
        assert_eq!(config.dry_run, DryRunFlags::default());
        assert_eq!(config, TaskConfig::new("people"));
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let err = TaskConfig::new("people").with_workers(0).validate().unwrap_err();
        assert!(err.to_string().contains("workers must be at least 1"));
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        assert!(TaskConfig::new("  ").validate().is_err());
    }

    #[test]
    fn test_dry_run_flags() {
        let flags = DryRunFlags {
            no_delete: true,
            ..DryRunFlags::default()
        };
        assert!(flags.suppresses(ModificationType::Delete));
        assert!(!flags.suppresses(ModificationType::Create));

        let all = flags.union(DryRunFlags::all());
        for modification in ModificationType::ALL {
            assert!(all.suppresses(modification));
        }
    }
}
