//! YAML configuration of stores and tasks.
//!
//! ```yaml
//! stores:
//!   hr:
//!     json_file: hr.json
//!     pivot_attribute: uid
//!     schema:
//!       name: person
//!       identifier_field: dn
//!       attributes:
//!         - { name: uid, type: string }
//!         - { name: cn, type: string }
//!   ldap:
//!     json_file: ldap.json
//!     pivot_attribute: uid
//!     schema: { name: person, identifier_field: dn, attributes: [...] }
//! tasks:
//!   - name: people
//!     source: hr
//!     destination: ldap
//!     workers: 8
//!     policy:
//!       identifier: { expression: '"uid=" + source.uid', base: "ou=people,dc=example,dc=com" }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use idsync_connector::memory::DEFAULT_TIMESTAMP_ATTRIBUTE;
use idsync_connector::EntitySchema;
use idsync_engine::TaskConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

/// Selects every task.
pub const ALL_TASKS: &str = "all";

fn default_timestamp_attribute() -> String {
    DEFAULT_TIMESTAMP_ATTRIBUTE.to_string()
}

fn default_change_feed() -> bool {
    true
}

/// A file-backed store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON array of records. Relative paths resolve against the
    /// configuration file's directory.
    pub json_file: PathBuf,

    /// Attribute correlating entries across stores.
    pub pivot_attribute: String,

    #[serde(default = "default_timestamp_attribute")]
    pub timestamp_attribute: String,

    /// Whether changed-since queries are answered.
    #[serde(default = "default_change_feed")]
    pub change_feed: bool,

    pub schema: EntitySchema,
}

/// A task and the stores it runs between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub source: String,
    pub destination: String,
    #[serde(flatten)]
    pub task: TaskConfig,
}

impl TaskDefinition {
    pub fn name(&self) -> &str {
        &self.task.name
    }
}

/// Whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub stores: BTreeMap<String, StoreConfig>,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,

    /// Directory relative store paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl SyncConfig {
    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> CliResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| CliError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&raw).map_err(|source| CliError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Check cross references and every task configuration.
    pub fn validate(&self) -> CliResult<()> {
        let mut names = HashSet::new();
        for definition in &self.tasks {
            let name = definition.name();
            if name.eq_ignore_ascii_case(ALL_TASKS) {
                return Err(CliError::Config(format!("'{ALL_TASKS}' is reserved and cannot name a task")));
            }
            if !names.insert(name.to_ascii_lowercase()) {
                return Err(CliError::Config(format!("task '{name}' is defined twice")));
            }
            for store in [&definition.source, &definition.destination] {
                if !self.stores.contains_key(store) {
                    return Err(CliError::Config(format!(
                        "task '{name}' references unknown store '{store}'"
                    )));
                }
            }
            if definition.source == definition.destination {
                return Err(CliError::Config(format!(
                    "task '{name}' uses '{}' as both source and destination",
                    definition.source
                )));
            }
            definition.task.validate()?;
        }
        for (name, store) in &self.stores {
            if store.pivot_attribute.trim().is_empty() {
                return Err(CliError::Config(format!("store '{name}' has no pivot_attribute")));
            }
        }
        Ok(())
    }

    /// Tasks matching the requested names, in configuration order.
    ///
    /// `all` selects every task. A name matching nothing is an error.
    pub fn select(&self, requested: &[String]) -> CliResult<Vec<&TaskDefinition>> {
        if requested.iter().any(|r| r.eq_ignore_ascii_case(ALL_TASKS)) {
            if self.tasks.is_empty() {
                return Err(CliError::NoTaskMatched(ALL_TASKS.to_string()));
            }
            return Ok(self.tasks.iter().collect());
        }

        for name in requested {
            if !self.tasks.iter().any(|t| t.name().eq_ignore_ascii_case(name)) {
                return Err(CliError::NoTaskMatched(name.clone()));
            }
        }
        Ok(self
            .tasks
            .iter()
            .filter(|t| requested.iter().any(|r| t.name().eq_ignore_ascii_case(r)))
            .collect())
    }

    /// Absolute or config-relative path of a store file.
    pub fn store_path(&self, store: &StoreConfig) -> PathBuf {
        if store.json_file.is_absolute() {
            store.json_file.clone()
        } else {
            self.base_dir.join(&store.json_file)
        }
    }
}
