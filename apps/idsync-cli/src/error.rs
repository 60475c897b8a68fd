//! CLI error types and exit codes

use std::path::PathBuf;

use idsync_connector::ConnectorError;
use idsync_engine::SyncError;
use thiserror::Error;

/// Exit codes for the CLI
/// - 0: Every requested pass completed without errored units
/// - 1: Configuration error or no task matched
/// - 2: A pass failed (lost connection, empty source)
/// - 3: Passes completed with errored units or a timeout
pub type CliResult<T> = Result<T, CliError>;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_PASS_FAILED: i32 = 2;
pub const EXIT_PARTIAL: i32 = 3;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("No task matches '{0}'")]
    NoTaskMatched(String),

    #[error("Nothing to do. Use --synchronization, --cleaning or --asynchronous-synchronization.")]
    NothingToDo,

    #[error("Store '{store}': {source}")]
    Store {
        store: String,
        #[source]
        source: ConnectorError,
    },

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Output error: {0}")]
    Output(String),
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_)
            | CliError::Read { .. }
            | CliError::Yaml { .. }
            | CliError::NoTaskMatched(_)
            | CliError::NothingToDo
            | CliError::Output(_) => EXIT_CONFIG,
            CliError::Sync(e) if e.is_fatal_to_pass() && !matches!(e, SyncError::Configuration { .. }) => {
                EXIT_PASS_FAILED
            }
            CliError::Sync(_) => EXIT_CONFIG,
            CliError::Store { source, .. } if source.is_connection_lost() => EXIT_PASS_FAILED,
            CliError::Store { .. } => EXIT_CONFIG,
        }
    }

    /// Print the error to stderr
    pub fn print(&self) {
        eprintln!("Error: {self}");
    }
}
