//! Command-line arguments

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use idsync_engine::DryRunFlags;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// idsync - Identity store synchronization
#[derive(Debug, Parser)]
#[command(name = "idsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file describing stores and tasks
    #[arg(short = 'f', long = "config", env = "IDSYNC_CONFIG", default_value = "idsync.yaml")]
    pub config: PathBuf,

    /// Run a synchronization pass for a task (or "all")
    #[arg(short = 's', long = "synchronization", value_name = "TASK")]
    pub synchronization: Vec<String>,

    /// Run a clean pass for a task (or "all")
    #[arg(short = 'c', long = "cleaning", value_name = "TASK")]
    pub cleaning: Vec<String>,

    /// Run incremental synchronization for a task (or "all") until interrupted
    #[arg(short = 'a', long = "asynchronous-synchronization", value_name = "TASK")]
    pub asynchronous: Vec<String>,

    /// Do not create entries
    #[arg(long)]
    pub nocreate: bool,

    /// Do not update entries
    #[arg(long)]
    pub noupdate: bool,

    /// Do not delete entries
    #[arg(long)]
    pub nodelete: bool,

    /// Do not rename entries
    #[arg(long)]
    pub nomodrdn: bool,

    /// Compute and report every change without applying any
    #[arg(short = 'n', long)]
    pub dryrun: bool,

    /// Number of workers per task
    #[arg(short = 't', long = "threads", value_name = "N")]
    pub threads: Option<usize>,

    /// Time limit of each pass, in seconds
    #[arg(long = "time-limit", value_name = "SECS")]
    pub time_limit: Option<u64>,

    /// Print pass reports as JSON
    #[arg(long)]
    pub json: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Dry-run flags requested on the command line.
    pub fn dry_run(&self) -> DryRunFlags {
        if self.dryrun {
            return DryRunFlags::all();
        }
        DryRunFlags {
            no_create: self.nocreate,
            no_update: self.noupdate,
            no_delete: self.nodelete,
            no_modrdn: self.nomodrdn,
        }
    }

    /// Whether any pass was requested.
    pub fn has_work(&self) -> bool {
        !(self.synchronization.is_empty() && self.cleaning.is_empty() && self.asynchronous.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeatable_task_flags() {
        let cli = Cli::parse_from(["idsync", "-f", "x.yaml", "-s", "people", "-s", "groups", "-c", "all"]);
        assert_eq!(cli.synchronization, vec!["people", "groups"]);
        assert_eq!(cli.cleaning, vec!["all"]);
        assert!(cli.has_work());
    }

    #[test]
    fn test_dryrun_implies_every_flag() {
        let cli = Cli::parse_from(["idsync", "-n", "-s", "all"]);
        assert_eq!(cli.dry_run(), DryRunFlags::all());

        let cli = Cli::parse_from(["idsync", "--nodelete", "-c", "all"]);
        let flags = cli.dry_run();
        assert!(flags.no_delete);
        assert!(!flags.no_create);
    }

    #[test]
    fn test_log_format() {
        let cli = Cli::parse_from(["idsync", "--log-format", "json"]);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(!cli.has_work());
    }
}
