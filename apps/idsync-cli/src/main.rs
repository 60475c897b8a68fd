//! idsync - Command-line runner for identity synchronization tasks
//!
//! Runs synchronization and clean passes, or long-running incremental
//! synchronization, for the tasks described in a YAML configuration file.

use clap::Parser;

use idsync_cli::args::Cli;
use idsync_cli::config::SyncConfig;
use idsync_cli::error::{CliError, CliResult, EXIT_SUCCESS};
use idsync_cli::logging::init_logging;
use idsync_cli::runner::{exit_code, summary_line, Overrides, Runner};

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            e.print();
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> CliResult<i32> {
    if !cli.has_work() {
        return Err(CliError::NothingToDo);
    }

    let config = SyncConfig::load(&cli.config)?;
    let overrides = Overrides {
        dry_run: cli.dry_run(),
        workers: cli.threads,
        time_limit_secs: cli.time_limit,
    };
    tracing::info!(
        config = %cli.config.display(),
        stores = config.stores.len(),
        tasks = config.tasks.len(),
        "Configuration loaded"
    );
    let runner = Runner::open(config, overrides).await?;

    if !cli.asynchronous.is_empty() {
        runner.run_asynchronous(&cli.asynchronous).await?;
        return Ok(EXIT_SUCCESS);
    }

    let reports = runner.run_passes(&cli.synchronization, &cli.cleaning).await?;
    if cli.json {
        let body = serde_json::to_string_pretty(&reports).map_err(|e| CliError::Output(e.to_string()))?;
        println!("{body}");
    } else {
        for report in &reports {
            println!("{}", summary_line(report));
        }
    }
    Ok(exit_code(&reports))
}
