//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::args::LogFormat;

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,idsync_engine=info";

/// Default filter with `--verbose`.
pub const VERBOSE_FILTER: &str = "debug";

/// Install the global subscriber. Logs go to stderr so that reports on
/// stdout stay machine-readable.
pub fn init_logging(verbose: bool, format: LogFormat) {
    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(verbose))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .flatten_event(true),
            )
            .try_init(),
    };

    if let Err(e) = installed {
        eprintln!("Logging already initialized: {e}");
    }
}
