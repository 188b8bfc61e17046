//! Logging setup

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Initialize the fmt subscriber, filtered by `RUST_LOG`
///
/// When `RUST_LOG` is unset a default is chosen: debug builds log the pipeline at
/// DEBUG, release builds at INFO.
pub fn setup_logging() {
    let default_filter = if cfg!(debug_assertions) {
        "info,demand_rank=debug,demand_rank_lib=debug,reqwest::connect=info"
    } else {
        "info"
    };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(default_filter),
    };

    // Logs go to stderr so stdout stays free for command output
    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_filter(filter);
    tracing_subscriber::registry().with(fmt_layer).init();

    #[cfg(feature = "profiling")]
    tracing::info!("Logging initialized (profiling scopes enabled)");
    #[cfg(not(feature = "profiling"))]
    tracing::info!("Logging initialized");
}
