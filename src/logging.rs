//! Logging initialization.
//!
//! Structured logs go to stderr via `tracing-subscriber`. Verbosity comes
//! from `-v`/`-q` flags; `BD_LOG` takes precedence when set (standard
//! `EnvFilter` syntax).

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init_logging(verbose: u8, quiet: bool) -> anyhow::Result<()> {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_env("BD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("beads_git={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
