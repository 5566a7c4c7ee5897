use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use scout_core::Config;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter directives, e.g. `SCOUT_LOG=scout_core=debug`.
pub const LOG_ENV: &str = "SCOUT_LOG";

pub fn default_log_path() -> Result<PathBuf> {
    Ok(Config::config_dir()?.join("scout.log"))
}

/// Send tracing output to a file. The terminal belongs to the UI, so
/// nothing is ever written to stdout or stderr.
pub fn init_logging(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))?;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))?;

    info!(version = env!("CARGO_PKG_VERSION"), "logging started");
    Ok(())
}
