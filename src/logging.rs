//! Tracing subscriber setup for the binaries.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::EnvConfig;

pub const DEFAULT_LOG_FILTER: &str = "info";

/// Installs a global `fmt` subscriber filtered by `AGENT_ENGINE_LOG`
/// (default `info`). Logs go to `AGENT_ENGINE_LOG_FILE` when set, else stderr.
///
/// Calling it twice is harmless; the second call leaves the first subscriber
/// in place.
pub fn init_logging(config: &EnvConfig) -> io::Result<()> {
    let filter = build_filter(config.log_filter.as_deref());
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = match &config.log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None => builder.with_writer(io::stderr).try_init(),
    };
    if installed.is_err() {
        tracing::debug!("a tracing subscriber was already installed");
    }
    Ok(())
}

/// Falls back to [`DEFAULT_LOG_FILTER`] when `directives` is missing or does
/// not parse.
#[must_use]
pub fn build_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn open_log_file(path: &Path) -> io::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
