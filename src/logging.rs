use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Log files live next to the local store: $XDG_DATA_HOME/rostersync/logs
fn log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir().ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(data_dir.join("rostersync").join("logs"))
}

/// Route tracing output to a daily rolling file.
///
/// The console owns stdout, so nothing is logged there. Filtering follows
/// `RUST_LOG` and defaults to `info`. Keep the returned guard alive for the
/// life of the process or buffered lines are lost on exit.
pub fn init() -> Result<WorkerGuard> {
  let dir = log_dir()?;
  std::fs::create_dir_all(&dir).map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, "rostersync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
