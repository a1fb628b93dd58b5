use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::roster::FieldCatalog;
use crate::store::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub store: StoreConfig,
  #[serde(default)]
  pub tables: TablesConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  pub catalog: FieldCatalog,
}

/// Which backing store holds the roster.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
  /// Google Sheets spreadsheet; each table is a worksheet
  Sheets(SheetsConfig),
  /// Local SQLite file (default: $XDG_DATA_HOME/rostersync/store.db)
  Sqlite {
    #[serde(default)]
    path: Option<PathBuf>,
  },
}

#[derive(Debug, Clone, Deserialize)]
pub struct SheetsConfig {
  pub spreadsheet_id: String,
  /// Override for the Sheets API endpoint
  #[serde(default)]
  pub api_base: Option<String>,
  /// Service account key file (default: ./service_account.json)
  #[serde(default)]
  pub credentials: Option<PathBuf>,
}

impl SheetsConfig {
  pub const DEFAULT_CREDENTIALS: &'static str = "service_account.json";

  /// Service account key JSON.
  ///
  /// Reads the configured key file, or ./service_account.json when none is
  /// configured and it exists, and otherwise the ROSTERSYNC_SERVICE_ACCOUNT
  /// environment variable holding the key JSON itself.
  pub fn service_account_json(&self) -> Result<String> {
    let path = match &self.credentials {
      Some(path) => Some(path.clone()),
      None => Some(PathBuf::from(Self::DEFAULT_CREDENTIALS)).filter(|p| p.exists()),
    };

    match path {
      Some(path) => std::fs::read_to_string(&path)
        .map_err(|e| eyre!("Failed to read service account key {}: {}", path.display(), e)),
      None => std::env::var("ROSTERSYNC_SERVICE_ACCOUNT").map_err(|_| {
        eyre!(
          "Service account key not found. Put it in ./{} or set ROSTERSYNC_SERVICE_ACCOUNT environment variable.",
          Self::DEFAULT_CREDENTIALS
        )
      }),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TablesConfig {
  #[serde(default = "default_main_table")]
  pub main: String,
  /// Append-only log of every saved row
  #[serde(default = "default_backup_table")]
  pub backup: String,
}

fn default_main_table() -> String {
  "Sheet1".to_string()
}

fn default_backup_table() -> String {
  "Backup".to_string()
}

impl Default for TablesConfig {
  fn default() -> Self {
    Self {
      main: default_main_table(),
      backup: default_backup_table(),
    }
  }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheConfig {
  /// Seconds before a cached table is reported stale
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
}

fn default_ttl_secs() -> u64 {
  300
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_secs: default_ttl_secs(),
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_secs(self.ttl_secs)
  }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  #[serde(default = "default_initial_delay_secs")]
  pub initial_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
  5
}

fn default_initial_delay_secs() -> u64 {
  2
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: default_max_attempts(),
      initial_delay_secs: default_initial_delay_secs(),
    }
  }
}

impl RetryConfig {
  pub fn policy(&self) -> RetryPolicy {
    RetryPolicy::new(self.max_attempts, Duration::from_secs(self.initial_delay_secs))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./rostersync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/rostersync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/rostersync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("rostersync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("rostersync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.catalog.check()?;
    Ok(config)
  }

  /// Get the admin password from the environment.
  ///
  /// Checks ROSTERSYNC_ADMIN_PASSWORD.
  pub fn get_admin_password() -> Result<String> {
    std::env::var("ROSTERSYNC_ADMIN_PASSWORD").map_err(|_| {
      eyre!("Admin password not set. Set ROSTERSYNC_ADMIN_PASSWORD environment variable.")
    })
  }
}
