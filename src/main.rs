mod cache;
mod config;
mod console;
mod logging;
mod roster;
mod service;
mod session;
mod store;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use config::{Config, StoreConfig};
use roster::{export, ExportKind, FieldCatalog};
use service::RosterService;
use store::{Backend, RecordStore, SheetsStore, SqliteStore, StoreError};

#[derive(Parser, Debug)]
#[command(name = "rostersync")]
#[command(about = "Look up and update member records in a shared roster")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./rostersync.yaml, then $XDG_CONFIG_HOME/rostersync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Interactive lookup and edit (default)
  Shell,
  /// Print how many records have been updated
  Progress,
  /// Write roster records to a CSV file
  Export {
    kind: ExportKind,
    /// Output file (default: roster_<kind>_<timestamp>.csv)
    #[arg(short, long)]
    out: Option<PathBuf>,
  },
  /// Load a JSON array of records into a table of the local SQLite store
  Import {
    /// Table to (re)create
    table: String,
    file: PathBuf,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init()?;

  let config = Config::load(args.config.as_deref())?;
  let backend = match &config.store {
    StoreConfig::Sheets(sheets) => Backend::Sheets(SheetsStore::new(sheets)?),
    StoreConfig::Sqlite { path } => Backend::Sqlite(SqliteStore::open(path.as_deref())?),
  };
  info!(command = ?args.command, "starting rostersync");

  match args.command.unwrap_or(Command::Shell) {
    Command::Shell => {
      let service = RosterService::from_config(backend, &config);
      let mut console = console::Console::new(service, Config::get_admin_password().ok());
      console.run().await?;
    }
    Command::Progress => {
      let service = RosterService::from_config(backend, &config);
      let progress = service.admin_progress().await?;
      println!(
        "{} of {} records updated ({:.1}%), {} pending",
        progress.updated,
        progress.total,
        progress.percent_updated(),
        progress.pending
      );
    }
    Command::Export { kind, out } => {
      let service = RosterService::from_config(backend, &config);
      let path = out.unwrap_or_else(|| export::default_path(kind));
      let count = service.export(kind, &path).await?;
      println!("Exported {} records to {}", count, path.display());
    }
    Command::Import { table, file } => {
      let Backend::Sqlite(store) = &backend else {
        return Err(eyre!("import only works with the sqlite store"));
      };
      let count = import_records(store, &config, &table, &file).await?;
      println!("Imported {} records into {}", count, table);
    }
  }

  Ok(())
}

/// Replace `table` with the records in `file`, laid out by the field catalog.
///
/// Also creates the backup log table if the store does not have one yet.
async fn import_records(store: &SqliteStore, config: &Config, table: &str, file: &Path) -> Result<usize> {
  let contents =
    std::fs::read_to_string(file).map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
  let rows = records_to_rows(&config.catalog, &contents)?;

  store.create_table(table, &config.catalog.fields)?;
  store.replace_rows(table, &rows)?;

  let backup = &config.tables.backup;
  match store.read_values(backup).await {
    Ok(_) => {}
    Err(StoreError::TableNotFound { .. }) => {
      let mut header = vec!["Timestamp".to_string()];
      header.extend(config.catalog.fields.iter().cloned());
      store.create_table(backup, &header)?;
      info!(table = %backup, "created backup log table");
    }
    Err(err) => return Err(err.into()),
  }

  info!(table, rows = rows.len(), "imported records");
  Ok(rows.len())
}

/// Each JSON object becomes a row in catalog order; absent keys are empty.
fn records_to_rows(catalog: &FieldCatalog, json: &str) -> Result<Vec<Vec<String>>> {
  let records: Vec<serde_json::Map<String, serde_json::Value>> =
    serde_json::from_str(json).map_err(|e| eyre!("Expected a JSON array of objects: {}", e))?;

  Ok(
    records
      .iter()
      .map(|record| {
        catalog
          .fields
          .iter()
          .map(|field| match record.get(field) {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
          })
          .collect()
      })
      .collect(),
  )
}
