//! Persisting an edited row and reconciling the cache with it.

use chrono::Local;
use tracing::{info, warn};

use crate::cache::TableCache;
use crate::config::TablesConfig;
use crate::store::{RecordStore, Row, RowLocator, StoreResult};

use super::catalog::FieldCatalog;

const BACKUP_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What a successful write did besides the primary row update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
  pub row_id: String,
  pub locator: RowLocator,
  /// False when the backup log append failed; the write still stands.
  pub backup_logged: bool,
  /// False when the row was not in the cached snapshot.
  pub cache_patched: bool,
}

/// Writes full rows to the main table, located by id.
///
/// There is no concurrency token: a row is located, then overwritten, and
/// another writer's update between the two is lost (last write wins).
pub struct RowWriter<'a, S> {
  store: &'a S,
  cache: &'a TableCache,
  catalog: &'a FieldCatalog,
  tables: &'a TablesConfig,
}

impl<'a, S: RecordStore> RowWriter<'a, S> {
  pub fn new(store: &'a S, cache: &'a TableCache, catalog: &'a FieldCatalog, tables: &'a TablesConfig) -> Self {
    Self {
      store,
      cache,
      catalog,
      tables,
    }
  }

  /// Overwrite the row whose id is `row_id` with `row`.
  ///
  /// Every catalog field is written, absent ones as empty strings. Only the
  /// primary write decides success; the backup log and cache patch follow it.
  pub async fn write(&self, row_id: &str, row: &Row) -> StoreResult<WriteReceipt> {
    let id_field = &self.catalog.id_field;
    let main = &self.tables.main;

    let mut row = row.clone();
    row.set(id_field.clone(), row_id);
    let values = row.values_for(&self.catalog.fields);

    // Cached positions go out of date when rows are inserted or removed.
    let locator = self.store.find_row(main, id_field, row_id).await?;
    self.store.write_row(main, locator, &values).await?;
    info!(table = %main, row_id, position = locator.position, "row saved");

    let backup_logged = self.log_backup(&values).await;
    let cache_patched = self.cache.patch_row(
      main,
      id_field,
      row_id,
      Row::from_values(&self.catalog.fields, &values),
    );

    Ok(WriteReceipt {
      row_id: row_id.to_string(),
      locator,
      backup_logged,
      cache_patched,
    })
  }

  async fn log_backup(&self, values: &[String]) -> bool {
    let mut entry = Vec::with_capacity(values.len() + 1);
    entry.push(Local::now().format(BACKUP_TIMESTAMP_FORMAT).to_string());
    entry.extend_from_slice(values);

    match self.store.append_row(&self.tables.backup, &entry).await {
      Ok(()) => true,
      Err(err) => {
        warn!(table = %self.tables.backup, "backup log append failed: {}", err);
        false
      }
    }
  }
}
