//! Operations the front end calls, with store failures mapped to
//! messages a member can act on.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheState, Snapshot, TableCache};
use crate::config::{Config, TablesConfig};
use crate::roster::{
  export, missing_required, progress, ExportKind, FieldCatalog, Progress, RowWriter, SearchCriteria,
  WriteReceipt,
};
use crate::session::{PendingEdit, Session};
use crate::store::{RecordStore, RetryPolicy, RetryingStore, Row, StoreError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UserError {
  #[error("The system is busy right now. Please wait a moment and try again.")]
  Busy,
  #[error("Your session is out of date. Please search for your record again.")]
  OutOfDate,
  #[error("{0}")]
  Invalid(String),
  /// Anything else, with the underlying message kept verbatim
  #[error("{0}")]
  Failed(String),
}

impl From<StoreError> for UserError {
  fn from(err: StoreError) -> Self {
    if err.is_quota() || matches!(err, StoreError::QuotaExhausted { .. }) {
      UserError::Busy
    } else if err.is_not_found() {
      UserError::OutOfDate
    } else {
      UserError::Failed(err.to_string())
    }
  }
}

/// Result of a save attempt. Only `Saved` clears the pending edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
  Saved(WriteReceipt),
  /// Labels of required fields left empty; nothing was sent
  Invalid(Vec<String>),
  Failed(UserError),
}

/// What an admin refresh found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
  pub rows: usize,
  /// None when nothing was cached before the refresh
  pub changed: Option<bool>,
}

pub struct RosterService<S> {
  store: RetryingStore<S>,
  cache: Arc<TableCache>,
  catalog: FieldCatalog,
  tables: TablesConfig,
}

impl<S: RecordStore> RosterService<S> {
  pub fn new(
    store: S,
    policy: RetryPolicy,
    cache: Arc<TableCache>,
    catalog: FieldCatalog,
    tables: TablesConfig,
  ) -> Self {
    Self {
      store: RetryingStore::new(store, policy),
      cache,
      catalog,
      tables,
    }
  }

  pub fn from_config(store: S, config: &Config) -> Self {
    Self::new(
      store,
      config.retry.policy(),
      Arc::new(TableCache::new(config.cache.ttl())),
      config.catalog.clone(),
      config.tables.clone(),
    )
  }

  pub fn catalog(&self) -> &FieldCatalog {
    &self.catalog
  }

  #[cfg(test)]
  pub fn store(&self) -> &S {
    self.store.inner()
  }

  pub fn cache_state(&self) -> CacheState {
    self.cache.state(&self.tables.main)
  }

  /// The cached main table without loading it.
  pub fn cached_table(&self) -> Option<Arc<Snapshot>> {
    self.cache.peek(&self.tables.main)
  }

  async fn main_table(&self) -> Result<Arc<Snapshot>, StoreError> {
    let table = &self.tables.main;
    let result = self
      .cache
      .fetch_table(table, || async move {
        let mut rows = self.store.read_all(table, &self.catalog.fields).await?;
        for row in &mut rows {
          self.catalog.normalize(row);
        }
        Ok::<_, StoreError>(rows)
      })
      .await?;
    debug!(
      table = result.data.table(),
      source = ?result.source,
      cached_at = ?result.cached_at,
      "roster read"
    );
    Ok(result.data)
  }

  pub async fn search(&self, session: &mut Session, criteria: SearchCriteria) -> Result<Vec<Row>, UserError> {
    criteria.check().map_err(UserError::Invalid)?;
    let snapshot = self.main_table().await?;
    let hits: Vec<Row> = criteria
      .apply(&self.catalog, snapshot.rows())
      .map_err(UserError::Invalid)?
      .into_iter()
      .cloned()
      .collect();

    info!(hits = hits.len(), "roster search");
    session.show_results(hits.clone());
    Ok(hits)
  }

  /// Current values of `row_id`, served from the cache.
  pub async fn load_for_edit(&self, session: &mut Session, row_id: &str) -> Result<Row, UserError> {
    let snapshot = self.main_table().await?;
    let row = snapshot
      .find(&self.catalog.id_field, row_id)
      .cloned()
      .ok_or(UserError::OutOfDate)?;
    session.select(row_id);
    Ok(row)
  }

  /// Validate and save `edit` over the current values of `row_id`.
  ///
  /// The edit is kept in the session until a save succeeds, so a failed
  /// attempt can be resubmitted as is. A row missing from the cached roster
  /// is out of date and nothing is sent: the write replaces the whole row,
  /// so it needs the current values of the fields the edit leaves alone.
  pub async fn submit_edit(&self, session: &mut Session, row_id: &str, edit: PendingEdit) -> SubmitOutcome {
    session.select(row_id);
    session.pending = edit;

    let snapshot = match self.main_table().await {
      Ok(snapshot) => snapshot,
      Err(err) => {
        warn!(row_id, "could not load roster for save: {}", err);
        return SubmitOutcome::Failed(err.into());
      }
    };

    let Some(base) = snapshot.find(&self.catalog.id_field, row_id) else {
      warn!(row_id, "save rejected: row not in the cached roster");
      return SubmitOutcome::Failed(UserError::OutOfDate);
    };
    let mut row = session.pending.apply_to(base, &self.catalog);
    row.set(self.catalog.id_field.clone(), row_id);

    let missing = missing_required(&self.catalog, &row);
    if !missing.is_empty() {
      info!(row_id, missing = missing.len(), "save rejected: required fields empty");
      return SubmitOutcome::Invalid(missing);
    }

    let writer = RowWriter::new(&self.store, &self.cache, &self.catalog, &self.tables);
    match writer.write(row_id, &row).await {
      Ok(receipt) => {
        session.finish();
        SubmitOutcome::Saved(receipt)
      }
      Err(err) => {
        warn!(row_id, "save failed: {}", err);
        SubmitOutcome::Failed(err.into())
      }
    }
  }

  /// Save the session's pending edit for its selected row.
  pub async fn save(&self, session: &mut Session) -> SubmitOutcome {
    let Some(row_id) = session.selected.clone() else {
      return SubmitOutcome::Failed(UserError::Invalid("Pick a record to edit first".to_string()));
    };
    let edit = session.pending.clone();
    self.submit_edit(session, &row_id, edit).await
  }

  /// Drop every cached table and reload the roster.
  pub async fn admin_refresh(&self) -> Result<RefreshReport, UserError> {
    let before = self.cache.peek(&self.tables.main).map(|s| s.fingerprint());
    self.cache.invalidate_all();

    let snapshot = self.main_table().await?;
    if snapshot.is_empty() {
      warn!(table = %self.tables.main, "refresh loaded an empty roster");
    }
    let changed = before.map(|fingerprint| fingerprint != snapshot.fingerprint());
    info!(rows = snapshot.len(), ?changed, "admin refresh");
    Ok(RefreshReport {
      rows: snapshot.len(),
      changed,
    })
  }

  // The backup log is read live; a missing log means nothing was saved yet.
  async fn updated_ids(&self) -> Result<HashSet<String>, StoreError> {
    match self.store.read_values(&self.tables.backup).await {
      Ok(log) => Ok(progress::updated_ids(&self.catalog, &log)),
      Err(StoreError::TableNotFound { table }) => {
        warn!(table = %table, "backup log not found, counting no updates");
        Ok(HashSet::new())
      }
      Err(err) => Err(err),
    }
  }

  async fn roster_and_log(&self) -> Result<(Arc<Snapshot>, HashSet<String>), UserError> {
    Ok(futures::try_join!(self.main_table(), self.updated_ids())?)
  }

  pub async fn admin_progress(&self) -> Result<Progress, UserError> {
    let (snapshot, ids) = self.roster_and_log().await?;
    Ok(progress::summarize(&self.catalog, snapshot.rows(), &ids))
  }

  /// Rows never saved through the tool, in table order.
  pub async fn pending_rows(&self) -> Result<Vec<Row>, UserError> {
    let (snapshot, ids) = self.roster_and_log().await?;
    Ok(
      progress::pending_rows(&self.catalog, snapshot.rows(), &ids)
        .into_iter()
        .cloned()
        .collect(),
    )
  }

  /// Write the selected rows to `path` as CSV, returning how many.
  pub async fn export(&self, kind: ExportKind, path: &Path) -> Result<usize, UserError> {
    let rows = match kind {
      ExportKind::All => self.main_table().await?.rows().to_vec(),
      ExportKind::Pending => self.pending_rows().await?,
    };
    let refs: Vec<&Row> = rows.iter().collect();
    export::write_csv(path, &self.catalog, &refs)
      .map_err(|e| UserError::Failed(e.to_string()))?;

    info!(path = %path.display(), rows = rows.len(), ?kind, "exported roster");
    Ok(rows.len())
  }
}
