//! Backing store access.
//!
//! A backing store is a set of named tables whose first row is a header.
//! This module defines the operations the rest of the crate needs from one,
//! a retry wrapper for provider rate quotas, and two backends:
//! - `SheetsStore` talks to the Google Sheets values API
//! - `SqliteStore` keeps the same tabular shape in a local SQLite file

mod auth;
mod error;
mod retry;
mod sheets;
mod sqlite;
mod types;

#[cfg(test)]
pub mod testing;

use std::future::Future;

pub use error::{StoreError, StoreResult};
pub use retry::{RetryPolicy, RetryingStore};
pub use sheets::SheetsStore;
pub use sqlite::SqliteStore;
pub use types::{Row, RowLocator};

/// Operations over named tables in a backing store.
pub trait RecordStore: Send + Sync {
  /// Every data row of `table`, in order, materialized against `fields`.
  ///
  /// Fails with `MissingColumn` if the header lacks one of `fields`.
  fn read_all(
    &self,
    table: &str,
    fields: &[String],
  ) -> impl Future<Output = StoreResult<Vec<Row>>> + Send;

  /// The raw grid of `table`, header row included.
  fn read_values(&self, table: &str) -> impl Future<Output = StoreResult<Vec<Vec<String>>>> + Send;

  /// Locate the first data row whose `column` cell equals `value`.
  fn find_row(
    &self,
    table: &str,
    column: &str,
    value: &str,
  ) -> impl Future<Output = StoreResult<RowLocator>> + Send;

  /// Overwrite every cell of the row at `locator` in one operation.
  fn write_row(
    &self,
    table: &str,
    locator: RowLocator,
    values: &[String],
  ) -> impl Future<Output = StoreResult<()>> + Send;

  /// Append a row at the end of `table`.
  fn append_row(&self, table: &str, values: &[String]) -> impl Future<Output = StoreResult<()>> + Send;
}

/// The backend selected by configuration.
pub enum Backend {
  Sheets(SheetsStore),
  Sqlite(SqliteStore),
}

impl RecordStore for Backend {
  async fn read_all(&self, table: &str, fields: &[String]) -> StoreResult<Vec<Row>> {
    match self {
      Backend::Sheets(s) => s.read_all(table, fields).await,
      Backend::Sqlite(s) => s.read_all(table, fields).await,
    }
  }

  async fn read_values(&self, table: &str) -> StoreResult<Vec<Vec<String>>> {
    match self {
      Backend::Sheets(s) => s.read_values(table).await,
      Backend::Sqlite(s) => s.read_values(table).await,
    }
  }

  async fn find_row(&self, table: &str, column: &str, value: &str) -> StoreResult<RowLocator> {
    match self {
      Backend::Sheets(s) => s.find_row(table, column, value).await,
      Backend::Sqlite(s) => s.find_row(table, column, value).await,
    }
  }

  async fn write_row(&self, table: &str, locator: RowLocator, values: &[String]) -> StoreResult<()> {
    match self {
      Backend::Sheets(s) => s.write_row(table, locator, values).await,
      Backend::Sqlite(s) => s.write_row(table, locator, values).await,
    }
  }

  async fn append_row(&self, table: &str, values: &[String]) -> StoreResult<()> {
    match self {
      Backend::Sheets(s) => s.append_row(table, values).await,
      Backend::Sqlite(s) => s.append_row(table, values).await,
    }
  }
}

/// Check that `header` starts with `fields`, in order.
///
/// `write_row` and `append_row` lay values out in field order, so reading
/// a table whose columns were moved would let the next save scramble it.
/// Columns after the last field are ignored.
pub(crate) fn check_header(table: &str, header: &[String], fields: &[String]) -> StoreResult<()> {
  for (position, field) in fields.iter().enumerate() {
    let found = header.get(position).map(|h| h.trim()).unwrap_or_default();
    if found == field {
      continue;
    }
    if !header.iter().any(|h| h.trim() == field) {
      return Err(StoreError::MissingColumn {
        table: table.to_string(),
        column: field.clone(),
      });
    }
    return Err(StoreError::HeaderMismatch {
      table: table.to_string(),
      column: field.clone(),
      position,
      found: found.to_string(),
    });
  }
  Ok(())
}

/// Map a grid with a header row onto `fields`.
///
/// Shared by backends that fetch the whole grid in one request. Short rows
/// are padded with empty values.
pub(crate) fn rows_from_grid(
  table: &str,
  grid: &[Vec<String>],
  fields: &[String],
) -> StoreResult<Vec<Row>> {
  let Some((header, data)) = grid.split_first() else {
    return Ok(Vec::new());
  };
  check_header(table, header, fields)?;

  Ok(
    data
      .iter()
      .map(|cells| {
        let values: Vec<String> = (0..fields.len())
          .map(|c| cells.get(c).cloned().unwrap_or_default())
          .collect();
        Row::from_values(fields, &values)
      })
      .collect(),
  )
}

/// Position of the first data row whose `column` cell matches `value`.
pub(crate) fn locate_in_grid(
  table: &str,
  grid: &[Vec<String>],
  column: &str,
  value: &str,
) -> StoreResult<RowLocator> {
  let header = grid.first().ok_or_else(|| StoreError::RowNotFound {
    table: table.to_string(),
    key: format!("{} = {}", column, value),
  })?;
  let index = header
    .iter()
    .position(|h| h.trim() == column)
    .ok_or_else(|| StoreError::MissingColumn {
      table: table.to_string(),
      column: column.to_string(),
    })?;

  grid[1..]
    .iter()
    .position(|cells| cells.get(index).map(|c| c.trim()) == Some(value))
    .map(RowLocator::new)
    .ok_or_else(|| StoreError::RowNotFound {
      table: table.to_string(),
      key: format!("{} = {}", column, value),
    })
}
