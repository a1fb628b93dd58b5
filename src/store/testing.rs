//! In-memory store with scripted failures and a call log, for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::{locate_in_grid, rows_from_grid, RecordStore, Row, RowLocator, StoreError, StoreResult};

#[derive(Default)]
pub struct FakeStore {
  tables: Mutex<HashMap<String, Vec<Vec<String>>>>,
  failures: Mutex<HashMap<&'static str, VecDeque<StoreError>>>,
  calls: Mutex<Vec<&'static str>>,
}

impl FakeStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Install `table` with a header and data rows.
  pub fn with_table(self, table: &str, header: &[&str], rows: &[&[&str]]) -> Self {
    let mut grid = vec![header.iter().map(|s| s.to_string()).collect::<Vec<_>>()];
    grid.extend(rows.iter().map(|r| r.iter().map(|s| s.to_string()).collect()));
    self.tables.lock().unwrap().insert(table.to_string(), grid);
    self
  }

  /// Make the next call of `operation` fail with `error`. Queues in order.
  pub fn fail_next(&self, operation: &'static str, error: StoreError) {
    self
      .failures
      .lock()
      .unwrap()
      .entry(operation)
      .or_default()
      .push_back(error);
  }

  /// Change a cell behind the cache's back, as another writer would.
  pub fn set_cell(&self, table: &str, position: usize, column: &str, value: &str) {
    let mut tables = self.tables.lock().unwrap();
    let grid = tables.get_mut(table).unwrap();
    let index = grid[0].iter().position(|h| h == column).unwrap();
    let row = &mut grid[position + 1];
    if row.len() <= index {
      row.resize(index + 1, String::new());
    }
    row[index] = value.to_string();
  }

  pub fn grid(&self, table: &str) -> Option<Vec<Vec<String>>> {
    self.tables.lock().unwrap().get(table).cloned()
  }

  pub fn calls(&self, operation: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|c| **c == operation)
      .count()
  }

  pub fn total_calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  fn enter(&self, operation: &'static str) -> StoreResult<()> {
    self.calls.lock().unwrap().push(operation);
    match self
      .failures
      .lock()
      .unwrap()
      .get_mut(operation)
      .and_then(VecDeque::pop_front)
    {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  fn table(&self, table: &str) -> StoreResult<Vec<Vec<String>>> {
    self.grid(table).ok_or_else(|| StoreError::TableNotFound {
      table: table.to_string(),
    })
  }
}

impl RecordStore for FakeStore {
  async fn read_all(&self, table: &str, fields: &[String]) -> StoreResult<Vec<Row>> {
    self.enter("read_all")?;
    rows_from_grid(table, &self.table(table)?, fields)
  }

  async fn read_values(&self, table: &str) -> StoreResult<Vec<Vec<String>>> {
    self.enter("read_values")?;
    self.table(table)
  }

  async fn find_row(&self, table: &str, column: &str, value: &str) -> StoreResult<RowLocator> {
    self.enter("find_row")?;
    locate_in_grid(table, &self.table(table)?, column, value)
  }

  async fn write_row(&self, table: &str, locator: RowLocator, values: &[String]) -> StoreResult<()> {
    self.enter("write_row")?;
    let mut tables = self.tables.lock().unwrap();
    let grid = tables.get_mut(table).ok_or_else(|| StoreError::TableNotFound {
      table: table.to_string(),
    })?;
    let row = grid
      .get_mut(locator.position + 1)
      .ok_or_else(|| StoreError::RowNotFound {
        table: table.to_string(),
        key: format!("position {}", locator.position),
      })?;
    *row = values.to_vec();
    Ok(())
  }

  async fn append_row(&self, table: &str, values: &[String]) -> StoreResult<()> {
    self.enter("append_row")?;
    let mut tables = self.tables.lock().unwrap();
    let grid = tables.get_mut(table).ok_or_else(|| StoreError::TableNotFound {
      table: table.to_string(),
    })?;
    grid.push(values.to_vec());
    Ok(())
  }
}
