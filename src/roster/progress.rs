//! Completion statistics derived from the backup log.

use std::collections::HashSet;

use crate::store::Row;

use super::catalog::FieldCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
  pub total: usize,
  pub updated: usize,
  pub pending: usize,
}

impl Progress {
  pub fn percent_updated(&self) -> f64 {
    if self.total == 0 {
      0.0
    } else {
      self.updated as f64 * 100.0 / self.total as f64
    }
  }
}

/// Ids of every row that appears in the backup log.
///
/// Log rows are a timestamp followed by the row in catalog order. The
/// header is skipped, as are rows too short to reach the id column.
pub fn updated_ids(catalog: &FieldCatalog, log: &[Vec<String>]) -> HashSet<String> {
  let Some(column) = catalog.position(&catalog.id_field).map(|p| p + 1) else {
    return HashSet::new();
  };

  log
    .iter()
    .skip(1)
    .filter_map(|entry| entry.get(column))
    .map(|id| {
      let id = id.trim();
      id.strip_suffix(".0").unwrap_or(id).to_string()
    })
    .filter(|id| !id.is_empty())
    .collect()
}

pub fn summarize(catalog: &FieldCatalog, rows: &[Row], updated: &HashSet<String>) -> Progress {
  let total = rows.len();
  let updated = rows
    .iter()
    .filter(|row| updated.contains(row.get(&catalog.id_field)))
    .count();
  Progress {
    total,
    updated,
    pending: total - updated,
  }
}

/// Rows whose id never appears in the log.
pub fn pending_rows<'r>(catalog: &FieldCatalog, rows: &'r [Row], updated: &HashSet<String>) -> Vec<&'r Row> {
  rows
    .iter()
    .filter(|row| !updated.contains(row.get(&catalog.id_field)))
    .collect()
}
