use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::store::Row;

/// In-memory copy of a whole table at one point in time.
///
/// Snapshots are never mutated; patching builds a new one.
#[derive(Debug, Clone)]
pub struct Snapshot {
  table: String,
  rows: Vec<Row>,
  loaded_at: Instant,
  fetched_at: DateTime<Utc>,
}

impl Snapshot {
  pub fn new(table: impl Into<String>, rows: Vec<Row>) -> Self {
    Self {
      table: table.into(),
      rows,
      loaded_at: Instant::now(),
      fetched_at: Utc::now(),
    }
  }

  pub fn table(&self) -> &str {
    &self.table
  }

  pub fn rows(&self) -> &[Row] {
    &self.rows
  }

  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  /// Monotonic load time, used for TTL checks.
  pub fn loaded_at(&self) -> Instant {
    self.loaded_at
  }

  /// Wall-clock load time, for display.
  pub fn fetched_at(&self) -> DateTime<Utc> {
    self.fetched_at
  }

  pub fn find(&self, id_field: &str, id: &str) -> Option<&Row> {
    self.rows.iter().find(|row| row.get(id_field) == id)
  }

  fn position(&self, id_field: &str, id: &str) -> Option<usize> {
    self.rows.iter().position(|row| row.get(id_field) == id)
  }

  /// A copy with the row identified by `id` replaced and the load time reset.
  /// `None` if no row has that id.
  pub fn patched(&self, id_field: &str, id: &str, row: Row) -> Option<Snapshot> {
    let position = self.position(id_field, id)?;
    let mut rows = self.rows.clone();
    rows[position] = row;
    Some(Snapshot::new(self.table.clone(), rows))
  }

  /// SHA-256 over the table contents, hex encoded.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    for row in &self.rows {
      for (field, value) in row.iter() {
        hasher.update(field.as_bytes());
        hasher.update([0x1f]);
        hasher.update(value.as_bytes());
        hasher.update([0x1f]);
      }
      hasher.update([0x1e]);
    }
    hex::encode(hasher.finalize())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn rows() -> Vec<Row> {
    vec![
      Row::new().with("id", "1").with("name", "A"),
      Row::new().with("id", "2").with("name", "B"),
    ]
  }

  #[tokio::test]
  async fn test_patched_replaces_only_matching_row() {
    let snapshot = Snapshot::new("Sheet1", rows());
    let patched = snapshot
      .patched("id", "2", Row::new().with("id", "2").with("name", "B2"))
      .unwrap();

    assert_eq!(patched.find("id", "2").unwrap().get("name"), "B2");
    assert_eq!(patched.find("id", "1").unwrap().get("name"), "A");
    // The source snapshot is untouched.
    assert_eq!(snapshot.find("id", "2").unwrap().get("name"), "B");
    assert!(snapshot.patched("id", "99", Row::new()).is_none());
  }

  #[tokio::test]
  async fn test_fingerprint_tracks_content() {
    let a = Snapshot::new("Sheet1", rows());
    let b = Snapshot::new("Sheet1", rows());
    assert_eq!(a.fingerprint(), b.fingerprint());

    let c = a.patched("id", "1", Row::new().with("id", "1").with("name", "Z")).unwrap();
    assert_ne!(a.fingerprint(), c.fingerprint());
  }
}
