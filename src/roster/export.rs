use chrono::Local;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};

use crate::store::Row;

use super::catalog::FieldCatalog;

/// Which rows of the roster to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportKind {
  /// Every row
  All,
  /// Rows never saved through this tool
  Pending,
}

impl ExportKind {
  fn as_str(&self) -> &'static str {
    match self {
      ExportKind::All => "all",
      ExportKind::Pending => "pending",
    }
  }
}

/// `roster_<kind>_<YYYYmmdd_HHMM>.csv` in the current directory.
pub fn default_path(kind: ExportKind) -> PathBuf {
  PathBuf::from(format!(
    "roster_{}_{}.csv",
    kind.as_str(),
    Local::now().format("%Y%m%d_%H%M")
  ))
}

/// Header row of catalog fields, then one record per row in catalog order.
fn write_records<W: std::io::Write>(writer: &mut csv::Writer<W>, catalog: &FieldCatalog, rows: &[&Row]) -> Result<()> {
  writer
    .write_record(&catalog.fields)
    .map_err(|e| eyre!("Failed to write export header: {}", e))?;
  for row in rows {
    writer
      .write_record(row.values_for(&catalog.fields))
      .map_err(|e| eyre!("Failed to write export row: {}", e))?;
  }
  writer.flush().map_err(|e| eyre!("Failed to flush export: {}", e))
}

pub fn to_csv(catalog: &FieldCatalog, rows: &[&Row]) -> Result<String> {
  let mut writer = csv::Writer::from_writer(Vec::new());
  write_records(&mut writer, catalog, rows)?;
  let bytes = writer
    .into_inner()
    .map_err(|e| eyre!("Failed to finish export: {}", e))?;
  String::from_utf8(bytes).map_err(|e| eyre!("Export is not UTF-8: {}", e))
}

pub fn write_csv(path: &Path, catalog: &FieldCatalog, rows: &[&Row]) -> Result<()> {
  let mut writer =
    csv::Writer::from_path(path).map_err(|e| eyre!("Failed to create export {}: {}", path.display(), e))?;
  write_records(&mut writer, catalog, rows)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_rows_follow_catalog_order() {
    let catalog = FieldCatalog::new("ID", ["ID", "Name", "Address"]);
    let rows = [
      Row::new().with("Address", "12 Main St, Ward 3").with("ID", "1"),
      Row::new().with("ID", "007").with("Name", "Say \"hi\""),
    ];
    let refs: Vec<&Row> = rows.iter().collect();
    let out = to_csv(&catalog, &refs).unwrap();

    let mut reader = csv::Reader::from_reader(out.as_bytes());
    assert_eq!(reader.headers().unwrap(), vec!["ID", "Name", "Address"]);
    let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], vec!["1", "", "12 Main St, Ward 3"]);
    assert_eq!(records[1], vec!["007", "Say \"hi\"", ""]);
  }

  #[test]
  fn test_empty_export_keeps_header() {
    let catalog = FieldCatalog::new("ID", ["ID", "Name"]);
    assert_eq!(to_csv(&catalog, &[]).unwrap(), "ID,Name\n");
  }

  #[test]
  fn test_write_csv_to_file() {
    let dir = std::env::temp_dir().join(format!("rostersync-export-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("roster.csv");
    let catalog = FieldCatalog::new("ID", ["ID", "Name"]);
    let row = Row::new().with("ID", "1").with("Name", "An");

    write_csv(&path, &catalog, &[&row]).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "ID,Name\n1,An\n");

    std::fs::remove_dir_all(&dir).ok();
  }

  #[test]
  fn test_default_path_names_kind() {
    let path = default_path(ExportKind::Pending);
    let name = path.to_string_lossy();
    assert!(name.starts_with("roster_pending_"));
    assert!(name.ends_with(".csv"));
  }
}
