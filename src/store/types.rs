use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One record of a backing table, keyed by field name.
///
/// Absent fields read as the empty string, so a row materialized against a
/// field list always answers for every field in it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
  fields: BTreeMap<String, String>,
}

impl Row {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a row from positional values aligned with `fields`.
  /// Missing trailing values become empty strings.
  pub fn from_values(fields: &[String], values: &[String]) -> Self {
    let fields = fields
      .iter()
      .enumerate()
      .map(|(i, name)| (name.clone(), values.get(i).cloned().unwrap_or_default()))
      .collect();
    Self { fields }
  }

  pub fn get(&self, field: &str) -> &str {
    self.fields.get(field).map(String::as_str).unwrap_or("")
  }

  pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
    self.fields.insert(field.into(), value.into());
  }

  pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
    self.set(field, value);
    self
  }

  /// Values in the order of `fields`, with absent fields as empty strings.
  pub fn values_for(&self, fields: &[String]) -> Vec<String> {
    fields.iter().map(|f| self.get(f).to_string()).collect()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }
}

/// Physical position of a data row in a backing table (0-based, header excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowLocator {
  pub position: usize,
}

impl RowLocator {
  pub fn new(position: usize) -> Self {
    Self { position }
  }
}
