use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;

use crate::store::Row;

/// Width identifier columns are zero-padded back to after numeric coercion.
const ZERO_PAD_WIDTH: usize = 12;

/// The ordered set of fields every roster row carries.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldCatalog {
  /// Field holding the unique row id
  pub id_field: String,
  /// All fields, in the order the backing table stores them
  pub fields: Vec<String>,
  /// Fields that must be non-empty before a save is attempted
  #[serde(default)]
  pub required: Vec<String>,
  /// Fields shown but never edited
  #[serde(default)]
  pub read_only: Vec<String>,
  /// Numeric identifier fields that lose leading zeros when coerced
  #[serde(default)]
  pub zero_padded: Vec<String>,
  #[serde(default)]
  pub search: SearchFields,
}

/// Fields used by the lookup step.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchFields {
  pub personal_id: Option<String>,
  pub full_name: Option<String>,
  pub birth_date: Option<String>,
}

/// Builders for catalogs assembled in code rather than read from config.
#[cfg(test)]
impl FieldCatalog {
  pub fn new<S: Into<String>>(id_field: impl Into<String>, fields: impl IntoIterator<Item = S>) -> Self {
    Self {
      id_field: id_field.into(),
      fields: fields.into_iter().map(Into::into).collect(),
      required: Vec::new(),
      read_only: Vec::new(),
      zero_padded: Vec::new(),
      search: SearchFields::default(),
    }
  }

  pub fn with_required<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
    self.required = fields.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_read_only<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
    self.read_only = fields.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_zero_padded<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
    self.zero_padded = fields.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_search(mut self, search: SearchFields) -> Self {
    self.search = search;
    self
  }
}

impl FieldCatalog {
  /// Every field the catalog refers to must be one of `fields`.
  pub fn check(&self) -> Result<()> {
    let referenced = std::iter::once(&self.id_field)
      .chain(&self.required)
      .chain(&self.read_only)
      .chain(&self.zero_padded)
      .chain(self.search.personal_id.iter())
      .chain(self.search.full_name.iter())
      .chain(self.search.birth_date.iter());

    let unknown: Vec<&str> = referenced
      .filter(|f| !self.contains(f))
      .map(String::as_str)
      .collect();

    if unknown.is_empty() {
      Ok(())
    } else {
      Err(eyre!("Catalog refers to unknown fields: {}", unknown.join(", ")))
    }
  }

  pub fn contains(&self, field: &str) -> bool {
    self.fields.iter().any(|f| f == field)
  }

  pub fn position(&self, field: &str) -> Option<usize> {
    self.fields.iter().position(|f| f == field)
  }

  pub fn is_read_only(&self, field: &str) -> bool {
    self.read_only.iter().any(|f| f == field)
  }

  /// Human label for a field: the name without required-markers.
  pub fn label(field: &str) -> String {
    field.replace('*', "").trim().to_string()
  }

  /// Undo numeric coercion the backing store applied on read.
  ///
  /// The id and zero-padded fields lose a trailing `.0`, placeholder
  /// `nan`/`None` become empty, and all-digit zero-padded values are
  /// left-padded back to 12 characters.
  pub fn normalize(&self, row: &mut Row) {
    let id = clean_numeric_text(row.get(&self.id_field));
    row.set(self.id_field.clone(), id);

    for field in &self.zero_padded {
      let mut value = clean_numeric_text(row.get(field));
      if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) && value.len() < ZERO_PAD_WIDTH {
        value = format!("{:0>width$}", value, width = ZERO_PAD_WIDTH);
      }
      row.set(field.clone(), value);
    }
  }
}

fn clean_numeric_text(value: &str) -> String {
  let value = value.trim();
  let value = value.strip_suffix(".0").unwrap_or(value);
  match value {
    "nan" | "None" => String::new(),
    other => other.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn catalog() -> FieldCatalog {
    FieldCatalog::new("ID", ["ID", "Name *", "Personal ID", "Old card"])
      .with_zero_padded(["Personal ID", "Old card"])
  }

  #[test]
  fn test_normalize_restores_identifiers() {
    let mut row = Row::new()
      .with("ID", "17.0")
      .with("Personal ID", "30098123456.0")
      .with("Old card", "nan");
    catalog().normalize(&mut row);

    assert_eq!(row.get("ID"), "17");
    assert_eq!(row.get("Personal ID"), "030098123456");
    assert_eq!(row.get("Old card"), "");
  }

  #[test]
  fn test_normalize_leaves_non_digits_alone() {
    let mut row = Row::new().with("ID", "A-7").with("Personal ID", "B123");
    catalog().normalize(&mut row);
    assert_eq!(row.get("ID"), "A-7");
    assert_eq!(row.get("Personal ID"), "B123");
  }

  #[test]
  fn test_check_reports_unknown_fields() {
    let bad = catalog().with_required(["Name *", "Birth date"]);
    let err = bad.check().unwrap_err();
    assert!(err.to_string().contains("Birth date"));
    assert!(catalog().check().is_ok());
  }

  #[test]
  fn test_label() {
    assert_eq!(FieldCatalog::label("Name *"), "Name");
    assert_eq!(FieldCatalog::label("Card* (12 digits)"), "Card (12 digits)");
  }
}
