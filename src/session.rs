//! Per-user state of the guided lookup and edit flow.

use std::collections::BTreeMap;
use tracing::debug;

use crate::roster::FieldCatalog;
use crate::store::Row;

/// Where a user is in the flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Step {
  /// Looking up their record
  #[default]
  Search,
  /// Picking their record among the matches
  Select,
  /// Editing the selected record
  Edit,
  /// Save succeeded
  Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchMode {
  #[default]
  PersonalId,
  /// Fallback when the personal id is missing or wrong in the roster
  NameAndBirthDate,
}

/// Field edits not yet saved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingEdit {
  values: BTreeMap<String, String>,
}

impl PendingEdit {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
    self.values.insert(field.into(), value.into());
  }

  pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
    self.set(field, value);
    self
  }

  pub fn get(&self, field: &str) -> Option<&str> {
    self.values.get(field).map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn clear(&mut self) {
    self.values.clear();
  }

  /// `base` with the edits applied. Read-only and unknown fields are ignored.
  pub fn apply_to(&self, base: &Row, catalog: &FieldCatalog) -> Row {
    let mut row = base.clone();
    for (field, value) in self.iter() {
      if !catalog.contains(field) || catalog.is_read_only(field) {
        debug!(field, "ignoring edit to non-editable field");
        continue;
      }
      row.set(field, value);
    }
    row
  }
}

/// Everything one user's interaction carries between steps.
#[derive(Debug, Clone, Default)]
pub struct Session {
  pub step: Step,
  pub search_mode: SearchMode,
  /// Set after a personal-id search found nothing
  pub offer_name_search: bool,
  pub results: Vec<Row>,
  pub selected: Option<String>,
  pub pending: PendingEdit,
}

impl Session {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn show_results(&mut self, rows: Vec<Row>) {
    self.offer_name_search = rows.is_empty() && self.search_mode == SearchMode::PersonalId;
    self.step = if rows.is_empty() {
      Step::Search
    } else {
      Step::Select
    };
    self.results = rows;
  }

  /// Start editing `row_id`. Edits for a previously selected row are dropped.
  pub fn select(&mut self, row_id: impl Into<String>) {
    let row_id = row_id.into();
    if self.selected.as_deref() != Some(row_id.as_str()) {
      self.pending.clear();
    }
    self.selected = Some(row_id);
    self.step = Step::Edit;
  }

  pub fn switch_search_mode(&mut self, mode: SearchMode) {
    self.search_mode = mode;
    if mode == SearchMode::PersonalId {
      self.offer_name_search = false;
    }
  }

  /// Discard edits and go back to the match list.
  pub fn cancel_edit(&mut self) {
    self.pending.clear();
    self.selected = None;
    self.step = Step::Select;
  }

  pub fn finish(&mut self) {
    self.pending.clear();
    self.step = Step::Done;
  }

  /// Back to an empty search, keeping nothing.
  pub fn restart(&mut self) {
    *self = Session::default();
  }
}
