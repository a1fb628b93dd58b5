use crate::store::Row;

use super::catalog::FieldCatalog;

/// Labels of required fields that `row` leaves blank.
///
/// A lone comma counts as blank: it is what joining two empty address
/// parts produces.
pub fn missing_required(catalog: &FieldCatalog, row: &Row) -> Vec<String> {
  catalog
    .required
    .iter()
    .filter(|field| {
      let value = row.get(field).trim();
      value.is_empty() || value == ","
    })
    .map(|field| FieldCatalog::label(field))
    .collect()
}
