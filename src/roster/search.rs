use crate::store::Row;

use super::catalog::FieldCatalog;

/// How a member looks up their own record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
  /// Exact personal identification number
  PersonalId(String),
  /// Full name (case-insensitive) plus birth date as written in the roster
  NameAndBirthDate { name: String, birth_date: String },
}

impl SearchCriteria {
  /// Reject criteria with blank parts before anything is read.
  pub fn check(&self) -> Result<(), String> {
    match self {
      SearchCriteria::PersonalId(id) if id.trim().is_empty() => {
        Err("Enter a personal identification number".to_string())
      }
      SearchCriteria::NameAndBirthDate { name, birth_date }
        if name.trim().is_empty() || birth_date.trim().is_empty() =>
      {
        Err("Enter both full name and birth date".to_string())
      }
      _ => Ok(()),
    }
  }

  /// The catalog fields this search needs, or an error naming the missing one.
  fn fields<'a>(&self, catalog: &'a FieldCatalog) -> Result<Vec<&'a str>, String> {
    let need = |field: &'a Option<String>, what: &str| {
      field
        .as_deref()
        .ok_or_else(|| format!("Search by {} is not configured", what))
    };

    match self {
      SearchCriteria::PersonalId(_) => Ok(vec![need(&catalog.search.personal_id, "personal id")?]),
      SearchCriteria::NameAndBirthDate { .. } => Ok(vec![
        need(&catalog.search.full_name, "name")?,
        need(&catalog.search.birth_date, "birth date")?,
      ]),
    }
  }

  /// Rows matching the criteria, in table order.
  pub fn apply<'r>(&self, catalog: &FieldCatalog, rows: &'r [Row]) -> Result<Vec<&'r Row>, String> {
    self.check()?;
    let fields = self.fields(catalog)?;

    let matches: Vec<&Row> = match self {
      SearchCriteria::PersonalId(id) => {
        let id = id.trim();
        rows
          .iter()
          .filter(|row| row.get(fields[0]).trim() == id)
          .collect()
      }
      SearchCriteria::NameAndBirthDate { name, birth_date } => {
        let name = name.trim().to_lowercase();
        let birth_date = birth_date.trim();
        rows
          .iter()
          .filter(|row| {
            row.get(fields[0]).trim().to_lowercase() == name && row.get(fields[1]).trim() == birth_date
          })
          .collect()
      }
    };

    Ok(matches)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::roster::SearchFields;

  fn catalog() -> FieldCatalog {
    FieldCatalog::new("ID", ["ID", "Name", "Born", "CCCD"]).with_search(SearchFields {
      personal_id: Some("CCCD".to_string()),
      full_name: Some("Name".to_string()),
      birth_date: Some("Born".to_string()),
    })
  }

  fn rows() -> Vec<Row> {
    vec![
      Row::new()
        .with("ID", "1")
        .with("Name", "Nguyễn Văn An")
        .with("Born", "05/01/2005")
        .with("CCCD", "030098123456"),
      Row::new()
        .with("ID", "2")
        .with("Name", "Trần Thị Bình ")
        .with("Born", "12/12/2004")
        .with("CCCD", " 001204000001"),
    ]
  }

  #[test]
  fn test_personal_id_is_trimmed_exact() {
    let rows = rows();
    let hits = SearchCriteria::PersonalId(" 001204000001".to_string())
      .apply(&catalog(), &rows)
      .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].get("ID"), "2");

    let none = SearchCriteria::PersonalId("1204000001".to_string())
      .apply(&catalog(), &rows)
      .unwrap();
    assert!(none.is_empty());
  }

  #[test]
  fn test_name_is_case_insensitive() {
    let rows = rows();
    let hits = SearchCriteria::NameAndBirthDate {
      name: "trần thị bình".to_string(),
      birth_date: "12/12/2004".to_string(),
    }
    .apply(&catalog(), &rows)
    .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].get("ID"), "2");
  }

  #[test]
  fn test_blank_input_is_rejected() {
    let rows = rows();
    assert!(SearchCriteria::PersonalId("  ".to_string())
      .apply(&catalog(), &rows)
      .is_err());
    assert!(SearchCriteria::NameAndBirthDate {
      name: "An".to_string(),
      birth_date: String::new(),
    }
    .apply(&catalog(), &rows)
    .is_err());
  }

  #[test]
  fn test_unconfigured_search() {
    let rows = rows();
    let plain = FieldCatalog::new("ID", ["ID"]);
    let err = SearchCriteria::PersonalId("1".to_string())
      .apply(&plain, &rows)
      .unwrap_err();
    assert!(err.contains("not configured"));
  }
}
