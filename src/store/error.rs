//! Error taxonomy for backing store operations.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures a backing store can report.
///
/// Every backend translates its own transport errors into one of these
/// before they leave the store module.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
  /// Provider-side request rate quota exceeded. Transient.
  #[error("Request quota exceeded: {message}")]
  Quota { message: String },

  /// Retries for a quota error ran out.
  #[error("Request quota still exceeded after {attempts} attempts of {operation}")]
  QuotaExhausted { operation: String, attempts: u32 },

  #[error("Table not found: {table}")]
  TableNotFound { table: String },

  #[error("Row not found in {table}: {key}")]
  RowNotFound { table: String, key: String },

  #[error("Column {column} missing from table {table}")]
  MissingColumn { table: String, column: String },

  /// Rows are written by position, so the header must lead with the
  /// configured fields in order.
  #[error("Column {column} of table {table} must be at position {position}, found '{found}'")]
  HeaderMismatch {
    table: String,
    column: String,
    position: usize,
    found: String,
  },

  /// The API or its token endpoint refused the service account's credentials.
  #[error("Not authorized: {0}")]
  Unauthorized(String),

  /// Anything else: network failures, unexpected responses, local IO.
  #[error("{0}")]
  Transport(String),
}

impl StoreError {
  /// Whether the failure is the transient quota kind the retry policy handles.
  pub fn is_quota(&self) -> bool {
    matches!(self, StoreError::Quota { .. })
  }

  /// Whether the failure means the table or row the caller had in mind is gone.
  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      StoreError::TableNotFound { .. } | StoreError::RowNotFound { .. }
    )
  }
}
