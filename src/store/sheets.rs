use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::config::SheetsConfig;

use super::auth::{ServiceAccountAuth, ServiceAccountKey};
use super::{locate_in_grid, rows_from_grid, RecordStore, Row, RowLocator, StoreError, StoreResult};

/// Cells are stored exactly as sent. The API never parses them as numbers,
/// dates, booleans or formulas, so "007" and "TRUE" stay text.
const VALUE_INPUT: (&str, &str) = ("valueInputOption", "RAW");

/// Google Sheets API client; every worksheet is a table.
#[derive(Clone)]
pub struct SheetsStore {
  http: reqwest::Client,
  /// `<api_base>/<spreadsheet_id>`
  spreadsheet: Url,
  auth: Arc<ServiceAccountAuth>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
  #[serde(default)]
  values: Vec<Vec<Value>>,
}

impl SheetsStore {
  pub const DEFAULT_API_BASE: &'static str = "https://sheets.googleapis.com/v4/spreadsheets";

  pub fn new(config: &SheetsConfig) -> color_eyre::Result<Self> {
    let key = ServiceAccountKey::from_json(&config.service_account_json()?)?;
    let auth = ServiceAccountAuth::new(key)?;
    let api_base = config.api_base.as_deref().unwrap_or(Self::DEFAULT_API_BASE);
    let spreadsheet = spreadsheet_url(api_base, &config.spreadsheet_id)
      .map_err(|e| color_eyre::eyre::eyre!("Invalid Sheets API base {}: {}", api_base, e))?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("rostersync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      spreadsheet,
      auth: Arc::new(auth),
    })
  }

  fn values_url(&self, range: &str) -> StoreResult<Url> {
    values_url(&self.spreadsheet, range)
  }

  async fn send_once(&self, request: reqwest::RequestBuilder) -> StoreResult<reqwest::Response> {
    let token = self.auth.token(&self.http).await?;
    request
      .bearer_auth(token)
      .send()
      .await
      .map_err(|e| StoreError::Transport(format!("Sheets request failed: {}", e)))
  }

  /// Send with a cached access token. A rejected token is dropped and the
  /// request is sent once more with a freshly minted one.
  async fn send(&self, table: &str, request: reqwest::RequestBuilder) -> StoreResult<reqwest::Response> {
    let retry = request.try_clone();
    let mut response = self.send_once(request).await?;
    if response.status() == StatusCode::UNAUTHORIZED {
      if let Some(retry) = retry {
        warn!(table, "access token rejected, minting a new one");
        self.auth.invalidate().await;
        response = self.send_once(retry).await?;
      }
    }

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_failure(status, &body, table))
  }
}

impl RecordStore for SheetsStore {
  async fn read_all(&self, table: &str, fields: &[String]) -> StoreResult<Vec<Row>> {
    let grid = self.read_values(table).await?;
    rows_from_grid(table, &grid, fields)
  }

  async fn read_values(&self, table: &str) -> StoreResult<Vec<Vec<String>>> {
    let url = self.values_url(&sheet_range(table, None))?;
    let request = self.http.get(url).query(&[
      ("majorDimension", "ROWS"),
      ("valueRenderOption", "FORMATTED_VALUE"),
    ]);

    let range: ValueRange = self
      .send(table, request)
      .await?
      .json()
      .await
      .map_err(|e| StoreError::Transport(format!("Failed to parse values of {}: {}", table, e)))?;

    debug!(table, rows = range.values.len(), "read sheet values");

    Ok(
      range
        .values
        .into_iter()
        .map(|row| row.iter().map(cell_text).collect())
        .collect(),
    )
  }

  async fn find_row(&self, table: &str, column: &str, value: &str) -> StoreResult<RowLocator> {
    let grid = self.read_values(table).await?;
    locate_in_grid(table, &grid, column, value)
  }

  async fn write_row(&self, table: &str, locator: RowLocator, values: &[String]) -> StoreResult<()> {
    // Sheet rows are 1-based and row 1 is the header.
    let range = sheet_range(table, Some(&format!("A{}", locator.position + 2)));
    let url = self.values_url(&range)?;
    let body = row_body(Some(&range), values);

    let request = self.http.put(url).query(&[VALUE_INPUT]).json(&body);
    self.send(table, request).await?;

    debug!(table, position = locator.position, "wrote sheet row");
    Ok(())
  }

  async fn append_row(&self, table: &str, values: &[String]) -> StoreResult<()> {
    let url = self.values_url(&format!("{}:append", sheet_range(table, Some("A1"))))?;
    let body = row_body(None, values);

    let request = self
      .http
      .post(url)
      .query(&[VALUE_INPUT, ("insertDataOption", "INSERT_ROWS")])
      .json(&body);
    self.send(table, request).await?;

    Ok(())
  }
}

fn spreadsheet_url(api_base: &str, spreadsheet_id: &str) -> Result<Url, String> {
  let mut url = Url::parse(api_base).map_err(|e| e.to_string())?;
  url
    .path_segments_mut()
    .map_err(|_| "not a hierarchical URL".to_string())?
    .pop_if_empty()
    .push(spreadsheet_id);
  Ok(url)
}

fn values_url(spreadsheet: &Url, range: &str) -> StoreResult<Url> {
  let mut url = spreadsheet.clone();
  url
    .path_segments_mut()
    .map_err(|_| StoreError::Transport(format!("Cannot address ranges under {}", spreadsheet)))?
    .push("values")
    .push(range);
  Ok(url)
}

/// A1 range for a worksheet, optionally narrowed to a cell.
fn sheet_range(table: &str, cell: Option<&str>) -> String {
  let quoted = format!("'{}'", table.replace('\'', "''"));
  match cell {
    Some(cell) => format!("{}!{}", quoted, cell),
    None => quoted,
  }
}

/// Request body holding one row, values passed through untouched.
fn row_body(range: Option<&str>, values: &[String]) -> Value {
  let mut body = json!({
    "majorDimension": "ROWS",
    "values": [values],
  });
  if let Some(range) = range {
    body["range"] = json!(range);
  }
  body
}

fn cell_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

/// Translate a non-success response into the store taxonomy.
fn classify_failure(status: StatusCode, body: &str, table: &str) -> StoreError {
  let rate_limited = body.contains("RATE_LIMIT_EXCEEDED") || body.contains("Quota exceeded");

  match status {
    StatusCode::UNAUTHORIZED => {
      StoreError::Unauthorized(format!("Sheets API rejected the access token for {}", table))
    }
    StatusCode::TOO_MANY_REQUESTS => StoreError::Quota {
      message: format!("{} on {}", status, table),
    },
    StatusCode::FORBIDDEN if rate_limited => StoreError::Quota {
      message: format!("{} on {}", status, table),
    },
    StatusCode::NOT_FOUND => StoreError::TableNotFound {
      table: table.to_string(),
    },
    StatusCode::BAD_REQUEST if body.contains("Unable to parse range") => StoreError::TableNotFound {
      table: table.to_string(),
    },
    _ => StoreError::Transport(format!("Sheets API returned {} for {}: {}", status, table, body.trim())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_quota_statuses() {
    assert!(classify_failure(StatusCode::TOO_MANY_REQUESTS, "", "Sheet1").is_quota());
    assert!(classify_failure(
      StatusCode::FORBIDDEN,
      r#"{"error":{"status":"RESOURCE_EXHAUSTED","message":"Quota exceeded for quota metric"}}"#,
      "Sheet1"
    )
    .is_quota());
    assert!(!classify_failure(StatusCode::FORBIDDEN, "caller does not have permission", "Sheet1").is_quota());
  }

  #[test]
  fn test_missing_sheet_is_not_found() {
    let err = classify_failure(
      StatusCode::BAD_REQUEST,
      "Unable to parse range: 'Backup'",
      "Backup",
    );
    assert_eq!(
      err,
      StoreError::TableNotFound {
        table: "Backup".to_string()
      }
    );
  }

  #[test]
  fn test_other_failures_keep_the_body() {
    let err = classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom\n", "Sheet1");
    assert!(matches!(err, StoreError::Transport(msg) if msg.ends_with(": boom")));
  }

  #[test]
  fn test_sheet_range_quotes_names() {
    assert_eq!(sheet_range("Sheet1", None), "'Sheet1'");
    assert_eq!(sheet_range("Tom's list", Some("A7")), "'Tom''s list'!A7");
  }

  #[test]
  fn test_rejected_token_is_unauthorized() {
    let err = classify_failure(StatusCode::UNAUTHORIZED, "", "Sheet1");
    assert!(matches!(err, StoreError::Unauthorized(_)));
    assert!(!err.is_quota());
  }

  #[test]
  fn test_row_body_sends_values_verbatim() {
    let values: Vec<String> = ["(123)", "Jan 5, 2024", "5 March 2024", "TRUE", "€5", "007", "=1+1", ""]
      .iter()
      .map(|s| s.to_string())
      .collect();

    let body = row_body(Some("'Sheet1'!A3"), &values);
    assert_eq!(body["range"], "'Sheet1'!A3");
    assert_eq!(body["values"][0], json!(values));

    let body = row_body(None, &values);
    assert!(body.get("range").is_none());
    assert_eq!(body["values"][0][3], "TRUE");
    assert_eq!(VALUE_INPUT, ("valueInputOption", "RAW"));
  }

  #[test]
  fn test_values_url_escapes_range() {
    let spreadsheet = spreadsheet_url(SheetsStore::DEFAULT_API_BASE, "abc123").unwrap();
    let url = values_url(&spreadsheet, &sheet_range("Data Sheet", Some("A2"))).unwrap();
    assert_eq!(
      url.as_str(),
      "https://sheets.googleapis.com/v4/spreadsheets/abc123/values/'Data%20Sheet'!A2"
    );
  }

  #[test]
  fn test_cell_text() {
    assert_eq!(cell_text(&json!("007")), "007");
    assert_eq!(cell_text(&json!(12)), "12");
    assert_eq!(cell_text(&Value::Null), "");
  }
}
