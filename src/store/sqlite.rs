//! Local tabular store in SQLite.
//!
//! Each table keeps its header and its rows as JSON arrays of strings, so
//! the store has the same shape as a worksheet: positional rows under a
//! header, text cells only.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use super::{locate_in_grid, rows_from_grid, RecordStore, Row, RowLocator, StoreError, StoreResult};

pub struct SqliteStore {
  conn: Mutex<Connection>,
}

const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS record_tables (
    name TEXT PRIMARY KEY,
    header TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS record_rows (
    table_name TEXT NOT NULL,
    position INTEGER NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (table_name, position),
    FOREIGN KEY (table_name) REFERENCES record_tables(name) ON DELETE CASCADE
);
"#;

fn db_err(context: &str) -> impl FnOnce(rusqlite::Error) -> StoreError + '_ {
  move |e| StoreError::Transport(format!("{}: {}", context, e))
}

fn encode(values: &[String]) -> StoreResult<String> {
  serde_json::to_string(values).map_err(|e| StoreError::Transport(format!("Failed to encode row: {}", e)))
}

fn decode(data: &str) -> StoreResult<Vec<String>> {
  serde_json::from_str(data).map_err(|e| StoreError::Transport(format!("Failed to decode row: {}", e)))
}

impl SqliteStore {
  /// Open (or create) a store at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> color_eyre::Result<Self> {
    use color_eyre::eyre::eyre;

    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;
    Self::with_connection(conn).map_err(|e| eyre!("{}", e))
  }

  #[cfg(test)]
  pub fn open_in_memory() -> StoreResult<Self> {
    let conn = Connection::open_in_memory().map_err(db_err("Failed to open in-memory store"))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> StoreResult<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(db_err("Failed to run store migrations"))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn default_path() -> color_eyre::Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| color_eyre::eyre::eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("rostersync").join("store.db"))
  }

  fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| StoreError::Transport(format!("Lock poisoned: {}", e)))
  }

  /// Create `table` with `header`, replacing any existing table of that name.
  pub fn create_table(&self, table: &str, header: &[String]) -> StoreResult<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction().map_err(db_err("Failed to begin transaction"))?;

    tx.execute("DELETE FROM record_rows WHERE table_name = ?", params![table])
      .map_err(db_err("Failed to clear table rows"))?;
    tx.execute(
      "INSERT OR REPLACE INTO record_tables (name, header) VALUES (?, ?)",
      params![table, encode(header)?],
    )
    .map_err(db_err("Failed to create table"))?;

    tx.commit().map_err(db_err("Failed to commit transaction"))?;
    Ok(())
  }

  /// Replace the rows of an existing table.
  pub fn replace_rows(&self, table: &str, rows: &[Vec<String>]) -> StoreResult<()> {
    let mut conn = self.lock()?;
    Self::header(&conn, table)?;

    let tx = conn.transaction().map_err(db_err("Failed to begin transaction"))?;
    tx.execute("DELETE FROM record_rows WHERE table_name = ?", params![table])
      .map_err(db_err("Failed to clear table rows"))?;
    for (position, row) in rows.iter().enumerate() {
      tx.execute(
        "INSERT INTO record_rows (table_name, position, data) VALUES (?, ?, ?)",
        params![table, position as i64, encode(row)?],
      )
      .map_err(db_err("Failed to insert row"))?;
    }
    tx.commit().map_err(db_err("Failed to commit transaction"))?;

    debug!(table, rows = rows.len(), "replaced table rows");
    Ok(())
  }

  fn header(conn: &Connection, table: &str) -> StoreResult<Vec<String>> {
    let header: Option<String> = conn
      .query_row(
        "SELECT header FROM record_tables WHERE name = ?",
        params![table],
        |row| row.get(0),
      )
      .optional()
      .map_err(db_err("Failed to read table header"))?;

    match header {
      Some(data) => decode(&data),
      None => Err(StoreError::TableNotFound {
        table: table.to_string(),
      }),
    }
  }

  fn grid(&self, table: &str) -> StoreResult<Vec<Vec<String>>> {
    let conn = self.lock()?;
    let header = Self::header(&conn, table)?;

    let mut stmt = conn
      .prepare("SELECT data FROM record_rows WHERE table_name = ? ORDER BY position")
      .map_err(db_err("Failed to prepare row query"))?;
    let rows = stmt
      .query_map(params![table], |row| row.get::<_, String>(0))
      .map_err(db_err("Failed to query rows"))?
      .collect::<Result<Vec<String>, _>>()
      .map_err(db_err("Failed to read row"))?;

    let mut grid = Vec::with_capacity(rows.len() + 1);
    grid.push(header);
    for data in rows {
      grid.push(decode(&data)?);
    }
    Ok(grid)
  }
}

impl RecordStore for SqliteStore {
  async fn read_all(&self, table: &str, fields: &[String]) -> StoreResult<Vec<Row>> {
    let grid = self.grid(table)?;
    rows_from_grid(table, &grid, fields)
  }

  async fn read_values(&self, table: &str) -> StoreResult<Vec<Vec<String>>> {
    self.grid(table)
  }

  async fn find_row(&self, table: &str, column: &str, value: &str) -> StoreResult<RowLocator> {
    let grid = self.grid(table)?;
    locate_in_grid(table, &grid, column, value)
  }

  async fn write_row(&self, table: &str, locator: RowLocator, values: &[String]) -> StoreResult<()> {
    let conn = self.lock()?;
    Self::header(&conn, table)?;

    let changed = conn
      .execute(
        "UPDATE record_rows SET data = ? WHERE table_name = ? AND position = ?",
        params![encode(values)?, table, locator.position as i64],
      )
      .map_err(db_err("Failed to update row"))?;

    if changed == 0 {
      return Err(StoreError::RowNotFound {
        table: table.to_string(),
        key: format!("position {}", locator.position),
      });
    }
    Ok(())
  }

  async fn append_row(&self, table: &str, values: &[String]) -> StoreResult<()> {
    let conn = self.lock()?;
    Self::header(&conn, table)?;

    conn
      .execute(
        "INSERT INTO record_rows (table_name, position, data)
         SELECT ?1, COALESCE(MAX(position) + 1, 0), ?2 FROM record_rows WHERE table_name = ?1",
        params![table, encode(values)?],
      )
      .map_err(db_err("Failed to append row"))?;
    Ok(())
  }
}
