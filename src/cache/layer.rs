//! Read-through table cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use crate::store::Row;

use super::snapshot::Snapshot;
use super::traits::{CacheResult, CacheState};

/// Process-wide cache of whole-table snapshots, keyed by table name.
///
/// A table is loaded on first access and then served from memory until it
/// is invalidated. Staleness past the TTL is reported but never triggers a
/// reload on its own. After a confirmed write the caller patches the row in
/// place, so its own next read sees the write without another remote read.
///
/// The lock is never held across an await. Two concurrent first loads of
/// the same table both hit the store; the first to finish is kept, so a
/// snapshot patched in the meantime is never replaced by an older read.
pub struct TableCache {
  entries: Mutex<HashMap<String, Arc<Snapshot>>>,
  /// How long before a snapshot is considered stale
  ttl: Duration,
}

impl TableCache {
  pub fn new(ttl: Duration) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      ttl,
    }
  }

  // Entries only ever hold complete snapshots, so a poisoned map is still usable.
  fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<Snapshot>>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Stale once the TTL has fully elapsed, the boundary instant included.
  fn is_expired(&self, snapshot: &Snapshot) -> bool {
    snapshot.loaded_at().elapsed() >= self.ttl
  }

  /// The current snapshot of `table`, without loading.
  pub fn peek(&self, table: &str) -> Option<Arc<Snapshot>> {
    self.entries().get(table).cloned()
  }

  pub fn state(&self, table: &str) -> CacheState {
    match self.peek(table) {
      None => CacheState::Absent,
      Some(snapshot) if self.is_expired(&snapshot) => CacheState::Stale,
      Some(_) => CacheState::Fresh,
    }
  }

  pub fn is_stale(&self, table: &str) -> bool {
    self.state(table) == CacheState::Stale
  }

  /// Serve `table` from the cache, loading it with `fetcher` if absent.
  ///
  /// A failed load leaves the cache as it was and returns the error. If
  /// another load filled the entry while this one was in flight, that
  /// entry wins and is returned instead.
  pub async fn fetch_table<F, Fut, E>(
    &self,
    table: &str,
    fetcher: F,
  ) -> Result<CacheResult<Arc<Snapshot>>, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Row>, E>>,
  {
    if let Some(snapshot) = self.peek(table) {
      let stale = self.is_expired(&snapshot);
      debug!(table, stale, "serving table from cache");
      let cached_at = snapshot.fetched_at();
      return Ok(CacheResult::from_cache(snapshot, cached_at, stale));
    }

    let rows = fetcher().await?;
    let loaded = Arc::new(Snapshot::new(table, rows));

    let mut entries = self.entries();
    let kept = entries
      .entry(table.to_string())
      .or_insert_with(|| Arc::clone(&loaded));
    if !Arc::ptr_eq(kept, &loaded) {
      let snapshot = Arc::clone(kept);
      drop(entries);
      debug!(table, "discarded load: table was filled concurrently");
      let stale = self.is_expired(&snapshot);
      let cached_at = snapshot.fetched_at();
      return Ok(CacheResult::from_cache(snapshot, cached_at, stale));
    }
    drop(entries);

    info!(table, rows = loaded.len(), "loaded table into cache");
    Ok(CacheResult::from_network(loaded))
  }

  /// Drop the snapshot of `table`; the next read reloads it.
  pub fn invalidate(&self, table: &str) -> bool {
    let removed = self.entries().remove(table).is_some();
    if removed {
      info!(table, "invalidated cached table");
    }
    removed
  }

  pub fn invalidate_all(&self) {
    let mut entries = self.entries();
    info!(tables = entries.len(), "invalidated all cached tables");
    entries.clear();
  }

  /// Replace the cached row whose `id_field` is `id` and reset the load time.
  ///
  /// Call only after the backing store confirmed the write. Returns false,
  /// changing nothing, when the table is not cached or has no such row.
  pub fn patch_row(&self, table: &str, id_field: &str, id: &str, row: Row) -> bool {
    let mut entries = self.entries();
    let Some(current) = entries.get(table) else {
      debug!(table, id, "patch skipped: table not cached");
      return false;
    };

    match current.patched(id_field, id, row) {
      Some(patched) => {
        entries.insert(table.to_string(), Arc::new(patched));
        debug!(table, id, "patched cached row");
        true
      }
      None => {
        debug!(table, id, "patch skipped: row not cached");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::CacheSource;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn table_rows(b_name: &str) -> Vec<Row> {
    vec![
      Row::new().with("id", "1").with("name", "A"),
      Row::new().with("id", "2").with("name", b_name),
    ]
  }

  async fn load(cache: &TableCache, loads: &AtomicU32) -> CacheResult<Arc<Snapshot>> {
    cache
      .fetch_table("Sheet1", || async move {
        loads.fetch_add(1, Ordering::SeqCst);
        Ok::<_, String>(table_rows("B"))
      })
      .await
      .unwrap()
  }

  #[tokio::test(start_paused = true)]
  async fn test_loads_once_then_serves_from_memory() {
    let cache = TableCache::new(Duration::from_secs(30));
    let loads = AtomicU32::new(0);

    assert_eq!(cache.state("Sheet1"), CacheState::Absent);
    assert_eq!(load(&cache, &loads).await.source, CacheSource::Network);
    assert_eq!(load(&cache, &loads).await.source, CacheSource::CacheFresh);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_staleness_is_advisory() {
    let cache = TableCache::new(Duration::from_secs(30));
    let loads = AtomicU32::new(0);
    load(&cache, &loads).await;

    tokio::time::advance(Duration::from_millis(29_999)).await;
    assert!(!cache.is_stale("Sheet1"));

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(cache.is_stale("Sheet1"), "exactly TTL counts as stale");

    // A stale snapshot is still served, not reloaded.
    assert_eq!(load(&cache, &loads).await.source, CacheSource::CacheStale);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_forces_reload() {
    let cache = TableCache::new(Duration::from_secs(30));
    let loads = AtomicU32::new(0);
    load(&cache, &loads).await;

    assert!(cache.invalidate("Sheet1"));
    assert_eq!(cache.state("Sheet1"), CacheState::Absent);
    assert_eq!(load(&cache, &loads).await.source, CacheSource::Network);
    assert_eq!(loads.load(Ordering::SeqCst), 2);
    assert!(!cache.invalidate("Other"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_load_leaves_cache_absent() {
    let cache = TableCache::new(Duration::from_secs(30));
    let result = cache
      .fetch_table("Sheet1", || async { Err::<Vec<Row>, _>("quota") })
      .await;
    assert_eq!(result.unwrap_err(), "quota");
    assert_eq!(cache.state("Sheet1"), CacheState::Absent);
  }

  #[tokio::test(start_paused = true)]
  async fn test_patch_row_refreshes_load_time() {
    let cache = TableCache::new(Duration::from_secs(30));
    let loads = AtomicU32::new(0);
    load(&cache, &loads).await;

    tokio::time::advance(Duration::from_secs(40)).await;
    assert!(cache.is_stale("Sheet1"));

    let patched = cache.patch_row(
      "Sheet1",
      "id",
      "1",
      Row::new().with("id", "1").with("name", "A2"),
    );
    assert!(patched);
    assert_eq!(cache.state("Sheet1"), CacheState::Fresh);

    let snapshot = load(&cache, &loads).await.data;
    assert_eq!(snapshot.find("id", "1").unwrap().get("name"), "A2");
    assert_eq!(loads.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_slow_load_does_not_overwrite_patched_snapshot() {
    let cache = TableCache::new(Duration::from_secs(30));
    let loads = AtomicU32::new(0);

    // While this load is in flight, another caller loads the table and
    // patches a row after a confirmed write.
    let result = cache
      .fetch_table("Sheet1", || async {
        load(&cache, &loads).await;
        assert!(cache.patch_row(
          "Sheet1",
          "id",
          "2",
          Row::new().with("id", "2").with("name", "B2"),
        ));
        Ok::<_, String>(table_rows("B"))
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(result.data.find("id", "2").unwrap().get("name"), "B2");
    let kept = cache.peek("Sheet1").unwrap();
    assert_eq!(kept.find("id", "2").unwrap().get("name"), "B2");
  }

  #[tokio::test(start_paused = true)]
  async fn test_patch_of_unknown_row_is_noop() {
    let cache = TableCache::new(Duration::from_secs(30));
    assert!(!cache.patch_row("Sheet1", "id", "1", Row::new()));

    let loads = AtomicU32::new(0);
    let before = load(&cache, &loads).await.data;
    assert!(!cache.patch_row("Sheet1", "id", "99", Row::new().with("id", "99")));
    assert!(Arc::ptr_eq(&before, &cache.peek("Sheet1").unwrap()));
  }
}
