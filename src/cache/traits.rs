//! Core types for the caching system.

use chrono::{DateTime, Utc};

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was fetched from the store (if served from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh store data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Loaded from the backing store by this call
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, older than the TTL
  CacheStale,
}

/// Lifecycle of one cached table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
  /// Never loaded, or invalidated
  Absent,
  Fresh,
  /// Older than the TTL. Advisory only: reads keep serving it.
  Stale,
}
