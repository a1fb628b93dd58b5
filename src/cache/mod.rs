//! In-memory read-through cache for backing store tables.
//!
//! This module keeps whole-table snapshots so that ordinary navigation does
//! not re-read the store on every step:
//! - Loads a table on first access and serves it from memory afterwards
//! - Reports staleness against a TTL without acting on it
//! - Drops snapshots on explicit invalidation
//! - Patches a row in place after a confirmed write (read-your-own-write)

mod layer;
mod snapshot;
mod traits;

pub use layer::TableCache;
pub use snapshot::Snapshot;
pub use traits::CacheState;
