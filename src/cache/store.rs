//! TTL cache storage.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// A stored value together with its write time and hard expiry.
#[derive(Debug, Clone)]
struct CacheEntry<T> {
  value: T,
  stored_at: Instant,
  expires_at: Instant,
}

/// In-memory key/value cache with per-entry TTL.
///
/// Expired entries are evicted lazily when read; there is no background
/// sweeper. Key cardinality is small and fixed (one entry per repository
/// plus a few aggregate keys), so there is no size bound either.
///
/// All methods take `&self`; the map lives behind a mutex so the cache can
/// be shared across concurrently running load tasks. Critical sections
/// never hold the lock across an await point.
#[derive(Debug, Default)]
pub struct TtlCache<T> {
  entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> TtlCache<T> {
  pub fn new() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
    }
  }

  /// Store a value under `key`, overwriting any existing entry.
  pub fn set(&self, key: &str, value: T, ttl: Duration) -> Result<()> {
    let now = Instant::now();
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Cache lock poisoned: {}", e))?;

    entries.insert(
      key.to_string(),
      CacheEntry {
        value,
        stored_at: now,
        expires_at: now + ttl,
      },
    );

    Ok(())
  }

  /// Get the value for `key` if present and not past its hard expiry.
  ///
  /// Expired entries are removed on the spot. A missing key is a normal,
  /// expected outcome, not an error.
  pub fn get(&self, key: &str) -> Result<Option<T>> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Cache lock poisoned: {}", e))?;

    match entries.get(key) {
      Some(entry) if Instant::now() <= entry.expires_at => Ok(Some(entry.value.clone())),
      Some(_) => {
        entries.remove(key);
        Ok(None)
      }
      None => Ok(None),
    }
  }

  /// Get the value for `key` even if it has hard-expired.
  ///
  /// This is the serve-stale-on-error path: when a refresh fails, whatever
  /// is still in the map beats returning nothing. Does not evict.
  pub fn get_ignoring_expiry(&self, key: &str) -> Result<Option<T>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Cache lock poisoned: {}", e))?;

    Ok(entries.get(key).map(|entry| entry.value.clone()))
  }

  /// Whether the entry for `key` is absent or older than `stale_after`.
  ///
  /// Staleness is independent of hard expiry: an entry can still be served
  /// by [`get`](Self::get) while this reports true, signalling "prefer a
  /// refresh, but this is usable as fallback".
  pub fn is_stale(&self, key: &str, stale_after: Duration) -> Result<bool> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Cache lock poisoned: {}", e))?;

    Ok(match entries.get(key) {
      Some(entry) => Instant::now() - entry.stored_at > stale_after,
      None => true,
    })
  }

  /// Drop all entries.
  pub fn clear(&self) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Cache lock poisoned: {}", e))?;

    entries.clear();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn set_then_get_round_trips() {
    let cache: TtlCache<Vec<u32>> = TtlCache::new();

    cache
      .set("issues:Fuser", vec![1, 2, 3], Duration::from_secs(60))
      .unwrap();

    assert_eq!(cache.get("issues:Fuser").unwrap(), Some(vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn missing_key_is_absent_not_error() {
    let cache: TtlCache<String> = TtlCache::new();
    assert_eq!(cache.get("nope").unwrap(), None);
  }

  #[tokio::test(start_paused = true)]
  async fn expired_entry_is_evicted_and_stays_gone() {
    let cache: TtlCache<u32> = TtlCache::new();
    cache.set("k", 7, Duration::from_secs(10)).unwrap();

    tokio::time::advance(Duration::from_secs(11)).await;

    assert_eq!(cache.get("k").unwrap(), None);
    // Second read must not resurrect the entry
    assert_eq!(cache.get("k").unwrap(), None);
  }

  #[tokio::test(start_paused = true)]
  async fn entry_can_be_stale_but_not_expired() {
    let cache: TtlCache<u32> = TtlCache::new();
    cache.set("k", 7, Duration::from_secs(600)).unwrap();

    tokio::time::advance(Duration::from_secs(130)).await;

    // Still within TTL
    assert_eq!(cache.get("k").unwrap(), Some(7));
    // But past the 2-minute soft freshness threshold
    assert!(cache.is_stale("k", Duration::from_secs(120)).unwrap());
    assert!(!cache.is_stale("k", Duration::from_secs(300)).unwrap());
  }

  #[tokio::test]
  async fn absent_key_is_stale() {
    let cache: TtlCache<u32> = TtlCache::new();
    assert!(cache.is_stale("k", Duration::from_secs(60)).unwrap());
  }

  #[tokio::test(start_paused = true)]
  async fn expired_entry_still_readable_ignoring_expiry() {
    let cache: TtlCache<u32> = TtlCache::new();
    cache.set("k", 7, Duration::from_secs(10)).unwrap();

    tokio::time::advance(Duration::from_secs(60)).await;

    assert_eq!(cache.get_ignoring_expiry("k").unwrap(), Some(7));
  }

  #[tokio::test]
  async fn clear_drops_everything() {
    let cache: TtlCache<u32> = TtlCache::new();
    cache.set("a", 1, Duration::from_secs(60)).unwrap();
    cache.set("b", 2, Duration::from_secs(60)).unwrap();

    cache.clear().unwrap();

    assert_eq!(cache.get("a").unwrap(), None);
    assert_eq!(cache.get("b").unwrap(), None);
  }

  #[tokio::test]
  async fn set_overwrites_unconditionally() {
    let cache: TtlCache<u32> = TtlCache::new();
    cache.set("k", 1, Duration::from_secs(60)).unwrap();
    cache.set("k", 2, Duration::from_secs(60)).unwrap();

    assert_eq!(cache.get("k").unwrap(), Some(2));
  }
}
