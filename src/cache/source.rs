//! Where loaded data came from.

/// Indicates how a repository load was satisfied.
///
/// Callers need to distinguish "the repository genuinely has zero issues"
/// from "the fetch failed and there was nothing to fall back on"; the
/// latter carries the error message that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
  /// Fresh data from the network
  Network,
  /// Data from cache, still within its freshness window
  CacheFresh,
  /// Expired or stale cache served because the network fetch failed
  Stale,
  /// Fetch failed and the cache was empty; the result is an empty set
  FailedEmpty { error: String },
}

impl LoadSource {
  /// True when the load produced real data (fresh or fallback).
  pub fn has_data(&self) -> bool {
    !matches!(self, LoadSource::FailedEmpty { .. })
  }

  pub fn is_fallback(&self) -> bool {
    matches!(self, LoadSource::Stale | LoadSource::FailedEmpty { .. })
  }
}
