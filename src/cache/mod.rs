//! In-memory TTL cache for fetched issue data.
//!
//! This module provides a small key/value cache that:
//! - Expires entries after a per-entry TTL, evicted lazily on read
//! - Tracks a separate soft "staleness" threshold, so an entry can be
//!   usable-but-refresh-worthy before it hard-expires
//! - Can serve expired entries explicitly as a fallback when the network
//!   is unavailable

mod source;
mod store;

pub use source::LoadSource;
pub use store::TtlCache;
