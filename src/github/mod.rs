//! GitHub issue fetching: wire types, typed errors, the paginated client,
//! and the cache-aware loader.

pub mod api_types;
pub mod client;
pub mod error;
pub mod loader;
pub mod types;

pub use client::GitHubClient;
pub use error::FetchError;
pub use loader::{IssueLoader, LoadOptions, LoadPriority};
pub use types::{FetchOptions, Issue, IssueState, RepoId};
