//! Typed errors for the fetch boundary.

use super::types::RepoId;

/// Why a repository fetch failed.
///
/// `AuthDenied` is deliberately distinct from `RateLimited`: a 403 here is
/// organization-level access enforcement, is not retryable with the same
/// credential, and must never be treated as a quota signal.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  #[error("access to {repo} denied (HTTP 403, likely org-level access policy)")]
  AuthDenied { repo: RepoId },

  #[error("GitHub rate limit exhausted{}", reset_epoch.map(|r| format!(", resets at epoch {r}")).unwrap_or_default())]
  RateLimited { reset_epoch: Option<u64> },

  #[error("GitHub API error for {repo}: HTTP {status}")]
  Status {
    status: reqwest::StatusCode,
    repo: RepoId,
  },

  #[error("request to GitHub failed: {0}")]
  Transport(#[from] reqwest::Error),
}

impl FetchError {
  /// Errors that should not be retried at all.
  pub fn is_permanent(&self) -> bool {
    matches!(self, FetchError::AuthDenied { .. })
  }

  pub fn is_rate_limited(&self) -> bool {
    matches!(self, FetchError::RateLimited { .. })
  }
}
