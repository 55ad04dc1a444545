//! Cache-aware issue loading.
//!
//! Sits between the HTTP handlers and the [`GitHubClient`], providing
//! cache-first reads, priority-tiered fetching, and serve-stale-on-error
//! fallback. The two-tier dashboard load exists purely to bound perceived
//! latency: callers get a small critical set immediately and swap in the
//! full set when the background tier resolves.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{LoadSource, TtlCache};
use crate::resilience::Resilience;

use super::client::GitHubClient;
use super::error::FetchError;
use super::types::{FetchOptions, Issue, RepoId};

/// Soft freshness window: a cached entry younger than this short-circuits
/// a cache-first load without any network call.
const STALE_AFTER: Duration = Duration::from_secs(2 * 60);

/// Cache TTL for critical-priority results.
const CRITICAL_TTL: Duration = Duration::from_secs(2 * 60);

/// Cache TTL for background-priority results.
const BACKGROUND_TTL: Duration = Duration::from_secs(10 * 60);

/// Page cap for critical loads, keeping first-paint latency bounded.
const CRITICAL_PAGE_CAP: usize = 3;

/// Page cap for the dashboard's critical tier (tighter still).
const DASHBOARD_CRITICAL_PAGES: usize = 2;

/// Retries per fetch before a failure is recorded against the circuit.
const MAX_RETRIES: u32 = 2;

fn cache_key(repo: &RepoId) -> String {
  format!("issues:{}", repo.name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPriority {
  /// Bounded, low-latency partial fetch for first paint.
  Critical,
  /// Unbounded full fetch.
  Background,
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
  pub priority: LoadPriority,
  /// Page cap override; `None` means the priority's default.
  pub max_pages: Option<usize>,
  /// Serve a fresh cached entry without touching the network.
  pub cache_first: bool,
}

impl LoadOptions {
  pub fn critical() -> Self {
    Self {
      priority: LoadPriority::Critical,
      max_pages: None,
      cache_first: true,
    }
  }

  pub fn background() -> Self {
    Self {
      priority: LoadPriority::Background,
      max_pages: None,
      cache_first: true,
    }
  }
}

/// A repository load result, annotated with where the data came from so
/// callers can tell "zero issues" apart from "fetch failed".
#[derive(Debug, Clone)]
pub struct LoadedIssues {
  pub issues: Vec<Issue>,
  pub source: LoadSource,
}

/// Result of a two-tier dashboard load.
pub struct DashboardLoad {
  /// The bounded critical set, ready immediately.
  pub critical: Vec<Issue>,
  /// Handle resolving to the full background set.
  pub background: JoinHandle<Vec<Issue>>,
}

/// Orchestrates fetching and caching for the tracked repositories.
///
/// All shared state (cache, breaker map, rate window) is injected; the
/// loader itself is cheap to clone and safe to share across tasks.
#[derive(Clone)]
pub struct IssueLoader {
  client: GitHubClient,
  cache: Arc<TtlCache<Vec<Issue>>>,
  resilience: Arc<Resilience>,
  /// Page cap for background loads; effectively unbounded by default.
  background_max_pages: usize,
}

impl IssueLoader {
  pub fn new(client: GitHubClient, resilience: Arc<Resilience>) -> Self {
    Self {
      client,
      cache: Arc::new(TtlCache::new()),
      resilience,
      background_max_pages: usize::MAX,
    }
  }

  pub fn with_background_max_pages(mut self, max_pages: usize) -> Self {
    self.background_max_pages = max_pages;
    self
  }

  /// Load one repository's issues, preferring cache when allowed.
  ///
  /// On fetch failure this falls back to whatever is cached regardless of
  /// expiry, and only reports an empty result when the cache is empty too.
  /// It never returns the fetch error itself; the annotation on the result
  /// carries the failure.
  pub async fn load_repo(&self, repo: &RepoId, options: &LoadOptions) -> Result<LoadedIssues> {
    let key = cache_key(repo);

    if options.cache_first {
      if let Some(cached) = self.cache.get(&key)? {
        if !self.cache.is_stale(&key, STALE_AFTER)? {
          debug!(repo = %repo, issues = cached.len(), "Serving fresh cache");
          return Ok(LoadedIssues {
            issues: cached,
            source: LoadSource::CacheFresh,
          });
        }
      }
    }

    let max_pages = match options.priority {
      LoadPriority::Critical => options
        .max_pages
        .unwrap_or(CRITICAL_PAGE_CAP)
        .min(CRITICAL_PAGE_CAP),
      LoadPriority::Background => options.max_pages.unwrap_or(self.background_max_pages),
    };

    let operation_id = format!("fetch:{repo}");
    let fetch_options = FetchOptions::default();
    let fetch = self
      .resilience
      .retry_with_backoff_if(
        || {
          self
            .client
            .fetch_repository_issues(repo, &fetch_options, max_pages)
        },
        MAX_RETRIES,
        &operation_id,
        |error: &FetchError| !error.is_permanent(),
      )
      .await;

    match fetch {
      Ok(issues) => {
        let ttl = match options.priority {
          LoadPriority::Critical => CRITICAL_TTL,
          LoadPriority::Background => BACKGROUND_TTL,
        };
        self.cache.set(&key, issues.clone(), ttl)?;
        info!(repo = %repo, issues = issues.len(), priority = ?options.priority, "Loaded repository");
        Ok(LoadedIssues {
          issues,
          source: LoadSource::Network,
        })
      }
      Err(error) => {
        warn!(repo = %repo, %error, "Load failed, falling back to cache");

        if let Some(stale) = self.cache.get_ignoring_expiry(&key)? {
          info!(repo = %repo, issues = stale.len(), "Serving stale cache after failure");
          Ok(LoadedIssues {
            issues: stale,
            source: LoadSource::Stale,
          })
        } else {
          Ok(LoadedIssues {
            issues: Vec::new(),
            source: LoadSource::FailedEmpty {
              error: error.to_string(),
            },
          })
        }
      }
    }
  }

  /// Two-tier dashboard load: await a bounded critical pass over every
  /// repository, and return a handle to the unbounded background pass.
  ///
  /// The background tier is a real task handle, not a dropped future, so
  /// its completion and failures stay observable.
  pub async fn load_dashboard(&self, repos: &[RepoId]) -> Result<DashboardLoad> {
    let critical_options = LoadOptions {
      priority: LoadPriority::Critical,
      max_pages: Some(DASHBOARD_CRITICAL_PAGES),
      cache_first: true,
    };

    let critical_loads = repos
      .iter()
      .map(|repo| self.load_repo(repo, &critical_options));
    let mut critical = Vec::new();
    for loaded in futures::future::join_all(critical_loads).await {
      critical.extend(loaded?.issues);
    }

    let loader = self.clone();
    let repos = repos.to_vec();
    let background = tokio::spawn(async move {
      let options = LoadOptions::background();
      let mut all = Vec::new();
      for repo in &repos {
        match loader.load_repo(repo, &options).await {
          Ok(loaded) => all.extend(loaded.issues),
          Err(error) => warn!(repo = %repo, %error, "Background load failed"),
        }
      }
      info!(issues = all.len(), "Background tier complete");
      all
    });

    Ok(DashboardLoad {
      critical,
      background,
    })
  }

  /// Re-fetch every repository in the background, bypassing cache-first.
  ///
  /// Returns the task handle so callers can observe completion; failures
  /// are logged centrally inside the task either way.
  pub fn preload_in_background(&self, repos: &[RepoId]) -> JoinHandle<()> {
    let loader = self.clone();
    let repos = repos.to_vec();
    tokio::spawn(async move {
      let options = LoadOptions {
        priority: LoadPriority::Background,
        max_pages: None,
        cache_first: false,
      };
      for repo in &repos {
        match loader.load_repo(repo, &options).await {
          Ok(loaded) => {
            debug!(repo = %repo, issues = loaded.issues.len(), source = ?loaded.source, "Preloaded")
          }
          Err(error) => warn!(repo = %repo, %error, "Preload failed"),
        }
      }
    })
  }

  /// Fetch every repository directly, bypassing cache and retry.
  ///
  /// Used by callers that want the latest data and per-repository error
  /// detail instead of the loader's fallback behavior.
  pub async fn fetch_fresh(
    &self,
    repos: &[RepoId],
    options: &FetchOptions,
    max_pages: usize,
  ) -> Vec<(RepoId, Result<Vec<Issue>, FetchError>)> {
    self
      .client
      .fetch_all_repository_issues(repos, options, max_pages)
      .await
  }

  /// Whatever the cache holds for one repository, regardless of expiry.
  pub fn cached_issues(&self, repo: &RepoId) -> Result<Option<Vec<Issue>>> {
    self.cache.get_ignoring_expiry(&cache_key(repo))
  }

  pub fn clear_cache(&self) -> Result<()> {
    info!("Clearing issue cache");
    self.cache.clear()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::resilience::RateLimitGuard;
  use axum::extract::State;
  use axum::http::StatusCode;
  use axum::response::IntoResponse;
  use axum::routing::get;
  use axum::{Json, Router};
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  struct MockState {
    hits: AtomicUsize,
    failing: AtomicBool,
  }

  async fn issues_handler(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if state.failing.load(Ordering::SeqCst) {
      return (StatusCode::FORBIDDEN, Json(serde_json::json!([]))).into_response();
    }
    Json(serde_json::json!([{
      "id": 1,
      "number": 845,
      "title": "Segfault in fusion kernel",
      "state": "open",
      "labels": [],
      "created_at": "2025-06-01T00:00:00Z",
      "updated_at": "2025-06-02T00:00:00Z",
      "closed_at": null,
      "html_url": "https://github.com/NVIDIA/Fuser/issues/845",
      "user": { "login": "someone", "avatar_url": "" },
      "assignees": []
    }]))
    .into_response()
  }

  async fn spawn_loader() -> (IssueLoader, Arc<MockState>) {
    let state = Arc::new(MockState {
      hits: AtomicUsize::new(0),
      failing: AtomicBool::new(false),
    });
    let app = Router::new()
      .route("/repos/NVIDIA/Fuser/issues", get(issues_handler))
      .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });

    let guard = Arc::new(RateLimitGuard::with_limits(
      1000,
      Duration::from_secs(3600),
      Duration::ZERO,
    ));
    let client = GitHubClient::new(None, guard)
      .unwrap()
      .with_base_url(format!("http://{addr}"))
      .with_page_delay(Duration::ZERO);
    let loader = IssueLoader::new(client, Arc::new(Resilience::new()));

    (loader, state)
  }

  fn repo() -> RepoId {
    RepoId::new("NVIDIA", "Fuser")
  }

  #[tokio::test]
  async fn cache_first_skips_network_when_fresh() {
    let (loader, state) = spawn_loader().await;

    let first = loader.load_repo(&repo(), &LoadOptions::critical()).await.unwrap();
    assert_eq!(first.source, LoadSource::Network);
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);

    let second = loader.load_repo(&repo(), &LoadOptions::critical()).await.unwrap();
    assert_eq!(second.source, LoadSource::CacheFresh);
    assert_eq!(second.issues.len(), 1);
    // No additional network call
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn serves_stale_cache_when_fetch_fails() {
    let (loader, state) = spawn_loader().await;

    loader.load_repo(&repo(), &LoadOptions::critical()).await.unwrap();

    state.failing.store(true, Ordering::SeqCst);
    let options = LoadOptions {
      cache_first: false,
      ..LoadOptions::critical()
    };
    let loaded = loader.load_repo(&repo(), &options).await.unwrap();

    assert_eq!(loaded.source, LoadSource::Stale);
    assert_eq!(loaded.issues.len(), 1);
  }

  #[tokio::test]
  async fn empty_cache_plus_failure_reports_failed_empty() {
    let (loader, state) = spawn_loader().await;
    state.failing.store(true, Ordering::SeqCst);

    let loaded = loader.load_repo(&repo(), &LoadOptions::critical()).await.unwrap();

    assert!(loaded.issues.is_empty());
    assert!(matches!(loaded.source, LoadSource::FailedEmpty { .. }));
    assert!(loaded.source.is_fallback());
    assert!(!loaded.source.has_data());
    // A 403 is permanent: exactly one attempt, no retries
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn dashboard_load_returns_critical_and_background_tiers() {
    let (loader, _state) = spawn_loader().await;

    let load = loader.load_dashboard(&[repo()]).await.unwrap();
    assert_eq!(load.critical.len(), 1);

    let full = load.background.await.unwrap();
    assert_eq!(full.len(), 1);
  }

  #[tokio::test]
  async fn preload_bypasses_cache_first() {
    let (loader, state) = spawn_loader().await;

    loader.load_repo(&repo(), &LoadOptions::critical()).await.unwrap();
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);

    // Fresh cache exists, but preload must re-fetch anyway
    loader.preload_in_background(&[repo()]).await.unwrap();
    assert_eq!(state.hits.load(Ordering::SeqCst), 2);
  }
}
