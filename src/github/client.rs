//! GitHub REST client with rate-limited, paginated issue fetching.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::resilience::RateLimitGuard;

use super::api_types::RawIssue;
use super::error::FetchError;
use super::types::{FetchOptions, Issue, RepoId};

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("bugwatch/", env!("CARGO_PKG_VERSION"));

/// Wall-clock budget for a single page request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between successive page requests, independent of the rate guard.
const PAGE_DELAY: Duration = Duration::from_millis(100);

const DEFAULT_PER_PAGE: usize = 100;

/// GitHub API client.
///
/// Every page request passes through the shared [`RateLimitGuard`] before
/// it goes out. Requests carry a bearer token when one is configured;
/// without one the client still works, at GitHub's much lower
/// unauthenticated quota.
#[derive(Clone)]
pub struct GitHubClient {
  http: reqwest::Client,
  base_url: String,
  token: Option<String>,
  guard: Arc<RateLimitGuard>,
  per_page: usize,
  page_delay: Duration,
}

impl GitHubClient {
  pub fn new(token: Option<String>, guard: Arc<RateLimitGuard>) -> Result<Self, FetchError> {
    if token.is_none() {
      warn!("No GitHub token configured; requests will run at the unauthenticated quota");
    }

    let http = reqwest::Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .user_agent(USER_AGENT)
      .build()?;

    Ok(Self {
      http,
      base_url: DEFAULT_BASE_URL.to_string(),
      token,
      guard,
      per_page: DEFAULT_PER_PAGE,
      page_delay: PAGE_DELAY,
    })
  }

  /// Point the client at a different API root. Used by tests.
  pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
    self.base_url = base_url.into();
    self
  }

  pub fn with_per_page(mut self, per_page: usize) -> Self {
    self.per_page = per_page;
    self
  }

  pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
    self.page_delay = page_delay;
    self
  }

  /// Fetch issues for one repository, walking pages sequentially from 1.
  ///
  /// Pull-request records are filtered out before normalization. The walk
  /// stops when a raw page comes back shorter than the requested page size
  /// or when `max_pages` is reached, whichever comes first. Any non-2xx
  /// response aborts the whole fetch for this repository.
  pub async fn fetch_repository_issues(
    &self,
    repo: &RepoId,
    options: &FetchOptions,
    max_pages: usize,
  ) -> Result<Vec<Issue>, FetchError> {
    let mut all_issues = Vec::new();
    let mut page = 1usize;

    loop {
      self.guard.acquire().await;

      let raw = self.fetch_page(repo, options, page).await?;
      let raw_count = raw.len();

      let issues: Vec<Issue> = raw
        .into_iter()
        .filter(|r| !r.is_pull_request())
        .map(|r| r.into_issue(&repo.name))
        .collect();

      let filtered_prs = raw_count - issues.len();
      all_issues.extend(issues);

      debug!(
        repo = %repo,
        page,
        kept = raw_count - filtered_prs,
        filtered_prs,
        total = all_issues.len(),
        "Fetched issue page"
      );

      // A short raw page signals the last page
      if raw_count < self.per_page || page >= max_pages {
        break;
      }
      page += 1;

      sleep(self.page_delay).await;
    }

    info!(repo = %repo, issues = all_issues.len(), pages = page, "Repository fetch complete");
    Ok(all_issues)
  }

  /// Fetch issues across several repositories concurrently.
  ///
  /// Each repository's page walk stays internally sequential; the starts
  /// are staggered to avoid a thundering herd against the quota. Failures
  /// are isolated per repository.
  pub async fn fetch_all_repository_issues(
    &self,
    repos: &[RepoId],
    options: &FetchOptions,
    max_pages: usize,
  ) -> Vec<(RepoId, Result<Vec<Issue>, FetchError>)> {
    let fetches = repos.iter().enumerate().map(|(index, repo)| {
      let client = self.clone();
      let repo = repo.clone();
      let options = options.clone();
      async move {
        sleep(Duration::from_millis(100) * index as u32).await;
        let result = client.fetch_repository_issues(&repo, &options, max_pages).await;
        if let Err(error) = &result {
          warn!(repo = %repo, %error, "Repository fetch failed");
        }
        (repo, result)
      }
    });

    futures::future::join_all(fetches).await
  }

  async fn fetch_page(
    &self,
    repo: &RepoId,
    options: &FetchOptions,
    page: usize,
  ) -> Result<Vec<RawIssue>, FetchError> {
    let url = format!(
      "{}/repos/{}/{}/issues",
      self.base_url, repo.owner, repo.name
    );

    let mut request = self
      .http
      .get(&url)
      .header("Accept", "application/vnd.github.v3+json")
      .query(&[
        ("state", options.state.as_str()),
        ("per_page", &self.per_page.to_string()),
        ("page", &page.to_string()),
        ("sort", "updated"),
        ("direction", "desc"),
      ]);

    if !options.labels.is_empty() {
      request = request.query(&[("labels", options.labels.join(","))]);
    }
    if let Some(since) = options.since {
      request = request.query(&[("since", since.to_rfc3339())]);
    }
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await?;

    let remaining = header_u64(&response, "x-ratelimit-remaining");
    let reset_epoch = header_u64(&response, "x-ratelimit-reset");
    self.guard.observe_headers(remaining, reset_epoch);

    let status = response.status();
    if !status.is_success() {
      return Err(match status {
        reqwest::StatusCode::FORBIDDEN => FetchError::AuthDenied { repo: repo.clone() },
        reqwest::StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { reset_epoch },
        _ => FetchError::Status {
          status,
          repo: repo.clone(),
        },
      });
    }

    Ok(response.json().await?)
  }
}

fn header_u64(response: &reqwest::Response, name: &str) -> Option<u64> {
  response
    .headers()
    .get(name)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::extract::{Query, State};
  use axum::http::StatusCode;
  use axum::response::IntoResponse;
  use axum::routing::get;
  use axum::{Json, Router};
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn issue_json(id: u64, pull_request: bool) -> serde_json::Value {
    let mut v = serde_json::json!({
      "id": id,
      "number": id,
      "title": format!("Issue {id}"),
      "state": "open",
      "labels": [],
      "created_at": "2025-06-01T00:00:00Z",
      "updated_at": "2025-06-02T00:00:00Z",
      "closed_at": null,
      "html_url": format!("https://github.com/NVIDIA/Fuser/issues/{id}"),
      "user": { "login": "someone", "avatar_url": "" },
      "assignees": []
    });
    if pull_request {
      v["pull_request"] = serde_json::json!({ "url": "https://example.invalid/pr" });
    }
    v
  }

  struct MockPages {
    pages: Vec<Vec<serde_json::Value>>,
    hits: AtomicUsize,
  }

  async fn issues_handler(
    State(state): State<Arc<MockPages>>,
    Query(params): Query<HashMap<String, String>>,
  ) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let page: usize = params
      .get("page")
      .and_then(|p| p.parse().ok())
      .unwrap_or(1);
    let body = state.pages.get(page - 1).cloned().unwrap_or_default();
    Json(body)
  }

  async fn spawn_mock(pages: Vec<Vec<serde_json::Value>>) -> (String, Arc<MockPages>) {
    let state = Arc::new(MockPages {
      pages,
      hits: AtomicUsize::new(0),
    });

    let app = Router::new()
      .route("/repos/NVIDIA/Fuser/issues", get(issues_handler))
      .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), state)
  }

  fn test_client(base_url: &str) -> GitHubClient {
    let guard = Arc::new(RateLimitGuard::with_limits(
      1000,
      Duration::from_secs(3600),
      Duration::ZERO,
    ));
    GitHubClient::new(None, guard)
      .unwrap()
      .with_base_url(base_url)
      .with_page_delay(Duration::ZERO)
  }

  fn repo() -> RepoId {
    RepoId::new("NVIDIA", "Fuser")
  }

  #[tokio::test]
  async fn stops_on_short_page_and_filters_pull_requests() {
    // Pages of 100, 100, 37 raw records; every 10th record is a PR
    let pages: Vec<Vec<serde_json::Value>> = [100usize, 100, 37]
      .iter()
      .enumerate()
      .map(|(p, &len)| {
        (0..len)
          .map(|i| {
            let id = (p * 100 + i) as u64 + 1;
            issue_json(id, id % 10 == 0)
          })
          .collect()
      })
      .collect();
    let expected_issues = 237 - 23; // ids 10, 20, ... 230 are PRs

    let (base, mock) = spawn_mock(pages).await;
    let client = test_client(&base);

    let issues = client
      .fetch_repository_issues(&repo(), &FetchOptions::default(), 100)
      .await
      .unwrap();

    assert_eq!(mock.hits.load(Ordering::SeqCst), 3);
    assert_eq!(issues.len(), expected_issues);
    assert!(issues.iter().all(|i| i.repository == "Fuser"));
  }

  #[tokio::test]
  async fn max_pages_caps_the_walk() {
    // Source always returns full pages, never signalling a last page
    let full_page: Vec<serde_json::Value> = (1..=100).map(|id| issue_json(id, false)).collect();
    let pages = vec![full_page.clone(); 10];

    let (base, mock) = spawn_mock(pages).await;
    let client = test_client(&base);

    let issues = client
      .fetch_repository_issues(&repo(), &FetchOptions::default(), 2)
      .await
      .unwrap();

    assert_eq!(mock.hits.load(Ordering::SeqCst), 2);
    assert_eq!(issues.len(), 200);
  }

  #[tokio::test]
  async fn forbidden_maps_to_auth_denied() {
    let app = Router::new().route(
      "/repos/NVIDIA/Fuser/issues",
      get(|| async { (StatusCode::FORBIDDEN, "SAML enforcement") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });

    let client = test_client(&format!("http://{addr}"));
    let err = client
      .fetch_repository_issues(&repo(), &FetchOptions::default(), 5)
      .await
      .unwrap_err();

    assert!(matches!(err, FetchError::AuthDenied { .. }));
    assert!(err.is_permanent());
    assert!(!err.is_rate_limited());
  }

  #[tokio::test]
  async fn too_many_requests_maps_to_rate_limited() {
    let app = Router::new().route(
      "/repos/NVIDIA/Fuser/issues",
      get(|| async {
        (
          StatusCode::TOO_MANY_REQUESTS,
          [("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", "1750000000")],
          "slow down",
        )
      }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });

    let client = test_client(&format!("http://{addr}"));
    let err = client
      .fetch_repository_issues(&repo(), &FetchOptions::default(), 5)
      .await
      .unwrap_err();

    assert!(matches!(
      err,
      FetchError::RateLimited {
        reset_epoch: Some(1750000000)
      }
    ));
  }

  #[tokio::test]
  async fn multi_repo_fetch_isolates_failures() {
    let full: Vec<serde_json::Value> = (1..=5).map(|id| issue_json(id, false)).collect();
    let (base, _mock) = spawn_mock(vec![full]).await;
    let client = test_client(&base);

    // Second repo has no route on the mock server -> 404 Status error
    let repos = vec![repo(), RepoId::new("NVIDIA", "TransformerEngine")];
    let results = client
      .fetch_all_repository_issues(&repos, &FetchOptions::default(), 5)
      .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].1.as_ref().unwrap().len(), 5);
    assert!(matches!(
      results[1].1.as_ref().unwrap_err(),
      FetchError::Status { .. }
    ));
  }
}
