//! Request handlers for the JSON API.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::github::loader::LoadOptions;
use crate::github::types::{FetchOptions, StateFilter};
use crate::github::FetchError;
use crate::metrics::{bug_trends, combined_metrics, repository_stats};

use super::AppState;

/// Cache keys for the aggregate payloads.
const COMBINED_METRICS_KEY: &str = "combined:metrics";
const PROGRESSION_KEY: &str = "progression:data";

/// TTL for aggregates computed from the critical tier.
const CRITICAL_METRICS_TTL: Duration = Duration::from_secs(5 * 60);

/// TTL for aggregates computed from a full load.
const FULL_METRICS_TTL: Duration = Duration::from_secs(15 * 60);

/// Page cap for the bug-listing endpoint's sweep.
const BUGS_MAX_PAGES: usize = 15;

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
  #[serde(default)]
  priority: Option<String>,
  #[serde(default, rename = "clearCache")]
  clear_cache: Option<bool>,
}

/// `GET /api/dashboard?priority=critical|full&clearCache=bool`
///
/// Critical priority answers from the bounded tier and kicks off a
/// background refresh; full priority awaits a complete load. On total
/// failure, previously cached aggregates are served with an error note.
pub async fn dashboard(
  State(state): State<AppState>,
  Query(query): Query<DashboardQuery>,
) -> Response {
  let priority = query.priority.as_deref().unwrap_or("critical");
  let started = Instant::now();

  if query.clear_cache == Some(true) {
    if let Err(e) = clear_all_caches(&state) {
      error!(%e, "Cache clear failed");
    }
  }

  info!(priority, "Dashboard request");

  let result = match priority {
    "full" => full_dashboard(&state, started).await,
    _ => critical_dashboard(&state, started).await,
  };

  match result {
    Ok(response) => response,
    Err(error) => {
      error!(%error, "Dashboard load failed");
      fallback_response(&state, &error.to_string())
    }
  }
}

async fn critical_dashboard(
  state: &AppState,
  started: Instant,
) -> color_eyre::Result<Response> {
  let load = state.loader.load_dashboard(&state.repos).await?;

  let now = Utc::now();
  let metrics = combined_metrics(&load.critical, &state.repos, now);
  let trends = bug_trends(&load.critical, &state.repos, now);

  state
    .metrics_cache
    .set(COMBINED_METRICS_KEY, metrics.clone(), CRITICAL_METRICS_TTL)?;

  let load_time_ms = started.elapsed().as_millis() as u64;
  info!(
    load_time_ms,
    issues = load.critical.len(),
    "Critical tier served"
  );

  // Let the background tier refresh the cached aggregates when it lands
  let bg_state = state.clone();
  tokio::spawn(async move {
    match load.background.await {
      Ok(full_issues) => {
        let now = Utc::now();
        let full_metrics = combined_metrics(&full_issues, &bg_state.repos, now);
        let full_trends = bug_trends(&full_issues, &bg_state.repos, now);
        let cached = bg_state
          .metrics_cache
          .set(COMBINED_METRICS_KEY, full_metrics, FULL_METRICS_TTL)
          .and_then(|()| {
            bg_state
              .trends_cache
              .set(PROGRESSION_KEY, full_trends, FULL_METRICS_TTL)
          });
        if let Err(e) = cached {
          error!(%e, "Failed to cache background aggregates");
        }
        info!(issues = full_issues.len(), "Background aggregates updated");
      }
      Err(e) => warn!(%e, "Background tier task failed"),
    }
  });

  Ok(
    Json(json!({
      "issues": load.critical,
      "metrics": metrics,
      "trends": trends,
      "loadTime": load_time_ms,
      "totalIssues": load.critical.len(),
      "backgroundLoading": true,
      "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response(),
  )
}

async fn full_dashboard(state: &AppState, started: Instant) -> color_eyre::Result<Response> {
  let mut all_issues = Vec::new();
  for repo in &state.repos {
    let loaded = state
      .loader
      .load_repo(repo, &LoadOptions::background())
      .await?;
    if let crate::cache::LoadSource::FailedEmpty { error } = &loaded.source {
      warn!(repo = %repo, error, "Repository unavailable for full load");
    }
    all_issues.extend(loaded.issues);
  }

  let now = Utc::now();
  let metrics = combined_metrics(&all_issues, &state.repos, now);
  let trends = bug_trends(&all_issues, &state.repos, now);

  state
    .metrics_cache
    .set(COMBINED_METRICS_KEY, metrics.clone(), FULL_METRICS_TTL)?;
  state
    .trends_cache
    .set(PROGRESSION_KEY, trends.clone(), FULL_METRICS_TTL)?;

  let load_time_ms = started.elapsed().as_millis() as u64;
  info!(load_time_ms, issues = all_issues.len(), "Full load served");

  Ok(
    Json(json!({
      "issues": all_issues,
      "metrics": metrics,
      "trends": trends,
      "loadTime": load_time_ms,
      "totalIssues": all_issues.len(),
      "backgroundLoading": false,
      "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response(),
  )
}

fn fallback_response(state: &AppState, error: &str) -> Response {
  // Serve cached aggregates if any survive, even past expiry
  let cached_metrics = state
    .metrics_cache
    .get_ignoring_expiry(COMBINED_METRICS_KEY)
    .ok()
    .flatten();

  if let Some(metrics) = cached_metrics {
    let trends = state
      .trends_cache
      .get_ignoring_expiry(PROGRESSION_KEY)
      .ok()
      .flatten()
      .unwrap_or_default();

    info!("Serving cached fallback dashboard");
    return Json(json!({
      "issues": [],
      "metrics": metrics,
      "trends": trends,
      "error": "Live data unavailable, showing cached data",
      "loadTime": 0,
      "totalIssues": 0,
      "backgroundLoading": false,
      "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response();
  }

  (
    StatusCode::INTERNAL_SERVER_ERROR,
    Json(json!({
      "error": "Failed to load dashboard data",
      "message": error,
      "timestamp": Utc::now().to_rfc3339(),
    })),
  )
    .into_response()
}

/// `POST /api/dashboard/refresh`
///
/// Clears every cache and starts an unconditional background reload.
pub async fn refresh(State(state): State<AppState>) -> Response {
  info!("Background refresh requested");

  if let Err(error) = clear_all_caches(&state) {
    error!(%error, "Cache clear failed");
    return (
      StatusCode::INTERNAL_SERVER_ERROR,
      Json(json!({ "error": "Background refresh failed" })),
    )
      .into_response();
  }

  // Observable handle; completion is logged inside the task
  let _handle = state.loader.preload_in_background(&state.repos);

  Json(json!({
    "message": "Background refresh started",
    "timestamp": Utc::now().to_rfc3339(),
  }))
  .into_response()
}

#[derive(Debug, Deserialize)]
pub struct BugsQuery {
  since: Option<DateTime<Utc>>,
  state: Option<String>,
}

/// `GET /api/bugs?since=...&state=open|closed|all`
///
/// Direct bug-labelled sweep across all tracked repositories, bypassing
/// the cache. Partial failures are tolerated; when every repository
/// fails, the response is 429 for quota exhaustion and 500 otherwise.
pub async fn bugs(State(state): State<AppState>, Query(query): Query<BugsQuery>) -> Response {
  let state_filter = match query.state.as_deref() {
    None => StateFilter::All,
    Some(s) => match StateFilter::parse(s) {
      Some(f) => f,
      None => {
        return (
          StatusCode::BAD_REQUEST,
          Json(json!({
            "success": false,
            "error": format!("Invalid state filter: {s}"),
            "fetchedAt": Utc::now().to_rfc3339(),
          })),
        )
          .into_response()
      }
    },
  };

  let options = FetchOptions {
    state: state_filter,
    since: query.since,
    ..FetchOptions::bugs()
  };

  let results = state
    .loader
    .fetch_fresh(&state.repos, &options, BUGS_MAX_PAGES)
    .await;

  let mut issues = Vec::new();
  let mut errors: Vec<FetchError> = Vec::new();
  for (repo, result) in results {
    match result {
      Ok(mut repo_issues) => issues.append(&mut repo_issues),
      Err(error) => {
        warn!(repo = %repo, %error, "Bug sweep failed for repository");
        errors.push(error);
      }
    }
  }

  // All repositories failed: surface the failure instead of a hollow zero
  if issues.is_empty() && !errors.is_empty() {
    let quota = errors.iter().any(FetchError::is_rate_limited);
    let status = if quota {
      StatusCode::TOO_MANY_REQUESTS
    } else {
      StatusCode::INTERNAL_SERVER_ERROR
    };
    let message = errors
      .first()
      .map(ToString::to_string)
      .unwrap_or_else(|| "Failed to fetch bug data from GitHub".to_string());

    return (
      status,
      Json(json!({
        "success": false,
        "error": message,
        "fetchedAt": Utc::now().to_rfc3339(),
      })),
    )
      .into_response();
  }

  let now = Utc::now();
  let metrics = combined_metrics(&issues, &state.repos, now);
  let repositories: Vec<&str> = state.repos.iter().map(|r| r.name.as_str()).collect();

  Json(json!({
    "success": true,
    "issues": issues,
    "metrics": metrics,
    "fetchedAt": now.to_rfc3339(),
    "repositories": repositories,
  }))
  .into_response()
}

/// `GET /api/repos`
///
/// Summary of the tracked repositories, computed from whatever the cache
/// currently holds. Never touches the network.
pub async fn repos(State(state): State<AppState>) -> Response {
  let mut issues = Vec::new();
  for repo in &state.repos {
    match state.loader.cached_issues(repo) {
      Ok(Some(cached)) => issues.extend(cached),
      Ok(None) => {}
      Err(error) => {
        error!(%error, "Cache read failed");
        return (
          StatusCode::INTERNAL_SERVER_ERROR,
          Json(json!({ "error": "Failed to read cached data" })),
        )
          .into_response();
      }
    }
  }

  Json(json!({
    "repositories": repository_stats(&issues, &state.repos),
    "timestamp": Utc::now().to_rfc3339(),
  }))
  .into_response()
}

fn clear_all_caches(state: &AppState) -> color_eyre::Result<()> {
  state.loader.clear_cache()?;
  state.metrics_cache.clear()?;
  state.trends_cache.clear()
}
