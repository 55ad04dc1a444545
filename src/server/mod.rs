//! Inbound HTTP API.
//!
//! Serves the aggregated issue data and metrics as JSON. The fetch/cache
//! pipeline does all the heavy lifting; handlers only orchestrate loads,
//! run the pure metric transforms, and shape responses.

mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use color_eyre::{eyre::eyre, Result};
use tokio::net::TcpListener;
use tracing::info;

use crate::cache::TtlCache;
use crate::github::types::RepoId;
use crate::github::IssueLoader;
use crate::metrics::{CombinedBugMetrics, TrendPoint};

/// Shared handler state, built once at startup and cloned per request.
#[derive(Clone)]
pub struct AppState {
  pub loader: IssueLoader,
  pub repos: Vec<RepoId>,
  pub metrics_cache: Arc<TtlCache<CombinedBugMetrics>>,
  pub trends_cache: Arc<TtlCache<Vec<TrendPoint>>>,
}

impl AppState {
  pub fn new(loader: IssueLoader, repos: Vec<RepoId>) -> Self {
    Self {
      loader,
      repos,
      metrics_cache: Arc::new(TtlCache::new()),
      trends_cache: Arc::new(TtlCache::new()),
    }
  }
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/api/dashboard", get(handlers::dashboard))
    .route("/api/dashboard/refresh", post(handlers::refresh))
    .route("/api/bugs", get(handlers::bugs))
    .route("/api/repos", get(handlers::repos))
    .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn run(state: AppState, listen: &str) -> Result<()> {
  let listener = TcpListener::bind(listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", listen, e))?;

  info!(listen, repos = state.repos.len(), "bugwatch listening");

  axum::serve(listener, router(state))
    .await
    .map_err(|e| eyre!("Server error: {}", e))
}
