mod cache;
mod config;
mod github;
mod metrics;
mod resilience;
mod server;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use github::{GitHubClient, IssueLoader};
use resilience::{RateLimitGuard, Resilience};
use server::AppState;

#[derive(Parser, Debug)]
#[command(name = "bugwatch")]
#[command(about = "GitHub issue dashboard with a resilient fetch/cache pipeline")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/bugwatch/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Listen address, overriding the config file
  #[arg(short, long)]
  listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bugwatch=info")),
    )
    .init();

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let repos = config.enabled_repos();
  if repos.is_empty() {
    return Err(eyre!("All configured repositories are disabled"));
  }

  let token = config::Config::get_api_token();
  let guard = Arc::new(RateLimitGuard::new());
  let client = GitHubClient::new(token, guard)
    .map_err(|e| eyre!("Failed to build GitHub client: {}", e))?
    .with_per_page(config.fetch.per_page)
    .with_page_delay(Duration::from_millis(config.fetch.page_delay_ms));

  let loader = IssueLoader::new(client, Arc::new(Resilience::new()))
    .with_background_max_pages(match config.fetch.background_max_pages {
      0 => usize::MAX,
      n => n,
    });

  info!(repos = repos.len(), "Starting bugwatch");

  let state = AppState::new(loader, repos);
  let listen = args.listen.unwrap_or(config.server.listen);
  server::run(state, &listen).await
}
