use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::github::types::RepoId;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Repositories to track
  pub repositories: Vec<RepoConfig>,
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoConfig {
  pub owner: String,
  pub name: String,
  /// Feature flag: disabled repositories are skipped by the fetch-all sweep
  #[serde(default = "default_true")]
  pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_listen")]
  pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
  /// Records per page requested from the issue listing endpoint
  #[serde(default = "default_per_page")]
  pub per_page: usize,
  /// Page cap for background (full) loads; 0 means unbounded
  #[serde(default)]
  pub background_max_pages: usize,
  /// Delay between successive page requests, in milliseconds
  #[serde(default = "default_page_delay_ms")]
  pub page_delay_ms: u64,
}

fn default_true() -> bool {
  true
}

fn default_listen() -> String {
  "127.0.0.1:8080".to_string()
}

fn default_per_page() -> usize {
  100
}

fn default_page_delay_ms() -> u64 {
  100
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      listen: default_listen(),
    }
  }
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      per_page: default_per_page(),
      background_max_pages: 0,
      page_delay_ms: default_page_delay_ms(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./bugwatch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/bugwatch/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/bugwatch/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("bugwatch.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("bugwatch").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    if config.repositories.is_empty() {
      return Err(eyre!(
        "Config file {} lists no repositories to track",
        path.display()
      ));
    }

    Ok(config)
  }

  /// Get the GitHub API token from environment variables.
  ///
  /// Checks BUGWATCH_GITHUB_TOKEN first, then GITHUB_TOKEN as fallback.
  /// Missing tokens are not an error; requests then run unauthenticated
  /// at a much lower quota.
  pub fn get_api_token() -> Option<String> {
    std::env::var("BUGWATCH_GITHUB_TOKEN")
      .or_else(|_| std::env::var("GITHUB_TOKEN"))
      .ok()
      .filter(|t| !t.is_empty())
  }

  /// The repositories enabled for the fetch-all sweep.
  ///
  /// A repository can also be disabled from the environment with
  /// `BUGWATCH_ENABLE_<NAME>=false` (name uppercased, `-` becomes `_`),
  /// which overrides the config file.
  pub fn enabled_repos(&self) -> Vec<RepoId> {
    self
      .repositories
      .iter()
      .filter(|repo| {
        if !repo.enabled {
          return false;
        }
        let env_key = format!(
          "BUGWATCH_ENABLE_{}",
          repo.name.to_uppercase().replace('-', "_")
        );
        std::env::var(env_key).map_or(true, |v| v != "false")
      })
      .map(|repo| RepoId::new(repo.owner.clone(), repo.name.clone()))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const EXAMPLE: &str = r#"
repositories:
  - owner: NVIDIA
    name: TransformerEngine
  - owner: NVIDIA
    name: Fuser
  - owner: Lightning-AI
    name: lightning-thunder
    enabled: false
server:
  listen: 0.0.0.0:9000
fetch:
  per_page: 50
  page_delay_ms: 10
"#;

  #[test]
  fn parses_example_config() {
    let config: Config = serde_yaml::from_str(EXAMPLE).unwrap();

    assert_eq!(config.repositories.len(), 3);
    assert_eq!(config.server.listen, "0.0.0.0:9000");
    assert_eq!(config.fetch.per_page, 50);
    assert_eq!(config.fetch.page_delay_ms, 10);
    // Unset fields fall back
    assert_eq!(config.fetch.background_max_pages, 0);
  }

  #[test]
  fn disabled_repo_is_excluded_from_sweep() {
    let config: Config = serde_yaml::from_str(EXAMPLE).unwrap();
    let repos = config.enabled_repos();

    assert_eq!(repos.len(), 2);
    assert!(repos.iter().all(|r| r.name != "lightning-thunder"));
  }
}
