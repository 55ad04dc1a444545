//! Domain types for normalized issue data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A repository being tracked, e.g. `NVIDIA/Fuser`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
  pub owner: String,
  pub name: String,
}

impl RepoId {
  pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      owner: owner.into(),
      name: name.into(),
    }
  }
}

impl std::fmt::Display for RepoId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}", self.owner, self.name)
  }
}

/// Issue state. Closed is terminal; no further transitions once fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
  Open,
  Closed,
}

impl IssueState {
  pub fn as_str(self) -> &'static str {
    match self {
      IssueState::Open => "open",
      IssueState::Closed => "closed",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
  pub name: String,
  pub color: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

/// A user projection: just enough identity for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
  pub login: String,
  pub avatar_url: String,
}

/// A normalized issue record.
///
/// Invariants after normalization: `closed_at` is `None` whenever state is
/// open; `created_at <= updated_at`; `created_at <= closed_at` when set.
/// Assignees are overwritten wholesale on each refetch, never diffed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
  pub id: u64,
  pub number: u64,
  pub title: String,
  pub state: IssueState,
  pub labels: Vec<Label>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub closed_at: Option<DateTime<Utc>>,
  pub html_url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
  pub user: UserRef,
  pub assignees: Vec<UserRef>,
  /// Which tracked repository this issue belongs to (the repo name key).
  pub repository: String,
}

impl Issue {
  pub fn is_open(&self) -> bool {
    self.state == IssueState::Open
  }

  pub fn is_closed(&self) -> bool {
    self.state == IssueState::Closed
  }
}

/// State filter for the issue listing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
  Open,
  Closed,
  #[default]
  All,
}

impl StateFilter {
  pub fn as_str(self) -> &'static str {
    match self {
      StateFilter::Open => "open",
      StateFilter::Closed => "closed",
      StateFilter::All => "all",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "open" => Some(StateFilter::Open),
      "closed" => Some(StateFilter::Closed),
      "all" => Some(StateFilter::All),
      _ => None,
    }
  }
}

/// Options for a paginated issue fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
  pub state: StateFilter,
  /// Only issues updated at or after this timestamp.
  pub since: Option<DateTime<Utc>>,
  /// Restrict to issues carrying any of these labels.
  pub labels: Vec<String>,
}

impl FetchOptions {
  /// Label preset for bug-focused fetches: the labels commonly used for
  /// defects across the tracked repositories.
  pub fn bugs() -> Self {
    Self {
      labels: vec![
        "bug".to_string(),
        "Bug".to_string(),
        "issue".to_string(),
        "defect".to_string(),
      ],
      ..Self::default()
    }
  }
}
