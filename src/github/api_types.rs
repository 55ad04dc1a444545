//! Serde-deserializable types matching GitHub API responses.
//!
//! These are separate from the domain types so deserialization can stay
//! lenient (the collection endpoint mixes issues and pull requests, and
//! fields go missing on older records) while domain types stay strict.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::types::{Issue, IssueState, Label, UserRef};

#[derive(Debug, Deserialize)]
pub struct RawUser {
  pub login: String,
  #[serde(default)]
  pub avatar_url: String,
}

#[derive(Debug, Deserialize)]
pub struct RawLabel {
  pub name: String,
  #[serde(default)]
  pub color: String,
  pub description: Option<String>,
}

/// A raw record from the issue listing endpoint.
///
/// Pull requests come back through the same endpoint; the `pull_request`
/// marker object is how they are told apart.
#[derive(Debug, Deserialize)]
pub struct RawIssue {
  pub id: u64,
  pub number: u64,
  #[serde(default)]
  pub title: String,
  pub state: String,
  #[serde(default)]
  pub labels: Vec<RawLabel>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub closed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub html_url: String,
  pub body: Option<String>,
  pub user: Option<RawUser>,
  #[serde(default)]
  pub assignees: Vec<RawUser>,
  /// Present on pull-request records only.
  pub pull_request: Option<serde_json::Value>,
}

impl RawIssue {
  pub fn is_pull_request(&self) -> bool {
    self.pull_request.is_some()
  }

  /// Normalize into the domain shape, stamping the owning repository key.
  pub fn into_issue(self, repository: &str) -> Issue {
    let state = if self.state == "closed" {
      IssueState::Closed
    } else {
      IssueState::Open
    };

    Issue {
      id: self.id,
      number: self.number,
      title: self.title,
      state,
      labels: self
        .labels
        .into_iter()
        .map(|l| Label {
          name: l.name,
          color: l.color,
          description: l.description,
        })
        .collect(),
      created_at: self.created_at,
      updated_at: self.updated_at,
      // Open issues never carry a close time
      closed_at: if state == IssueState::Closed {
        self.closed_at
      } else {
        None
      },
      html_url: self.html_url,
      body: self.body,
      user: self.user.map(UserRef::from).unwrap_or_else(|| UserRef {
        login: "ghost".to_string(),
        avatar_url: String::new(),
      }),
      assignees: self.assignees.into_iter().map(UserRef::from).collect(),
      repository: repository.to_string(),
    }
  }
}

impl From<RawUser> for UserRef {
  fn from(u: RawUser) -> Self {
    UserRef {
      login: u.login,
      avatar_url: u.avatar_url,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pull_request_marker_detected() {
    let raw: RawIssue = serde_json::from_value(serde_json::json!({
      "id": 1,
      "number": 10,
      "title": "Add feature",
      "state": "open",
      "created_at": "2025-01-01T00:00:00Z",
      "updated_at": "2025-01-02T00:00:00Z",
      "closed_at": null,
      "pull_request": { "url": "https://api.github.com/repos/x/y/pulls/10" }
    }))
    .unwrap();

    assert!(raw.is_pull_request());
  }

  #[test]
  fn normalizes_open_issue_with_missing_user() {
    let raw: RawIssue = serde_json::from_value(serde_json::json!({
      "id": 5,
      "number": 845,
      "title": "Segfault in fusion kernel",
      "state": "open",
      "labels": [{ "name": "bug", "color": "ff0000", "description": null }],
      "created_at": "2025-05-01T00:00:00Z",
      "updated_at": "2025-05-02T00:00:00Z",
      "closed_at": "2025-05-03T00:00:00Z"
    }))
    .unwrap();

    let issue = raw.into_issue("Fuser");
    assert_eq!(issue.repository, "Fuser");
    assert_eq!(issue.state, IssueState::Open);
    // An open issue never keeps a close timestamp, even if the wire had one
    assert_eq!(issue.closed_at, None);
    assert_eq!(issue.user.login, "ghost");
    assert_eq!(issue.labels[0].name, "bug");
  }
}
