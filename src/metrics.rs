//! Bug metrics derived from normalized issue collections.
//!
//! Everything here is a pure transform over `&[Issue]`: callers pass the
//! reference time explicitly, so computing the same metrics twice over the
//! same collection yields identical results.

use chrono::{DateTime, Days, Utc, Weekday};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::github::types::{Issue, RepoId};

/// Window for the recent-activity count.
const RECENT_ACTIVITY_DAYS: i64 = 30;

/// Weekly buckets in a trend series (three months).
const TREND_WEEKS: u64 = 12;

const BUG_KEYWORDS: &[&str] = &["bug", "defect", "issue", "error", "fix", "broken"];

/// Aggregate bug health for one repository (or for all combined).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BugMetrics {
  pub repository: String,
  pub total_bugs: usize,
  pub open_bugs: usize,
  pub closed_bugs: usize,
  /// Percentage of issues in closed state, one decimal place.
  pub burn_rate: f64,
  /// Mean resolution time of closed issues, in whole days.
  pub avg_resolution_time: i64,
  /// Issues created in the last 30 days.
  pub recent_activity: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedBugMetrics {
  pub overall: BugMetrics,
  pub by_repository: BTreeMap<String, BugMetrics>,
}

/// One repository's activity within one weekly bucket.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
  /// Monday of the week, `YYYY-MM-DD`.
  pub date: String,
  /// Issues created during this week.
  pub open_bugs: usize,
  /// Issues closed during this week.
  pub closed_bugs: usize,
  /// Issues still open at the end of this week.
  pub total_open: usize,
  pub repository: String,
}

/// Whether an issue looks like a defect report, by label or title keyword.
pub fn is_bug_issue(issue: &Issue) -> bool {
  let label_match = issue.labels.iter().any(|label| {
    let name = label.name.to_lowercase();
    BUG_KEYWORDS.iter().any(|kw| name.contains(kw))
  });

  let title = issue.title.to_lowercase();
  label_match || BUG_KEYWORDS.iter().any(|kw| title.contains(kw))
}

/// Days from creation to close, rounded up. Zero for open issues.
pub fn resolution_days(issue: &Issue) -> i64 {
  let Some(closed_at) = issue.closed_at else {
    return 0;
  };
  let secs = (closed_at - issue.created_at).num_seconds().max(0) as u64;
  secs.div_ceil(86_400) as i64
}

/// Mean resolution time across the closed issues, rounded to whole days.
pub fn average_resolution_days(issues: &[Issue]) -> i64 {
  let closed: Vec<&Issue> = issues.iter().filter(|i| i.is_closed()).collect();
  if closed.is_empty() {
    return 0;
  }

  let total: i64 = closed.iter().map(|i| resolution_days(i)).sum();
  (total as f64 / closed.len() as f64).round() as i64
}

/// Count of issues created within the trailing `days` before `now`.
pub fn recent_activity(issues: &[Issue], days: i64, now: DateTime<Utc>) -> usize {
  let cutoff = now - chrono::Duration::days(days);
  issues.iter().filter(|i| i.created_at >= cutoff).count()
}

/// Compute aggregate metrics over an issue collection.
pub fn bug_metrics(issues: &[Issue], repository: &str, now: DateTime<Utc>) -> BugMetrics {
  let open_bugs = issues.iter().filter(|i| i.is_open()).count();
  let closed_bugs = issues.iter().filter(|i| i.is_closed()).count();
  let total_bugs = issues.len();

  let burn_rate = if total_bugs > 0 {
    (closed_bugs as f64 / total_bugs as f64 * 1000.0).round() / 10.0
  } else {
    0.0
  };

  BugMetrics {
    repository: repository.to_string(),
    total_bugs,
    open_bugs,
    closed_bugs,
    burn_rate,
    avg_resolution_time: average_resolution_days(issues),
    recent_activity: recent_activity(issues, RECENT_ACTIVITY_DAYS, now),
  }
}

/// Per-repository metrics plus the overall rollup.
pub fn combined_metrics(issues: &[Issue], repos: &[RepoId], now: DateTime<Utc>) -> CombinedBugMetrics {
  let by_repository = repos
    .iter()
    .map(|repo| {
      let repo_issues: Vec<Issue> = issues
        .iter()
        .filter(|i| i.repository == repo.name)
        .cloned()
        .collect();
      (repo.name.clone(), bug_metrics(&repo_issues, &repo.name, now))
    })
    .collect();

  CombinedBugMetrics {
    overall: bug_metrics(issues, "All Repositories", now),
    by_repository,
  }
}

/// Weekly trend series over the trailing twelve weeks.
///
/// Weeks run Monday through Sunday; the bucket covering `now` is the last
/// entry. For each repository and week this reports issues created that
/// week, issues closed that week, and the open total at week's end.
pub fn bug_trends(issues: &[Issue], repos: &[RepoId], now: DateTime<Utc>) -> Vec<TrendPoint> {
  let current_monday = now.date_naive().week(Weekday::Mon).first_day();
  let mut trends = Vec::with_capacity(TREND_WEEKS as usize * repos.len());

  for weeks_back in (0..TREND_WEEKS).rev() {
    let week_start = current_monday - Days::new(weeks_back * 7);
    let week_end = week_start + Days::new(6);

    for repo in repos {
      let repo_issues = issues.iter().filter(|i| i.repository == repo.name);

      let mut created_this_week = 0usize;
      let mut closed_this_week = 0usize;
      let mut open_at_week_end = 0usize;

      for issue in repo_issues {
        let created = issue.created_at.date_naive();
        let closed = issue.closed_at.map(|c| c.date_naive());

        if created >= week_start && created <= week_end {
          created_this_week += 1;
        }
        if closed.is_some_and(|c| c >= week_start && c <= week_end) {
          closed_this_week += 1;
        }
        if created <= week_end && closed.is_none_or(|c| c > week_end) {
          open_at_week_end += 1;
        }
      }

      trends.push(TrendPoint {
        date: week_start.format("%Y-%m-%d").to_string(),
        open_bugs: created_this_week,
        closed_bugs: closed_this_week,
        total_open: open_at_week_end,
        repository: repo.name.clone(),
      });
    }
  }

  trends
}

/// Per-repository issue counts for the repositories summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStats {
  pub name: String,
  pub enabled: bool,
  pub issue_count: usize,
  pub bug_count: usize,
}

pub fn repository_stats(issues: &[Issue], repos: &[RepoId]) -> Vec<RepositoryStats> {
  repos
    .iter()
    .map(|repo| {
      let repo_issues: Vec<&Issue> = issues
        .iter()
        .filter(|i| i.repository == repo.name)
        .collect();
      let bug_count = repo_issues.iter().filter(|i| is_bug_issue(i)).count();
      RepositoryStats {
        name: repo.name.clone(),
        enabled: true,
        issue_count: repo_issues.len(),
        bug_count,
      }
    })
    .collect()
}
