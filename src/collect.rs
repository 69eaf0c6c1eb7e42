//! GitHub issues collector.
//!
//! Populates the corpus tables from the GitHub REST API: paginated issue
//! listing (pull requests filtered out), per-issue comment pagination, and
//! change-aware upserts keyed by issue number / comment id. An issue or
//! comment whose `updated_at` matches the stored row is skipped, so
//! re-collecting an unchanged repository writes nothing.
//!
//! Transient API errors (429, 5xx, network) are retried with the same
//! exponential backoff as the other HTTP providers. A missing `GITHUB_TOKEN`
//! is allowed but rate limits will be low.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{info, warn};

const GITHUB_API_URL: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

/// Issue as returned by `GET /repos/{owner}/{repo}/issues`. The endpoint
/// also returns pull requests; those carry a `pull_request` key.
#[derive(Debug, Deserialize)]
pub struct GithubIssue {
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: Option<String>,
    pub user: Option<GithubUser>,
    pub html_url: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    #[serde(default)]
    pub labels: Vec<GithubLabel>,
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl GithubIssue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(Debug, Deserialize)]
pub struct GithubComment {
    pub id: i64,
    pub user: Option<GithubUser>,
    pub body: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GithubUser {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct GithubLabel {
    pub name: String,
}

/// Aggregate counts for one collection run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectReport {
    pub issues_fetched: usize,
    pub issues_saved: usize,
    pub issues_skipped: usize,
    pub comments_saved: usize,
}

/// Parse a GitHub ISO-8601 timestamp (`2024-01-15T09:30:00Z`).
pub fn parse_github_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Derive the `is_bug` / `is_feature` flags from issue labels. `is_bug`
/// matches any label containing "bug"; `is_feature` matches the exact
/// labels "feature" or "enhancement".
pub fn label_flags(labels: &[GithubLabel]) -> (bool, bool) {
    let lowered: Vec<String> = labels.iter().map(|l| l.name.to_lowercase()).collect();
    let is_bug = lowered.iter().any(|l| l.contains("bug"));
    let is_feature = lowered.iter().any(|l| l == "feature" || l == "enhancement");
    (is_bug, is_feature)
}

pub struct GithubCollector {
    base_url: String,
    token: Option<String>,
    max_pages: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl GithubCollector {
    pub fn new(token: Option<String>, max_pages: usize) -> Result<Self> {
        if max_pages == 0 {
            bail!("max_pages must be > 0");
        }
        if token.is_none() {
            warn!("GITHUB_TOKEN not set; unauthenticated rate limits are low");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url: GITHUB_API_URL.to_string(),
            token,
            max_pages,
            max_retries: 5,
            client,
        })
    }

    /// List issues, newest first, skipping pull requests. Stops at the
    /// first empty page or after `max_pages` pages.
    pub async fn fetch_issues(
        &self,
        owner: &str,
        repo: &str,
        state: &str,
    ) -> Result<Vec<GithubIssue>> {
        let mut issues = Vec::new();

        for page in 1..=self.max_pages {
            let url = format!("{}/repos/{}/{}/issues", self.base_url, owner, repo);
            let query = [
                ("state", state.to_string()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
                ("sort", "created".to_string()),
                ("direction", "desc".to_string()),
            ];

            info!(owner, repo, page, "fetching issues");
            let body = self.get(&url, &query).await?;
            let page_issues: Vec<GithubIssue> = serde_json::from_str(&body)?;
            if page_issues.is_empty() {
                break;
            }

            let short_page = page_issues.len() < PER_PAGE;
            issues.extend(page_issues.into_iter().filter(|i| !i.is_pull_request()));
            if short_page {
                break;
            }
        }

        Ok(issues)
    }

    /// All comments for one issue, paginated until a short page.
    pub async fn fetch_comments(
        &self,
        owner: &str,
        repo: &str,
        issue_number: i64,
    ) -> Result<Vec<GithubComment>> {
        let mut comments = Vec::new();
        let mut page = 1;

        loop {
            let url = format!(
                "{}/repos/{}/{}/issues/{}/comments",
                self.base_url, owner, repo, issue_number
            );
            let query = [
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];

            let body = self.get(&url, &query).await?;
            let page_comments: Vec<GithubComment> = serde_json::from_str(&body)?;
            let short_page = page_comments.len() < PER_PAGE;
            comments.extend(page_comments);

            if short_page {
                break;
            }
            page += 1;
        }

        Ok(comments)
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .get(url)
                .header("Accept", "application/vnd.github.v3+json")
                .header("User-Agent", "issue-triage")
                .query(query);
            if let Some(token) = &self.token {
                request = request.header("Authorization", format!("token {}", token));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.text().await?);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("GitHub API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("GitHub API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("GitHub request failed after retries")))
    }
}

/// Upsert one issue keyed by its number. Returns the corpus row id, or
/// `None` when the issue was skipped (empty body, or unchanged since the
/// stored `updated_at`).
pub async fn save_issue(
    pool: &SqlitePool,
    owner: &str,
    repo: &str,
    issue: &GithubIssue,
) -> Result<Option<i64>> {
    let body = match &issue.body {
        Some(body) if !body.trim().is_empty() => body,
        _ => return Ok(None),
    };

    let incoming_updated = issue
        .updated_at
        .as_deref()
        .and_then(parse_github_timestamp)
        .map(|t| t.timestamp());

    let existing = sqlx::query("SELECT id, updated_at FROM issues WHERE number = ?")
        .bind(issue.number)
        .fetch_optional(pool)
        .await?;
    if let Some(row) = &existing {
        let stored: Option<i64> = row.get("updated_at");
        if stored.is_some() && stored == incoming_updated {
            return Ok(None);
        }
    }

    let (is_bug, is_feature) = label_flags(&issue.labels);
    let created = issue
        .created_at
        .as_deref()
        .and_then(parse_github_timestamp)
        .map(|t| t.timestamp());

    sqlx::query(
        r#"
        INSERT INTO issues (owner, repo, number, title, body, state, author, url,
                            created_at, updated_at, is_bug, is_feature)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(number) DO UPDATE SET
            owner = excluded.owner,
            repo = excluded.repo,
            title = excluded.title,
            body = excluded.body,
            state = excluded.state,
            author = excluded.author,
            url = excluded.url,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            is_bug = excluded.is_bug,
            is_feature = excluded.is_feature
        "#,
    )
    .bind(owner)
    .bind(repo)
    .bind(issue.number)
    .bind(&issue.title)
    .bind(body)
    .bind(&issue.state)
    .bind(issue.user.as_ref().map(|u| u.login.clone()))
    .bind(&issue.html_url)
    .bind(created)
    .bind(incoming_updated)
    .bind(is_bug as i64)
    .bind(is_feature as i64)
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT id FROM issues WHERE number = ?")
        .bind(issue.number)
        .fetch_one(pool)
        .await?;
    Ok(Some(row.get("id")))
}

/// Upsert one comment keyed by its GitHub comment id. Returns whether a row
/// was written (false when unchanged).
pub async fn save_comment(
    pool: &SqlitePool,
    issue_id: i64,
    comment: &GithubComment,
) -> Result<bool> {
    let incoming_updated = comment
        .updated_at
        .as_deref()
        .and_then(parse_github_timestamp)
        .map(|t| t.timestamp());

    let existing = sqlx::query("SELECT updated_at FROM comments WHERE comment_id = ?")
        .bind(comment.id)
        .fetch_optional(pool)
        .await?;
    if let Some(row) = &existing {
        let stored: Option<i64> = row.get("updated_at");
        if stored.is_some() && stored == incoming_updated {
            return Ok(false);
        }
    }

    let created = comment
        .created_at
        .as_deref()
        .and_then(parse_github_timestamp)
        .map(|t| t.timestamp());

    sqlx::query(
        r#"
        INSERT INTO comments (comment_id, issue_id, author, body, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(comment_id) DO UPDATE SET
            issue_id = excluded.issue_id,
            author = excluded.author,
            body = excluded.body,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(comment.id)
    .bind(issue_id)
    .bind(comment.user.as_ref().map(|u| u.login.clone()))
    .bind(&comment.body)
    .bind(created)
    .bind(incoming_updated)
    .execute(pool)
    .await?;

    Ok(true)
}

/// Collect all issues and comments for one repository into the corpus.
pub async fn run_collect(
    pool: &SqlitePool,
    collector: &GithubCollector,
    owner: &str,
    repo: &str,
    state: &str,
) -> Result<CollectReport> {
    let issues = collector.fetch_issues(owner, repo, state).await?;

    let mut report = CollectReport {
        issues_fetched: issues.len(),
        ..Default::default()
    };

    for issue in &issues {
        match save_issue(pool, owner, repo, issue).await? {
            Some(issue_id) => {
                report.issues_saved += 1;
                let comments = collector.fetch_comments(owner, repo, issue.number).await?;
                for comment in &comments {
                    if save_comment(pool, issue_id, comment).await? {
                        report.comments_saved += 1;
                    }
                }
            }
            None => report.issues_skipped += 1,
        }
    }

    info!(
        owner,
        repo,
        fetched = report.issues_fetched,
        saved = report.issues_saved,
        skipped = report.issues_skipped,
        comments = report.comments_saved,
        "collection complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{corpus, migrate};

    fn issue_json(number: i64, updated_at: &str) -> GithubIssue {
        serde_json::from_value(serde_json::json!({
            "number": number,
            "title": format!("Issue {}", number),
            "body": "HuberRegressor fails on sparse input",
            "state": "open",
            "user": { "login": "alice" },
            "html_url": format!("https://github.com/scikit-learn/scikit-learn/issues/{}", number),
            "created_at": "2024-01-10T08:00:00Z",
            "updated_at": updated_at,
            "labels": [ { "name": "Bug" }, { "name": "module:linear_model" } ]
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_github_timestamp() {
        let ts = parse_github_timestamp("2024-01-15T09:30:00Z").unwrap();
        assert_eq!(ts.timestamp(), 1_705_311_000);
        assert!(parse_github_timestamp("not a date").is_none());
    }

    #[test]
    fn test_label_flags() {
        let labels: Vec<GithubLabel> = serde_json::from_value(serde_json::json!([
            { "name": "Bug" },
            { "name": "help wanted" }
        ]))
        .unwrap();
        assert_eq!(label_flags(&labels), (true, false));

        let labels: Vec<GithubLabel> = serde_json::from_value(serde_json::json!([
            { "name": "Enhancement" }
        ]))
        .unwrap();
        assert_eq!(label_flags(&labels), (false, true));

        assert_eq!(label_flags(&[]), (false, false));
    }

    #[test]
    fn test_pull_requests_detected() {
        let issue: GithubIssue = serde_json::from_value(serde_json::json!({
            "number": 7,
            "title": "A pull request",
            "pull_request": { "url": "https://api.github.com/repos/x/y/pulls/7" }
        }))
        .unwrap();
        assert!(issue.is_pull_request());
        assert!(!issue_json(1, "2024-01-15T09:30:00Z").is_pull_request());
    }

    #[tokio::test]
    async fn test_save_issue_maps_fields() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();

        let id = save_issue(
            &pool,
            "scikit-learn",
            "scikit-learn",
            &issue_json(42, "2024-01-15T09:30:00Z"),
        )
        .await
        .unwrap();
        assert!(id.is_some());

        let issues = corpus::fetch_issues(&pool).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].number, 42);
        assert_eq!(issues[0].author.as_deref(), Some("alice"));
        assert!(issues[0].is_bug);
        assert!(!issues[0].is_feature);
        assert_eq!(
            issues[0].updated_at.map(|t| t.timestamp()),
            Some(1_705_311_000)
        );
    }

    #[tokio::test]
    async fn test_save_issue_skips_unchanged() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();

        let issue = issue_json(1, "2024-01-15T09:30:00Z");
        assert!(save_issue(&pool, "o", "r", &issue).await.unwrap().is_some());
        // Same updated_at: no write.
        assert!(save_issue(&pool, "o", "r", &issue).await.unwrap().is_none());

        // A newer updated_at takes the update path and keeps the row id.
        let newer = issue_json(1, "2024-02-01T00:00:00Z");
        assert!(save_issue(&pool, "o", "r", &newer).await.unwrap().is_some());
        assert_eq!(corpus::fetch_issues(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_issue_skips_empty_body() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();

        let issue: GithubIssue = serde_json::from_value(serde_json::json!({
            "number": 9,
            "title": "No body",
            "body": "   "
        }))
        .unwrap();
        assert!(save_issue(&pool, "o", "r", &issue).await.unwrap().is_none());
        assert!(corpus::fetch_issues(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_comment_upserts_by_comment_id() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let issue_id = save_issue(
            &pool,
            "o",
            "r",
            &issue_json(1, "2024-01-15T09:30:00Z"),
        )
        .await
        .unwrap()
        .unwrap();

        let comment: GithubComment = serde_json::from_value(serde_json::json!({
            "id": 900,
            "user": { "login": "bob" },
            "body": "reproduced on 1.4",
            "created_at": "2024-01-16T10:00:00Z",
            "updated_at": "2024-01-16T10:00:00Z"
        }))
        .unwrap();

        assert!(save_comment(&pool, issue_id, &comment).await.unwrap());
        // Unchanged: skipped.
        assert!(!save_comment(&pool, issue_id, &comment).await.unwrap());

        let edited: GithubComment = serde_json::from_value(serde_json::json!({
            "id": 900,
            "user": { "login": "bob" },
            "body": "reproduced on 1.4 and 1.5",
            "created_at": "2024-01-16T10:00:00Z",
            "updated_at": "2024-01-17T12:00:00Z"
        }))
        .unwrap();
        assert!(save_comment(&pool, issue_id, &edited).await.unwrap());

        let comments = corpus::fetch_comments(&pool, issue_id).await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(
            comments[0].body.as_deref(),
            Some("reproduced on 1.4 and 1.5")
        );
    }
}
