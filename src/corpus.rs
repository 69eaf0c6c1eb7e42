//! Corpus store access.
//!
//! Reads the parent/child ingestion units (issues and their comments) from
//! the relational store. The schema itself is owned by the collector that
//! fills these tables; this module only consumes it.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::models::{Comment, Issue};

fn ts_to_datetime(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| DateTime::from_timestamp(t, 0))
}

/// Fetch every issue in the corpus.
pub async fn fetch_issues(pool: &SqlitePool) -> Result<Vec<Issue>> {
    let rows = sqlx::query(
        r#"
        SELECT id, owner, repo, number, title, body, state, author, url,
               created_at, updated_at, is_bug, is_feature
        FROM issues
        ORDER BY number ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let issues = rows
        .iter()
        .map(|row| Issue {
            id: row.get("id"),
            owner: row.get("owner"),
            repo: row.get("repo"),
            number: row.get("number"),
            title: row.get("title"),
            body: row.get("body"),
            state: row.get("state"),
            author: row.get("author"),
            url: row.get("url"),
            created_at: ts_to_datetime(row.get("created_at")),
            updated_at: ts_to_datetime(row.get("updated_at")),
            is_bug: row.get::<i64, _>("is_bug") != 0,
            is_feature: row.get::<i64, _>("is_feature") != 0,
        })
        .collect();

    Ok(issues)
}

/// Fetch an issue's comments in creation order.
pub async fn fetch_comments(pool: &SqlitePool, issue_id: i64) -> Result<Vec<Comment>> {
    let rows = sqlx::query(
        r#"
        SELECT id, comment_id, issue_id, author, body, created_at, updated_at
        FROM comments
        WHERE issue_id = ?
        ORDER BY created_at ASC
        "#,
    )
    .bind(issue_id)
    .fetch_all(pool)
    .await?;

    let comments = rows
        .iter()
        .map(|row| Comment {
            id: row.get("id"),
            comment_id: row.get("comment_id"),
            issue_id: row.get("issue_id"),
            author: row.get("author"),
            body: row.get("body"),
            created_at: ts_to_datetime(row.get("created_at")),
            updated_at: ts_to_datetime(row.get("updated_at")),
        })
        .collect();

    Ok(comments)
}

#[cfg(test)]
pub async fn insert_issue(pool: &SqlitePool, issue: &Issue) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO issues (id, owner, repo, number, title, body, state, author, url,
                            created_at, updated_at, is_bug, is_feature)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(issue.id)
    .bind(&issue.owner)
    .bind(&issue.repo)
    .bind(issue.number)
    .bind(&issue.title)
    .bind(&issue.body)
    .bind(&issue.state)
    .bind(&issue.author)
    .bind(&issue.url)
    .bind(issue.created_at.map(|t| t.timestamp()))
    .bind(issue.updated_at.map(|t| t.timestamp()))
    .bind(issue.is_bug as i64)
    .bind(issue.is_feature as i64)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
pub async fn insert_comment(pool: &SqlitePool, comment: &Comment) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO comments (id, comment_id, issue_id, author, body, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(comment.id)
    .bind(comment.comment_id)
    .bind(comment.issue_id)
    .bind(&comment.author)
    .bind(&comment.body)
    .bind(comment.created_at.map(|t| t.timestamp()))
    .bind(comment.updated_at.map(|t| t.timestamp()))
    .execute(pool)
    .await?;
    Ok(())
}
