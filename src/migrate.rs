use anyhow::Result;
use sqlx::SqlitePool;

/// Create the corpus tables (issues, comments). Idempotent — running it
/// multiple times is safe.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS issues (
            id INTEGER PRIMARY KEY,
            owner TEXT NOT NULL,
            repo TEXT NOT NULL,
            number INTEGER NOT NULL UNIQUE,
            title TEXT NOT NULL,
            body TEXT,
            state TEXT,
            author TEXT,
            url TEXT,
            created_at INTEGER,
            updated_at INTEGER,
            is_bug INTEGER NOT NULL DEFAULT 0,
            is_feature INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS comments (
            id INTEGER PRIMARY KEY,
            comment_id INTEGER NOT NULL UNIQUE,
            issue_id INTEGER NOT NULL,
            author TEXT,
            body TEXT,
            created_at INTEGER,
            updated_at INTEGER,
            FOREIGN KEY (issue_id) REFERENCES issues(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_comments_issue_id ON comments(issue_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_issues_owner_repo ON issues(owner, repo)")
        .execute(pool)
        .await?;

    Ok(())
}
