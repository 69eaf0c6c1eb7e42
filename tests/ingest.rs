//! End-to-end ingestion and retrieval tests over a real SQLite corpus and
//! the persistent index backend.

use sqlx::SqlitePool;
use std::sync::Arc;

use issue_triage::config::{ChunkingConfig, IngestConfig};
use issue_triage::embedding::HashedEmbedder;
use issue_triage::index::sqlite::SqliteIndex;
use issue_triage::ingest::run_ingest;
use issue_triage::store::VectorStore;
use issue_triage::{db, migrate};

async fn seed_issue(pool: &SqlitePool, number: i64, title: &str) {
    sqlx::query(
        r#"
        INSERT INTO issues (id, owner, repo, number, title, body, state, author, url,
                            created_at, updated_at, is_bug, is_feature)
        VALUES (?, 'scikit-learn', 'scikit-learn', ?, ?, 'body', 'open', 'alice', ?,
                1700000000, NULL, 1, 0)
        "#,
    )
    .bind(number)
    .bind(number)
    .bind(title)
    .bind(format!(
        "https://github.com/scikit-learn/scikit-learn/issues/{}",
        number
    ))
    .execute(pool)
    .await
    .unwrap();
}

async fn seed_comment(pool: &SqlitePool, id: i64, issue_id: i64, body: &str) {
    sqlx::query(
        r#"
        INSERT INTO comments (id, comment_id, issue_id, author, body, created_at, updated_at)
        VALUES (?, ?, ?, 'bob', ?, ?, NULL)
        "#,
    )
    .bind(id)
    .bind(id * 100)
    .bind(issue_id)
    .bind(body)
    .bind(1_700_000_000 + id)
    .execute(pool)
    .await
    .unwrap();
}

async fn setup() -> (tempfile::TempDir, SqlitePool, Arc<VectorStore>) {
    let tmp = tempfile::TempDir::new().unwrap();
    let pool = db::connect(&tmp.path().join("triage.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let index = SqliteIndex::new(pool.clone()).await.unwrap();
    let store = Arc::new(VectorStore::new(
        Arc::new(HashedEmbedder::new(64)),
        Arc::new(index),
        "test_github_issues".to_string(),
    ));
    (tmp, pool, store)
}

#[tokio::test]
async fn test_ingest_then_search_round_trip() {
    let (_tmp, pool, store) = setup().await;
    seed_issue(&pool, 1, "HuberRegressor fails on sparse input").await;
    seed_comment(&pool, 1, 1, "HuberRegressor raises ValueError for sparse matrices").await;
    seed_issue(&pool, 2, "Docs typo in user guide").await;
    seed_comment(&pool, 2, 2, "small typo in the clustering section of the docs").await;

    let report = run_ingest(
        &pool,
        store.clone(),
        &ChunkingConfig::default(),
        &IngestConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(report.comments_ingested, 2);

    let hits = store
        .search_similar_issues("HuberRegressor raises ValueError for sparse matrices", 5)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].issue_number, 1);
    assert!(hits[0].url.ends_with("/issues/1"));
}

#[tokio::test]
async fn test_reingest_touches_zero_points() {
    let (_tmp, pool, store) = setup().await;
    seed_issue(&pool, 1, "Some issue").await;
    seed_comment(&pool, 1, 1, "a comment worth indexing").await;
    seed_comment(&pool, 2, 1, "another comment worth indexing").await;

    let chunking = ChunkingConfig::default();
    let ingest = IngestConfig::default();

    let first = run_ingest(&pool, store.clone(), &chunking, &ingest)
        .await
        .unwrap();
    let indexed = store
        .index()
        .count_points("test_github_issues")
        .await
        .unwrap();
    assert_eq!(indexed, first.points_ingested);

    let second = run_ingest(&pool, store.clone(), &chunking, &ingest)
        .await
        .unwrap();
    assert_eq!(second.points_ingested, 0);
    assert_eq!(second.comments_skipped, 2);
    assert_eq!(
        store
            .index()
            .count_points("test_github_issues")
            .await
            .unwrap(),
        indexed
    );
}

#[tokio::test]
async fn test_new_comment_indexed_on_reingest() {
    let (_tmp, pool, store) = setup().await;
    seed_issue(&pool, 1, "Some issue").await;
    seed_comment(&pool, 1, 1, "first comment").await;

    let chunking = ChunkingConfig::default();
    let ingest = IngestConfig::default();
    run_ingest(&pool, store.clone(), &chunking, &ingest)
        .await
        .unwrap();

    seed_comment(&pool, 2, 1, "second comment arriving later").await;
    let report = run_ingest(&pool, store.clone(), &chunking, &ingest)
        .await
        .unwrap();

    assert_eq!(report.comments_skipped, 1);
    assert_eq!(report.comments_ingested, 1);
}

#[tokio::test]
async fn test_drop_collection_resets_index() {
    let (_tmp, pool, store) = setup().await;
    seed_issue(&pool, 1, "Some issue").await;
    seed_comment(&pool, 1, 1, "a comment").await;

    run_ingest(
        &pool,
        store.clone(),
        &ChunkingConfig::default(),
        &IngestConfig::default(),
    )
    .await
    .unwrap();
    assert!(
        store
            .index()
            .count_points("test_github_issues")
            .await
            .unwrap()
            > 0
    );

    store.drop_collection().await.unwrap();
    assert_eq!(
        store
            .index()
            .count_points("test_github_issues")
            .await
            .unwrap(),
        0
    );
}
