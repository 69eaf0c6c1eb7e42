//! Ingestion orchestrator.
//!
//! Walks every issue in the corpus and indexes its comments: dedup probe,
//! chunking, embedding into both vector spaces, payload construction, and
//! batched upserts. Comments of one issue are processed under a bounded
//! semaphore; batches within a comment are sequential so chunk order is
//! preserved.
//!
//! A failed batch is logged and skipped. Ingestion is at-least-once:
//! re-running skips comments that already have chunks, but a comment whose
//! run died mid-batch is not chunk-resumable.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::split_text;
use crate::config::{ChunkingConfig, IngestConfig};
use crate::corpus;
use crate::index::ChunkPoint;
use crate::models::{Comment, CommentPayload, Issue};
use crate::store::VectorStore;

/// Aggregate counts for one ingestion run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub issues: usize,
    pub comments_total: usize,
    pub comments_skipped: usize,
    pub comments_ingested: usize,
    pub points_ingested: usize,
}

/// Flatten issue and comment metadata into the payload attached to a chunk.
pub fn build_comment_payload(issue: &Issue, comment: &Comment, chunk_text: &str) -> CommentPayload {
    CommentPayload {
        issue_number: issue.number,
        repo: issue.repo.clone(),
        owner: issue.owner.clone(),
        chunk_text: chunk_text.to_string(),
        comment_id: comment.comment_id,
        url: issue.url.clone().unwrap_or_default(),
        title: issue.title.clone(),
        is_bug: issue.is_bug,
        is_feature: issue.is_feature,
        comment_author: comment.author.clone().unwrap_or_default(),
        comment_created_at: comment.created_at.map(|t| t.to_rfc3339()),
        comment_updated_at: comment.updated_at.map(|t| t.to_rfc3339()),
        issue_state: issue.state.clone().unwrap_or_default(),
        issue_created_at: issue.created_at.map(|t| t.to_rfc3339()),
        issue_updated_at: issue.updated_at.map(|t| t.to_rfc3339()),
    }
}

enum CommentOutcome {
    Skipped,
    Ingested(usize),
    Failed,
}

/// Ingest every issue and comment from the corpus into the vector store.
pub async fn run_ingest(
    pool: &SqlitePool,
    store: Arc<VectorStore>,
    chunking: &ChunkingConfig,
    ingest: &IngestConfig,
) -> Result<IngestReport> {
    store.ensure_collection().await?;

    let issues = corpus::fetch_issues(pool).await?;
    info!(issues = issues.len(), "starting ingestion");

    let mut report = IngestReport {
        issues: issues.len(),
        ..Default::default()
    };

    for issue in issues {
        let comments = corpus::fetch_comments(pool, issue.id).await?;
        let semaphore = Arc::new(Semaphore::new(ingest.concurrent_comments));
        let issue = Arc::new(issue);

        let mut handles = Vec::with_capacity(comments.len());
        for comment in comments {
            let permit_source = semaphore.clone();
            let store = store.clone();
            let issue = issue.clone();
            let chunk_size = chunking.chunk_size;
            let batch_size = ingest.batch_size;

            handles.push(tokio::spawn(async move {
                let _permit = match permit_source.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return CommentOutcome::Failed,
                };
                ingest_comment(&store, &issue, &comment, chunk_size, batch_size).await
            }));
        }

        let mut total = 0;
        let mut skipped = 0;
        let mut ingested = 0;
        let mut points = 0;
        for handle in handles {
            total += 1;
            match handle.await {
                Ok(CommentOutcome::Skipped) => skipped += 1,
                Ok(CommentOutcome::Ingested(n)) => {
                    ingested += 1;
                    points += n;
                }
                Ok(CommentOutcome::Failed) => {}
                Err(e) => {
                    warn!(issue = issue.number, error = %e, "comment task panicked");
                }
            }
        }

        info!(
            issue = issue.number,
            total, skipped, ingested, points, "issue ingested"
        );
        report.comments_total += total;
        report.comments_skipped += skipped;
        report.comments_ingested += ingested;
        report.points_ingested += points;
    }

    info!(
        issues = report.issues,
        comments = report.comments_total,
        skipped = report.comments_skipped,
        points = report.points_ingested,
        "ingestion complete"
    );
    Ok(report)
}

async fn ingest_comment(
    store: &VectorStore,
    issue: &Issue,
    comment: &Comment,
    chunk_size: usize,
    batch_size: usize,
) -> CommentOutcome {
    let body = match &comment.body {
        Some(body) if !body.trim().is_empty() => body,
        _ => return CommentOutcome::Skipped,
    };

    match store
        .index()
        .has_comment_chunks(store.collection(), issue.number, comment.comment_id)
        .await
    {
        Ok(true) => return CommentOutcome::Skipped,
        Ok(false) => {}
        Err(e) => {
            warn!(
                issue = issue.number,
                comment = comment.comment_id,
                error = %e,
                "dedup probe failed"
            );
            return CommentOutcome::Failed;
        }
    }

    let chunks = split_text(body, chunk_size);
    if chunks.is_empty() {
        return CommentOutcome::Skipped;
    }

    let (dense, sparse) = match (
        store.embedder().embed_dense(&chunks).await,
        store.embedder().embed_sparse(&chunks).await,
    ) {
        (Ok(dense), Ok(sparse)) => (dense, sparse),
        (Err(e), _) | (_, Err(e)) => {
            warn!(
                issue = issue.number,
                comment = comment.comment_id,
                error = %e,
                "embedding failed"
            );
            return CommentOutcome::Failed;
        }
    };

    let points: Vec<ChunkPoint> = chunks
        .iter()
        .zip(dense.into_iter().zip(sparse.into_iter()))
        .map(|(text, (dense, sparse))| ChunkPoint {
            id: Uuid::new_v4().to_string(),
            dense,
            sparse,
            payload: build_comment_payload(issue, comment, text),
        })
        .collect();

    let mut ingested = 0;
    for batch in points.chunks(batch_size) {
        match store
            .index()
            .upsert_batch(store.collection(), batch.to_vec())
            .await
        {
            Ok(()) => ingested += batch.len(),
            Err(e) => {
                warn!(
                    issue = issue.number,
                    comment = comment.comment_id,
                    batch = batch.len(),
                    error = %e,
                    "batch upsert failed"
                );
            }
        }
    }

    // A comment whose every batch failed landed nothing in the index.
    if ingested == 0 {
        return CommentOutcome::Failed;
    }
    CommentOutcome::Ingested(ingested)
}
