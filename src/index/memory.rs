//! In-process vector index backed by a `RwLock`-guarded map.
//!
//! Keeps every collection fully in memory. Used for tests and for one-shot
//! runs where persistence across processes is not needed.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{
    hybrid_search, ChunkPoint, IndexedPoint, ScoredPoint, SparseVector, VectorIndex,
};

struct MemoryCollection {
    dims: usize,
    points: Vec<IndexedPoint>,
    // Exact-match payload index over (issue_number, comment_id).
    comment_chunks: HashSet<(i64, i64)>,
}

#[derive(Default)]
pub struct MemoryIndex {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn create_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.get(collection) {
            if existing.dims != dims {
                bail!(
                    "Collection '{}' exists with {} dims, requested {}",
                    collection,
                    existing.dims,
                    dims
                );
            }
            return Ok(());
        }
        collections.insert(
            collection.to_string(),
            MemoryCollection {
                dims,
                points: Vec::new(),
                comment_chunks: HashSet::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<()> {
        self.collections.write().await.remove(collection);
        Ok(())
    }

    async fn create_payload_indexes(&self, collection: &str) -> Result<()> {
        // The comment-chunk set is maintained on every upsert, so this is a
        // no-op beyond checking the collection exists.
        let collections = self.collections.read().await;
        if !collections.contains_key(collection) {
            bail!("Unknown collection: {}", collection);
        }
        Ok(())
    }

    async fn has_comment_chunks(
        &self,
        collection: &str,
        issue_number: i64,
        comment_id: i64,
    ) -> Result<bool> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| anyhow::anyhow!("Unknown collection: {}", collection))?;
        Ok(coll.comment_chunks.contains(&(issue_number, comment_id)))
    }

    async fn upsert_batch(&self, collection: &str, points: Vec<ChunkPoint>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow::anyhow!("Unknown collection: {}", collection))?;

        for point in points {
            if point.dense.len() != coll.dims {
                bail!(
                    "Dense vector has {} dims, collection '{}' expects {}",
                    point.dense.len(),
                    collection,
                    coll.dims
                );
            }
            coll.comment_chunks
                .insert((point.payload.issue_number, point.payload.comment_id));
            coll.points.push(IndexedPoint::encode(point));
        }
        Ok(())
    }

    async fn query_hybrid(
        &self,
        collection: &str,
        dense: &[f32],
        sparse: &SparseVector,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| anyhow::anyhow!("Unknown collection: {}", collection))?;

        if dense.len() != coll.dims {
            bail!(
                "Query vector has {} dims, collection '{}' expects {}",
                dense.len(),
                collection,
                coll.dims
            );
        }

        Ok(hybrid_search(&coll.points, dense, sparse, limit))
    }

    async fn count_points(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|c| c.points.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::test_payload;

    fn point(id: &str, issue: i64, comment: i64, dense: Vec<f32>) -> ChunkPoint {
        ChunkPoint {
            id: id.to_string(),
            dense,
            sparse: SparseVector::default(),
            payload: test_payload(issue, comment, "chunk"),
        }
    }

    #[tokio::test]
    async fn test_create_collection_idempotent() {
        let index = MemoryIndex::new();
        index.create_collection("dev_issues", 4).await.unwrap();
        index.create_collection("dev_issues", 4).await.unwrap();
        assert_eq!(index.count_points("dev_issues").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_collection_dims_conflict() {
        let index = MemoryIndex::new();
        index.create_collection("dev_issues", 4).await.unwrap();
        assert!(index.create_collection("dev_issues", 8).await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_and_dedup_probe() {
        let index = MemoryIndex::new();
        index.create_collection("dev_issues", 2).await.unwrap();
        index
            .upsert_batch("dev_issues", vec![point("a", 42, 7, vec![1.0, 0.0])])
            .await
            .unwrap();

        assert!(index.has_comment_chunks("dev_issues", 42, 7).await.unwrap());
        assert!(!index.has_comment_chunks("dev_issues", 42, 8).await.unwrap());
        assert!(!index.has_comment_chunks("dev_issues", 43, 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_rejects_wrong_dims() {
        let index = MemoryIndex::new();
        index.create_collection("dev_issues", 2).await.unwrap();
        let result = index
            .upsert_batch("dev_issues", vec![point("a", 1, 1, vec![1.0, 0.0, 0.0])])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unknown_collection_errors() {
        let index = MemoryIndex::new();
        assert!(index.has_comment_chunks("missing", 1, 1).await.is_err());
        assert!(index
            .query_hybrid("missing", &[1.0], &SparseVector::default(), 5)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_collection_drops_points() {
        let index = MemoryIndex::new();
        index.create_collection("dev_issues", 2).await.unwrap();
        index
            .upsert_batch("dev_issues", vec![point("a", 1, 1, vec![1.0, 0.0])])
            .await
            .unwrap();
        index.delete_collection("dev_issues").await.unwrap();
        assert_eq!(index.count_points("dev_issues").await.unwrap(), 0);
        // Deleting again is a no-op.
        index.delete_collection("dev_issues").await.unwrap();
    }

    #[tokio::test]
    async fn test_query_returns_payload() {
        let index = MemoryIndex::new();
        index.create_collection("dev_issues", 2).await.unwrap();
        index
            .upsert_batch("dev_issues", vec![point("a", 42, 7, vec![0.0, 1.0])])
            .await
            .unwrap();

        let hits = index
            .query_hybrid("dev_issues", &[0.0, 1.0], &SparseVector::default(), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.issue_number, 42);
        assert_eq!(hits[0].payload.comment_id, 7);
    }
}
