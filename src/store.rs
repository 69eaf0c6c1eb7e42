//! Retrieval facade over the embedder and the vector index.
//!
//! Owns the collection name and provides the operations the workflow and
//! CLI need: collection lifecycle, and similar-issue search over a free-text
//! query.

use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::debug;

use crate::embedding::Embedder;
use crate::index::VectorIndex;
use crate::models::SimilarIssue;

/// Default number of similar issues returned to the workflow.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

pub struct VectorStore {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    collection: String,
}

impl VectorStore {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, collection: String) -> Self {
        Self {
            embedder,
            index,
            collection,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Create the collection and its payload indexes. Idempotent.
    pub async fn ensure_collection(&self) -> Result<()> {
        self.index
            .create_collection(&self.collection, self.embedder.dims())
            .await?;
        self.index.create_payload_indexes(&self.collection).await?;
        Ok(())
    }

    /// Drop the collection and all of its points.
    pub async fn drop_collection(&self) -> Result<()> {
        self.index.delete_collection(&self.collection).await
    }

    /// Embed the query into both spaces and run the fused search, mapping
    /// hits into similar-issue records.
    pub async fn search_similar_issues(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SimilarIssue>> {
        if query.trim().is_empty() {
            bail!("Search query is empty");
        }

        let texts = vec![query.to_string()];
        let mut dense = self.embedder.embed_dense(&texts).await?;
        let mut sparse = self.embedder.embed_sparse(&texts).await?;

        if dense.is_empty() || sparse.is_empty() {
            bail!("Embedder returned no vectors for query");
        }
        let dense = dense.remove(0);
        let sparse = sparse.remove(0);

        let hits = self
            .index
            .query_hybrid(&self.collection, &dense, &sparse, limit)
            .await?;
        debug!(collection = %self.collection, hits = hits.len(), "similar-issue search");

        Ok(hits
            .iter()
            .map(|hit| SimilarIssue::from_payload(&hit.payload, hit.score))
            .collect())
    }
}
