//! Persistent vector index backed by SQLite.
//!
//! Collections and points live in two tables. Dense vectors (full precision
//! and the int8 quantized copy) are stored as little-endian blobs, sparse
//! vectors and payloads as JSON. Scoring happens in-process: queries load
//! the collection's points and run the shared fused search.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::{
    hybrid_search, ChunkPoint, IndexedPoint, QuantizedVector, ScoredPoint, SparseVector,
    VectorIndex,
};
use crate::models::CommentPayload;

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Open the index over an existing pool, creating its tables if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vector_collections (
                name TEXT PRIMARY KEY,
                dims INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vector_points (
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                issue_number INTEGER NOT NULL,
                comment_id INTEGER NOT NULL,
                dense BLOB NOT NULL,
                quantized BLOB NOT NULL,
                scale REAL NOT NULL,
                sparse TEXT NOT NULL,
                payload TEXT NOT NULL,
                FOREIGN KEY (collection) REFERENCES vector_collections(name)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_points_collection ON vector_points(collection)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    async fn collection_dims(&self, collection: &str) -> Result<usize> {
        let row = sqlx::query("SELECT dims FROM vector_collections WHERE name = ?")
            .bind(collection)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.get::<i64, _>("dims") as usize),
            None => bail!("Unknown collection: {}", collection),
        }
    }

    async fn load_points(&self, collection: &str) -> Result<Vec<IndexedPoint>> {
        let rows = sqlx::query(
            r#"
            SELECT id, dense, quantized, scale, sparse, payload
            FROM vector_points
            WHERE collection = ?
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            let sparse: SparseVector = serde_json::from_str(row.get("sparse"))
                .context("Corrupt sparse vector in index")?;
            let payload: CommentPayload = serde_json::from_str(row.get("payload"))
                .context("Corrupt payload in index")?;
            points.push(IndexedPoint {
                id: row.get("id"),
                dense: blob_to_vec(row.get("dense")),
                quantized: QuantizedVector {
                    codes: blob_to_codes(row.get("quantized")),
                    scale: row.get::<f64, _>("scale") as f32,
                },
                sparse,
                payload,
            });
        }
        Ok(points)
    }
}

fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn codes_to_blob(codes: &[i8]) -> Vec<u8> {
    codes.iter().map(|c| *c as u8).collect()
}

fn blob_to_codes(blob: &[u8]) -> Vec<i8> {
    blob.iter().map(|b| *b as i8).collect()
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn create_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let row = sqlx::query("SELECT dims FROM vector_collections WHERE name = ?")
            .bind(collection)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            let existing = row.get::<i64, _>("dims") as usize;
            if existing != dims {
                bail!(
                    "Collection '{}' exists with {} dims, requested {}",
                    collection,
                    existing,
                    dims
                );
            }
            return Ok(());
        }

        sqlx::query("INSERT INTO vector_collections (name, dims) VALUES (?, ?)")
            .bind(collection)
            .bind(dims as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM vector_points WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM vector_collections WHERE name = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_payload_indexes(&self, collection: &str) -> Result<()> {
        self.collection_dims(collection).await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_points_issue_number \
             ON vector_points(collection, issue_number)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_points_comment_id \
             ON vector_points(collection, comment_id)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn has_comment_chunks(
        &self,
        collection: &str,
        issue_number: i64,
        comment_id: i64,
    ) -> Result<bool> {
        self.collection_dims(collection).await?;
        let row = sqlx::query(
            r#"
            SELECT 1 FROM vector_points
            WHERE collection = ? AND issue_number = ? AND comment_id = ?
            LIMIT 1
            "#,
        )
        .bind(collection)
        .bind(issue_number)
        .bind(comment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn upsert_batch(&self, collection: &str, points: Vec<ChunkPoint>) -> Result<()> {
        let dims = self.collection_dims(collection).await?;

        let mut tx = self.pool.begin().await?;
        for point in points {
            if point.dense.len() != dims {
                bail!(
                    "Dense vector has {} dims, collection '{}' expects {}",
                    point.dense.len(),
                    collection,
                    dims
                );
            }

            let issue_number = point.payload.issue_number;
            let comment_id = point.payload.comment_id;
            let payload_json = serde_json::to_string(&point.payload)?;
            let encoded = IndexedPoint::encode(point);
            let sparse_json = serde_json::to_string(&encoded.sparse)?;

            sqlx::query(
                r#"
                INSERT INTO vector_points
                    (id, collection, issue_number, comment_id,
                     dense, quantized, scale, sparse, payload)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&encoded.id)
            .bind(collection)
            .bind(issue_number)
            .bind(comment_id)
            .bind(vec_to_blob(&encoded.dense))
            .bind(codes_to_blob(&encoded.quantized.codes))
            .bind(encoded.quantized.scale as f64)
            .bind(sparse_json)
            .bind(payload_json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query_hybrid(
        &self,
        collection: &str,
        dense: &[f32],
        sparse: &SparseVector,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let dims = self.collection_dims(collection).await?;
        if dense.len() != dims {
            bail!(
                "Query vector has {} dims, collection '{}' expects {}",
                dense.len(),
                collection,
                dims
            );
        }

        let points = self.load_points(collection).await?;
        Ok(hybrid_search(&points, dense, sparse, limit))
    }

    async fn count_points(&self, collection: &str) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM vector_points WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::test_payload;

    async fn open_index() -> SqliteIndex {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteIndex::new(pool).await.unwrap()
    }

    fn point(id: &str, issue: i64, comment: i64, dense: Vec<f32>) -> ChunkPoint {
        ChunkPoint {
            id: id.to_string(),
            dense,
            sparse: SparseVector {
                indices: vec![3, 9],
                values: vec![2.0, 1.0],
            },
            payload: test_payload(issue, comment, "chunk"),
        }
    }

    #[test]
    fn test_blob_roundtrip() {
        let vec = vec![0.25f32, -1.5, 3.75];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);

        let codes = vec![-127i8, 0, 64, 127];
        assert_eq!(blob_to_codes(&codes_to_blob(&codes)), codes);
    }

    #[tokio::test]
    async fn test_points_survive_roundtrip() {
        let index = open_index().await;
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
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].payload.issue_number, 42);
    }

    #[tokio::test]
    async fn test_dedup_probe_scoped_to_pair() {
        let index = open_index().await;
        index.create_collection("dev_issues", 2).await.unwrap();
        index
            .upsert_batch("dev_issues", vec![point("a", 42, 7, vec![1.0, 0.0])])
            .await
            .unwrap();

        assert!(index.has_comment_chunks("dev_issues", 42, 7).await.unwrap());
        assert!(!index.has_comment_chunks("dev_issues", 42, 9).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_collection_idempotent() {
        let index = open_index().await;
        index.create_collection("dev_issues", 4).await.unwrap();
        index.create_collection("dev_issues", 4).await.unwrap();
        assert!(index.create_collection("dev_issues", 8).await.is_err());
    }

    #[tokio::test]
    async fn test_payload_indexes_idempotent() {
        let index = open_index().await;
        index.create_collection("dev_issues", 2).await.unwrap();
        index.create_payload_indexes("dev_issues").await.unwrap();
        index.create_payload_indexes("dev_issues").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_collection_removes_points() {
        let index = open_index().await;
        index.create_collection("dev_issues", 2).await.unwrap();
        index
            .upsert_batch("dev_issues", vec![point("a", 1, 1, vec![1.0, 0.0])])
            .await
            .unwrap();

        index.delete_collection("dev_issues").await.unwrap();
        assert_eq!(index.count_points("dev_issues").await.unwrap(), 0);
        assert!(index.has_comment_chunks("dev_issues", 1, 1).await.is_err());
    }
}
