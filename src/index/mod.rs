//! Hybrid vector index.
//!
//! A collection holds chunk points carrying two named vector spaces:
//! - **dense** — fixed dimensionality, cosine distance. Vectors are
//!   L2-normalized on write so cosine reduces to a dot product, and an int8
//!   scalar-quantized copy (0.99 quantile calibration) is stored alongside
//!   the full-precision vector.
//! - **sparse** — (index, value) pairs with raw term frequencies. IDF
//!   weighting is applied to the query vector at search time, so stored
//!   points never go stale as the corpus grows.
//!
//! Search runs two prefetches (sparse top-10; dense top-10 above a 0.9
//! full-precision score floor, candidates generated from quantized scores
//! with 2x oversampling and then rescored) and fuses the ranked lists with
//! Reciprocal Rank Fusion.
//!
//! Two payload fields (`issue_number`, `comment_id`) are exact-match indexed
//! to support the ingestion dedup probe.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::models::CommentPayload;

/// Sparse prefetch depth.
pub const SPARSE_PREFETCH_LIMIT: usize = 10;
/// Dense prefetch depth.
pub const DENSE_PREFETCH_LIMIT: usize = 10;
/// Minimum full-precision cosine score for a dense prefetch hit.
pub const DENSE_SCORE_THRESHOLD: f32 = 0.9;
/// Quantized candidate oversampling factor before full-precision rescoring.
pub const QUANTIZATION_OVERSAMPLING: f32 = 2.0;
/// Calibration quantile for int8 scalar quantization.
pub const QUANTIZATION_QUANTILE: f32 = 0.99;
/// Ranking constant for Reciprocal Rank Fusion.
pub const RRF_K: f32 = 60.0;

/// Variable-length (index, weight) pairs capturing lexical relevance.
/// Indices are sorted ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

/// A chunk point as produced by ingestion, before index-side encoding.
#[derive(Debug, Clone)]
pub struct ChunkPoint {
    pub id: String,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub payload: CommentPayload,
}

/// A search hit: payload plus fused score.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub payload: CommentPayload,
    pub score: f32,
}

/// Int8 scalar-quantized dense vector with its reconstruction scale.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedVector {
    pub codes: Vec<i8>,
    pub scale: f32,
}

/// Storage backend for hybrid collections.
///
/// All operations are keyed by collection name; implementations must be
/// safe to share across concurrent ingestion tasks and workflow instances.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create a collection. No-op if it already exists.
    async fn create_collection(&self, collection: &str, dims: usize) -> Result<()>;

    /// Delete a collection and all of its points. No-op if absent.
    async fn delete_collection(&self, collection: &str) -> Result<()>;

    /// Create exact-match payload indexes for `issue_number` and
    /// `comment_id`. Idempotent.
    async fn create_payload_indexes(&self, collection: &str) -> Result<()>;

    /// Dedup probe: does any chunk exist for (issue_number, comment_id)?
    async fn has_comment_chunks(
        &self,
        collection: &str,
        issue_number: i64,
        comment_id: i64,
    ) -> Result<bool>;

    /// Append a batch of points. Point ids are expected to be fresh and
    /// globally unique; points are never mutated in place.
    async fn upsert_batch(&self, collection: &str, points: Vec<ChunkPoint>) -> Result<()>;

    /// Fused dense/sparse nearest-neighbor search over raw query vectors.
    async fn query_hybrid(
        &self,
        collection: &str,
        dense: &[f32],
        sparse: &SparseVector,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>>;

    /// Number of points in the collection (0 if absent).
    async fn count_points(&self, collection: &str) -> Result<usize>;
}

/// A point as stored by a backend: normalized dense, quantized copy, raw
/// sparse, payload.
#[derive(Debug, Clone)]
pub struct IndexedPoint {
    pub id: String,
    pub dense: Vec<f32>,
    pub quantized: QuantizedVector,
    pub sparse: SparseVector,
    pub payload: CommentPayload,
}

impl IndexedPoint {
    /// Encode a raw chunk point for storage: normalize the dense vector and
    /// quantize it.
    pub fn encode(point: ChunkPoint) -> Self {
        let dense = l2_normalize(point.dense);
        let quantized = quantize(&dense);
        Self {
            id: point.id,
            dense,
            quantized,
            sparse: point.sparse,
            payload: point.payload,
        }
    }
}

// ============ Dense scoring ============

pub fn l2_normalize(mut vec: Vec<f32>) -> Vec<f32> {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Int8 scalar quantization calibrated at the 0.99 quantile of component
/// magnitudes. Components beyond the quantile saturate at ±127.
pub fn quantize(vec: &[f32]) -> QuantizedVector {
    if vec.is_empty() {
        return QuantizedVector {
            codes: Vec::new(),
            scale: 0.0,
        };
    }

    let mut magnitudes: Vec<f32> = vec.iter().map(|v| v.abs()).collect();
    magnitudes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((magnitudes.len() - 1) as f32 * QUANTIZATION_QUANTILE).round() as usize;
    let quantile = magnitudes[idx];

    if quantile < f32::EPSILON {
        return QuantizedVector {
            codes: vec![0; vec.len()],
            scale: 0.0,
        };
    }

    let scale = quantile / 127.0;
    let codes = vec
        .iter()
        .map(|v| (v / scale).round().clamp(-127.0, 127.0) as i8)
        .collect();

    QuantizedVector { codes, scale }
}

/// Approximate dot product in the quantized domain.
pub fn dot_quantized(a: &QuantizedVector, b: &QuantizedVector) -> f32 {
    if a.codes.len() != b.codes.len() {
        return 0.0;
    }
    let acc: i32 = a
        .codes
        .iter()
        .zip(b.codes.iter())
        .map(|(x, y)| (*x as i32) * (*y as i32))
        .sum();
    acc as f32 * a.scale * b.scale
}

// ============ Sparse scoring ============

/// Dot product of two sparse vectors via merge-join over sorted indices.
pub fn sparse_dot(a: &SparseVector, b: &SparseVector) -> f32 {
    let mut score = 0.0;
    let (mut i, mut j) = (0, 0);
    while i < a.indices.len() && j < b.indices.len() {
        match a.indices[i].cmp(&b.indices[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                score += a.values[i] * b.values[j];
                i += 1;
                j += 1;
            }
        }
    }
    score
}

/// BM25-style inverse document frequency for a term present in `df` of `n`
/// documents.
pub fn idf(df: usize, n: usize) -> f32 {
    let df = df as f32;
    let n = n as f32;
    (((n - df + 0.5) / (df + 0.5)) + 1.0).ln()
}

/// Reweight a query-side sparse vector by per-term IDF over the collection.
pub fn apply_idf(query: &SparseVector, doc_freq: &HashMap<u32, usize>, n: usize) -> SparseVector {
    let values = query
        .indices
        .iter()
        .zip(query.values.iter())
        .map(|(idx, v)| v * idf(doc_freq.get(idx).copied().unwrap_or(0), n))
        .collect();
    SparseVector {
        indices: query.indices.clone(),
        values,
    }
}

/// Per-term document frequencies over a set of points.
pub fn document_frequencies(points: &[IndexedPoint]) -> HashMap<u32, usize> {
    let mut df: HashMap<u32, usize> = HashMap::new();
    for point in points {
        let distinct: HashSet<u32> = point.sparse.indices.iter().copied().collect();
        for idx in distinct {
            *df.entry(idx).or_insert(0) += 1;
        }
    }
    df
}

// ============ Fusion ============

/// Reciprocal Rank Fusion over ranked id lists.
///
/// Each list contributes `1 / (RRF_K + rank)` per id (rank starting at 1).
/// Returns ids with fused scores, best first. Ties break on id for
/// determinism.
pub fn rrf_fuse(lists: &[Vec<String>]) -> Vec<(String, f32)> {
    let mut fused: HashMap<String, f32> = HashMap::new();
    for list in lists {
        for (rank, id) in list.iter().enumerate() {
            *fused.entry(id.clone()).or_insert(0.0) += 1.0 / (RRF_K + (rank + 1) as f32);
        }
    }

    let mut scored: Vec<(String, f32)> = fused.into_iter().collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored
}

// ============ Hybrid search over loaded points ============

/// Execute the fused search over a materialized point set. Shared by both
/// backends.
pub fn hybrid_search(
    points: &[IndexedPoint],
    dense_query: &[f32],
    sparse_query: &SparseVector,
    limit: usize,
) -> Vec<ScoredPoint> {
    if points.is_empty() || limit == 0 {
        return Vec::new();
    }

    // Sparse prefetch: IDF-weighted query against raw stored values.
    let df = document_frequencies(points);
    let weighted_query = apply_idf(sparse_query, &df, points.len());

    let mut sparse_ranked: Vec<(usize, f32)> = points
        .iter()
        .enumerate()
        .map(|(i, p)| (i, sparse_dot(&weighted_query, &p.sparse)))
        .filter(|(_, s)| *s > 0.0)
        .collect();
    sparse_ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| points[a.0].id.cmp(&points[b.0].id))
    });
    sparse_ranked.truncate(SPARSE_PREFETCH_LIMIT);

    // Dense prefetch: rank candidates on quantized scores with oversampling,
    // rescore the survivors at full precision, then apply the score floor.
    let dense_query = l2_normalize(dense_query.to_vec());
    let quantized_query = quantize(&dense_query);
    let candidate_count =
        (DENSE_PREFETCH_LIMIT as f32 * QUANTIZATION_OVERSAMPLING).ceil() as usize;

    let mut quantized_ranked: Vec<(usize, f32)> = points
        .iter()
        .enumerate()
        .map(|(i, p)| (i, dot_quantized(&quantized_query, &p.quantized)))
        .collect();
    quantized_ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| points[a.0].id.cmp(&points[b.0].id))
    });
    quantized_ranked.truncate(candidate_count);

    let mut dense_ranked: Vec<(usize, f32)> = quantized_ranked
        .into_iter()
        .map(|(i, _)| (i, dot(&dense_query, &points[i].dense)))
        .filter(|(_, s)| *s >= DENSE_SCORE_THRESHOLD)
        .collect();
    dense_ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| points[a.0].id.cmp(&points[b.0].id))
    });
    dense_ranked.truncate(DENSE_PREFETCH_LIMIT);

    // Fuse the two ranked lists.
    let sparse_ids: Vec<String> = sparse_ranked
        .iter()
        .map(|(i, _)| points[*i].id.clone())
        .collect();
    let dense_ids: Vec<String> = dense_ranked
        .iter()
        .map(|(i, _)| points[*i].id.clone())
        .collect();

    let by_id: HashMap<&str, &IndexedPoint> =
        points.iter().map(|p| (p.id.as_str(), p)).collect();

    rrf_fuse(&[sparse_ids, dense_ids])
        .into_iter()
        .take(limit)
        .filter_map(|(id, score)| {
            by_id.get(id.as_str()).map(|p| ScoredPoint {
                id,
                payload: p.payload.clone(),
                score,
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn test_payload(issue_number: i64, comment_id: i64, text: &str) -> CommentPayload {
    CommentPayload {
        issue_number,
        repo: "scikit-learn".to_string(),
        owner: "scikit-learn".to_string(),
        chunk_text: text.to_string(),
        comment_id,
        url: format!(
            "https://github.com/scikit-learn/scikit-learn/issues/{}",
            issue_number
        ),
        title: format!("Issue {}", issue_number),
        is_bug: false,
        is_feature: false,
        comment_author: "alice".to_string(),
        comment_created_at: None,
        comment_updated_at: None,
        issue_state: "open".to_string(),
        issue_created_at: None,
        issue_updated_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_roundtrip_accuracy() {
        let vec = l2_normalize(vec![0.3, -0.1, 0.7, 0.2, -0.5, 0.05, 0.0, 0.4]);
        let q = quantize(&vec);
        let approx = dot_quantized(&q, &q);
        let exact = dot(&vec, &vec);
        assert!(
            (approx - exact).abs() < 0.05,
            "approx {} vs exact {}",
            approx,
            exact
        );
    }

    #[test]
    fn test_quantize_zero_vector() {
        let q = quantize(&[0.0, 0.0, 0.0]);
        assert_eq!(q.scale, 0.0);
        assert!(q.codes.iter().all(|c| *c == 0));
    }

    #[test]
    fn test_quantize_saturates_outliers() {
        let mut vec = vec![0.01f32; 200];
        vec[0] = 100.0; // far beyond the 0.99 quantile
        let q = quantize(&vec);
        assert_eq!(q.codes[0], 127);
    }

    #[test]
    fn test_sparse_dot_merge_join() {
        let a = SparseVector {
            indices: vec![1, 5, 9],
            values: vec![2.0, 3.0, 1.0],
        };
        let b = SparseVector {
            indices: vec![5, 9, 12],
            values: vec![4.0, 0.5, 7.0],
        };
        assert_eq!(sparse_dot(&a, &b), 3.0 * 4.0 + 1.0 * 0.5);
    }

    #[test]
    fn test_sparse_dot_disjoint() {
        let a = SparseVector {
            indices: vec![1, 2],
            values: vec![1.0, 1.0],
        };
        let b = SparseVector {
            indices: vec![3, 4],
            values: vec![1.0, 1.0],
        };
        assert_eq!(sparse_dot(&a, &b), 0.0);
    }

    #[test]
    fn test_idf_rare_term_outweighs_common() {
        assert!(idf(1, 100) > idf(90, 100));
        assert!(idf(100, 100) > 0.0);
    }

    #[test]
    fn test_rrf_doubly_retrieved_not_demoted() {
        // "b" appears in both lists; it must not rank below its best
        // single-list showing (rank 1 in the second list).
        let lists = vec![
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec!["b".to_string(), "d".to_string()],
        ];
        let fused = rrf_fuse(&lists);
        assert_eq!(fused[0].0, "b");
    }

    #[test]
    fn test_rrf_single_list_preserves_order() {
        let lists = vec![vec!["x".to_string(), "y".to_string(), "z".to_string()]];
        let fused = rrf_fuse(&lists);
        let order: Vec<&str> = fused.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_hybrid_search_empty_points() {
        let hits = hybrid_search(&[], &[1.0, 0.0], &SparseVector::default(), 5);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_hybrid_search_finds_exact_dense_match() {
        let points: Vec<IndexedPoint> = (0..4)
            .map(|i| {
                let mut dense = vec![0.0f32; 4];
                dense[i] = 1.0;
                IndexedPoint::encode(ChunkPoint {
                    id: format!("p{}", i),
                    dense,
                    sparse: SparseVector::default(),
                    payload: test_payload(i as i64, i as i64, "text"),
                })
            })
            .collect();

        let hits = hybrid_search(&points, &[0.0, 1.0, 0.0, 0.0], &SparseVector::default(), 5);
        assert_eq!(hits.len(), 1); // only the aligned point clears the 0.9 floor
        assert_eq!(hits[0].id, "p1");
    }

    #[test]
    fn test_hybrid_search_sparse_only_query() {
        let sparse = SparseVector {
            indices: vec![7],
            values: vec![1.0],
        };
        let points = vec![
            IndexedPoint::encode(ChunkPoint {
                id: "match".to_string(),
                dense: vec![1.0, 0.0],
                sparse: sparse.clone(),
                payload: test_payload(1, 1, "match"),
            }),
            IndexedPoint::encode(ChunkPoint {
                id: "other".to_string(),
                dense: vec![0.0, 1.0],
                sparse: SparseVector {
                    indices: vec![9],
                    values: vec![1.0],
                },
                payload: test_payload(2, 2, "other"),
            }),
        ];

        let hits = hybrid_search(&points, &[0.0, 0.0], &sparse, 5);
        assert_eq!(hits[0].id, "match");
    }

    #[test]
    fn test_hybrid_search_respects_limit() {
        let sparse = SparseVector {
            indices: vec![3],
            values: vec![1.0],
        };
        let points: Vec<IndexedPoint> = (0..8)
            .map(|i| {
                IndexedPoint::encode(ChunkPoint {
                    id: format!("p{}", i),
                    dense: vec![1.0, 0.0],
                    sparse: sparse.clone(),
                    payload: test_payload(i, i, "t"),
                })
            })
            .collect();

        let hits = hybrid_search(&points, &[1.0, 0.0], &sparse, 3);
        assert_eq!(hits.len(), 3);
    }
}
