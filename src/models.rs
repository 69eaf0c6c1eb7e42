//! Core data models used throughout the triage pipeline.
//!
//! These types represent the corpus records (issues and comments), the
//! flattened payload attached to every indexed chunk, and the similar-issue
//! records returned from retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A GitHub issue row from the corpus store (the parent unit of ingestion).
#[derive(Debug, Clone)]
pub struct Issue {
    pub id: i64,
    pub owner: String,
    pub repo: String,
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: Option<String>,
    pub author: Option<String>,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_bug: bool,
    pub is_feature: bool,
}

/// A comment row from the corpus store (the child unit of ingestion).
#[derive(Debug, Clone)]
pub struct Comment {
    pub id: i64,
    pub comment_id: i64,
    pub issue_id: i64,
    pub author: Option<String>,
    pub body: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Flattened denormalization of issue + comment metadata attached to every
/// chunk point. The index has no join capability, so everything retrieval
/// needs rides along with the chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentPayload {
    pub issue_number: i64,
    pub repo: String,
    pub owner: String,
    pub chunk_text: String,
    pub comment_id: i64,
    pub url: String,
    pub title: String,
    pub is_bug: bool,
    pub is_feature: bool,
    pub comment_author: String,
    pub comment_created_at: Option<String>,
    pub comment_updated_at: Option<String>,
    pub issue_state: String,
    pub issue_created_at: Option<String>,
    pub issue_updated_at: Option<String>,
}

/// A retrieval hit mapped into the workflow state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarIssue {
    pub issue_number: i64,
    pub repo: String,
    pub owner: String,
    pub title: String,
    pub url: String,
    pub comment_id: i64,
    pub chunk_text: String,
    pub score: f32,
    pub is_bug: bool,
    pub is_feature: bool,
}

impl SimilarIssue {
    /// Map a payload plus its fused score into a similar-issue record.
    pub fn from_payload(payload: &CommentPayload, score: f32) -> Self {
        Self {
            issue_number: payload.issue_number,
            repo: payload.repo.clone(),
            owner: payload.owner.clone(),
            title: payload.title.clone(),
            url: payload.url.clone(),
            comment_id: payload.comment_id,
            chunk_text: payload.chunk_text.clone(),
            score,
            is_bug: payload.is_bug,
            is_feature: payload.is_feature,
        }
    }
}
