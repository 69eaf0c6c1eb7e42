//! Workflow state and per-stage updates.
//!
//! [`IssueState`] accumulates everything a triage run produces. Stages never
//! mutate the state directly; they return a [`StageUpdate`] that the engine
//! merges, which keeps each stage's effect inspectable and makes the
//! blocked latch enforceable in one place.

use serde::{Deserialize, Serialize};

use crate::models::SimilarIssue;

/// Character-offset span identifying a violating substring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSpan {
    pub start: usize,
    pub end: usize,
    pub reason: String,
}

/// The authoritative record of a guard violation. Closed set: the tag names
/// both the check and the stage side it fired on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ValidationSummary {
    DetectJailbreak {
        failure_reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        score: Option<f32>,
    },
    #[serde(rename = "ToxicLanguage_Input")]
    ToxicLanguageInput {
        failure_reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_spans: Option<Vec<ErrorSpan>>,
    },
    #[serde(rename = "SecretsPresent_Input")]
    SecretsPresentInput {
        failure_reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_spans: Option<Vec<ErrorSpan>>,
    },
    #[serde(rename = "ToxicLanguage_Output")]
    ToxicLanguageOutput {
        failure_reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_spans: Option<Vec<ErrorSpan>>,
    },
    #[serde(rename = "SecretsPresent_Output")]
    SecretsPresentOutput {
        failure_reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_spans: Option<Vec<ErrorSpan>>,
    },
}

/// Structured triage verdict for an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub priority: String,
    pub labels: Vec<String>,
    pub assignee: String,
}

/// Final summary plus the reference URLs it was conditioned on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub summary: String,
    pub references: Vec<String>,
}

/// Full state of one triage run. Lives for a single workflow execution and
/// is returned to the caller as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueState {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub similar_issues: Vec<SimilarIssue>,
    pub classification: Option<Classification>,
    pub recommendation: Option<Recommendation>,
    /// Tri-state: `None` until a guard has run, then the verdict.
    pub blocked: Option<bool>,
    pub validation_summary: Option<ValidationSummary>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl IssueState {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            similar_issues: Vec::new(),
            classification: None,
            recommendation: None,
            blocked: None,
            validation_summary: None,
            errors: Vec::new(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked == Some(true)
    }

    /// Merge one stage's update. `blocked` latches: once `Some(true)`, no
    /// later update can clear it or replace the validation summary. `errors`
    /// is append-only.
    pub fn apply(&mut self, update: StageUpdate) {
        let latched = self.is_blocked();

        if let Some(similar) = update.similar_issues {
            self.similar_issues = similar;
        }
        if let Some(classification) = update.classification {
            self.classification = Some(classification);
        }
        if let Some(recommendation) = update.recommendation {
            self.recommendation = Some(recommendation);
        }
        if let Some(blocked) = update.blocked {
            if !latched {
                self.blocked = Some(blocked);
            }
        }
        if let Some(summary) = update.validation_summary {
            if !latched {
                self.validation_summary = Some(summary);
            }
        }
        self.errors.extend(update.errors);
    }
}

/// What one stage wants merged into the state. `None` means "leave as is".
#[derive(Debug, Default, Clone)]
pub struct StageUpdate {
    pub similar_issues: Option<Vec<SimilarIssue>>,
    pub classification: Option<Classification>,
    pub recommendation: Option<Recommendation>,
    pub blocked: Option<bool>,
    pub validation_summary: Option<ValidationSummary>,
    pub errors: Vec<String>,
}

impl StageUpdate {
    pub fn unblocked() -> Self {
        Self {
            blocked: Some(false),
            ..Default::default()
        }
    }

    pub fn blocked(summary: ValidationSummary) -> Self {
        Self {
            blocked: Some(true),
            validation_summary: Some(summary),
            ..Default::default()
        }
    }
}
