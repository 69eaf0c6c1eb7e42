//! The five workflow stage implementations.
//!
//! Each stage is an async function over the current state returning the
//! update it wants merged. Guard stages short-circuit: the first failing
//! check decides the validation summary and later checks never run.

use anyhow::{bail, Context, Result};

use crate::guard::{parse_confidence_score, FailureSummary};
use crate::models::SimilarIssue;
use crate::prompts;
use crate::state::{Classification, IssueState, Recommendation, StageUpdate, ValidationSummary};
use crate::store::DEFAULT_SEARCH_LIMIT;
use crate::workflow::Services;

/// Maximum reference URLs carried into a recommendation.
const MAX_REFERENCES: usize = 4;

/// Gate the raw input. Check order is fixed: jailbreak, then toxicity, then
/// secrets.
pub async fn input_guard(services: &Services, state: &IssueState) -> Result<StageUpdate> {
    let text = format!("{}\n{}", state.title, state.body);

    let verdict = services.validator.check_jailbreak(&text).await?;
    if !verdict.passed {
        let failure = authoritative(&verdict.failures)?;
        return Ok(StageUpdate::blocked(ValidationSummary::DetectJailbreak {
            score: parse_confidence_score(&failure.failure_reason),
            failure_reason: failure.failure_reason.clone(),
        }));
    }

    let verdict = services.validator.check_toxicity(&text).await?;
    if !verdict.passed {
        let failure = authoritative(&verdict.failures)?;
        return Ok(StageUpdate::blocked(
            ValidationSummary::ToxicLanguageInput {
                failure_reason: failure.failure_reason.clone(),
                error_spans: failure.error_spans.clone(),
            },
        ));
    }

    let verdict = services.validator.check_secrets(&text).await?;
    if !verdict.passed {
        let failure = authoritative(&verdict.failures)?;
        return Ok(StageUpdate::blocked(
            ValidationSummary::SecretsPresentInput {
                failure_reason: failure.failure_reason.clone(),
                error_spans: failure.error_spans.clone(),
            },
        ));
    }

    Ok(StageUpdate::unblocked())
}

/// Retrieve similar issues for context. Zero hits is a normal outcome.
pub async fn issue_search(services: &Services, state: &IssueState) -> Result<StageUpdate> {
    let query = format!("{} {}", state.title, state.body);
    let similar = services
        .store
        .search_similar_issues(&query, DEFAULT_SEARCH_LIMIT)
        .await?;

    Ok(StageUpdate {
        similar_issues: Some(similar),
        ..Default::default()
    })
}

/// Classify the issue via a structured chat completion. A response that does
/// not fit the schema is a hard error, not a silent default.
pub async fn classification(services: &Services, state: &IssueState) -> Result<StageUpdate> {
    let prompt = prompts::classification_prompt(&state.title, &state.body, &state.similar_issues);
    let value = services.llm.complete_structured(&prompt).await?;

    let classification: Classification = serde_json::from_value(value)
        .context("Classification response does not match the expected schema")?;

    if classification.labels.len() < 2 || classification.labels.len() > 5 {
        bail!(
            "Classification returned {} labels, expected 2 to 5",
            classification.labels.len()
        );
    }

    Ok(StageUpdate {
        classification: Some(classification),
        ..Default::default()
    })
}

/// Synthesize the triage summary from the classification and the deduped
/// reference URLs.
pub async fn recommendation(services: &Services, state: &IssueState) -> Result<StageUpdate> {
    let classification = state
        .classification
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Recommendation requires a classification"))?;

    let references = dedup_references(&state.similar_issues);
    let prompt = prompts::summary_prompt(&state.title, &state.body, classification, &references);
    let summary = services.llm.complete(&prompt).await?;

    Ok(StageUpdate {
        recommendation: Some(Recommendation {
            summary,
            references,
        }),
        ..Default::default()
    })
}

/// Gate the generated summary. Check order is fixed: toxicity, then secrets.
/// An empty summary has nothing to validate and exits unblocked.
pub async fn output_guard(services: &Services, state: &IssueState) -> Result<StageUpdate> {
    let summary = state
        .recommendation
        .as_ref()
        .map(|r| r.summary.as_str())
        .unwrap_or("");

    if summary.trim().is_empty() {
        return Ok(StageUpdate::unblocked());
    }

    let verdict = services.validator.check_toxicity(summary).await?;
    if !verdict.passed {
        let failure = authoritative(&verdict.failures)?;
        return Ok(StageUpdate::blocked(
            ValidationSummary::ToxicLanguageOutput {
                failure_reason: failure.failure_reason.clone(),
                error_spans: failure.error_spans.clone(),
            },
        ));
    }

    let verdict = services.validator.check_secrets(summary).await?;
    if !verdict.passed {
        let failure = authoritative(&verdict.failures)?;
        return Ok(StageUpdate::blocked(
            ValidationSummary::SecretsPresentOutput {
                failure_reason: failure.failure_reason.clone(),
                error_spans: failure.error_spans.clone(),
            },
        ));
    }

    Ok(StageUpdate::unblocked())
}

fn authoritative(failures: &[FailureSummary]) -> Result<&FailureSummary> {
    failures
        .first()
        .ok_or_else(|| anyhow::anyhow!("Failing guard verdict carried no failure summary"))
}

/// Reference URLs from similar issues, first-seen order, no duplicates,
/// capped at [`MAX_REFERENCES`].
pub fn dedup_references(similar: &[SimilarIssue]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut references = Vec::new();
    for issue in similar {
        if issue.url.is_empty() {
            continue;
        }
        if seen.insert(issue.url.clone()) {
            references.push(issue.url.clone());
            if references.len() == MAX_REFERENCES {
                break;
            }
        }
    }
    references
}

#[cfg(test)]
mod tests {
    use super::*;

    fn similar(url: &str) -> SimilarIssue {
        SimilarIssue {
            issue_number: 1,
            repo: "scikit-learn".to_string(),
            owner: "scikit-learn".to_string(),
            title: "t".to_string(),
            url: url.to_string(),
            comment_id: 1,
            chunk_text: "c".to_string(),
            score: 0.1,
            is_bug: false,
            is_feature: false,
        }
    }

    #[test]
    fn test_dedup_references_first_seen_order() {
        let issues: Vec<SimilarIssue> =
            ["A", "B", "A", "C", "A", "D", "E"].iter().map(|u| similar(u)).collect();
        assert_eq!(dedup_references(&issues), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_dedup_references_skips_empty_urls() {
        let issues = vec![similar(""), similar("A")];
        assert_eq!(dedup_references(&issues), vec!["A"]);
    }

    #[test]
    fn test_dedup_references_under_cap() {
        let issues = vec![similar("A"), similar("B")];
        assert_eq!(dedup_references(&issues), vec!["A", "B"]);
    }
}
