//! Prompt templates for the classification and recommendation stages.

use crate::models::SimilarIssue;
use crate::state::Classification;

/// Render the similar-issues block shared by both prompts.
fn render_similar_issues(similar: &[SimilarIssue]) -> String {
    if similar.is_empty() {
        return "No similar issues found.".to_string();
    }

    similar
        .iter()
        .map(|issue| {
            format!(
                "- #{} {} ({}) [bug={}, feature={}]\n  {}",
                issue.issue_number,
                issue.title,
                issue.url,
                issue.is_bug,
                issue.is_feature,
                issue.chunk_text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Structured-output request for the classification stage. The response must
/// be a JSON object with `category`, `priority`, `labels`, `assignee`.
pub fn classification_prompt(title: &str, body: &str, similar: &[SimilarIssue]) -> String {
    format!(
        "You are a GitHub issue triage assistant for a machine learning library.\n\
         Classify the new issue below using the historical context provided.\n\
         \n\
         New issue:\n\
         Title: {title}\n\
         Body: {body}\n\
         \n\
         Similar past issues:\n\
         {similar}\n\
         \n\
         Respond with a JSON object containing exactly these fields:\n\
         - \"category\": one of \"bug\", \"feature\", \"task\", \"no type\"\n\
         - \"priority\": one of \"high\", \"medium\", \"low\"\n\
         - \"labels\": an array of 2 to 5 repository labels\n\
         - \"assignee\": the team best suited to handle it\n",
        title = title,
        body = body,
        similar = render_similar_issues(similar),
    )
}

/// Free-text request for the recommendation stage summary.
pub fn summary_prompt(
    title: &str,
    body: &str,
    classification: &Classification,
    references: &[String],
) -> String {
    let references = if references.is_empty() {
        "No reference issues available.".to_string()
    } else {
        references
            .iter()
            .map(|url| format!("- {}", url))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are a GitHub issue triage assistant.\n\
         Write a short triage summary for the maintainers of the issue below.\n\
         Mention the classification verdict and point to the reference issues\n\
         where they are relevant.\n\
         \n\
         Issue:\n\
         Title: {title}\n\
         Body: {body}\n\
         \n\
         Classification:\n\
         - category: {category}\n\
         - priority: {priority}\n\
         - labels: {labels}\n\
         - assignee: {assignee}\n\
         \n\
         Reference issues:\n\
         {references}\n",
        title = title,
        body = body,
        category = classification.category,
        priority = classification.priority,
        labels = classification.labels.join(", "),
        assignee = classification.assignee,
        references = references,
    )
}
