//! Guardrail validation.
//!
//! Three checks gate the workflow: jailbreak detection, toxic language, and
//! secret presence. Each is independently configured and consults a
//! [`SafetyModel`] for the verdict. The validator itself only shapes the
//! result: a pass/fail flag plus an ordered list of failure summaries, the
//! first of which is authoritative.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{GuardCheckConfig, GuardrailsConfig};
use crate::state::ErrorSpan;

/// Which of the three checks a safety-model call is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardCheck {
    Jailbreak,
    Toxicity,
    Secrets,
}

impl GuardCheck {
    pub fn name(&self) -> &'static str {
        match self {
            GuardCheck::Jailbreak => "jailbreak",
            GuardCheck::Toxicity => "toxicity",
            GuardCheck::Secrets => "secrets",
        }
    }
}

/// One failure reported by a check.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FailureSummary {
    pub failure_reason: String,
    #[serde(default)]
    pub error_spans: Option<Vec<ErrorSpan>>,
}

/// Verdict of one check. `failures` is non-empty iff `passed` is false;
/// its first element is authoritative.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardVerdict {
    pub passed: bool,
    pub failures: Vec<FailureSummary>,
}

impl GuardVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            failures: Vec::new(),
        }
    }

    pub fn fail(failures: Vec<FailureSummary>) -> Self {
        Self {
            passed: false,
            failures,
        }
    }

    /// The authoritative failure, if any.
    pub fn first_failure(&self) -> Option<&FailureSummary> {
        self.failures.first()
    }
}

/// The model behind the checks. Implementations must be stateless per call
/// and shareable across concurrent workflow instances.
#[async_trait]
pub trait SafetyModel: Send + Sync {
    async fn evaluate(
        &self,
        check: GuardCheck,
        text: &str,
        config: &GuardCheckConfig,
    ) -> Result<GuardVerdict>;
}

/// Runs the three configured checks against a shared [`SafetyModel`].
pub struct GuardrailValidator {
    model: Arc<dyn SafetyModel>,
    config: GuardrailsConfig,
}

impl GuardrailValidator {
    pub fn new(model: Arc<dyn SafetyModel>, config: GuardrailsConfig) -> Self {
        Self { model, config }
    }

    pub async fn check_jailbreak(&self, text: &str) -> Result<GuardVerdict> {
        self.model
            .evaluate(GuardCheck::Jailbreak, text, &self.config.jailbreak)
            .await
    }

    pub async fn check_toxicity(&self, text: &str) -> Result<GuardVerdict> {
        self.model
            .evaluate(GuardCheck::Toxicity, text, &self.config.toxicity)
            .await
    }

    pub async fn check_secrets(&self, text: &str) -> Result<GuardVerdict> {
        self.model
            .evaluate(GuardCheck::Secrets, text, &self.config.secrets)
            .await
    }
}

/// Extract a confidence score from a `"... Score: 0.87 ..."`-shaped reason.
/// Anything unparseable yields `None`, never an error.
pub fn parse_confidence_score(reason: &str) -> Option<f32> {
    let start = reason.find("Score:")? + "Score:".len();
    let rest = reason[start..].trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(rest.len());
    rest[..end].parse::<f32>().ok().filter(|s| s.is_finite())
}

// ============ HTTP Provider ============

#[derive(Debug, Deserialize)]
struct SafetyResponse {
    validation_passed: bool,
    #[serde(default)]
    failures: Vec<FailureSummary>,
}

/// Safety checks via an HTTP service: `POST {url}/v1/validate` with the
/// check name, text, and per-check configuration. Transient errors (429,
/// 5xx, network) are retried with exponential backoff; other client errors
/// fail immediately.
pub struct HttpSafetyModel {
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpSafetyModel {
    pub fn new(config: &GuardrailsConfig) -> Result<Self> {
        let url = match &config.url {
            Some(url) => url.clone(),
            None => bail!("guardrails.url required for the HTTP safety model"),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            url,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl SafetyModel for HttpSafetyModel {
    async fn evaluate(
        &self,
        check: GuardCheck,
        text: &str,
        config: &GuardCheckConfig,
    ) -> Result<GuardVerdict> {
        let body = serde_json::json!({
            "check": check.name(),
            "text": text,
            "threshold": config.threshold,
            "on_fail": config.on_fail,
            "validation_method": config.validation_method,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/v1/validate", self.url))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: SafetyResponse = response.json().await?;
                        return Ok(if parsed.validation_passed {
                            GuardVerdict::pass()
                        } else if parsed.failures.is_empty() {
                            // A failing verdict must carry at least one reason.
                            GuardVerdict::fail(vec![FailureSummary {
                                failure_reason: format!("{} check failed", check.name()),
                                error_spans: None,
                            }])
                        } else {
                            GuardVerdict::fail(parsed.failures)
                        });
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Safety model error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Safety model error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Safety model failed after retries")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_score_plain() {
        assert_eq!(parse_confidence_score("Score: 0.87"), Some(0.87));
    }

    #[test]
    fn test_parse_score_embedded() {
        let reason = "Jailbreak attempt detected. Score: 0.93, above threshold";
        assert_eq!(parse_confidence_score(reason), Some(0.93));
    }

    #[test]
    fn test_parse_score_missing() {
        assert_eq!(parse_confidence_score("no score here"), None);
    }

    #[test]
    fn test_parse_score_unparseable_value() {
        assert_eq!(parse_confidence_score("Score: high"), None);
        assert_eq!(parse_confidence_score("Score: "), None);
    }

    #[test]
    fn test_verdict_first_failure() {
        let verdict = GuardVerdict::fail(vec![
            FailureSummary {
                failure_reason: "first".to_string(),
                error_spans: None,
            },
            FailureSummary {
                failure_reason: "second".to_string(),
                error_spans: None,
            },
        ]);
        assert_eq!(verdict.first_failure().unwrap().failure_reason, "first");
    }

    #[test]
    fn test_http_model_takes_retry_settings_from_config() {
        let mut config = GuardrailsConfig::default();
        config.url = Some("http://localhost:8000".to_string());
        config.max_retries = 2;
        config.timeout_secs = 10;

        let model = HttpSafetyModel::new(&config).unwrap();
        assert_eq!(model.max_retries, 2);
    }

    #[test]
    fn test_http_model_requires_url() {
        assert!(HttpSafetyModel::new(&GuardrailsConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_validator_dispatches_check_config() {
        struct Capture;

        #[async_trait]
        impl SafetyModel for Capture {
            async fn evaluate(
                &self,
                check: GuardCheck,
                _text: &str,
                config: &GuardCheckConfig,
            ) -> Result<GuardVerdict> {
                // Echo the threshold back so the test can see which
                // per-check config was used.
                Ok(GuardVerdict::fail(vec![FailureSummary {
                    failure_reason: format!("{}:{}", check.name(), config.threshold),
                    error_spans: None,
                }]))
            }
        }

        let mut config = GuardrailsConfig::default();
        config.jailbreak.threshold = 0.8;
        config.toxicity.threshold = 0.5;

        let validator = GuardrailValidator::new(Arc::new(Capture), config);
        let verdict = validator.check_jailbreak("text").await.unwrap();
        assert_eq!(
            verdict.first_failure().unwrap().failure_reason,
            "jailbreak:0.8"
        );
        let verdict = validator.check_toxicity("text").await.unwrap();
        assert_eq!(
            verdict.first_failure().unwrap().failure_reason,
            "toxicity:0.5"
        );
    }
}
