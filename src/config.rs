use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub guardrails: GuardrailsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Deployment environment (dev, staging, prod). Prefixes the collection
    /// name so environments never share an index.
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_env() -> String {
    "dev".to_string()
}
fn default_collection() -> String {
    "github_issues_embeddings".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrent_comments")]
    pub concurrent_comments: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrent_comments: default_concurrent_comments(),
        }
    }
}

fn default_batch_size() -> usize {
    20
}
fn default_concurrent_comments() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Index backend: `sqlite` (persistent) or `memory` (in-process).
    #[serde(default = "default_index_backend")]
    pub backend: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
        }
    }
}

fn default_index_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Dense embedding provider: `openai` or `hashed` (deterministic local).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hashed".to_string()
}
fn default_dims() -> usize {
    1024
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            url: None,
            temperature: 0.0,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GuardrailsConfig {
    /// Base URL of the safety-model service consulted by the three checks.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "GuardCheckConfig::jailbreak_default")]
    pub jailbreak: GuardCheckConfig,
    #[serde(default = "GuardCheckConfig::toxicity_default")]
    pub toxicity: GuardCheckConfig,
    #[serde(default = "GuardCheckConfig::secrets_default")]
    pub secrets: GuardCheckConfig,
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            jailbreak: GuardCheckConfig::jailbreak_default(),
            toxicity: GuardCheckConfig::toxicity_default(),
            secrets: GuardCheckConfig::secrets_default(),
        }
    }
}

/// Per-check guardrail configuration. Loaded once at process start, not
/// mutable at runtime.
#[derive(Debug, Deserialize, Clone)]
pub struct GuardCheckConfig {
    pub threshold: f32,
    #[serde(default = "default_on_fail")]
    pub on_fail: String,
    #[serde(default = "default_validation_method")]
    pub validation_method: String,
}

fn default_on_fail() -> String {
    "exception".to_string()
}
fn default_validation_method() -> String {
    "sentence".to_string()
}

impl GuardCheckConfig {
    fn jailbreak_default() -> Self {
        Self {
            threshold: 0.8,
            on_fail: default_on_fail(),
            validation_method: "full".to_string(),
        }
    }
    fn toxicity_default() -> Self {
        Self {
            threshold: 0.5,
            on_fail: default_on_fail(),
            validation_method: default_validation_method(),
        }
    }
    fn secrets_default() -> Self {
        Self {
            threshold: 0.5,
            on_fail: default_on_fail(),
            validation_method: "full".to_string(),
        }
    }
}

impl Config {
    /// Fully-qualified collection name. Callers must not assume a fixed name
    /// across environments.
    pub fn collection_name(&self) -> String {
        format!("{}_{}", self.app.env, self.app.collection)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }

    if config.ingest.concurrent_comments == 0 {
        anyhow::bail!("ingest.concurrent_comments must be > 0");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    match config.index.backend.as_str() {
        "sqlite" | "memory" => {}
        other => anyhow::bail!(
            "Unknown index backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "hashed" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai or hashed.",
            other
        ),
    }

    for (name, check) in [
        ("jailbreak", &config.guardrails.jailbreak),
        ("toxicity", &config.guardrails.toxicity),
        ("secrets", &config.guardrails.secrets),
    ] {
        if !(0.0..=1.0).contains(&check.threshold) {
            anyhow::bail!("guardrails.{}.threshold must be in [0.0, 1.0]", name);
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("triage.toml");
        std::fs::write(&path, content).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_minimal_config() {
        let (_tmp, path) = write_config(
            r#"
[app]
env = "dev"

[db]
path = "data/triage.sqlite"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.collection_name(), "dev_github_issues_embeddings");
        assert_eq!(cfg.chunking.chunk_size, 1000);
        assert_eq!(cfg.ingest.batch_size, 20);
        assert_eq!(cfg.ingest.concurrent_comments, 5);
        assert_eq!(cfg.index.backend, "sqlite");
    }

    #[test]
    fn test_env_namespaces_collection() {
        let (_tmp, path) = write_config(
            r#"
[app]
env = "prod"
collection = "issues"

[db]
path = "data/triage.sqlite"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.collection_name(), "prod_issues");
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let (_tmp, path) = write_config(
            r#"
[app]
env = "dev"

[db]
path = "data/triage.sqlite"

[chunking]
chunk_size = 0
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_openai_provider_requires_model() {
        let (_tmp, path) = write_config(
            r#"
[app]
env = "dev"

[db]
path = "data/triage.sqlite"

[embedding]
provider = "openai"
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_guardrails_retry_settings() {
        let (_tmp, path) = write_config(
            r#"
[app]
env = "dev"

[db]
path = "data/triage.sqlite"

[guardrails]
url = "http://localhost:8000"
max_retries = 2
timeout_secs = 10
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.guardrails.max_retries, 2);
        assert_eq!(cfg.guardrails.timeout_secs, 10);

        // Defaults match the other HTTP providers.
        let (_tmp, path) = write_config(
            r#"
[app]
env = "dev"

[db]
path = "data/triage.sqlite"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.guardrails.max_retries, 5);
        assert_eq!(cfg.guardrails.timeout_secs, 30);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let (_tmp, path) = write_config(
            r#"
[app]
env = "dev"

[db]
path = "data/triage.sqlite"

[guardrails.toxicity]
threshold = 1.5
"#,
        );
        assert!(load_config(&path).is_err());
    }
}
