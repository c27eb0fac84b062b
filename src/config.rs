//! TOML configuration parsing and validation.
//!
//! The config file carries everything that is *not* a secret: warehouse
//! project/dataset, model names, corpus location, and the declarative seed
//! corpus. Secrets (the service-account credential and the model API key)
//! never live here; they are resolved separately by
//! [`crate::credentials::CredentialResolver`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::CorpusEntry;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub model: ModelConfig,
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WarehouseConfig {
    /// GCP project id. Optional: falls back to the service-account key's
    /// own project id during credential resolution.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Dataset the generated SQL runs against.
    pub dataset: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_model_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            embedding_model: default_embedding_model(),
            base_url: default_model_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_model_name() -> String {
    "gemini-pro".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-004".to_string()
}
fn default_model_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

/// Corpus store location plus the declarative seed payload.
///
/// The seed arrays replace ad-hoc training calls scattered through UI code:
/// `ttq seed` reads them and hands them to the bootstrapper in schema →
/// docs → examples order.
#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Nearest-neighbour entries pulled into the generation prompt.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub schema: Vec<String>,
    #[serde(default)]
    pub docs: Vec<String>,
    #[serde(default)]
    pub examples: Vec<ExamplePair>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExamplePair {
    pub question: String,
    pub sql: String,
}

fn default_corpus_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_collection() -> String {
    "table_talk".to_string()
}
fn default_top_k() -> usize {
    10
}

/// Where the credential resolver looks before the process environment.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CredentialsConfig {
    /// Secrets-manager-style directory: one file per key, named after the
    /// key (the `/run/secrets` convention).
    #[serde(default)]
    pub secrets_dir: Option<PathBuf>,
    /// Local TOML credentials file with string values keyed by the same
    /// names as the environment variables.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl CorpusConfig {
    /// Seed entries in insertion order: schema, then docs, then examples.
    pub fn seed_entries(&self) -> Vec<CorpusEntry> {
        let mut entries = Vec::new();
        for ddl in &self.schema {
            entries.push(CorpusEntry::Schema { ddl: ddl.clone() });
        }
        for text in &self.docs {
            entries.push(CorpusEntry::Doc { text: text.clone() });
        }
        for pair in &self.examples {
            entries.push(CorpusEntry::Example {
                question: pair.question.clone(),
                sql: pair.sql.clone(),
            });
        }
        entries
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.warehouse.dataset.trim().is_empty() {
        anyhow::bail!("warehouse.dataset must not be empty");
    }

    if config.warehouse.timeout_secs == 0 || config.model.timeout_secs == 0 {
        anyhow::bail!("timeout_secs must be > 0");
    }

    if config.corpus.top_k == 0 {
        anyhow::bail!("corpus.top_k must be >= 1");
    }

    if config.model.name.trim().is_empty() {
        anyhow::bail!("model.name must not be empty");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let file = write_config(
            r#"[warehouse]
dataset = "seat"

[corpus]
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.model.name, "gemini-pro");
        assert_eq!(config.corpus.top_k, 10);
        assert_eq!(config.warehouse.timeout_secs, 30);
        assert!(config.credentials.secrets_dir.is_none());
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let file = write_config(
            r#"[warehouse]
dataset = ""

[corpus]
"#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let file = write_config(
            r#"[warehouse]
dataset = "seat"

[corpus]
top_k = 0
"#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_seed_entries_ordered_schema_docs_examples() {
        let file = write_config(
            r#"[warehouse]
dataset = "seat"

[corpus]
schema = ["create table allocations (id int64)"]
docs = ["allocations hold active placements"]

[[corpus.examples]]
question = "how many allocations are active today?"
sql = "select count(*) from allocations where end_at >= current_date"
"#,
        );
        let config = load_config(file.path()).unwrap();
        let entries = config.corpus.seed_entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind(), "schema");
        assert_eq!(entries[1].kind(), "doc");
        assert_eq!(entries[2].kind(), "example");
    }
}
