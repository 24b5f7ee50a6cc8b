//! TOML configuration parsing and validation.
//!
//! All settings for the store connection, input files, embedding provider,
//! indexing run and HTTP server are read from a single TOML file. Every
//! optional value has a default; [`load_config`] validates the result before
//! returning it.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::statement::{ANSWER_PLACEHOLDER, DEFAULT_TEMPLATE, QUESTION_PLACEHOLDER};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    pub data: DataConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Analyzer applied to `q_text` and `answer_text`.
    #[serde(default = "default_analyzer")]
    pub analyzer: String,
    /// Upper bound on one `_bulk` request body. Larger writes are split.
    #[serde(default = "default_bulk_max_bytes")]
    pub bulk_max_bytes: usize,
    /// Upper bound on documents per `_bulk` request.
    #[serde(default = "default_bulk_max_actions")]
    pub bulk_max_actions: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            index: default_index(),
            timeout_secs: default_timeout_secs(),
            analyzer: default_analyzer(),
            bulk_max_bytes: default_bulk_max_bytes(),
            bulk_max_actions: default_bulk_max_actions(),
        }
    }
}

fn default_store_url() -> String {
    "http://localhost:9200".to_string()
}
fn default_index() -> String {
    "survey_responses".to_string()
}
fn default_analyzer() -> String {
    "nori".to_string()
}
fn default_bulk_max_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_bulk_max_actions() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// Question/option schema file.
    pub questions: PathBuf,
    /// Response table (delimited, header row).
    pub responses: PathBuf,
    #[serde(default = "default_user_id_column")]
    pub user_id_column: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

fn default_user_id_column() -> String {
    "mb_sn".to_string()
}
fn default_delimiter() -> String {
    ",".to_string()
}

impl DataConfig {
    /// The delimiter as a single byte. Validated by [`load_config`].
    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter.as_bytes().first().copied().unwrap_or(b',')
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum number of embedding batches in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            concurrency: 4,
            max_retries: 5,
            timeout_secs: 30,
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Users per normalize → embed → bulk-write window.
    #[serde(default = "default_flush_rows")]
    pub flush_rows: usize,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// Refresh the index after the last flush so documents are searchable immediately.
    #[serde(default = "default_refresh")]
    pub refresh: bool,
    #[serde(default = "default_template")]
    pub embedding_template: String,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            flush_rows: default_flush_rows(),
            run_timeout_secs: default_run_timeout_secs(),
            refresh: default_refresh(),
            embedding_template: default_template(),
        }
    }
}

fn default_flush_rows() -> usize {
    200
}
fn default_run_timeout_secs() -> u64 {
    3600
}
fn default_refresh() -> bool {
    true
}
fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Checks cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.store.index.trim().is_empty() {
        anyhow::bail!("store.index must not be empty");
    }
    if config.store.timeout_secs == 0 {
        anyhow::bail!("store.timeout_secs must be > 0");
    }
    if config.store.bulk_max_bytes == 0 {
        anyhow::bail!("store.bulk_max_bytes must be > 0");
    }
    if config.store.bulk_max_actions == 0 {
        anyhow::bail!("store.bulk_max_actions must be > 0");
    }

    if config.data.delimiter.len() != 1 || !config.data.delimiter.is_ascii() {
        anyhow::bail!(
            "data.delimiter must be a single ASCII character, got '{}'",
            config.data.delimiter
        );
    }
    if config.data.user_id_column.trim().is_empty() {
        anyhow::bail!("data.user_id_column must not be empty");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.concurrency == 0 {
        anyhow::bail!("embedding.concurrency must be > 0");
    }
    if config.embedding.timeout_secs == 0 {
        anyhow::bail!("embedding.timeout_secs must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if config.indexing.flush_rows == 0 {
        anyhow::bail!("indexing.flush_rows must be > 0");
    }
    if config.indexing.run_timeout_secs == 0 {
        anyhow::bail!("indexing.run_timeout_secs must be > 0");
    }
    let template = &config.indexing.embedding_template;
    if !template.contains(QUESTION_PLACEHOLDER) || !template.contains(ANSWER_PLACEHOLDER) {
        anyhow::bail!(
            "indexing.embedding_template must contain both {} and {}",
            QUESTION_PLACEHOLDER,
            ANSWER_PLACEHOLDER
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    const MINIMAL: &str = r#"
[data]
questions = "q.csv"
responses = "r.csv"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse(MINIMAL).unwrap();
        assert_eq!(cfg.store.url, "http://localhost:9200");
        assert_eq!(cfg.store.index, "survey_responses");
        assert_eq!(cfg.store.analyzer, "nori");
        assert_eq!(cfg.data.user_id_column, "mb_sn");
        assert_eq!(cfg.data.delimiter_byte(), b',');
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.indexing.flush_rows, 200);
        assert!(cfg.indexing.refresh);
        assert_eq!(cfg.indexing.embedding_template, DEFAULT_TEMPLATE);
        assert_eq!(cfg.server.bind, "127.0.0.1:8000");
        assert_eq!(cfg.store.bulk_max_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.store.bulk_max_actions, 500);
    }

    #[test]
    fn zero_timeouts_rejected() {
        for (section, key) in [
            ("store", "timeout_secs"),
            ("embedding", "timeout_secs"),
            ("indexing", "run_timeout_secs"),
        ] {
            let cfg = format!("{}\n[{}]\n{} = 0\n", MINIMAL, section, key);
            let err = parse(&cfg).unwrap_err();
            assert!(
                err.to_string().contains(&format!("{}.{}", section, key)),
                "{}",
                err
            );
        }
    }

    #[test]
    fn zero_bulk_limits_rejected() {
        let cfg = format!("{}\n[store]\nbulk_max_bytes = 0\n", MINIMAL);
        assert!(parse(&cfg)
            .unwrap_err()
            .to_string()
            .contains("store.bulk_max_bytes"));

        let cfg = format!("{}\n[store]\nbulk_max_actions = 0\n", MINIMAL);
        assert!(parse(&cfg)
            .unwrap_err()
            .to_string()
            .contains("store.bulk_max_actions"));
    }

    #[test]
    fn enabled_provider_requires_dims_and_model() {
        let missing_dims = format!(
            "{}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
            MINIMAL
        );
        let err = parse(&missing_dims).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));

        let missing_model = format!("{}\n[embedding]\nprovider = \"ollama\"\ndims = 768\n", MINIMAL);
        let err = parse(&missing_model).unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn unknown_provider_rejected() {
        let cfg = format!(
            "{}\n[embedding]\nprovider = \"magic\"\nmodel = \"m\"\ndims = 3\n",
            MINIMAL
        );
        let err = parse(&cfg).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn multi_char_delimiter_rejected() {
        let cfg = r#"
[data]
questions = "q.csv"
responses = "r.csv"
delimiter = "||"
"#;
        assert!(parse(cfg).is_err());
    }

    #[test]
    fn template_must_name_both_placeholders() {
        let cfg = format!(
            "{}\n[indexing]\nembedding_template = \"{{question}} only\"\n",
            MINIMAL
        );
        let err = parse(&cfg).unwrap_err();
        assert!(err.to_string().contains("embedding_template"));
    }
}
