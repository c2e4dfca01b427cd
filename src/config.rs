//! TOML configuration parsing and validation.
//!
//! A configuration file looks like:
//!
//! ```toml
//! [db]
//! path = "./data/cke.sqlite"
//!
//! [chunking]
//! max_length = 500
//! overlap = 20
//!
//! [index]
//! name = "college-knowledge"
//! metric = "cosine"
//!
//! [retrieval]
//! top_k = 3
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//! dims = 384
//!
//! [llm]
//! model = "gpt-3.5-turbo-1106"
//! temperature = 0.5
//! max_tokens = 1000
//! timeout_secs = 30
//!
//! [domain]
//! gate = "strict"
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! ```
//!
//! Every section except `[db]` may be omitted; omitted fields take the
//! defaults shown above.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::index::Metric;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub domain: DomainConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            overlap: default_overlap(),
        }
    }
}

fn default_max_length() -> usize {
    500
}
fn default_overlap() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_name")]
    pub name: String,
    #[serde(default = "default_metric")]
    pub metric: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: default_index_name(),
            metric: default_metric(),
        }
    }
}

impl IndexConfig {
    pub fn metric(&self) -> Result<Metric> {
        self.metric.parse().map_err(anyhow::Error::from)
    }
}

fn default_index_name() -> String {
    "college-knowledge".to_string()
}
fn default_metric() -> String {
    "cosine".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider (default: `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    32
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
    /// OpenAI-compatible API root, e.g. `https://api.openai.com/v1` or a local
    /// server exposing `/chat/completions`.
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            url: default_llm_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_llm_retries(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-3.5-turbo-1106".to_string()
}
fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_temperature() -> f32 {
    0.5
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_llm_retries() -> u32 {
    2
}

/// How the keyword classifier participates in the query path.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DomainGate {
    /// Off-domain questions are refused before retrieval or any model call.
    #[default]
    Strict,
    /// The classifier's verdict is only logged; the synthesis prompt alone
    /// restricts the domain.
    Advisory,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DomainConfig {
    #[serde(default)]
    pub gate: DomainGate,
    /// Additional keywords appended to the built-in vocabulary.
    #[serde(default)]
    pub extra_keywords: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
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
    "127.0.0.1:8080".to_string()
}

impl Config {
    /// A configuration with every section at its default, storing the
    /// database at `db_path`.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            chunking: ChunkingConfig::default(),
            index: IndexConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            domain: DomainConfig::default(),
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_length == 0 {
            bail!("chunking.max_length must be > 0");
        }
        if self.chunking.overlap >= self.chunking.max_length {
            bail!(
                "chunking.overlap ({}) must be less than chunking.max_length ({})",
                self.chunking.overlap,
                self.chunking.max_length
            );
        }

        if self.retrieval.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }

        if self.index.name.trim().is_empty() {
            bail!("index.name must not be empty");
        }
        self.index.metric()?;

        match self.embedding.provider.as_str() {
            "local" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be local, openai, or ollama.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.provider != "local" {
            if self.embedding.dims.is_none() {
                bail!(
                    "embedding.dims must be set when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be > 0");
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("llm.temperature must be in [0.0, 2.0]");
        }
        if self.llm.max_tokens == 0 {
            bail!("llm.max_tokens must be > 0");
        }
        if self.llm.timeout_secs == 0 {
            bail!("llm.timeout_secs must be > 0");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults_from_db_only() {
        let config = parse("[db]\npath = \"/tmp/cke.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.max_length, 500);
        assert_eq!(config.chunking.overlap, 20);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.llm.timeout_secs, 30);
        assert_eq!(config.llm.max_tokens, 1000);
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.domain.gate, DomainGate::Strict);
        assert_eq!(config.index.metric().unwrap(), Metric::Cosine);
    }

    #[test]
    fn test_overlap_must_be_below_max_length() {
        let err = parse("[db]\npath = \"x\"\n[chunking]\nmax_length = 20\noverlap = 20\n")
            .unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_top_k_zero_rejected() {
        assert!(parse("[db]\npath = \"x\"\n[retrieval]\ntop_k = 0\n").is_err());
    }

    #[test]
    fn test_remote_provider_requires_model_and_dims() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("dims"));

        let ok = parse(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_unknown_provider_and_metric_rejected() {
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[index]\nmetric = \"manhattan\"\n").is_err());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\ntimeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("embedding.timeout_secs"));
        let err = parse("[db]\npath = \"x\"\n[llm]\ntimeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("llm.timeout_secs"));
    }

    #[test]
    fn test_advisory_gate_parses() {
        let config = parse(
            "[db]\npath = \"x\"\n[domain]\ngate = \"advisory\"\nextra_keywords = [\"convocation\"]\n",
        )
        .unwrap();
        assert_eq!(config.domain.gate, DomainGate::Advisory);
        assert_eq!(config.domain.extra_keywords, vec!["convocation"]);
    }

    #[test]
    fn test_minimal_validates() {
        assert!(Config::minimal("/tmp/x.sqlite").validate().is_ok());
    }
}
