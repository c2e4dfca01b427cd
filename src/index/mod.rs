//! Vector index abstraction.
//!
//! A [`VectorIndex`] stores [`IndexEntry`]s in named indexes and answers
//! top-k nearest-neighbour queries. Two backends are provided:
//!
//! - [`SqliteIndex`]: persistent, vectors as little-endian f32 BLOBs,
//!   brute-force scoring.
//! - [`MemoryIndex`]: process-local, for tests and throwaway runs.
//!
//! Both backends rank by descending score and break ties by insertion
//! order. Replacing an entry keeps its original insertion position.

pub mod memory;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::embedding::{cosine_similarity, dot_product};
use crate::error::{PipelineError, Result};
use crate::models::{IndexEntry, SearchHit};

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

/// Similarity measure of an index. Higher scores are always better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    DotProduct,
    /// Scored as the negated Euclidean distance.
    Euclidean,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::DotProduct => "dotproduct",
            Self::Euclidean => "euclidean",
        }
    }

    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_similarity(a, b),
            Self::DotProduct => dot_product(a, b),
            Self::Euclidean => {
                let sq: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
                -sq.sqrt()
            }
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dotproduct" | "dot" => Ok(Self::DotProduct),
            "euclidean" => Ok(Self::Euclidean),
            other => Err(PipelineError::Config(format!(
                "unknown index metric '{}'. Must be cosine, dotproduct, or euclidean.",
                other
            ))),
        }
    }
}

/// The shape of an existing index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
}

/// Storage backend for embedded chunks.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// session of the process.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn index_exists(&self, name: &str) -> Result<bool>;

    /// Create an empty index. Fails if `name` already exists.
    async fn create_index(&self, name: &str, dimension: usize, metric: Metric) -> Result<()>;

    async fn describe_index(&self, name: &str) -> Result<Option<IndexSpec>>;

    /// Insert or replace entries by id. Returns the number of entries written.
    async fn upsert(&self, index: &str, entries: &[IndexEntry]) -> Result<usize>;

    /// The `min(k, count)` best entries for `query`, best first.
    async fn search(&self, index: &str, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Delete entries of `document_id` whose id is not in `keep_ids`.
    /// Returns the number of entries removed.
    async fn prune_document(&self, index: &str, document_id: &str, keep_ids: &[String])
        -> Result<u64>;

    async fn count(&self, index: &str) -> Result<u64>;
}

/// Create `name` if absent, otherwise verify that its dimension matches the
/// embedding provider's.
pub async fn ensure_index(
    index: &dyn VectorIndex,
    name: &str,
    dimension: usize,
    metric: Metric,
) -> Result<IndexSpec> {
    match index.describe_index(name).await? {
        Some(spec) if spec.dimension != dimension => Err(PipelineError::IndexDimensionMismatch {
            index: name.to_string(),
            index_dims: spec.dimension,
            provider_dims: dimension,
        }),
        Some(spec) => {
            if spec.metric != metric {
                tracing::warn!(
                    index = name,
                    existing = %spec.metric,
                    configured = %metric,
                    "index metric differs from configuration; using the existing metric"
                );
            }
            Ok(spec)
        }
        None => {
            index.create_index(name, dimension, metric).await?;
            info!(index = name, dimension, metric = %metric, "created vector index");
            Ok(IndexSpec {
                name: name.to_string(),
                dimension,
                metric,
            })
        }
    }
}

fn check_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(PipelineError::Index("k must be >= 1".to_string()));
    }
    Ok(())
}

fn check_dimension(spec: &IndexSpec, vector: &[f32], what: &str) -> Result<()> {
    if vector.len() != spec.dimension {
        return Err(PipelineError::Index(format!(
            "{} has dimension {} but index '{}' expects {}",
            what,
            vector.len(),
            spec.name,
            spec.dimension
        )));
    }
    Ok(())
}

fn missing_index(name: &str) -> PipelineError {
    PipelineError::Index(format!("index '{}' does not exist", name))
}

/// Sort `(insertion_seq, hit)` pairs best-first and keep the top `k`.
fn rank(mut scored: Vec<(i64, SearchHit)>, k: usize) -> Vec<SearchHit> {
    scored.sort_by(|(seq_a, a), (seq_b, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(seq_a.cmp(seq_b))
    });
    scored.truncate(k);
    scored.into_iter().map(|(_, hit)| hit).collect()
}
