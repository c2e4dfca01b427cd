//! In-memory [`VectorIndex`] for tests and ephemeral runs.
//!
//! Entries live in a `Vec` (insertion order) behind `std::sync::RwLock`.
//! Search is brute force over every entry.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{check_dimension, check_k, missing_index, rank, IndexSpec, Metric, VectorIndex};
use crate::error::{PipelineError, Result};
use crate::models::{IndexEntry, SearchHit};

struct StoredIndex {
    spec: IndexSpec,
    entries: Vec<IndexEntry>,
}

/// Process-local vector index.
#[derive(Default)]
pub struct MemoryIndex {
    indexes: RwLock<HashMap<String, StoredIndex>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, StoredIndex>>> {
        self.indexes
            .read()
            .map_err(|_| PipelineError::Index("index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, StoredIndex>>> {
        self.indexes
            .write()
            .map_err(|_| PipelineError::Index("index lock poisoned".to_string()))
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn index_exists(&self, name: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(name))
    }

    async fn create_index(&self, name: &str, dimension: usize, metric: Metric) -> Result<()> {
        let mut indexes = self.write()?;
        if indexes.contains_key(name) {
            return Err(PipelineError::Index(format!("index '{}' already exists", name)));
        }
        indexes.insert(
            name.to_string(),
            StoredIndex {
                spec: IndexSpec {
                    name: name.to_string(),
                    dimension,
                    metric,
                },
                entries: Vec::new(),
            },
        );
        Ok(())
    }

    async fn describe_index(&self, name: &str) -> Result<Option<IndexSpec>> {
        Ok(self.read()?.get(name).map(|stored| stored.spec.clone()))
    }

    async fn upsert(&self, index: &str, entries: &[IndexEntry]) -> Result<usize> {
        let mut indexes = self.write()?;
        let stored = indexes.get_mut(index).ok_or_else(|| missing_index(index))?;

        for entry in entries {
            check_dimension(&stored.spec, &entry.vector, "entry vector")?;
        }

        for entry in entries {
            match stored.entries.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry.clone(),
                None => stored.entries.push(entry.clone()),
            }
        }
        Ok(entries.len())
    }

    async fn search(&self, index: &str, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        check_k(k)?;
        let indexes = self.read()?;
        let stored = indexes.get(index).ok_or_else(|| missing_index(index))?;
        check_dimension(&stored.spec, query, "query vector")?;

        let scored = stored
            .entries
            .iter()
            .enumerate()
            .map(|(seq, entry)| {
                (
                    seq as i64,
                    SearchHit {
                        id: entry.id.clone(),
                        text: entry.text.clone(),
                        metadata: entry.metadata.clone(),
                        score: stored.spec.metric.score(query, &entry.vector),
                    },
                )
            })
            .collect();

        Ok(rank(scored, k))
    }

    async fn prune_document(
        &self,
        index: &str,
        document_id: &str,
        keep_ids: &[String],
    ) -> Result<u64> {
        let mut indexes = self.write()?;
        let stored = indexes.get_mut(index).ok_or_else(|| missing_index(index))?;

        let before = stored.entries.len();
        stored
            .entries
            .retain(|e| e.metadata.document_id != document_id || keep_ids.contains(&e.id));
        Ok((before - stored.entries.len()) as u64)
    }

    async fn count(&self, index: &str) -> Result<u64> {
        let indexes = self.read()?;
        let stored = indexes.get(index).ok_or_else(|| missing_index(index))?;
        Ok(stored.entries.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ensure_index;
    use crate::models::{DocumentKind, SourceMetadata};

    fn entry(id: &str, doc: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            vector,
            text: format!("text of {}", id),
            metadata: SourceMetadata {
                document_id: doc.to_string(),
                kind: DocumentKind::Txt,
                page: None,
            },
        }
    }

    async fn index_with(entries: &[IndexEntry]) -> MemoryIndex {
        let index = MemoryIndex::new();
        index.create_index("idx", 2, Metric::Cosine).await.unwrap();
        index.upsert("idx", entries).await.unwrap();
        index
    }

    #[tokio::test]
    async fn test_search_orders_by_score_and_truncates() {
        let index = index_with(&[
            entry("far", "d", vec![0.0, 1.0]),
            entry("near", "d", vec![1.0, 0.1]),
            entry("mid", "d", vec![1.0, 1.0]),
        ])
        .await;

        let hits = index.search("idx", &[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(hits[0].score >= hits[1].score);

        let all = index.search("idx", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_ties_break_by_insertion_order() {
        let index = index_with(&[
            entry("first", "d", vec![1.0, 0.0]),
            entry("second", "d", vec![2.0, 0.0]),
            entry("third", "d", vec![0.5, 0.0]),
        ])
        .await;
        let hits = index.search("idx", &[1.0, 0.0], 3).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_in_place() {
        let index = index_with(&[
            entry("a", "d", vec![1.0, 0.0]),
            entry("b", "d", vec![1.0, 0.0]),
        ])
        .await;
        let mut replacement = entry("a", "d", vec![1.0, 0.0]);
        replacement.text = "updated".to_string();
        index.upsert("idx", &[replacement]).await.unwrap();

        assert_eq!(index.count("idx").await.unwrap(), 2);
        let hits = index.search("idx", &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].text, "updated");
    }

    #[tokio::test]
    async fn test_k_zero_and_bad_dimensions_rejected() {
        let index = index_with(&[entry("a", "d", vec![1.0, 0.0])]).await;
        assert!(index.search("idx", &[1.0, 0.0], 0).await.is_err());
        assert!(index.search("idx", &[1.0, 0.0, 0.0], 1).await.is_err());
        assert!(index
            .upsert("idx", &[entry("b", "d", vec![1.0])])
            .await
            .is_err());
        assert!(index.search("missing", &[1.0, 0.0], 1).await.is_err());
    }

    #[tokio::test]
    async fn test_prune_keeps_other_documents() {
        let index = index_with(&[
            entry("a0", "a", vec![1.0, 0.0]),
            entry("a1", "a", vec![1.0, 0.0]),
            entry("b0", "b", vec![1.0, 0.0]),
        ])
        .await;
        let removed = index
            .prune_document("idx", "a", &["a0".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.count("idx").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ensure_index_detects_dimension_mismatch() {
        let index = MemoryIndex::new();
        let spec = ensure_index(&index, "idx", 384, Metric::Cosine).await.unwrap();
        assert_eq!(spec.dimension, 384);
        assert!(index.index_exists("idx").await.unwrap());

        ensure_index(&index, "idx", 384, Metric::Cosine).await.unwrap();
        let err = ensure_index(&index, "idx", 768, Metric::Cosine).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::IndexDimensionMismatch {
                index_dims: 384,
                provider_dims: 768,
                ..
            }
        ));
    }
}
