//! Offline ingestion: file → loader → chunker → embeddings → vector index.
//!
//! Re-ingesting a file upserts its chunks under the same deterministic ids
//! and then prunes ids the new chunking no longer produces, so the index
//! never holds stale chunks of a document.
//!
//! Batch runs are per-file: an unsupported extension, a parse failure or an
//! embedding failure is recorded in the [`IngestReport`] and the batch moves
//! on. Index and storage failures abort the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::chunk::chunk;
use crate::config::{ChunkingConfig, IngestConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{PipelineError, Result};
use crate::index::VectorIndex;
use crate::loader;
use crate::models::{document_id, IndexEntry};

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/.*", "**/~$*"];

/// Result of one file in a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileStatus {
    Ingested { chunks: usize },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: FileStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub files: Vec<FileReport>,
}

impl IngestReport {
    pub fn total_chunks(&self) -> usize {
        self.files
            .iter()
            .map(|f| match f.status {
                FileStatus::Ingested { chunks } => chunks,
                _ => 0,
            })
            .sum()
    }

    pub fn ingested(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Ingested { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&FileStatus) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.status)).count()
    }
}

/// Writes documents into one named vector index.
#[derive(Clone)]
pub struct Ingestor {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    index_name: String,
    chunking: ChunkingConfig,
    walk: IngestConfig,
}

impl Ingestor {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        index_name: impl Into<String>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            index_name: index_name.into(),
            chunking,
            walk: IngestConfig::default(),
        }
    }

    /// Globs and symlink policy for [`ingest_dir`](Self::ingest_dir).
    pub fn with_walk_config(mut self, walk: IngestConfig) -> Self {
        self.walk = walk;
        self
    }

    /// Ingest one file. Returns the number of chunks written.
    pub async fn ingest(&self, path: &Path) -> Result<usize> {
        let owned = path.to_path_buf();
        let (units, doc_id) = tokio::task::spawn_blocking(move || {
            loader::load(&owned).map(|units| (units, document_id(&owned)))
        })
        .await
        .map_err(|e| PipelineError::load(path, e))??;

        let chunks = chunk(&units, self.chunking.max_length, self.chunking.overlap);

        if chunks.is_empty() {
            let removed = self
                .index
                .prune_document(&self.index_name, &doc_id, &[])
                .await?;
            warn!(path = %path.display(), removed, "document has no text");
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let keep_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::from_chunk(chunk, vector))
            .collect();

        let written = self.index.upsert(&self.index_name, &entries).await?;
        let pruned = self
            .index
            .prune_document(&self.index_name, &doc_id, &keep_ids)
            .await?;

        info!(path = %path.display(), chunks = written, pruned, "ingested file");
        Ok(written)
    }

    /// Ingest every path, recording per-file failures in the report.
    pub async fn ingest_batch(&self, paths: &[PathBuf]) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for path in paths {
            let status = match self.ingest(path).await {
                Ok(chunks) => FileStatus::Ingested { chunks },
                Err(e @ PipelineError::UnsupportedFormat { .. }) => {
                    warn!(path = %path.display(), error = %e, "skipping file");
                    FileStatus::Skipped {
                        reason: e.to_string(),
                    }
                }
                Err(e) if e.is_per_file() => {
                    warn!(path = %path.display(), error = %e, "failed to ingest file");
                    FileStatus::Failed {
                        error: e.to_string(),
                    }
                }
                Err(e) => return Err(e),
            };
            report.files.push(FileReport {
                path: path.clone(),
                status,
            });
        }

        info!(
            files = report.files.len(),
            ingested = report.ingested(),
            skipped = report.skipped(),
            failed = report.failed(),
            chunks = report.total_chunks(),
            "ingestion finished"
        );
        Ok(report)
    }

    /// Ingest the files under `dir` matching the configured globs, in
    /// path order.
    pub async fn ingest_dir(&self, dir: &Path) -> Result<IngestReport> {
        let paths = scan_dir(dir, &self.walk)?;
        self.ingest_batch(&paths).await
    }
}

/// Files under `root` that match `include_globs` and none of the excludes,
/// sorted by path.
pub fn scan_dir(root: &Path, walk: &IngestConfig) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(PipelineError::load(root, "not a directory"));
    }

    let include_set = build_globset(&walk.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(walk.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(walk.follow_symlinks) {
        let entry = entry.map_err(|e| PipelineError::load(root, e))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        paths.push(path.to_path_buf());
    }

    paths.sort();
    Ok(paths)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| PipelineError::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| PipelineError::Config(format!("invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scan_dir_applies_globs() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("notices/old")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("fees.txt"), "fees").unwrap();
        std::fs::write(root.join("notices/exam.html"), "<p>exam</p>").unwrap();
        std::fs::write(root.join("notices/old/2019.txt"), "old").unwrap();
        std::fs::write(root.join(".git/config"), "x").unwrap();
        std::fs::write(root.join(".hidden.txt"), "x").unwrap();

        let walk = IngestConfig {
            exclude_globs: vec!["notices/old/**".to_string()],
            ..IngestConfig::default()
        };
        let paths = scan_dir(root, &walk).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["fees.txt", "notices/exam.html"]);
    }

    #[test]
    fn test_scan_dir_rejects_missing_root() {
        let err = scan_dir(Path::new("/nonexistent/corpus"), &IngestConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
    }

    #[test]
    fn test_invalid_glob_is_config_error() {
        assert!(matches!(
            build_globset(&["[".to_string()]),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_report_counts() {
        let report = IngestReport {
            files: vec![
                FileReport {
                    path: "a.txt".into(),
                    status: FileStatus::Ingested { chunks: 3 },
                },
                FileReport {
                    path: "b.csv".into(),
                    status: FileStatus::Skipped {
                        reason: "unsupported".to_string(),
                    },
                },
                FileReport {
                    path: "c.pdf".into(),
                    status: FileStatus::Failed {
                        error: "bad pdf".to_string(),
                    },
                },
            ],
        };
        assert_eq!(report.total_chunks(), 3);
        assert_eq!(report.ingested(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
    }
}
