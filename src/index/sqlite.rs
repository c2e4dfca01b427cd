//! SQLite-backed [`VectorIndex`].
//!
//! Index shapes live in `index_meta`; entries live in `index_entries` with
//! vectors encoded by [`vec_to_blob`]. The `seq` rowid records insertion
//! order and survives `ON CONFLICT ... DO UPDATE`, so replaced entries keep
//! their original position for tie-breaking.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::{check_dimension, check_k, missing_index, rank, IndexSpec, Metric, VectorIndex};
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{PipelineError, Result};
use crate::models::{IndexEntry, SearchHit, SourceMetadata};

/// Persistent vector index over a shared [`SqlitePool`].
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn spec(&self, name: &str) -> Result<IndexSpec> {
        self.describe_index(name)
            .await?
            .ok_or_else(|| missing_index(name))
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn index_exists(&self, name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM index_meta WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn create_index(&self, name: &str, dimension: usize, metric: Metric) -> Result<()> {
        if self.index_exists(name).await? {
            return Err(PipelineError::Index(format!("index '{}' already exists", name)));
        }
        sqlx::query("INSERT INTO index_meta (name, dimension, metric, created_at) VALUES (?, ?, ?, ?)")
            .bind(name)
            .bind(dimension as i64)
            .bind(metric.as_str())
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn describe_index(&self, name: &str) -> Result<Option<IndexSpec>> {
        let row = sqlx::query("SELECT name, dimension, metric FROM index_meta WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let dimension: i64 = row.get("dimension");
                let metric: String = row.get("metric");
                Ok(Some(IndexSpec {
                    name: row.get("name"),
                    dimension: dimension as usize,
                    metric: metric.parse()?,
                }))
            }
        }
    }

    async fn upsert(&self, index: &str, entries: &[IndexEntry]) -> Result<usize> {
        let spec = self.spec(index).await?;
        for entry in entries {
            check_dimension(&spec, &entry.vector, "entry vector")?;
        }

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            let metadata_json = serde_json::to_string(&entry.metadata)
                .map_err(|e| PipelineError::Index(format!("metadata encoding failed: {}", e)))?;
            sqlx::query(
                r#"
                INSERT INTO index_entries (index_name, id, document_id, chunk_text, metadata_json, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(index_name, id) DO UPDATE SET
                    document_id = excluded.document_id,
                    chunk_text = excluded.chunk_text,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding
                "#,
            )
            .bind(index)
            .bind(&entry.id)
            .bind(&entry.metadata.document_id)
            .bind(&entry.text)
            .bind(&metadata_json)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(entries.len())
    }

    async fn search(&self, index: &str, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        check_k(k)?;
        let spec = self.spec(index).await?;
        check_dimension(&spec, query, "query vector")?;

        let rows = sqlx::query(
            "SELECT seq, id, chunk_text, metadata_json, embedding FROM index_entries WHERE index_name = ?",
        )
        .bind(index)
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            let metadata: SourceMetadata = serde_json::from_str(&metadata_json)
                .map_err(|e| PipelineError::Index(format!("corrupt entry metadata: {}", e)))?;
            let vector = blob_to_vec(&blob);
            scored.push((
                row.get::<i64, _>("seq"),
                SearchHit {
                    id: row.get("id"),
                    text: row.get("chunk_text"),
                    metadata,
                    score: spec.metric.score(query, &vector),
                },
            ));
        }

        Ok(rank(scored, k))
    }

    async fn prune_document(
        &self,
        index: &str,
        document_id: &str,
        keep_ids: &[String],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let existing: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM index_entries WHERE index_name = ? AND document_id = ?",
        )
        .bind(index)
        .bind(document_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut removed = 0;
        for id in existing.iter().filter(|id| !keep_ids.contains(id)) {
            removed += sqlx::query("DELETE FROM index_entries WHERE index_name = ? AND id = ?")
                .bind(index)
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn count(&self, index: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries WHERE index_name = ?")
            .bind(index)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
