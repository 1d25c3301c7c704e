//! SQLite-backed embedding store.
//!
//! Persists knowledge-base chunks with their embedding vectors and answers
//! nearest-neighbor queries by computing cosine similarity in-process over
//! all stored vectors. The corpus is small (platform documentation), so a
//! full scan per query beats maintaining an index.
//!
//! Vectors are stored as little-endian f32 BLOBs; see [`vec_to_blob`] and
//! [`blob_to_vec`]. Dimensionality is fixed at construction and validated
//! on every write and query.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::RetrievedChunk;

#[derive(Clone)]
pub struct ChunkStore {
    pool: SqlitePool,
    dims: usize,
}

impl ChunkStore {
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    /// Insert a chunk. Chunks are immutable once written; re-ingestion
    /// replaces the corpus via [`clear_all`](Self::clear_all), never by
    /// mutating rows in place.
    pub async fn insert_chunk(
        &self,
        content: &str,
        embedding: &[f32],
        source: Option<&str>,
    ) -> Result<String> {
        self.check_dims(embedding)?;

        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO chunks (id, content, embedding, source, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(content)
        .bind(vec_to_blob(embedding))
        .bind(source)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Return the `k` chunks nearest to `embedding`, ordered by similarity
    /// descending. Ties keep insertion order (stable sort over a
    /// rowid-ordered scan). An empty store yields an empty vec.
    pub async fn nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        self.check_dims(embedding)?;

        let rows = sqlx::query("SELECT content, embedding, source FROM chunks ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;

        let mut candidates: Vec<RetrievedChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                RetrievedChunk {
                    content: row.get("content"),
                    source: row.get("source"),
                    similarity: cosine_similarity(embedding, &vec),
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(k);

        Ok(candidates)
    }

    /// Delete every chunk. Irreversible; used for full rebuilds.
    pub async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    fn check_dims(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dims {
            bail!(
                "Embedding dimensionality mismatch: got {}, store expects {}",
                embedding.len(),
                self.dims
            );
        }
        Ok(())
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
