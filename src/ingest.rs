//! Document ingestion pipeline.
//!
//! Reads `.txt`/`.md` files from a docs directory, splits them into
//! overlapping character-window chunks, embeds each chunk, and writes the
//! result to the [`ChunkStore`](crate::store::ChunkStore) with a
//! human-readable source label.
//!
//! Chunk boundaries prefer the last sentence terminator (`". "`) or line
//! break within the trailing 150 characters of the window, falling back to
//! the raw boundary. Splitting is deterministic for a fixed input.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::ChunkingConfig;
use crate::provider::EmbeddingProvider;
use crate::store::ChunkStore;

/// Window of trailing characters searched for a sentence boundary.
const BOUNDARY_WINDOW: usize = 150;

#[derive(Debug, Clone, Copy)]
pub struct IngestSummary {
    pub files: usize,
    pub chunks: usize,
}

/// Split text into overlapping chunks so long documents get indexed
/// properly and retrieval stays precise. Operates on characters, not bytes.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();

    if chars.len() <= chunk_size {
        return vec![text.trim().to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        // end is intentionally not clamped: the final advance must step
        // past the text so the loop terminates instead of emitting an
        // overlap-only tail.
        let mut end = start + chunk_size;
        let mut window_end = end.min(chars.len());

        if end < chars.len() {
            let window = &chars[start..window_end];
            let from = window.len().saturating_sub(BOUNDARY_WINDOW);
            let break_at = match (
                rfind_pattern(window, &['.', ' '], from),
                rfind_pattern(window, &['\n'], from),
            ) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };

            // break_at + 1 must exceed the overlap or the window stops advancing
            if let Some(b) = break_at {
                if b > 0 && b + 1 > overlap {
                    end = start + b + 1;
                    window_end = end;
                }
            }
        }

        let piece: String = chars[start..window_end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        start = end - overlap;
    }

    chunks
}

/// Find the highest index `>= from` at which `pat` occurs in `chars`.
fn rfind_pattern(chars: &[char], pat: &[char], from: usize) -> Option<usize> {
    if chars.len() < pat.len() {
        return None;
    }

    let mut i = chars.len() - pat.len();
    loop {
        if i < from {
            return None;
        }
        if chars[i..i + pat.len()] == *pat {
            return Some(i);
        }
        if i == 0 {
            return None;
        }
        i -= 1;
    }
}

/// Derive a human-readable source label from a file name:
/// `"refund-policy.md"` → `"Refund Policy"`.
fn source_label(file_name: &str) -> String {
    let stem = file_name
        .trim_end_matches(".txt")
        .trim_end_matches(".md")
        .replace('-', " ");

    stem.split_whitespace()
        .map(|word| {
            let mut cs = word.chars();
            match cs.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &cs.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ingest all `.txt` and `.md` files under `dir`, sorted by file name.
///
/// With `clear`, wipes the store first (irreversible; used for full
/// rebuilds). An embedding-provider error aborts the remaining run but
/// keeps chunks already committed — re-run with `clear` to recover a
/// deterministic corpus.
pub async fn ingest_directory(
    store: &ChunkStore,
    embedder: &dyn EmbeddingProvider,
    dir: &Path,
    chunking: &ChunkingConfig,
    clear: bool,
) -> Result<IngestSummary> {
    if clear {
        let deleted = store.clear_all().await?;
        println!("Cleared {} existing chunks", deleted);
    }

    let mut files: Vec<_> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.ends_with(".txt") || n.ends_with(".md"))
                .unwrap_or(false)
        })
        .collect();
    files.sort_by_key(|e| e.file_name().to_os_string());

    if files.is_empty() {
        println!("No .txt or .md files found in {}", dir.display());
        return Ok(IngestSummary { files: 0, chunks: 0 });
    }

    println!("Found {} files", files.len());

    let mut total_chunks = 0usize;

    for entry in &files {
        let file_name = entry.file_name().to_string_lossy().to_string();
        let content = std::fs::read_to_string(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;

        let name = source_label(&file_name);
        let chunks = chunk_text(&content, chunking.chunk_size, chunking.overlap);
        println!("  {}  →  {} chunk(s)", file_name, chunks.len());

        let n = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            let embedding = embedder
                .embed_one(chunk)
                .await
                .with_context(|| format!("Embedding failed for {}", file_name))?;

            let label = if n == 1 {
                name.clone()
            } else {
                format!("{} ({}/{})", name, i + 1, n)
            };

            store
                .insert_chunk(chunk, &embedding, Some(&label))
                .await?;
            total_chunks += 1;
        }
    }

    Ok(IngestSummary {
        files: files.len(),
        chunks: total_chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("A short note.", 1000, 150);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "A short note.");
    }

    #[test]
    fn test_exact_threshold_single_chunk() {
        let text = "x".repeat(1000);
        let chunks = chunk_text(&text, 1000, 150);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_long_text_without_boundaries() {
        // 2500 chars, no sentence terminators: windows at 0, 850, 1700
        let text = "x".repeat(2500);
        let chunks = chunk_text(&text, 1000, 150);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1000);
    }

    #[test]
    fn test_boundary_cut_at_sentence() {
        // A period followed by a space lands inside the trailing window,
        // so the first chunk ends on it.
        let mut text = "y".repeat(900);
        text.push_str(". ");
        text.push_str(&"z".repeat(700));
        let chunks = chunk_text(&text, 1000, 150);
        assert!(chunks[0].ends_with('.'));
        assert_eq!(chunks[0].len(), 901);
    }

    #[test]
    fn test_boundary_cut_at_newline() {
        let mut text = "y".repeat(950);
        text.push('\n');
        text.push_str(&"z".repeat(700));
        let chunks = chunk_text(&text, 1000, 150);
        assert_eq!(chunks[0], "y".repeat(950));
    }

    #[test]
    fn test_chunking_deterministic() {
        let text = ("lorem ipsum dolor sit amet. ").repeat(120);
        let a = chunk_text(&text, 1000, 150);
        let b = chunk_text(&text, 1000, 150);
        assert_eq!(a, b);
        assert!(a.len() > 1);
    }

    #[test]
    fn test_chunking_multibyte_safe() {
        let text = "é".repeat(1500);
        let chunks = chunk_text(&text, 1000, 150);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 1000);
    }

    #[test]
    fn test_source_label() {
        assert_eq!(source_label("refund-policy.md"), "Refund Policy");
        assert_eq!(source_label("faq.txt"), "Faq");
        assert_eq!(source_label("how-to-POST-events.md"), "How To Post Events");
    }

    struct FakeEmbedder {
        dims: usize,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                anyhow::bail!("provider unavailable");
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; self.dims];
                    for (i, b) in t.bytes().enumerate() {
                        v[i % self.dims] += b as f32;
                    }
                    v
                })
                .collect())
        }
    }

    async fn memory_store(dims: usize) -> ChunkStore {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();
        ChunkStore::new(pool, dims)
    }

    #[tokio::test]
    async fn test_ingest_two_documents() {
        // Scenario: one doc under the threshold, one long enough for 3 chunks
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("short-guide.txt"), "a".repeat(400)).unwrap();
        std::fs::write(dir.path().join("long-guide.txt"), "b".repeat(2500)).unwrap();

        let store = memory_store(4).await;
        let embedder = FakeEmbedder {
            dims: 4,
            fail: false,
        };
        let chunking = ChunkingConfig {
            chunk_size: 1000,
            overlap: 150,
        };

        let summary = ingest_directory(&store, &embedder, dir.path(), &chunking, false)
            .await
            .unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.chunks, 4);
        assert_eq!(store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_ingest_labels_multi_chunk_documents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("venue-rules.md"), "r".repeat(2500)).unwrap();

        let store = memory_store(4).await;
        let embedder = FakeEmbedder {
            dims: 4,
            fail: false,
        };
        let chunking = ChunkingConfig {
            chunk_size: 1000,
            overlap: 150,
        };

        ingest_directory(&store, &embedder, dir.path(), &chunking, false)
            .await
            .unwrap();

        let query = embedder.embed_one("r").await.unwrap();
        let results = store.nearest(&query, 5).await.unwrap();
        let mut labels: Vec<_> = results
            .iter()
            .map(|r| r.source.clone().unwrap())
            .collect();
        labels.sort();
        assert_eq!(
            labels,
            vec![
                "Venue Rules (1/3)",
                "Venue Rules (2/3)",
                "Venue Rules (3/3)"
            ]
        );
    }

    #[tokio::test]
    async fn test_ingest_clear_replaces_corpus() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();

        let store = memory_store(4).await;
        let embedder = FakeEmbedder {
            dims: 4,
            fail: false,
        };
        let chunking = ChunkingConfig::default();

        ingest_directory(&store, &embedder, dir.path(), &chunking, false)
            .await
            .unwrap();
        ingest_directory(&store, &embedder, dir.path(), &chunking, true)
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ingest_provider_failure_keeps_committed_chunks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.txt"), "gamma").unwrap();

        let store = memory_store(4).await;
        let ok = FakeEmbedder {
            dims: 4,
            fail: false,
        };
        let chunking = ChunkingConfig::default();
        ingest_directory(&store, &ok, dir.path(), &chunking, false)
            .await
            .unwrap();

        let failing = FakeEmbedder {
            dims: 4,
            fail: true,
        };
        let result = ingest_directory(&store, &failing, dir.path(), &chunking, false).await;
        assert!(result.is_err());
        // Partial ingestion is observable, never rolled back
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
