//! Retrieval service: query embedding, top-K similarity search, and
//! context-block formatting for the system prompt.

use anyhow::Result;
use std::sync::Arc;

use crate::models::RetrievedChunk;
use crate::provider::EmbeddingProvider;
use crate::store::ChunkStore;

/// Placeholder rendered when retrieval finds nothing. The orchestrator
/// always receives a context string, never an absence.
const EMPTY_CONTEXT: &str = "No relevant documentation found.";

#[derive(Clone)]
pub struct RetrievalService {
    store: ChunkStore,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RetrievalService {
    pub fn new(store: ChunkStore, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// Find the most relevant chunks for a query, best first.
    ///
    /// The query is embedded with the same provider as ingestion; a
    /// dimensionality mismatch surfaces as an error from the store.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let query_embedding = self.embedder.embed_one(query).await?;
        self.store.nearest(&query_embedding, k).await
    }

    /// Format retrieved chunks into a numbered context block.
    pub fn format_context(results: &[RetrievedChunk]) -> String {
        if results.is_empty() {
            return EMPTY_CONTEXT.to_string();
        }

        results
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let source = doc
                    .source
                    .as_deref()
                    .map(|s| format!(" (from: {})", s))
                    .unwrap_or_default();
                format!("{}. {}{}", i + 1, doc.content, source)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn test_format_context_empty() {
        assert_eq!(
            RetrievalService::format_context(&[]),
            "No relevant documentation found."
        );
    }

    #[test]
    fn test_format_context_numbers_and_sources() {
        let results = vec![
            RetrievedChunk {
                content: "Events are approved by admins.".to_string(),
                source: Some("Moderation Guide".to_string()),
                similarity: 0.9,
            },
            RetrievedChunk {
                content: "Anyone can browse listings.".to_string(),
                source: None,
                similarity: 0.5,
            },
        ];

        let context = RetrievalService::format_context(&results);
        assert!(context.starts_with("1. Events are approved by admins. (from: Moderation Guide)"));
        assert!(context.contains("\n\n2. Anyone can browse listings."));
        assert!(!context.ends_with("(from: )"));
    }

    struct FakeEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        fn dims(&self) -> usize {
            2
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            // "refund" queries point east, everything else north
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("refund") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    async fn service() -> RetrievalService {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();
        let store = ChunkStore::new(pool, 2);
        RetrievalService::new(store, Arc::new(FakeEmbedder))
    }

    #[tokio::test]
    async fn test_search_empty_store_returns_empty() {
        let svc = service().await;
        let results = svc.search("refund policy", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let svc = service().await;
        svc.store
            .insert_chunk("Refunds take 5 days.", &[1.0, 0.0], Some("Refund Policy"))
            .await
            .unwrap();
        svc.store
            .insert_chunk("Venues open at noon.", &[0.0, 1.0], Some("Venues"))
            .await
            .unwrap();

        let results = svc.search("refund policy", 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "Refunds take 5 days.");
        assert!(results[0].similarity > results[1].similarity);
    }
}
