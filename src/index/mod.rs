//! Semantic index over an owner's captured text.

use std::sync::Arc;

use tracing::debug;

use crate::adapters::Embedder;
use crate::core::PipelineResult;
use crate::domain::EmbeddingRecord;
use crate::store::Database;

/// Records retrieved as context when no `k` is given
pub const DEFAULT_CONTEXT_K: usize = 5;

pub struct SemanticIndexer {
    embedder: Arc<dyn Embedder>,
    db: Database,
}

impl SemanticIndexer {
    pub fn new(embedder: Arc<dyn Embedder>, db: Database) -> Self {
        Self { embedder, db }
    }

    /// Embed `text` and store it. Blank text is skipped and yields `None`.
    pub async fn index(&self, owner_id: &str, text: &str) -> PipelineResult<Option<EmbeddingRecord>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let vector = self.embedder.embed(text).await?;
        let record = self.db.insert_embedding(owner_id, text, vector).await?;
        debug!(owner_id, record_id = record.id, dims = record.vector.len(), "Indexed text");
        Ok(Some(record))
    }

    /// Source texts of the `k` records most similar to `query`, joined by a
    /// single space. Empty when the query is blank or nothing is indexed.
    pub async fn retrieve_context(&self, owner_id: &str, query: &str, k: usize) -> PipelineResult<String> {
        let query = query.trim();
        if query.is_empty() || k == 0 {
            return Ok(String::new());
        }
        let vector = self.embedder.embed(query).await?;
        let hits = self.db.nearest_embeddings(owner_id, vector, k).await?;
        Ok(hits
            .into_iter()
            .map(|(record, _)| record.source_text)
            .collect::<Vec<_>>()
            .join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps text onto two axes by keyword so similarity is predictable
    #[derive(Default)]
    struct AxisEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for AxisEmbedder {
        fn name(&self) -> &str {
            "axis"
        }

        async fn embed(&self, text: &str) -> PipelineResult<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let cats = text.matches("cat").count() as f32;
            let cars = text.matches("car").count() as f32;
            Ok(vec![cats + 0.01, cars + 0.01])
        }
    }

    #[tokio::test]
    async fn test_retrieve_context_ranks_and_joins() {
        let db = Database::in_memory().unwrap();
        let indexer = SemanticIndexer::new(Arc::new(AxisEmbedder::default()), db);

        indexer.index("u1", "my cat sleeps").await.unwrap();
        indexer.index("u1", "the car needs oil").await.unwrap();
        indexer.index("u1", "cat food cat toys").await.unwrap();
        indexer.index("u2", "cat of someone else").await.unwrap();

        let context = indexer.retrieve_context("u1", "cat", 2).await.unwrap();
        assert_eq!(context.split(' ').filter(|w| *w == "cat").count(), 3);
        assert!(!context.contains("oil"));
        assert!(!context.contains("someone"));
    }

    #[tokio::test]
    async fn test_blank_input_skips_provider() {
        let embedder = Arc::new(AxisEmbedder::default());
        let indexer = SemanticIndexer::new(embedder.clone(), Database::in_memory().unwrap());

        assert!(indexer.index("u1", "   ").await.unwrap().is_none());
        assert_eq!(indexer.retrieve_context("u1", "", 5).await.unwrap(), "");
        assert_eq!(indexer.retrieve_context("u1", "cat", 5).await.unwrap(), "");
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }
}
