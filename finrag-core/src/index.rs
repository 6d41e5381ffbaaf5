//! In-memory brute-force vector index over pre-chunked documents.
//!
//! Chunks are embedded once at build time; a search embeds the query and
//! returns the nearest chunks by L2 distance.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::embeddings::{Embedder, l2_distance};
use crate::entities::EntityExtractor;
use crate::error::{CollaboratorError, FinragError};
use crate::retry::{RetryConfig, with_retry};
use crate::search::{ChunkDocument, VectorSearch};

/// Outcome of building an index: chunks that failed to embed are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexBuildReport {
    pub indexed: usize,
    pub failed: Vec<String>,
}

struct IndexedChunk {
    document: Arc<ChunkDocument>,
    embedding: Vec<f32>,
}

pub struct InMemoryVectorIndex {
    embedder: Arc<dyn Embedder>,
    chunks: Vec<IndexedChunk>,
}

impl InMemoryVectorIndex {
    /// Create an empty index.
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            chunks: Vec::new(),
        }
    }

    /// Embed and add chunks.
    ///
    /// A chunk whose embedding still fails after retries is logged and
    /// skipped; the rest of the batch continues. Chunks without precomputed
    /// entities get them extracted from their content.
    pub async fn add_chunks(
        &mut self,
        chunks: Vec<ChunkDocument>,
        retry: &RetryConfig,
    ) -> IndexBuildReport {
        let extractor = EntityExtractor::new();
        let mut report = IndexBuildReport::default();

        for mut chunk in chunks {
            if chunk.entities.is_empty() {
                chunk.entities = extractor.extract(&chunk.content);
            }
            let embedded = {
                let embedder = &self.embedder;
                let content = &chunk.content;
                with_retry(retry, "embed_chunk", || embedder.embed(content)).await
            };
            match embedded {
                Ok(embedding) => {
                    self.chunks.push(IndexedChunk {
                        document: Arc::new(chunk),
                        embedding,
                    });
                    report.indexed += 1;
                }
                Err(e) => {
                    warn!(chunk_id = %chunk.chunk_id, error = %e, "Skipping chunk that failed to embed");
                    report.failed.push(chunk.chunk_id);
                }
            }
        }

        info!(
            indexed = report.indexed,
            failed = report.failed.len(),
            total = self.chunks.len(),
            "Indexed chunks"
        );
        report
    }

    /// Read a JSON array of chunk documents.
    pub fn load_chunks(path: &Path) -> Result<Vec<ChunkDocument>, FinragError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[async_trait]
impl VectorSearch for InMemoryVectorIndex {
    async fn search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Arc<ChunkDocument>, f64)>, CollaboratorError> {
        if k == 0 || self.chunks.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query).await?;

        let mut scored: Vec<(Arc<ChunkDocument>, f64)> = self
            .chunks
            .iter()
            .map(|c| (c.document.clone(), l2_distance(&query_embedding, &c.embedding)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        Ok(scored)
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::LocalEmbedder;
    use crate::error::Collaborator;

    fn doc(doc_id: &str, idx: usize, content: &str) -> ChunkDocument {
        ChunkDocument {
            doc_id: doc_id.into(),
            chunk_id: format!("{doc_id}-{idx}"),
            content: content.into(),
            is_first_chunk: idx == 0,
            is_last_chunk: false,
            entities: Default::default(),
        }
    }

    /// Fails on any text containing "poison".
    struct PickyEmbedder(LocalEmbedder);

    #[async_trait]
    impl Embedder for PickyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
            if text.contains("poison") {
                return Err(CollaboratorError::InvalidResponse {
                    source_kind: Collaborator::Embedder,
                    message: "rejected".into(),
                });
            }
            Ok(self.0.embed_text(text))
        }
        fn dimensions(&self) -> usize {
            self.0.dimensions()
        }
        fn provider_name(&self) -> &str {
            "picky"
        }
    }

    #[tokio::test]
    async fn test_search_returns_nearest_first() {
        let mut index = InMemoryVectorIndex::new(Arc::new(LocalEmbedder::new(128)));
        index
            .add_chunks(
                vec![
                    doc("a", 0, "net sales grew in the retail segment"),
                    doc("b", 0, "operating expenses and employee headcount"),
                ],
                &RetryConfig::none(),
            )
            .await;

        let results = index.search("net sales retail", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.doc_id, "a");
        assert!(results[0].1 <= results[1].1);
    }

    #[tokio::test]
    async fn test_add_chunks_extracts_missing_entities() {
        let mut index = InMemoryVectorIndex::new(Arc::new(LocalEmbedder::new(32)));
        index
            .add_chunks(vec![doc("a", 0, "revenue rose 12% to $4,000")], &RetryConfig::none())
            .await;
        let results = index.search("revenue", 1).await.unwrap();
        let entities = &results[0].0.entities;
        assert_eq!(entities.percentages, vec!["12"]);
        assert_eq!(entities.currency, vec!["4000"]);
    }

    #[tokio::test]
    async fn test_failed_chunks_are_skipped_and_reported() {
        let mut index =
            InMemoryVectorIndex::new(Arc::new(PickyEmbedder(LocalEmbedder::new(32))));
        let report = index
            .add_chunks(
                vec![doc("a", 0, "fine"), doc("b", 0, "poison pill"), doc("c", 0, "also fine")],
                &RetryConfig::none(),
            )
            .await;
        assert_eq!(report.indexed, 2);
        assert_eq!(report.failed, vec!["b-0".to_string()]);
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_index_and_zero_k() {
        let mut index = InMemoryVectorIndex::new(Arc::new(LocalEmbedder::new(16)));
        assert!(index.is_empty());
        assert!(index.search("anything", 3).await.unwrap().is_empty());
        index
            .add_chunks(vec![doc("a", 0, "text")], &RetryConfig::none())
            .await;
        assert!(index.search("text", 0).await.unwrap().is_empty());
    }

    #[test]
    fn test_load_chunks_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");
        std::fs::write(
            &path,
            r#"[{"doc_id": "d1", "chunk_id": "d1-0", "content": "profit 5%", "is_first_chunk": true}]"#,
        )
        .unwrap();
        let chunks = InMemoryVectorIndex::load_chunks(&path).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_first_chunk);
        assert!(!chunks[0].is_last_chunk);
    }
}
