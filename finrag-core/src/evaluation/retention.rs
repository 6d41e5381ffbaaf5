//! Conversational context retention.

use std::sync::Arc;

use crate::embeddings::{Embedder, cosine_similarity};
use crate::error::CollaboratorError;
use crate::query::{ChatMessage, recent};
use crate::retry::{RetryConfig, with_retry};

/// Cosine similarity between a new answer and the recent conversation.
pub struct ContextRetentionScorer {
    embedder: Arc<dyn Embedder>,
    window: usize,
    retry: RetryConfig,
}

impl ContextRetentionScorer {
    pub fn new(embedder: Arc<dyn Embedder>, window: usize) -> Self {
        Self {
            embedder,
            window,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// 1.0 for an empty history without calling the embedder; otherwise the
    /// cosine between `answer` and the last `window` messages joined by spaces.
    pub async fn score(
        &self,
        answer: &str,
        history: &[ChatMessage],
    ) -> Result<f64, CollaboratorError> {
        if history.is_empty() {
            return Ok(1.0);
        }
        let joined = recent(history, self.window)
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let (answer_embedding, history_embedding) =
            futures::try_join!(self.embed(answer), self.embed(&joined))?;
        Ok(cosine_similarity(&answer_embedding, &history_embedding))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        with_retry(&self.retry, "embed_history", || self.embedder.embed(text)).await
    }
}
