//! Answer quality: exact match, embedding cosine similarity and ROUGE.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::embeddings::{Embedder, cosine_similarity};
use crate::error::CollaboratorError;
use crate::retry::{RetryConfig, with_retry};
use crate::tokens::Tokenizer;

use super::rouge::{RougeScorer, RougeScores};

static CANONICAL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w+\b|[.,!?;]").expect("token pattern is valid"));

/// Collapse whitespace, lowercase, and keep only words and `. , ! ? ;`,
/// joined by single spaces.
pub fn canonicalize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let lowered = collapsed.to_lowercase();
    CANONICAL_TOKEN
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Answer metrics for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerMetrics {
    pub answer_accuracy: f64,
    pub exact_match: f64,
    pub cosine_similarity: f64,
    pub rouge1: f64,
    pub rouge2: f64,
    #[serde(rename = "rougeL")]
    pub rouge_l: f64,
    /// Tokens in the predicted answer.
    pub answer_tokens: usize,
}

pub struct AnswerEvaluator {
    embedder: Arc<dyn Embedder>,
    rouge: Arc<dyn RougeScorer>,
    tokenizer: Arc<dyn Tokenizer>,
    cosine_threshold: f64,
    rouge1_threshold: f64,
    retry: RetryConfig,
}

impl AnswerEvaluator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        rouge: Arc<dyn RougeScorer>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self {
            embedder,
            rouge,
            tokenizer,
            cosine_threshold: 0.8,
            rouge1_threshold: 0.5,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_thresholds(mut self, cosine: f64, rouge1: f64) -> Self {
        self.cosine_threshold = cosine;
        self.rouge1_threshold = rouge1;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Score `predicted` against `reference`.
    ///
    /// Embedding failures are returned after retries; ROUGE failures degrade
    /// to zero scores.
    pub async fn evaluate(
        &self,
        predicted: &str,
        reference: &str,
    ) -> Result<AnswerMetrics, CollaboratorError> {
        let pred_canonical = canonicalize(predicted);
        let ref_canonical = canonicalize(reference);
        let exact_match = if pred_canonical == ref_canonical { 1.0 } else { 0.0 };

        let (pred_embedding, ref_embedding) =
            futures::try_join!(self.embed(predicted), self.embed(reference))?;
        let cosine = cosine_similarity(&pred_embedding, &ref_embedding);

        let rouge = self.rouge_or_zero(&pred_canonical, &ref_canonical);

        let accurate = exact_match == 1.0
            || cosine > self.cosine_threshold
            || rouge.rouge1 > self.rouge1_threshold;

        let metrics = AnswerMetrics {
            answer_accuracy: if accurate { 1.0 } else { 0.0 },
            exact_match,
            cosine_similarity: cosine,
            rouge1: rouge.rouge1,
            rouge2: rouge.rouge2,
            rouge_l: rouge.rouge_l,
            answer_tokens: self.tokenizer.count(predicted),
        };
        debug!(
            exact_match,
            cosine,
            rouge1 = rouge.rouge1,
            accuracy = metrics.answer_accuracy,
            "Answer evaluated"
        );
        Ok(metrics)
    }

    /// ROUGE of an answer against the retrieved context.
    pub fn context_rouge(&self, answer: &str, context: &str) -> RougeScores {
        self.rouge_or_zero(&canonicalize(answer), &canonicalize(context))
    }

    fn rouge_or_zero(&self, candidate: &str, reference: &str) -> RougeScores {
        match self.rouge.score(candidate, reference) {
            Ok(scores) => scores,
            Err(e) => {
                warn!(error = %e, "ROUGE scoring failed, using zero scores");
                RougeScores::default()
            }
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        with_retry(&self.retry, "embed_answer", || self.embedder.embed(text)).await
    }
}
