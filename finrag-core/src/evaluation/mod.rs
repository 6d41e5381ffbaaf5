//! Online evaluation of retrieval and answer quality.
//!
//! Every evaluator here is a pure function of its inputs plus, where noted,
//! an embedding collaborator. None of them touch the shared aggregate; the
//! engine collects their outputs into a turn record and commits it once.

pub mod answer;
pub mod retention;
pub mod retrieval;
pub mod rouge;

pub use answer::{AnswerEvaluator, AnswerMetrics, canonicalize};
pub use retention::ContextRetentionScorer;
pub use retrieval::{RetrievalEvaluator, RetrievalMetrics};
pub use rouge::{NgramRougeScorer, RougeScorer, RougeScores};

use serde::{Deserialize, Serialize};

/// Thresholds and windows used by the evaluators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Results must score strictly above this to count as retrieved, and to
    /// be included in the generation context.
    #[serde(default = "default_admission_threshold")]
    pub admission_threshold: f64,
    /// Score above which a top result is assumed relevant when the caller
    /// supplies no relevant documents.
    #[serde(default = "default_relevance_threshold")]
    pub default_relevance_threshold: f64,
    /// How many top results are considered for the default relevant set.
    #[serde(default = "default_relevance_window")]
    pub default_relevance_window: usize,
    /// An answer is accurate when cosine similarity exceeds this ...
    #[serde(default = "default_cosine_threshold")]
    pub cosine_threshold: f64,
    /// ... or ROUGE-1 F-measure exceeds this.
    #[serde(default = "default_rouge1_threshold")]
    pub rouge1_threshold: f64,
    /// Prior messages joined for context retention.
    #[serde(default = "default_retention_window")]
    pub retention_window: usize,
}

fn default_admission_threshold() -> f64 {
    0.5
}
fn default_relevance_threshold() -> f64 {
    0.7
}
fn default_relevance_window() -> usize {
    3
}
fn default_cosine_threshold() -> f64 {
    0.8
}
fn default_rouge1_threshold() -> f64 {
    0.5
}
fn default_retention_window() -> usize {
    3
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            admission_threshold: default_admission_threshold(),
            default_relevance_threshold: default_relevance_threshold(),
            default_relevance_window: default_relevance_window(),
            cosine_threshold: default_cosine_threshold(),
            rouge1_threshold: default_rouge1_threshold(),
            retention_window: default_retention_window(),
        }
    }
}
