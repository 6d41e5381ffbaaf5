//! Turn metrics and their process-lifetime aggregate.
//!
//! A [`TurnMetrics`] is built locally while a question is processed and handed
//! to [`MetricsAggregator::apply`] only once the turn has fully succeeded, so
//! a failed turn leaves the aggregate untouched.

use serde::{Deserialize, Serialize};

use crate::evaluation::{AnswerMetrics, RetrievalMetrics};

/// System-level measurements of one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// Wall-clock seconds from receipt to answer.
    pub response_latency: f64,
    /// Absent when the turn had no prior history.
    pub context_retention: Option<f64>,
    /// Question, prompt and answer tokens.
    pub tokens: u64,
    pub successful_retrieval: bool,
    pub new_conversation: bool,
}

/// Everything one question turn contributes to the aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetrics {
    /// Absent when there were no results or no relevant documents to score.
    pub retrieval: Option<RetrievalMetrics>,
    pub answer: AnswerMetrics,
    pub system: SystemMetrics,
}

/// Running means of every turn metric plus monotonic counters.
///
/// Serialized with the field names of the persisted metrics file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateMetrics {
    pub answer_accuracy: f64,
    pub exact_match_rate: f64,
    pub cosine_similarity: f64,
    pub rouge1: f64,
    pub rouge2: f64,
    #[serde(rename = "rougeL")]
    pub rouge_l: f64,

    pub retrieval_precision: f64,
    pub retrieval_recall: f64,
    pub f1_score: f64,
    pub ndcg: f64,
    pub mrr: f64,

    pub response_latency: f64,
    pub context_retention: f64,
    pub total_questions: u64,
    pub successful_retrievals: u64,
    pub total_tokens: u64,
    pub total_conversations: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Accumulates committed turns. Wrap in a mutex when shared.
#[derive(Debug, Clone, Default)]
pub struct MetricsAggregator {
    answer_accuracy: RunningMean,
    exact_match: RunningMean,
    cosine_similarity: RunningMean,
    rouge1: RunningMean,
    rouge2: RunningMean,
    rouge_l: RunningMean,

    precision: RunningMean,
    recall: RunningMean,
    f1: RunningMean,
    ndcg: RunningMean,
    mrr: RunningMean,

    response_latency: RunningMean,
    context_retention: RunningMean,

    total_questions: u64,
    successful_retrievals: u64,
    total_tokens: u64,
    total_conversations: u64,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit one completed turn.
    pub fn apply(&mut self, turn: &TurnMetrics) {
        if let Some(r) = &turn.retrieval {
            self.precision.push(r.precision);
            self.recall.push(r.recall);
            self.f1.push(r.f1);
            self.ndcg.push(r.ndcg);
            self.mrr.push(r.mrr);
        }

        let a = &turn.answer;
        self.answer_accuracy.push(a.answer_accuracy);
        self.exact_match.push(a.exact_match);
        self.cosine_similarity.push(a.cosine_similarity);
        self.rouge1.push(a.rouge1);
        self.rouge2.push(a.rouge2);
        self.rouge_l.push(a.rouge_l);

        let s = &turn.system;
        self.response_latency.push(s.response_latency);
        if let Some(retention) = s.context_retention {
            self.context_retention.push(retention);
        }
        self.total_questions += 1;
        self.total_tokens += s.tokens;
        if s.successful_retrieval {
            self.successful_retrievals += 1;
        }
        if s.new_conversation {
            self.total_conversations += 1;
        }
    }

    /// Means of everything committed so far (0.0 where nothing was recorded).
    pub fn aggregate(&self) -> AggregateMetrics {
        AggregateMetrics {
            answer_accuracy: self.answer_accuracy.mean(),
            exact_match_rate: self.exact_match.mean(),
            cosine_similarity: self.cosine_similarity.mean(),
            rouge1: self.rouge1.mean(),
            rouge2: self.rouge2.mean(),
            rouge_l: self.rouge_l.mean(),
            retrieval_precision: self.precision.mean(),
            retrieval_recall: self.recall.mean(),
            f1_score: self.f1.mean(),
            ndcg: self.ndcg.mean(),
            mrr: self.mrr.mean(),
            response_latency: self.response_latency.mean(),
            context_retention: self.context_retention.mean(),
            total_questions: self.total_questions,
            successful_retrievals: self.successful_retrievals,
            total_tokens: self.total_tokens,
            total_conversations: self.total_conversations,
        }
    }

    pub fn total_questions(&self) -> u64 {
        self.total_questions
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn turn(precision: f64, accuracy: f64, latency: f64, tokens: u64) -> TurnMetrics {
        TurnMetrics {
            retrieval: Some(RetrievalMetrics {
                precision,
                recall: precision,
                f1: precision,
                ndcg: precision,
                mrr: precision,
            }),
            answer: AnswerMetrics {
                answer_accuracy: accuracy,
                exact_match: 0.0,
                cosine_similarity: 0.5,
                rouge1: 0.25,
                rouge2: 0.0,
                rouge_l: 0.25,
                answer_tokens: 3,
            },
            system: SystemMetrics {
                response_latency: latency,
                context_retention: None,
                tokens,
                successful_retrieval: true,
                new_conversation: false,
            },
        }
    }

    #[test]
    fn test_empty_aggregate_is_zero() {
        assert_eq!(MetricsAggregator::new().aggregate(), AggregateMetrics::default());
    }

    #[test]
    fn test_means_and_counters() {
        let mut agg = MetricsAggregator::new();
        let mut first = turn(1.0, 1.0, 2.0, 100);
        first.system.new_conversation = true;
        agg.apply(&first);
        agg.apply(&turn(0.0, 0.0, 4.0, 50));

        let a = agg.aggregate();
        assert_eq!(a.retrieval_precision, 0.5);
        assert_eq!(a.answer_accuracy, 0.5);
        assert_eq!(a.response_latency, 3.0);
        assert_eq!(a.cosine_similarity, 0.5);
        assert_eq!(a.total_questions, 2);
        assert_eq!(a.total_tokens, 150);
        assert_eq!(a.successful_retrievals, 2);
        assert_eq!(a.total_conversations, 1);
    }

    #[test]
    fn test_skipped_retrieval_not_averaged() {
        let mut agg = MetricsAggregator::new();
        agg.apply(&turn(1.0, 1.0, 1.0, 1));
        let mut unscored = turn(0.0, 1.0, 1.0, 1);
        unscored.retrieval = None;
        unscored.system.successful_retrieval = false;
        agg.apply(&unscored);

        let a = agg.aggregate();
        assert_eq!(a.retrieval_precision, 1.0);
        assert_eq!(a.successful_retrievals, 1);
        assert_eq!(a.total_questions, 2);
    }

    #[test]
    fn test_retention_only_when_present() {
        let mut agg = MetricsAggregator::new();
        agg.apply(&turn(1.0, 1.0, 1.0, 1));
        let mut with_history = turn(1.0, 1.0, 1.0, 1);
        with_history.system.context_retention = Some(0.6);
        agg.apply(&with_history);
        assert_eq!(agg.aggregate().context_retention, 0.6);
    }

    #[test]
    fn test_reset() {
        let mut agg = MetricsAggregator::new();
        agg.apply(&turn(1.0, 1.0, 1.0, 10));
        agg.reset();
        assert_eq!(agg.total_questions(), 0);
        assert_eq!(agg.aggregate(), AggregateMetrics::default());
    }

    #[test]
    fn test_aggregate_serialized_keys() {
        let json = serde_json::to_value(AggregateMetrics::default()).unwrap();
        for key in [
            "answer_accuracy",
            "exact_match_rate",
            "rougeL",
            "retrieval_precision",
            "retrieval_recall",
            "f1_score",
            "total_conversations",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_aggregate_deserializes_partial() {
        let a: AggregateMetrics = serde_json::from_str(r#"{"total_questions": 3}"#).unwrap();
        assert_eq!(a.total_questions, 3);
        assert_eq!(a.ndcg, 0.0);
    }
}
