//! Retrieval quality: precision, recall, F1, NDCG and MRR for one turn.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::entities::push_unique;
use crate::search::RankedResult;

/// Retrieval metrics for one turn. Every field is in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub ndcg: f64,
    pub mrr: f64,
}

/// Scores ranked results against an externally designated relevant set.
#[derive(Debug, Clone)]
pub struct RetrievalEvaluator {
    admission_threshold: f64,
}

impl Default for RetrievalEvaluator {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl RetrievalEvaluator {
    pub fn new(admission_threshold: f64) -> Self {
        Self {
            admission_threshold,
        }
    }

    /// Distinct doc ids of the top `k` results (all when `None`) whose
    /// combined score is strictly above the admission threshold, in rank order.
    pub fn retrieved_ids(&self, results: &[RankedResult], k: Option<usize>) -> Vec<String> {
        let k = k.unwrap_or(results.len());
        let mut ids = Vec::new();
        for r in results.iter().take(k) {
            if r.combined_score > self.admission_threshold {
                push_unique(&mut ids, r.document.doc_id.clone());
            }
        }
        ids
    }

    /// Evaluate a turn, or `None` when there is nothing to evaluate (no
    /// results or no relevant ids).
    pub fn evaluate_turn(
        &self,
        results: &[RankedResult],
        relevant: &[String],
        k: Option<usize>,
    ) -> Option<RetrievalMetrics> {
        if results.is_empty() || relevant.is_empty() {
            return None;
        }
        let retrieved = self.retrieved_ids(results, k);
        let metrics = rank_metrics(&retrieved, relevant);
        debug!(
            retrieved = ?retrieved,
            relevant = ?relevant,
            precision = metrics.precision,
            recall = metrics.recall,
            ndcg = metrics.ndcg,
            mrr = metrics.mrr,
            "Retrieval evaluated"
        );
        Some(metrics)
    }

    /// Like [`evaluate_turn`](Self::evaluate_turn), with all-zero metrics when
    /// either input is empty.
    pub fn evaluate(
        &self,
        results: &[RankedResult],
        relevant: &[String],
        k: Option<usize>,
    ) -> RetrievalMetrics {
        self.evaluate_turn(results, relevant, k).unwrap_or_default()
    }
}

/// Binary-relevance ranking metrics of `retrieved` (rank order) against
/// `relevant`. Zero everywhere when either side is empty.
pub fn rank_metrics(retrieved: &[String], relevant: &[String]) -> RetrievalMetrics {
    let relevant: HashSet<&str> = relevant.iter().map(String::as_str).collect();
    if retrieved.is_empty() || relevant.is_empty() {
        return RetrievalMetrics::default();
    }

    let retrieved_set: HashSet<&str> = retrieved.iter().map(String::as_str).collect();
    let true_positives = retrieved_set.intersection(&relevant).count() as f64;

    let precision = true_positives / retrieved.len() as f64;
    let recall = true_positives / relevant.len() as f64;
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    let dcg: f64 = retrieved
        .iter()
        .enumerate()
        .filter(|(_, id)| relevant.contains(id.as_str()))
        .map(|(i, _)| discount(i))
        .sum();
    let idcg: f64 = (0..relevant.len()).map(discount).sum();
    let ndcg = if idcg > 0.0 { dcg / idcg } else { 0.0 };

    let mrr = retrieved
        .iter()
        .position(|id| relevant.contains(id.as_str()))
        .map(|i| 1.0 / (i + 1) as f64)
        .unwrap_or(0.0);

    RetrievalMetrics {
        precision,
        recall,
        f1,
        ndcg,
        mrr,
    }
}

/// Gain of a relevant item at 0-based position `i`: `(2^1 - 1) / log2(i + 2)`.
fn discount(i: usize) -> f64 {
    1.0 / ((i + 2) as f64).log2()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ChunkDocument;
    use std::sync::Arc;

    fn result(doc_id: &str, score: f64) -> RankedResult {
        RankedResult {
            document: Arc::new(ChunkDocument {
                doc_id: doc_id.into(),
                chunk_id: format!("{doc_id}-0"),
                content: String::new(),
                is_first_chunk: true,
                is_last_chunk: true,
                entities: Default::default(),
            }),
            semantic_score: 0.0,
            keyword_score: 0.0,
            combined_score: score,
        }
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_single_relevant_hit_scores_one() {
        let eval = RetrievalEvaluator::default();
        let results = vec![result("1", 0.9), result("2", 0.3)];
        assert_eq!(eval.retrieved_ids(&results, None), ids(&["1"]));
        let m = eval.evaluate(&results, &ids(&["1"]), None);
        assert_eq!(
            m,
            RetrievalMetrics {
                precision: 1.0,
                recall: 1.0,
                f1: 1.0,
                ndcg: 1.0,
                mrr: 1.0,
            }
        );
    }

    #[test]
    fn test_empty_inputs_are_zero() {
        let eval = RetrievalEvaluator::default();
        assert_eq!(eval.evaluate(&[], &ids(&["1"]), None), RetrievalMetrics::default());
        assert_eq!(
            eval.evaluate(&[result("1", 0.9)], &[], None),
            RetrievalMetrics::default()
        );
        assert!(eval.evaluate_turn(&[], &ids(&["1"]), None).is_none());
    }

    #[test]
    fn test_nothing_admitted_is_zero_but_evaluated() {
        let eval = RetrievalEvaluator::default();
        let m = eval.evaluate_turn(&[result("1", 0.5)], &ids(&["1"]), None);
        assert_eq!(m, Some(RetrievalMetrics::default()));
    }

    #[test]
    fn test_k_limits_considered_results() {
        let eval = RetrievalEvaluator::default();
        let results = vec![result("a", 0.9), result("b", 0.8)];
        let m = eval.evaluate(&results, &ids(&["b"]), Some(1));
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.mrr, 0.0);
    }

    #[test]
    fn test_mrr_is_reciprocal_of_first_hit() {
        let m = rank_metrics(&ids(&["x", "y", "a", "b"]), &ids(&["a", "b"]));
        assert!(close(m.mrr, 1.0 / 3.0));
    }

    #[test]
    fn test_precision_recall_f1() {
        let m = rank_metrics(&ids(&["a", "x", "b", "y"]), &ids(&["a", "b", "c"]));
        assert!(close(m.precision, 0.5));
        assert!(close(m.recall, 2.0 / 3.0));
        assert!(close(m.f1, 2.0 * 0.5 * (2.0 / 3.0) / (0.5 + 2.0 / 3.0)));
    }

    #[test]
    fn test_ndcg_values() {
        // Ideal order.
        let m = rank_metrics(&ids(&["a", "b", "x"]), &ids(&["a", "b"]));
        assert!(close(m.ndcg, 1.0));

        // Relevant item at position 2 of 2: (1/log2 3) / 1.
        let m = rank_metrics(&ids(&["x", "a"]), &ids(&["a"]));
        assert!(close(m.ndcg, 1.0 / 3f64.log2()));

        // Relevant id never retrieved lowers the ideal share.
        let m = rank_metrics(&ids(&["a"]), &ids(&["a", "b"]));
        assert!(close(m.ndcg, 1.0 / (1.0 + 1.0 / 3f64.log2())));
    }

    #[test]
    fn test_retrieved_ids_are_distinct() {
        let eval = RetrievalEvaluator::default();
        let results = vec![result("a", 0.9), result("a", 0.8), result("b", 0.7)];
        assert_eq!(eval.retrieved_ids(&results, None), ids(&["a", "b"]));
    }

    #[test]
    fn test_custom_threshold() {
        let eval = RetrievalEvaluator::new(0.2);
        let results = vec![result("1", 0.9), result("2", 0.3)];
        assert_eq!(eval.retrieved_ids(&results, None), ids(&["1", "2"]));
    }
}
