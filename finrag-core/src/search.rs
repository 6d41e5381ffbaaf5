//! # Hybrid Search (semantic distance + financial keyword overlap)
//!
//! Candidates come from a [`VectorSearch`] collaborator as `(chunk, distance)`
//! pairs. Each is rescored by how many numbers, percentages and financial
//! terms it shares with the query side, then collapsed to one chunk per
//! source document.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::entities::{EntityExtractor, FinancialEntitySet};
use crate::error::CollaboratorError;
use crate::query::{ChatMessage, QueryEnhancer, recent};
use crate::retry::{RetryConfig, with_retry};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One chunk of a source conversation, as stored in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDocument {
    /// Groups the chunks of one source conversation.
    pub doc_id: String,
    pub chunk_id: String,
    pub content: String,
    #[serde(default)]
    pub is_first_chunk: bool,
    #[serde(default)]
    pub is_last_chunk: bool,
    /// Entities precomputed at ingestion time.
    #[serde(default)]
    pub entities: FinancialEntitySet,
}

/// A candidate after hybrid rescoring. Created fresh per search call.
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub document: Arc<ChunkDocument>,
    /// Raw distance reported by the vector index (lower is closer).
    pub semantic_score: f64,
    pub keyword_score: f64,
    pub combined_score: f64,
}

/// Nearest-neighbour capability consumed by the ranker.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Up to `k` chunks ordered by ascending distance.
    async fn search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Arc<ChunkDocument>, f64)>, CollaboratorError>;

    /// Number of chunks available to search.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Configuration for hybrid retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results returned per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Semantic candidates fetched per returned result.
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
    /// Trailing history messages mined for query terms and entities.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_number_weight")]
    pub number_weight: f64,
    #[serde(default = "default_percentage_weight")]
    pub percentage_weight: f64,
    #[serde(default = "default_term_weight")]
    pub term_weight: f64,
}

fn default_top_k() -> usize {
    5
}
fn default_overfetch_factor() -> usize {
    2
}
fn default_history_window() -> usize {
    2
}
fn default_number_weight() -> f64 {
    0.5
}
fn default_percentage_weight() -> f64 {
    0.5
}
fn default_term_weight() -> f64 {
    0.3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            overfetch_factor: default_overfetch_factor(),
            history_window: default_history_window(),
            number_weight: default_number_weight(),
            percentage_weight: default_percentage_weight(),
            term_weight: default_term_weight(),
        }
    }
}

impl RetrievalConfig {
    pub fn weights(&self) -> KeywordWeights {
        KeywordWeights {
            number: self.number_weight,
            percentage: self.percentage_weight,
            term: self.term_weight,
        }
    }
}

/// Per-match weights of the keyword score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeywordWeights {
    pub number: f64,
    pub percentage: f64,
    pub term: f64,
}

impl Default for KeywordWeights {
    fn default() -> Self {
        RetrievalConfig::default().weights()
    }
}

// ---------------------------------------------------------------------------
// Hybrid Ranker
// ---------------------------------------------------------------------------

/// Fuses semantic distance with keyword agreement. Pure and deterministic.
#[derive(Debug, Clone, Default)]
pub struct HybridRanker {
    weights: KeywordWeights,
}

impl HybridRanker {
    pub fn new(weights: KeywordWeights) -> Self {
        Self { weights }
    }

    /// Weighted count of entities shared between a document and the query.
    pub fn keyword_score(
        &self,
        doc: &FinancialEntitySet,
        query: &FinancialEntitySet,
    ) -> f64 {
        self.weights.number * overlap(&doc.numbers, &query.numbers) as f64
            + self.weights.percentage * overlap(&doc.percentages, &query.percentages) as f64
            + self.weights.term * overlap(&doc.financial_terms, &query.financial_terms) as f64
    }

    /// `1/(1+distance)` scaled up by keyword agreement.
    ///
    /// Negative distances are treated as zero so the result stays in
    /// `[0, 1 + keyword_score]`.
    pub fn combined_score(distance: f64, keyword_score: f64) -> f64 {
        (1.0 / (1.0 + distance.max(0.0))) * (1.0 + keyword_score)
    }

    /// Score every candidate and sort by combined score, descending.
    /// Ties keep their input order.
    pub fn rank(
        &self,
        candidates: Vec<(Arc<ChunkDocument>, f64)>,
        query_entities: &FinancialEntitySet,
    ) -> Vec<RankedResult> {
        let mut ranked: Vec<RankedResult> = candidates
            .into_iter()
            .map(|(document, distance)| {
                let keyword_score = self.keyword_score(&document.entities, query_entities);
                RankedResult {
                    combined_score: Self::combined_score(distance, keyword_score),
                    semantic_score: distance,
                    keyword_score,
                    document,
                }
            })
            .collect();

        ranked.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score));
        ranked
    }

    /// Keep one result per `doc_id`.
    ///
    /// Within a group the highest combined score wins; on a tie the chunk
    /// flagged `is_first_chunk` wins, then the earlier one. Groups are
    /// emitted in order of first appearance.
    pub fn group_by_document(ranked: Vec<RankedResult>) -> Vec<RankedResult> {
        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut best: Vec<RankedResult> = Vec::new();

        for result in ranked {
            match slots.get(&result.document.doc_id) {
                Some(&slot) => {
                    let current = &best[slot];
                    let better = result.combined_score > current.combined_score
                        || (result.combined_score == current.combined_score
                            && result.document.is_first_chunk
                            && !current.document.is_first_chunk);
                    if better {
                        best[slot] = result;
                    }
                }
                None => {
                    slots.insert(result.document.doc_id.clone(), best.len());
                    best.push(result);
                }
            }
        }

        best
    }
}

fn overlap(a: &[String], b: &[String]) -> usize {
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    a.intersection(&b).count()
}

// ---------------------------------------------------------------------------
// Hybrid Searcher
// ---------------------------------------------------------------------------

/// Query enhancement → vector search → entity rescoring → grouping.
pub struct HybridSearcher {
    index: Arc<dyn VectorSearch>,
    enhancer: QueryEnhancer,
    extractor: EntityExtractor,
    ranker: HybridRanker,
    config: RetrievalConfig,
    retry: RetryConfig,
}

impl HybridSearcher {
    pub fn new(index: Arc<dyn VectorSearch>, config: RetrievalConfig, retry: RetryConfig) -> Self {
        Self {
            index,
            enhancer: QueryEnhancer::new(config.history_window),
            extractor: EntityExtractor::new(),
            ranker: HybridRanker::new(config.weights()),
            config,
            retry,
        }
    }

    /// Query-side entities: the query's own plus those of the trailing
    /// history window, concatenated per key.
    pub fn query_entities(&self, query: &str, history: &[ChatMessage]) -> FinancialEntitySet {
        let mut entities = self.extractor.extract(query);
        for msg in recent(history, self.config.history_window) {
            entities.extend(self.extractor.extract(&msg.content));
        }
        entities
    }

    /// Run a hybrid search returning at most `k` results (default `top_k`),
    /// one per source document.
    pub async fn search(
        &self,
        query: &str,
        history: &[ChatMessage],
        k: Option<usize>,
    ) -> Result<Vec<RankedResult>, CollaboratorError> {
        let k = k.unwrap_or(self.config.top_k);
        let enhanced = self.enhancer.enhance(query, history);
        debug!(query, enhanced = %enhanced, "Enhanced query");

        let fetch = k.saturating_mul(self.config.overfetch_factor.max(1));
        let candidates = with_retry(&self.retry, "vector_search", || {
            self.index.search(&enhanced, fetch)
        })
        .await?;

        let query_entities = self.query_entities(query, history);
        let mut ranked = self.ranker.rank(candidates, &query_entities);
        let candidate_count = ranked.len();
        ranked.truncate(k);
        let results = HybridRanker::group_by_document(ranked);

        info!(
            candidates = candidate_count,
            returned = results.len(),
            "Hybrid search complete"
        );
        Ok(results)
    }

    pub fn index(&self) -> &Arc<dyn VectorSearch> {
        &self.index
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn chunk(doc_id: &str, chunk_id: &str, first: bool, entities: FinancialEntitySet) -> Arc<ChunkDocument> {
        Arc::new(ChunkDocument {
            doc_id: doc_id.into(),
            chunk_id: chunk_id.into(),
            content: format!("content of {chunk_id}"),
            is_first_chunk: first,
            is_last_chunk: !first,
            entities,
        })
    }

    fn entities(numbers: &[&str], percentages: &[&str], terms: &[&str]) -> FinancialEntitySet {
        FinancialEntitySet {
            numbers: numbers.iter().map(|s| s.to_string()).collect(),
            percentages: percentages.iter().map(|s| s.to_string()).collect(),
            financial_terms: terms.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Returns a fixed candidate list and records the requested query and k.
    struct FixedIndex {
        results: Vec<(Arc<ChunkDocument>, f64)>,
        calls: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl VectorSearch for FixedIndex {
        async fn search(
            &self,
            query: &str,
            k: usize,
        ) -> Result<Vec<(Arc<ChunkDocument>, f64)>, CollaboratorError> {
            self.calls.lock().unwrap().push((query.to_string(), k));
            Ok(self.results.iter().take(k).cloned().collect())
        }

        fn len(&self) -> usize {
            self.results.len()
        }
    }

    #[test]
    fn test_keyword_score_weights() {
        let ranker = HybridRanker::default();
        let doc = entities(&["100", "200"], &["15"], &["revenue", "cost"]);
        let query = entities(&["100", "200", "300"], &["15", "20"], &["revenue"]);
        // 2 numbers * 0.5 + 1 percentage * 0.5 + 1 term * 0.3
        assert!((ranker.keyword_score(&doc, &query) - 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_score_uses_sets() {
        let ranker = HybridRanker::default();
        let doc = entities(&["100"], &[], &[]);
        let query = entities(&["100", "100", "100"], &[], &[]);
        assert!((ranker.keyword_score(&doc, &query) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_combined_score() {
        assert!((HybridRanker::combined_score(0.0, 0.0) - 1.0).abs() < 1e-12);
        assert!((HybridRanker::combined_score(1.0, 0.0) - 0.5).abs() < 1e-12);
        assert!((HybridRanker::combined_score(1.0, 1.0) - 1.0).abs() < 1e-12);
        assert!(HybridRanker::combined_score(3.0, 0.6) > HybridRanker::combined_score(3.0, 0.5));
        assert!((HybridRanker::combined_score(-2.0, 0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rank_orders_by_combined_score() {
        let ranker = HybridRanker::default();
        let query = entities(&["42"], &[], &[]);
        let ranked = ranker.rank(
            vec![
                (chunk("a", "a-0", true, entities(&[], &[], &[])), 0.2),
                (chunk("b", "b-0", true, entities(&["42"], &[], &[])), 0.4),
                (chunk("c", "c-0", true, entities(&[], &[], &[])), 0.1),
            ],
            &query,
        );
        let ids: Vec<&str> = ranked.iter().map(|r| r.document.doc_id.as_str()).collect();
        // b: 1/1.4*1.5 = 1.07, c: 1/1.1 = 0.909, a: 1/1.2 = 0.833
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(ranked[0].semantic_score, 0.4);
        assert!((ranked[0].keyword_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rank_ties_are_stable() {
        let ranker = HybridRanker::default();
        let ranked = ranker.rank(
            vec![
                (chunk("x", "x-0", false, Default::default()), 0.5),
                (chunk("y", "y-0", false, Default::default()), 0.5),
                (chunk("z", "z-0", false, Default::default()), 0.5),
            ],
            &FinancialEntitySet::default(),
        );
        let ids: Vec<&str> = ranked.iter().map(|r| r.document.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_group_keeps_best_chunk_per_document() {
        let ranker = HybridRanker::default();
        let ranked = ranker.rank(
            vec![
                (chunk("1", "1-1", false, Default::default()), 0.1),
                (chunk("2", "2-0", true, Default::default()), 0.2),
                (chunk("1", "1-0", true, Default::default()), 0.3),
            ],
            &FinancialEntitySet::default(),
        );
        let grouped = HybridRanker::group_by_document(ranked);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].document.chunk_id, "1-1");
        assert_eq!(grouped[1].document.chunk_id, "2-0");
    }

    #[test]
    fn test_group_tie_prefers_first_chunk() {
        let ranker = HybridRanker::default();
        let ranked = ranker.rank(
            vec![
                (chunk("1", "1-2", false, Default::default()), 0.5),
                (chunk("1", "1-0", true, Default::default()), 0.5),
                (chunk("1", "1-1", false, Default::default()), 0.5),
            ],
            &FinancialEntitySet::default(),
        );
        let grouped = HybridRanker::group_by_document(ranked);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].document.chunk_id, "1-0");
    }

    #[tokio::test]
    async fn test_searcher_overfetches_and_enhances() {
        let index = Arc::new(FixedIndex {
            results: (0..12)
                .map(|i| (chunk(&format!("d{i}"), &format!("d{i}-0"), true, Default::default()), i as f64 * 0.1))
                .collect(),
            calls: Mutex::new(Vec::new()),
        });
        let searcher = HybridSearcher::new(index.clone(), RetrievalConfig::default(), RetryConfig::none());
        let history = vec![ChatMessage::assistant("It rose 15% in 2022")];
        let results = searcher.search("revenue growth 2023", &history, None).await.unwrap();

        assert_eq!(results.len(), 5);
        let calls = index.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "revenue growth 2023 15% 2022");
        assert_eq!(calls[0].1, 10);
    }

    #[tokio::test]
    async fn test_searcher_keyword_boost_promotes_candidate() {
        let index = Arc::new(FixedIndex {
            results: vec![
                (chunk("plain", "plain-0", true, entities(&[], &[], &[])), 0.10),
                (chunk("match", "match-0", true, entities(&[], &["15"], &["revenue"])), 0.30),
            ],
            calls: Mutex::new(Vec::new()),
        });
        let searcher = HybridSearcher::new(index, RetrievalConfig::default(), RetryConfig::none());
        let history = vec![ChatMessage::assistant("revenue grew 15%")];
        let results = searcher.search("what about revenue?", &history, Some(2)).await.unwrap();
        assert_eq!(results[0].document.doc_id, "match");
    }

    #[test]
    fn test_query_entities_merge_history_window() {
        let index = Arc::new(FixedIndex {
            results: Vec::new(),
            calls: Mutex::new(Vec::new()),
        });
        let searcher = HybridSearcher::new(index, RetrievalConfig::default(), RetryConfig::none());
        let history = vec![
            ChatMessage::user("ignored 99%"),
            ChatMessage::user("margin 12%"),
            ChatMessage::assistant("profit 3%"),
        ];
        let e = searcher.query_entities("revenue 5%", &history);
        assert_eq!(e.percentages, vec!["5", "12", "3"]);
        assert_eq!(e.financial_terms, vec!["revenue", "margin", "profit"]);
    }

    #[test]
    fn test_retrieval_config_defaults() {
        let config: RetrievalConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.top_k, 5);
        assert_eq!(config.overfetch_factor, 2);
        assert_eq!(config.history_window, 2);
        assert!((config.weights().term - 0.3).abs() < f64::EPSILON);
    }
}
