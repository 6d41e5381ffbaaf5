//! The question-answering pipeline.
//!
//! One turn runs: hybrid search → retrieval evaluation → prompt → generation
//! → answer and retention evaluation → metrics commit. All metric values are
//! gathered into a local [`TurnMetrics`] and committed to the shared
//! aggregate in one step after the turn succeeds; a failed turn leaves the
//! aggregate, the history file and the conversation untouched.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::FinragConfig;
use crate::conversation::{ConversationMetrics, ConversationStore};
use crate::embeddings::Embedder;
use crate::entities::push_unique;
use crate::error::FinragError;
use crate::evaluation::{
    AnswerEvaluator, ContextRetentionScorer, EvaluationConfig, NgramRougeScorer,
    RetrievalEvaluator, RougeScorer, RougeScores,
};
use crate::generation::{AnswerGenerator, OpenAiGenerator, PROMPT_HISTORY_MESSAGES, PromptBuilder};
use crate::history::{MetricsHistoryStore, MetricsState};
use crate::metrics::{AggregateMetrics, MetricsAggregator, SystemMetrics, TurnMetrics};
use crate::query::{ChatMessage, ChatRole};
use crate::retry::{RetryConfig, with_retry};
use crate::search::{HybridSearcher, RankedResult, VectorSearch};
use crate::tokens::{TokenCounter, Tokenizer};

/// Characters of chunk content shown per search result.
pub const PREVIEW_CHARS: usize = 200;
/// Search results included in a response.
pub const RESPONSE_RESULTS: usize = 3;

/// Optional evaluation inputs supplied with a question.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionContext {
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    /// Doc ids considered relevant; derived from the results when absent.
    #[serde(default)]
    pub relevant_docs: Option<Vec<String>>,
    /// Reference answer; the previous assistant message or the retrieved
    /// context when absent.
    #[serde(default)]
    pub ground_truth: Option<String>,
}

/// Chunk metadata shown with a search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub doc_id: String,
    pub chunk_id: String,
    pub is_first_chunk: bool,
    pub is_last_chunk: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultView {
    /// First [`PREVIEW_CHARS`] characters followed by `...`.
    pub content: String,
    pub score: f64,
    pub metadata: ChunkMetadata,
}

impl SearchResultView {
    fn from_result(result: &RankedResult) -> Self {
        let doc = &result.document;
        let preview: String = doc.content.chars().take(PREVIEW_CHARS).collect();
        Self {
            content: format!("{preview}..."),
            score: result.combined_score,
            metadata: ChunkMetadata {
                doc_id: doc.doc_id.clone(),
                chunk_id: doc.chunk_id.clone(),
                is_first_chunk: doc.is_first_chunk,
                is_last_chunk: doc.is_last_chunk,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub conversation_id: String,
    pub answer: String,
    /// The formatted context the answer was generated from.
    pub context: String,
    /// Global aggregate after this turn.
    pub metrics: AggregateMetrics,
    /// This turn's own measurements.
    pub turn: TurnMetrics,
    /// ROUGE of the answer against the retrieved context.
    pub context_rouge: RougeScores,
    pub search_results: Vec<SearchResultView>,
}

/// Result of [`RagEngine::get_metrics`].
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MetricsView {
    Conversation(ConversationMetrics),
    Global(MetricsState),
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub indexed_chunks: usize,
    pub open_conversations: usize,
    pub history_len: usize,
    pub total_questions: u64,
    pub generator_model: String,
    pub embedder: String,
}

/// External capabilities the engine is built from.
pub struct Collaborators {
    pub index: Arc<dyn VectorSearch>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn AnswerGenerator>,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub rouge: Arc<dyn RougeScorer>,
}

impl Collaborators {
    /// Production collaborators: OpenAI-compatible generator, tiktoken counter
    /// and n-gram ROUGE around the given index and embedder.
    pub fn from_config(
        config: &FinragConfig,
        index: Arc<dyn VectorSearch>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, FinragError> {
        Ok(Self {
            index,
            embedder,
            generator: Arc::new(OpenAiGenerator::from_config(&config.llm)?),
            tokenizer: Arc::new(TokenCounter::for_model(&config.llm.model)?),
            rouge: Arc::new(NgramRougeScorer),
        })
    }
}

pub struct RagEngine {
    searcher: HybridSearcher,
    generator: Arc<dyn AnswerGenerator>,
    embedder: Arc<dyn Embedder>,
    tokenizer: Arc<dyn Tokenizer>,
    prompt: PromptBuilder,
    retrieval_evaluator: RetrievalEvaluator,
    answer_evaluator: AnswerEvaluator,
    retention_scorer: ContextRetentionScorer,
    aggregator: Mutex<MetricsAggregator>,
    history: Arc<MetricsHistoryStore>,
    conversations: ConversationStore,
    evaluation: EvaluationConfig,
    retry: RetryConfig,
}

impl RagEngine {
    pub fn new(
        config: &FinragConfig,
        collaborators: Collaborators,
        history: MetricsHistoryStore,
    ) -> Self {
        let evaluation = config.evaluation.clone();
        let retry = config.retry.clone();
        let Collaborators {
            index,
            embedder,
            generator,
            tokenizer,
            rouge,
        } = collaborators;

        Self {
            searcher: HybridSearcher::new(index, config.retrieval.clone(), retry.clone()),
            prompt: PromptBuilder::new(evaluation.admission_threshold, PROMPT_HISTORY_MESSAGES),
            retrieval_evaluator: RetrievalEvaluator::new(evaluation.admission_threshold),
            answer_evaluator: AnswerEvaluator::new(embedder.clone(), rouge, tokenizer.clone())
                .with_thresholds(evaluation.cosine_threshold, evaluation.rouge1_threshold)
                .with_retry(retry.clone()),
            retention_scorer: ContextRetentionScorer::new(
                embedder.clone(),
                evaluation.retention_window,
            )
            .with_retry(retry.clone()),
            aggregator: Mutex::new(MetricsAggregator::new()),
            conversations: ConversationStore::new(&config.conversations),
            generator,
            embedder,
            tokenizer,
            history: Arc::new(history),
            evaluation,
            retry,
        }
    }

    /// Answer `question`, evaluate the turn and commit its metrics.
    ///
    /// A missing `conversation_id` starts a new conversation under a fresh
    /// UUID, returned in the response. Turns of the same conversation are
    /// processed one at a time.
    pub async fn process_question(
        &self,
        question: &str,
        conversation_id: Option<&str>,
        context: Option<QuestionContext>,
    ) -> Result<QuestionResponse, FinragError> {
        let start = Instant::now();
        let conversation_id = conversation_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let (conversation, _) = self.conversations.get_or_create(&conversation_id);
        let mut conversation = conversation.lock().await;

        let QuestionContext {
            history,
            relevant_docs,
            ground_truth,
        } = context.unwrap_or_default();

        // Retrieval
        let results = self.searcher.search(question, &history, None).await?;
        let relevant = relevant_docs.unwrap_or_else(|| self.default_relevant(&results));
        let retrieval = self
            .retrieval_evaluator
            .evaluate_turn(&results, &relevant, None);

        // Generation
        let retrieved_context = self.prompt.prepare_context(&results);
        let prompt = self.prompt.build(&retrieved_context, &history, question);
        let answer = with_retry(&self.retry, "generate_answer", || {
            self.generator.generate(&prompt)
        })
        .await?;

        // Evaluation
        let tokens: u64 = [question, prompt.as_str(), answer.as_str()]
            .iter()
            .map(|t| self.tokenizer.count(t) as u64)
            .sum();
        let context_rouge = self.answer_evaluator.context_rouge(&answer, &retrieved_context);
        let reference = ground_truth
            .or_else(|| last_assistant_answer(&history))
            .unwrap_or_else(|| retrieved_context.clone());
        let answer_metrics = self.answer_evaluator.evaluate(&answer, &reference).await?;
        let context_retention = if history.is_empty() {
            None
        } else {
            Some(self.retention_scorer.score(&answer, &history).await?)
        };

        let response_latency = start.elapsed().as_secs_f64();
        let turn = TurnMetrics {
            retrieval,
            answer: answer_metrics,
            system: SystemMetrics {
                response_latency,
                context_retention,
                tokens,
                successful_retrieval: !results.is_empty(),
                new_conversation: conversation.metrics.questions_asked == 0,
            },
        };

        // Commit: persist the candidate aggregate, then publish it.
        let aggregate = {
            let mut aggregator = self.aggregator.lock().await;
            let mut candidate = aggregator.clone();
            candidate.apply(&turn);
            let aggregate = candidate.aggregate();
            self.persist(aggregate.clone()).await?;
            *aggregator = candidate;
            aggregate
        };
        conversation
            .metrics
            .record(response_latency, tokens, aggregate.clone());
        conversation.remember(question, &answer);

        info!(
            conversation_id = %conversation_id,
            results = results.len(),
            tokens,
            latency_secs = response_latency,
            accuracy = turn.answer.answer_accuracy,
            "Question processed"
        );

        Ok(QuestionResponse {
            conversation_id,
            answer,
            context: retrieved_context,
            metrics: aggregate,
            turn,
            context_rouge,
            search_results: results
                .iter()
                .take(RESPONSE_RESULTS)
                .map(SearchResultView::from_result)
                .collect(),
        })
    }

    /// Per-conversation metrics for a known conversation, otherwise the
    /// persisted global aggregate and history.
    pub async fn get_metrics(
        &self,
        conversation_id: Option<&str>,
    ) -> Result<MetricsView, FinragError> {
        if let Some(id) = conversation_id {
            match self.conversations.get(id) {
                Some(conversation) => {
                    return Ok(MetricsView::Conversation(
                        conversation.lock().await.metrics.clone(),
                    ));
                }
                None => warn!(conversation_id = id, "Unknown conversation, returning global metrics"),
            }
        }
        Ok(MetricsView::Global(self.history.state()?))
    }

    /// Current in-memory aggregate.
    pub async fn aggregate(&self) -> AggregateMetrics {
        self.aggregator.lock().await.aggregate()
    }

    pub async fn health(&self) -> Result<EngineHealth, FinragError> {
        let total_questions = self.aggregator.lock().await.total_questions();
        Ok(EngineHealth {
            indexed_chunks: self.searcher.index().len(),
            open_conversations: self.conversations.len(),
            history_len: self.history.state()?.metrics_history.len(),
            total_questions,
            generator_model: self.generator.model_name().to_string(),
            embedder: self.embedder.provider_name().to_string(),
        })
    }

    /// Write `aggregate` to the history store off the async runtime.
    async fn persist(&self, aggregate: AggregateMetrics) -> Result<(), FinragError> {
        let history = Arc::clone(&self.history);
        tokio::task::spawn_blocking(move || history.update(&aggregate))
            .await
            .map_err(std::io::Error::from)??;
        Ok(())
    }

    /// Doc ids of the leading results scoring above the relevance threshold.
    fn default_relevant(&self, results: &[RankedResult]) -> Vec<String> {
        let mut relevant = Vec::new();
        for r in results
            .iter()
            .take(self.evaluation.default_relevance_window)
            .filter(|r| r.combined_score > self.evaluation.default_relevance_threshold)
        {
            push_unique(&mut relevant, r.document.doc_id.clone());
        }
        relevant
    }
}

/// Content of the latest assistant message, unless it is empty.
fn last_assistant_answer(history: &[ChatMessage]) -> Option<String> {
    history
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::Assistant)
        .filter(|m| !m.content.is_empty())
        .map(|m| m.content.clone())
}
