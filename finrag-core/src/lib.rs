//! # FinRAG Core
//!
//! Hybrid retrieval and online evaluation for financial question answering.
//! Provides financial entity extraction, hybrid semantic/keyword ranking,
//! retrieval and answer evaluation, metrics aggregation with persisted
//! history, and the question-answering engine tying them together.

pub mod config;
pub mod conversation;
pub mod embeddings;
pub mod engine;
pub mod entities;
pub mod error;
pub mod evaluation;
pub mod generation;
pub mod history;
pub mod index;
pub mod metrics;
pub mod persistence;
pub mod query;
pub mod report;
pub mod retry;
pub mod search;
pub mod tokens;

// Re-export commonly used types at the crate root.
pub use config::{FinragConfig, load_config};
pub use conversation::{ConversationConfig, ConversationMetrics, ConversationStore};
pub use embeddings::{Embedder, EmbeddingConfig, LocalEmbedder, OpenAiEmbedder, create_embedder};
pub use engine::{Collaborators, EngineHealth, MetricsView, QuestionContext, QuestionResponse, RagEngine};
pub use entities::{EntityExtractor, FinancialEntitySet};
pub use error::{
    Collaborator, CollaboratorError, ConfigError, FinragError, MetricsError, Result, ScoringError,
};
pub use evaluation::{
    AnswerEvaluator, AnswerMetrics, ContextRetentionScorer, EvaluationConfig, NgramRougeScorer,
    RetrievalEvaluator, RetrievalMetrics, RougeScorer, RougeScores,
};
pub use generation::{AnswerGenerator, LlmConfig, OpenAiGenerator, PromptBuilder};
pub use history::{MetricsConfig, MetricsHistoryStore, MetricsState};
pub use index::{IndexBuildReport, InMemoryVectorIndex};
pub use metrics::{AggregateMetrics, MetricsAggregator, SystemMetrics, TurnMetrics};
pub use query::{ChatMessage, ChatRole, QueryEnhancer};
pub use retry::RetryConfig;
pub use search::{ChunkDocument, HybridRanker, HybridSearcher, RankedResult, RetrievalConfig, VectorSearch};
pub use tokens::{TokenCounter, Tokenizer};
