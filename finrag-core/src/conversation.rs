//! Bounded per-conversation state.
//!
//! Conversations live in an LRU map capped at `max_conversations`; an entry
//! idle for longer than `idle_ttl_secs` is dropped on next access. Each state
//! sits behind its own async mutex so turns of one conversation run one at a
//! time while other conversations proceed.

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::metrics::AggregateMetrics;

/// Turns remembered per conversation.
pub const MAX_REMEMBERED_TURNS: usize = 20;

/// Configuration for the conversation store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

fn default_max_conversations() -> usize {
    1024
}
fn default_idle_ttl_secs() -> u64 {
    3600
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_conversations: default_max_conversations(),
            idle_ttl_secs: default_idle_ttl_secs(),
        }
    }
}

/// Running metrics of one conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetrics {
    pub questions_asked: u64,
    pub total_tokens: u64,
    /// Running mean of response latency in seconds.
    pub average_response_time: f64,
    /// Global aggregate as of this conversation's latest turn.
    pub latest_aggregate: Option<AggregateMetrics>,
}

impl ConversationMetrics {
    pub fn record(&mut self, response_time: f64, tokens: u64, aggregate: AggregateMetrics) {
        self.questions_asked += 1;
        let n = self.questions_asked as f64;
        self.average_response_time = (self.average_response_time * (n - 1.0) + response_time) / n;
        self.total_tokens += tokens;
        self.latest_aggregate = Some(aggregate);
    }
}

/// One remembered question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub metrics: ConversationMetrics,
    pub turns: VecDeque<ConversationTurn>,
}

impl ConversationState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            started_at: Utc::now(),
            metrics: ConversationMetrics::default(),
            turns: VecDeque::new(),
        }
    }

    /// Remember a turn, forgetting the oldest beyond [`MAX_REMEMBERED_TURNS`].
    pub fn remember(&mut self, question: &str, answer: &str) {
        self.turns.push_back(ConversationTurn {
            question: question.to_string(),
            answer: answer.to_string(),
            timestamp: Utc::now(),
        });
        while self.turns.len() > MAX_REMEMBERED_TURNS {
            self.turns.pop_front();
        }
    }
}

pub type SharedConversation = Arc<tokio::sync::Mutex<ConversationState>>;

struct Slot {
    state: SharedConversation,
    last_active: Instant,
}

pub struct ConversationStore {
    slots: Mutex<LruCache<String, Slot>>,
    idle_ttl: Duration,
}

impl ConversationStore {
    pub fn new(config: &ConversationConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_conversations).unwrap_or(NonZeroUsize::MIN);
        Self {
            slots: Mutex::new(LruCache::new(capacity)),
            idle_ttl: Duration::from_secs(config.idle_ttl_secs),
        }
    }

    /// Fetch the conversation, creating it when absent or expired.
    /// The flag is `true` when a new conversation was started.
    pub fn get_or_create(&self, id: &str) -> (SharedConversation, bool) {
        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(id) {
            if slot.last_active.elapsed() <= self.idle_ttl {
                slot.last_active = Instant::now();
                return (slot.state.clone(), false);
            }
            debug!(conversation_id = id, "Conversation expired");
            slots.pop(id);
        }

        let state = Arc::new(tokio::sync::Mutex::new(ConversationState::new(id)));
        if let Some((evicted, _)) = slots.push(
            id.to_string(),
            Slot {
                state: state.clone(),
                last_active: Instant::now(),
            },
        ) {
            if evicted != id {
                debug!(conversation_id = %evicted, "Evicted least recently used conversation");
            }
        }
        (state, true)
    }

    /// Existing, unexpired conversation without touching its recency.
    pub fn get(&self, id: &str) -> Option<SharedConversation> {
        let slots = self.lock();
        slots
            .peek(id)
            .filter(|slot| slot.last_active.elapsed() <= self.idle_ttl)
            .map(|slot| slot.state.clone())
    }

    /// Drop every expired conversation; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut slots = self.lock();
        let expired: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.last_active.elapsed() > self.idle_ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            slots.pop(id);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}
