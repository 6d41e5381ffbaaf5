//! Conversation-aware query enhancement.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::entities::push_unique;

/// Vocabulary lifted from recent turns into the enhanced query.
pub const ENHANCEMENT_TERMS: &[&str] = &[
    "increase", "decrease", "growth", "profit", "revenue", "cost", "margin", "ratio",
];

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatRole::User => write!(f, "User"),
            ChatRole::Assistant => write!(f, "Assistant"),
            ChatRole::System => write!(f, "System"),
        }
    }
}

/// One message of prior conversation supplied with a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// The trailing `window` messages of `history` (all of them if shorter).
pub fn recent(history: &[ChatMessage], window: usize) -> &[ChatMessage] {
    &history[history.len().saturating_sub(window)..]
}

/// Augments a query with numbers and financial terms from recent turns.
///
/// Terms are collected in insertion order: older message first, numeric
/// tokens before vocabulary terms within a message, duplicates dropped.
pub struct QueryEnhancer {
    window: usize,
    numeric: Regex,
    term: Regex,
}

impl QueryEnhancer {
    pub fn new(window: usize) -> Self {
        let terms = ENHANCEMENT_TERMS.join("|");
        Self {
            window,
            numeric: Regex::new(r"\d+(?:\.\d+)?%?").expect("numeric pattern is valid"),
            term: Regex::new(&format!(r"\b(?:{terms})\b")).expect("term pattern is valid"),
        }
    }

    /// Key terms found in the trailing window of `history`.
    pub fn key_terms(&self, history: &[ChatMessage]) -> Vec<String> {
        let mut key_terms = Vec::new();
        for msg in recent(history, self.window) {
            let content = msg.content.to_lowercase();
            for m in self.numeric.find_iter(&content) {
                push_unique(&mut key_terms, m.as_str().to_string());
            }
            for m in self.term.find_iter(&content) {
                push_unique(&mut key_terms, m.as_str().to_string());
            }
        }
        key_terms
    }

    /// Return `"{query} {terms...}"`, or the query unchanged when the recent
    /// history contributes nothing.
    pub fn enhance(&self, query: &str, history: &[ChatMessage]) -> String {
        let key_terms = self.key_terms(history);
        if key_terms.is_empty() {
            return query.to_string();
        }
        format!("{} {}", query, key_terms.join(" "))
    }
}

impl Default for QueryEnhancer {
    fn default() -> Self {
        Self::new(2)
    }
}
