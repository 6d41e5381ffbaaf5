//! Token accounting.

use crate::error::{Collaborator, CollaboratorError};

/// Deterministic token counting for usage accounting.
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Token counter using tiktoken-rs for accurate BPE tokenization.
pub struct TokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TokenCounter {
    /// The `cl100k_base` encoding used by GPT-4 class models.
    pub fn cl100k() -> Result<Self, CollaboratorError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| CollaboratorError::Unavailable {
            source_kind: Collaborator::Tokenizer,
            message: e.to_string(),
        })?;
        Ok(Self { bpe })
    }

    /// Create a token counter for the given model.
    /// Falls back to cl100k_base if the model isn't recognized.
    pub fn for_model(model: &str) -> Result<Self, CollaboratorError> {
        match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => Ok(Self { bpe }),
            Err(_) => Self::cl100k(),
        }
    }
}

impl Tokenizer for TokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter").finish_non_exhaustive()
    }
}
