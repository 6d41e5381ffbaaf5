//! Error types for the FinRAG core library.
//!
//! Uses `thiserror` for public API error types. Collaborator failures carry
//! enough structure to tell transient (retryable) failures from fatal ones.

use std::path::PathBuf;

/// Top-level error type for the FinRAG core library.
#[derive(Debug, thiserror::Error)]
pub enum FinragError {
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Which external collaborator produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    Embedder,
    VectorSearch,
    Generator,
    Tokenizer,
}

impl std::fmt::Display for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collaborator::Embedder => write!(f, "embedder"),
            Collaborator::VectorSearch => write!(f, "vector search"),
            Collaborator::Generator => write!(f, "answer generator"),
            Collaborator::Tokenizer => write!(f, "tokenizer"),
        }
    }
}

/// Errors from external collaborators (embedding, search, generation, tokenizer).
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{source_kind} request timed out after {timeout_secs}s")]
    Timeout {
        source_kind: Collaborator,
        timeout_secs: u64,
    },

    #[error("{source_kind} rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        source_kind: Collaborator,
        retry_after_secs: u64,
    },

    #[error("{source_kind} connection failed: {message}")]
    Connection {
        source_kind: Collaborator,
        message: String,
    },

    #[error("{source_kind} server error: {message}")]
    ServerError {
        source_kind: Collaborator,
        message: String,
    },

    #[error("{source_kind} authentication failed")]
    AuthFailed { source_kind: Collaborator },

    #[error("{source_kind} returned an invalid response: {message}")]
    InvalidResponse {
        source_kind: Collaborator,
        message: String,
    },

    #[error("{source_kind} unavailable: {message}")]
    Unavailable {
        source_kind: Collaborator,
        message: String,
    },
}

impl CollaboratorError {
    /// Whether the failure is transient and the call may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollaboratorError::Timeout { .. }
                | CollaboratorError::RateLimited { .. }
                | CollaboratorError::Connection { .. }
                | CollaboratorError::ServerError { .. }
        )
    }

    /// Minimum wait requested by the collaborator, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            CollaboratorError::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Map a non-success HTTP status from a provider API.
    pub fn from_http_status(source_kind: Collaborator, status: u16, body: &str) -> Self {
        match status {
            401 | 403 => CollaboratorError::AuthFailed { source_kind },
            408 => CollaboratorError::Timeout {
                source_kind,
                timeout_secs: 0,
            },
            429 => {
                // "Rate limit reached ... Please try again in 7s"
                let retry_after_secs = body
                    .split("in ")
                    .last()
                    .and_then(|s| s.split('s').next())
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .unwrap_or(5);
                CollaboratorError::RateLimited {
                    source_kind,
                    retry_after_secs,
                }
            }
            s if s >= 500 => CollaboratorError::ServerError {
                source_kind,
                message: format!("HTTP {}: {}", s, body),
            },
            s => CollaboratorError::InvalidResponse {
                source_kind,
                message: format!("HTTP {}: {}", s, body),
            },
        }
    }

    /// Map a transport-level `reqwest` failure.
    pub fn from_transport(source_kind: Collaborator, err: &reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            CollaboratorError::Timeout {
                source_kind,
                timeout_secs,
            }
        } else if err.is_decode() {
            CollaboratorError::InvalidResponse {
                source_kind,
                message: err.to_string(),
            }
        } else {
            CollaboratorError::Connection {
                source_kind,
                message: err.to_string(),
            }
        }
    }

    pub fn collaborator(&self) -> Collaborator {
        match self {
            CollaboratorError::Timeout { source_kind, .. }
            | CollaboratorError::RateLimited { source_kind, .. }
            | CollaboratorError::Connection { source_kind, .. }
            | CollaboratorError::ServerError { source_kind, .. }
            | CollaboratorError::AuthFailed { source_kind }
            | CollaboratorError::InvalidResponse { source_kind, .. }
            | CollaboratorError::Unavailable { source_kind, .. } => *source_kind,
        }
    }
}

/// Errors from the metrics history store.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to load metrics from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    #[error("Failed to save metrics to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },
}

/// Errors from text-overlap scorers.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("ROUGE scoring failed: {message}")]
    Rouge { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `FinragError`.
pub type Result<T> = std::result::Result<T, FinragError>;
