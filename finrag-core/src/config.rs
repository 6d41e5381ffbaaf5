//! Configuration system for FinRAG.
//!
//! Layered configuration using `figment`:
//! 1. Built-in defaults
//! 2. User config file (`<config_dir>/finrag/config.toml`)
//! 3. Workspace config file (`.finrag/config.toml`)
//! 4. Environment variables (`FINRAG_` prefix, `__` for nesting)
//! 5. Explicit overrides

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::conversation::ConversationConfig;
use crate::embeddings::EmbeddingConfig;
use crate::error::ConfigError;
use crate::evaluation::EvaluationConfig;
use crate::generation::LlmConfig;
use crate::history::MetricsConfig;
use crate::retry::RetryConfig;
use crate::search::RetrievalConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinragConfig {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub conversations: ConversationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl FinragConfig {
    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });

        if self.retrieval.top_k == 0 {
            return invalid("retrieval.top_k must be at least 1".into());
        }
        if self.retrieval.overfetch_factor == 0 {
            return invalid("retrieval.overfetch_factor must be at least 1".into());
        }
        for (name, weight) in [
            ("number_weight", self.retrieval.number_weight),
            ("percentage_weight", self.retrieval.percentage_weight),
            ("term_weight", self.retrieval.term_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return invalid(format!("retrieval.{name} must be a non-negative number"));
            }
        }
        for (name, value) in [
            ("admission_threshold", self.evaluation.admission_threshold),
            ("default_relevance_threshold", self.evaluation.default_relevance_threshold),
            ("cosine_threshold", self.evaluation.cosine_threshold),
            ("rouge1_threshold", self.evaluation.rouge1_threshold),
        ] {
            if !value.is_finite() {
                return invalid(format!("evaluation.{name} must be finite"));
            }
        }
        if self.metrics.history_capacity == 0 {
            return invalid("metrics.history_capacity must be at least 1".into());
        }
        if self.conversations.max_conversations == 0 {
            return invalid("conversations.max_conversations must be at least 1".into());
        }
        if !matches!(self.embedding.provider.as_str(), "local" | "openai") {
            return invalid(format!(
                "embedding.provider must be \"local\" or \"openai\", got \"{}\"",
                self.embedding.provider
            ));
        }
        Ok(())
    }
}

/// Path of the user-level config file, if a home directory can be resolved.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "finrag", "finrag")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".finrag").join("config.toml")
}

/// Load configuration from all layers and validate it.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&FinragConfig>,
) -> Result<FinragConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(FinragConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // FINRAG_RETRIEVAL__TOP_K, FINRAG_LLM__MODEL, ...
    figment = figment.merge(Env::prefixed("FINRAG_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: FinragConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FinragConfig::default();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.evaluation.admission_threshold, 0.5);
        assert_eq!(config.metrics.history_capacity, 100);
        assert_eq!(config.conversations.max_conversations, 1024);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.llm.model, "gpt-4-turbo-preview");
        assert_eq!(config.embedding.provider, "local");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = FinragConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: FinragConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.retrieval.top_k, config.retrieval.top_k);
        assert_eq!(parsed.metrics.storage_dir, config.metrics.storage_dir);
        assert_eq!(parsed.evaluation.retention_window, 3);
    }

    #[test]
    fn test_load_config_defaults() {
        let config = load_config(None, None).unwrap();
        assert_eq!(config.retrieval.overfetch_factor, 2);
        assert_eq!(config.evaluation.default_relevance_window, 3);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = FinragConfig::default();
        overrides.retrieval.top_k = 8;
        overrides.evaluation.cosine_threshold = 0.9;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.evaluation.cosine_threshold, 0.9);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let finrag_dir = dir.path().join(".finrag");
        std::fs::create_dir_all(&finrag_dir).unwrap();
        std::fs::write(
            finrag_dir.join("config.toml"),
            r#"
[retrieval]
top_k = 3
term_weight = 0.4

[evaluation]
admission_threshold = 0.6

[metrics]
storage_dir = "var/metrics"
reset_on_start = true
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.retrieval.term_weight, 0.4);
        assert_eq!(config.retrieval.number_weight, 0.5);
        assert_eq!(config.evaluation.admission_threshold, 0.6);
        assert_eq!(config.metrics.storage_dir, PathBuf::from("var/metrics"));
        assert!(config.metrics.reset_on_start);
        assert_eq!(config.metrics.history_capacity, 100);
    }

    #[test]
    fn test_invalid_workspace_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let finrag_dir = dir.path().join(".finrag");
        std::fs::create_dir_all(&finrag_dir).unwrap();
        std::fs::write(finrag_dir.join("config.toml"), "[retrieval]\ntop_k = 0\n").unwrap();

        let err = load_config(Some(dir.path()), None).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_validate_rejects_unknown_embedding_provider() {
        let mut config = FinragConfig::default();
        config.embedding.provider = "mystery".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_weight() {
        let mut config = FinragConfig::default();
        config.retrieval.number_weight = -1.0;
        assert!(config.validate().is_err());
    }
}
