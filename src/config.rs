//! Core configuration.
//!
//! All tunables are gathered in one immutable [`CoreConfig`] record, loaded
//! once at startup and passed by reference through [`crate::service::CoreServices`].
//! Defaults follow the production deployment values.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Target token budget per segment emitted by the splitter.
pub const DEFAULT_MAX_TOKENS: usize = 512;

/// Characters preserved on each side of a long-article sub-split cut.
pub const DEFAULT_OVERLAP: usize = 50;

/// Minimum trimmed segment length; shorter segments are dropped unless they
/// carry an article number.
pub const DEFAULT_MIN_CHUNK_CHARS: usize = 30;

/// Embedding vector dimension. Identical for every vector in the index;
/// mismatched writes are rejected.
pub const DEFAULT_EMBEDDING_DIM: usize = 768;

/// Default number of retrieval results.
pub const DEFAULT_TOP_K: usize = 5;

/// Message-length threshold for UNIFIED routing.
pub const DEFAULT_UNIFIED_THRESHOLD_CHARS: usize = 120;

/// Estimated-token budget for an assembled chat prompt.
pub const DEFAULT_PROMPT_BUDGET_TOKENS: usize = 8_000;

/// Embedding batch size during ingestion.
pub const DEFAULT_INGEST_BATCH_SIZE: usize = 16;

/// Retry attempts for a failing embedding batch.
pub const DEFAULT_EMBED_RETRIES: usize = 3;

/// Minimum extracted contract length accepted by the review pipeline.
pub const DEFAULT_MIN_CONTRACT_CHARS: usize = 200;

/// Configuration for the legal analysis core.
///
/// Deserializable from TOML/JSON; [`Default`] carries the deployment
/// defaults, so partial configs only override what they name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Splitter token budget per segment.
    pub max_tokens: usize,
    /// Overlap characters at long-article sub-split cuts.
    pub overlap: usize,
    /// Minimum trimmed segment length (articles exempt).
    pub min_chunk_chars: usize,
    /// Embedding dimension; hard invariant across the index.
    pub embedding_dim: usize,
    /// Default retrieval top-k.
    pub default_top_k: usize,
    /// UNIFIED routing threshold in characters.
    pub unified_threshold_chars: usize,
    /// Recalled history turns for the BASIC model.
    pub history_window_basic: usize,
    /// Recalled history turns for ADVANCED/ADVANCED_RAG models.
    pub history_window_advanced: usize,
    /// Estimated-token budget for assembled prompts.
    pub prompt_budget_tokens: usize,
    /// Per-AI-call timeout inside a review stage, seconds.
    pub review_stage_timeout_secs: u64,
    /// Whole-review deadline, seconds.
    pub review_deadline_secs: u64,
    /// Per-turn chat deadline, seconds.
    pub chat_deadline_secs: u64,
    /// Embedding batch size during ingestion.
    pub ingest_batch_size: usize,
    /// Retry attempts for a failing embedding batch.
    pub embed_retries: usize,
    /// Minimum extracted contract length for review.
    pub min_contract_chars: usize,
    /// Concurrent embed/chat model calls (bounded pool).
    pub max_concurrent_model_calls: usize,
    /// Bounded-queue capacity before `ResourceExhausted`.
    pub queue_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            overlap: DEFAULT_OVERLAP,
            min_chunk_chars: DEFAULT_MIN_CHUNK_CHARS,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            default_top_k: DEFAULT_TOP_K,
            unified_threshold_chars: DEFAULT_UNIFIED_THRESHOLD_CHARS,
            history_window_basic: 15,
            history_window_advanced: 30,
            prompt_budget_tokens: DEFAULT_PROMPT_BUDGET_TOKENS,
            review_stage_timeout_secs: 120,
            review_deadline_secs: 25 * 60,
            chat_deadline_secs: 120,
            ingest_batch_size: DEFAULT_INGEST_BATCH_SIZE,
            embed_retries: DEFAULT_EMBED_RETRIES,
            min_contract_chars: DEFAULT_MIN_CONTRACT_CHARS,
            max_concurrent_model_calls: 10,
            queue_capacity: 100,
        }
    }
}

impl CoreConfig {
    /// Creates a config with the deployment defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-AI-call timeout inside a review stage.
    #[must_use]
    pub const fn review_stage_timeout(&self) -> Duration {
        Duration::from_secs(self.review_stage_timeout_secs)
    }

    /// Whole-review deadline.
    #[must_use]
    pub const fn review_deadline(&self) -> Duration {
        Duration::from_secs(self.review_deadline_secs)
    }

    /// Per-turn chat deadline.
    #[must_use]
    pub const fn chat_deadline(&self) -> Duration {
        Duration::from_secs(self.chat_deadline_secs)
    }

    /// History window for the given advanced-ness.
    #[must_use]
    pub const fn history_window(&self, advanced: bool) -> usize {
        if advanced {
            self.history_window_advanced
        } else {
            self.history_window_basic
        }
    }

    /// Validates invariants that cannot be expressed in the type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] when a field is out of range.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_tokens == 0 {
            return Err(crate::Error::Config {
                message: "max_tokens must be > 0".to_string(),
            });
        }
        if self.embedding_dim == 0 {
            return Err(crate::Error::Config {
                message: "embedding_dim must be > 0".to_string(),
            });
        }
        // Overlap is measured in characters against the approximate character
        // budget of max_tokens (3 bytes/token estimator, CJK-dominant text).
        if self.overlap >= self.max_tokens * 3 {
            return Err(crate::Error::Config {
                message: format!(
                    "overlap {} must be less than the character budget {}",
                    self.overlap,
                    self.max_tokens * 3
                ),
            });
        }
        if self.ingest_batch_size == 0 {
            return Err(crate::Error::Config {
                message: "ingest_batch_size must be > 0".to_string(),
            });
        }
        if self.max_concurrent_model_calls == 0 {
            return Err(crate::Error::Config {
                message: "max_concurrent_model_calls must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_deployment_values() {
        let config = CoreConfig::default();
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.overlap, 50);
        assert_eq!(config.min_chunk_chars, 30);
        assert_eq!(config.embedding_dim, 768);
        assert_eq!(config.default_top_k, 5);
        assert_eq!(config.unified_threshold_chars, 120);
        assert_eq!(config.history_window_basic, 15);
        assert_eq!(config.history_window_advanced, 30);
        assert_eq!(config.prompt_budget_tokens, 8_000);
        assert_eq!(config.ingest_batch_size, 16);
        assert_eq!(config.embed_retries, 3);
        assert_eq!(config.min_contract_chars, 200);
    }

    #[test]
    fn test_durations() {
        let config = CoreConfig::default();
        assert_eq!(config.review_stage_timeout(), Duration::from_secs(120));
        assert_eq!(config.review_deadline(), Duration::from_secs(1500));
        assert_eq!(config.chat_deadline(), Duration::from_secs(120));
    }

    #[test]
    fn test_history_window_selection() {
        let config = CoreConfig::default();
        assert_eq!(config.history_window(false), 15);
        assert_eq!(config.history_window(true), 30);
    }

    #[test]
    fn test_validate_default_ok() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_max_tokens() {
        let config = CoreConfig {
            max_tokens: 0,
            ..CoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_overlap() {
        let config = CoreConfig {
            max_tokens: 10,
            overlap: 100,
            ..CoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialization_keeps_defaults() {
        let config: CoreConfig = serde_json::from_str(r#"{"max_tokens": 256}"#).unwrap();
        assert_eq!(config.max_tokens, 256);
        assert_eq!(config.embedding_dim, 768);
        assert_eq!(config.default_top_k, 5);
    }
}
