//! Configuration for the retrieval engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// How the vector index is brought up to date when a document is added.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexMaintenance {
    /// Re-embed every stored chunk and rebuild the index from scratch.
    #[default]
    FullRebuild,
    /// Embed only the new chunks and append their rows to the index.
    Append,
}

/// Configuration parameters for the retrieval engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalConfig {
    /// Maximum window length in tokens, special tokens included.
    pub max_window_tokens: usize,
    /// Number of tokens shared by consecutive windows.
    pub window_stride: usize,
    /// Largest squared L2 distance at which a chunk counts as containing a fragment.
    pub fragment_distance_threshold: f32,
    /// Share of all chunks considered as candidates by fragment search.
    pub fragment_candidate_fraction: f32,
    /// Index maintenance policy applied by `add_document`.
    pub index_maintenance: IndexMaintenance,
    /// Maximum number of texts sent to the embedding provider in one call.
    pub embed_batch_size: usize,
    /// Upper bound on the latency of a single embedding call.
    pub embed_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_window_tokens: 512,
            window_stride: 0,
            fragment_distance_threshold: 0.5,
            fragment_candidate_fraction: 0.5,
            index_maintenance: IndexMaintenance::FullRebuild,
            embed_batch_size: 32,
            embed_timeout: Duration::from_secs(30),
        }
    }
}

impl RetrievalConfig {
    /// Create a new builder for constructing a [`RetrievalConfig`].
    pub fn builder() -> RetrievalConfigBuilder {
        RetrievalConfigBuilder::default()
    }

    /// Check that the parameters are consistent with each other.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `max_window_tokens <= 2` (no room left beside the start/end tokens)
    /// - `window_stride >= max_window_tokens - 2`
    /// - `fragment_candidate_fraction` is outside `(0, 1]`
    /// - `fragment_distance_threshold` is negative or not finite
    /// - `embed_batch_size == 0` or `embed_timeout` is zero
    pub fn validate(&self) -> Result<()> {
        if self.max_window_tokens <= 2 {
            return Err(RagError::ConfigError(format!(
                "max_window_tokens ({}) must be greater than 2",
                self.max_window_tokens
            )));
        }
        if self.window_stride >= self.max_window_tokens - 2 {
            return Err(RagError::ConfigError(format!(
                "window_stride ({}) must be less than max_window_tokens - 2 ({})",
                self.window_stride,
                self.max_window_tokens - 2
            )));
        }
        let fraction = self.fragment_candidate_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(RagError::ConfigError(format!(
                "fragment_candidate_fraction ({fraction}) must be in (0, 1]"
            )));
        }
        let threshold = self.fragment_distance_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(RagError::ConfigError(format!(
                "fragment_distance_threshold ({threshold}) must be a finite non-negative number"
            )));
        }
        if self.embed_batch_size == 0 {
            return Err(RagError::ConfigError("embed_batch_size must be greater than zero".into()));
        }
        if self.embed_timeout.is_zero() {
            return Err(RagError::ConfigError("embed_timeout must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RetrievalConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetrievalConfigBuilder {
    config: RetrievalConfig,
}

impl RetrievalConfigBuilder {
    /// Set the maximum window length in tokens.
    pub fn max_window_tokens(mut self, tokens: usize) -> Self {
        self.config.max_window_tokens = tokens;
        self
    }

    /// Set the overlap between consecutive windows in tokens.
    pub fn window_stride(mut self, stride: usize) -> Self {
        self.config.window_stride = stride;
        self
    }

    /// Set the distance threshold used by fragment search.
    pub fn fragment_distance_threshold(mut self, threshold: f32) -> Self {
        self.config.fragment_distance_threshold = threshold;
        self
    }

    /// Set the share of chunks fragment search draws candidates from.
    pub fn fragment_candidate_fraction(mut self, fraction: f32) -> Self {
        self.config.fragment_candidate_fraction = fraction;
        self
    }

    /// Set the index maintenance policy.
    pub fn index_maintenance(mut self, policy: IndexMaintenance) -> Self {
        self.config.index_maintenance = policy;
        self
    }

    /// Set the maximum embedding batch size.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Set the timeout applied to every embedding call.
    pub fn embed_timeout(mut self, timeout: Duration) -> Self {
        self.config.embed_timeout = timeout;
        self
    }

    /// Build the [`RetrievalConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] under the conditions listed on
    /// [`RetrievalConfig::validate`].
    pub fn build(self) -> Result<RetrievalConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_reference_service() {
        let config = RetrievalConfig::default();
        assert_eq!(config.max_window_tokens, 512);
        assert_eq!(config.window_stride, 0);
        assert_eq!(config.fragment_distance_threshold, 0.5);
        assert_eq!(config.fragment_candidate_fraction, 0.5);
        assert_eq!(config.index_maintenance, IndexMaintenance::FullRebuild);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn stride_must_leave_room_in_window() {
        let err = RetrievalConfig::builder().max_window_tokens(16).window_stride(14).build();
        assert!(matches!(err, Err(RagError::ConfigError(_))));

        let ok = RetrievalConfig::builder().max_window_tokens(16).window_stride(13).build();
        assert!(ok.is_ok());
    }

    #[test]
    fn tiny_window_rejected() {
        let err = RetrievalConfig::builder().max_window_tokens(2).build();
        assert!(matches!(err, Err(RagError::ConfigError(_))));
    }

    #[test]
    fn fraction_bounds() {
        for bad in [0.0, -0.5, 1.5, f32::NAN] {
            let err = RetrievalConfig::builder().fragment_candidate_fraction(bad).build();
            assert!(matches!(err, Err(RagError::ConfigError(_))), "fraction {bad} accepted");
        }
        assert!(RetrievalConfig::builder().fragment_candidate_fraction(1.0).build().is_ok());
    }

    #[test]
    fn threshold_must_be_finite_and_non_negative() {
        for bad in [-0.1, f32::INFINITY, f32::NAN] {
            let err = RetrievalConfig::builder().fragment_distance_threshold(bad).build();
            assert!(matches!(err, Err(RagError::ConfigError(_))), "threshold {bad} accepted");
        }
    }

    #[test]
    fn zero_batch_and_timeout_rejected() {
        assert!(RetrievalConfig::builder().embed_batch_size(0).build().is_err());
        assert!(RetrievalConfig::builder().embed_timeout(Duration::ZERO).build().is_err());
    }

    #[test]
    fn maintenance_policy_serializes_snake_case() {
        let json = serde_json::to_string(&IndexMaintenance::FullRebuild).unwrap();
        assert_eq!(json, "\"full_rebuild\"");
        let parsed: IndexMaintenance = serde_json::from_str("\"append\"").unwrap();
        assert_eq!(parsed, IndexMaintenance::Append);
    }
}
