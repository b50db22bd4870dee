//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Environment variable overriding [`EngineConfig::max_tree_depth`].
pub const ENV_MAX_TREE_DEPTH: &str = "GRATITUDE_MAX_TREE_DEPTH";
/// Environment variable overriding [`EngineConfig::record_transfers`].
pub const ENV_RECORD_TRANSFERS: &str = "GRATITUDE_RECORD_TRANSFERS";

/// Tunables for a [`GratitudeEngine`](crate::GratitudeEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of ancestors walked when validating a re-parenting.
    /// A longer chain means the stored links are already corrupt.
    pub max_tree_depth: usize,
    /// Append a stewardship record for every token whose steward changes.
    pub record_transfers: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tree_depth: 1024,
            record_transfers: true,
        }
    }
}

impl EngineConfig {
    /// Small limits for tests.
    pub fn testing() -> Self {
        Self {
            max_tree_depth: 64,
            record_transfers: true,
        }
    }

    /// Defaults overridden by `GRATITUDE_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the
    /// `GRATITUDE_*` keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_TREE_DEPTH) {
            match raw.trim().parse::<usize>() {
                Ok(depth) if depth > 0 => config.max_tree_depth = depth,
                _ => tracing::warn!(value = %raw, "ignoring invalid {}", ENV_MAX_TREE_DEPTH),
            }
        }

        if let Some(raw) = lookup(ENV_RECORD_TRANSFERS) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => config.record_transfers = true,
                "0" | "false" | "no" => config.record_transfers = false,
                _ => tracing::warn!(value = %raw, "ignoring invalid {}", ENV_RECORD_TRANSFERS),
            }
        }

        config
    }

    pub fn with_max_tree_depth(mut self, depth: usize) -> Self {
        self.max_tree_depth = depth.max(1);
        self
    }

    pub fn with_record_transfers(mut self, enabled: bool) -> Self {
        self.record_transfers = enabled;
        self
    }
}
