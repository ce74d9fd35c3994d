use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::{BatchSettings, BatchStrategy};
use crate::config::AstCacheConfig;
use crate::error::{AstCacheError, Result};

/// Named tuning presets for batching and debouncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    /// Long windows, few large batches. Suits slow analysis or huge repos.
    Conservative,
    #[default]
    Balanced,
    /// Short windows, small batches.
    Aggressive,
    /// Every change processed on its own as soon as it settles.
    Immediate,
}

/// Concrete parameters a [`CacheStrategy`] maps to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyProfile {
    pub batch: BatchSettings,
    pub debounce: Duration,
}

impl CacheStrategy {
    pub const ALL: [CacheStrategy; 4] = [
        CacheStrategy::Conservative,
        CacheStrategy::Balanced,
        CacheStrategy::Aggressive,
        CacheStrategy::Immediate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStrategy::Conservative => "conservative",
            CacheStrategy::Balanced => "balanced",
            CacheStrategy::Aggressive => "aggressive",
            CacheStrategy::Immediate => "immediate",
        }
    }

    /// Parse a strategy name, rejecting unknown ones.
    pub fn parse(name: &str) -> Result<CacheStrategy> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| {
                AstCacheError::validation(
                    "strategy",
                    format!("unknown strategy '{name}' (expected conservative|balanced|aggressive|immediate)"),
                )
            })
    }

    /// Built-in parameters of this preset.
    pub fn profile(&self) -> StrategyProfile {
        let ms = Duration::from_millis;
        let (strategy, window, batch, scope, wait, debounce) = match self {
            CacheStrategy::Conservative => (BatchStrategy::TimeBased, 2_000, 100, 500, 5_000, 1_000),
            CacheStrategy::Balanced => (BatchStrategy::Hybrid, 500, 50, 200, 2_000, 300),
            CacheStrategy::Aggressive => (BatchStrategy::CountBased, 100, 10, 50, 500, 100),
            CacheStrategy::Immediate => (BatchStrategy::Immediate, 0, 1, 1, 0, 50),
        };
        StrategyProfile {
            batch: BatchSettings {
                strategy,
                batch_window: ms(window),
                max_batch_size: batch,
                max_scope_size: scope,
                max_wait: ms(wait),
                dedup_window: BatchSettings::default().dedup_window,
            },
            debounce: ms(debounce),
        }
    }

    /// The preset with the explicit overrides of `config` applied on top.
    pub fn resolve(&self, config: &AstCacheConfig) -> StrategyProfile {
        let mut profile = self.profile();
        let batch = &mut profile.batch;
        if let Some(window) = config.batch_window_ms {
            batch.batch_window = Duration::from_millis(window);
        }
        if let Some(size) = config.max_batch_size {
            batch.max_batch_size = size;
        }
        if let Some(scope) = config.max_scope_size {
            batch.max_scope_size = scope;
        }
        if let Some(wait) = config.max_wait_ms {
            batch.max_wait = Duration::from_millis(wait);
        }
        batch.dedup_window = Duration::from_millis(config.dedup_window_ms);
        if let Some(debounce) = config.debounce_ms {
            profile.debounce = Duration::from_millis(debounce);
        }
        profile
    }
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_map_to_batch_strategies() {
        assert_eq!(CacheStrategy::default(), CacheStrategy::Balanced);
        assert_eq!(CacheStrategy::Balanced.profile().batch.strategy, BatchStrategy::Hybrid);
        assert_eq!(
            CacheStrategy::Conservative.profile().batch.strategy,
            BatchStrategy::TimeBased
        );
        assert_eq!(
            CacheStrategy::Immediate.profile().batch.strategy,
            BatchStrategy::Immediate
        );
        assert!(
            CacheStrategy::Aggressive.profile().debounce < CacheStrategy::Conservative.profile().debounce,
            "aggressive must settle faster than conservative"
        );
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(CacheStrategy::parse("Aggressive").unwrap(), CacheStrategy::Aggressive);
        assert_eq!(CacheStrategy::parse(" immediate ").unwrap(), CacheStrategy::Immediate);
        assert!(matches!(
            CacheStrategy::parse("yolo"),
            Err(AstCacheError::Validation { .. })
        ));
    }

    #[test]
    fn test_config_overrides_apply_on_top_of_preset() {
        let config = AstCacheConfig {
            max_batch_size: Some(7),
            debounce_ms: Some(42),
            dedup_window_ms: 250,
            ..AstCacheConfig::default()
        };
        let profile = CacheStrategy::Conservative.resolve(&config);
        assert_eq!(profile.batch.strategy, BatchStrategy::TimeBased);
        assert_eq!(profile.batch.max_batch_size, 7);
        assert_eq!(profile.batch.batch_window, Duration::from_millis(2_000));
        assert_eq!(profile.batch.dedup_window, Duration::from_millis(250));
        assert_eq!(profile.debounce, Duration::from_millis(42));
    }
}
