//! Configuration file support for the consensus engine.
//!
//! Loads optional `braid.toml` from the data directory. Host overrides take
//! precedence over config file values. If no config file exists, defaults
//! are used.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct BraidConfig {
    pub engine: EngineConfig,
    pub node: NodeConfig,
}

/// Consensus engine tuning.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval between coin rounds in fame voting. Clamped to
    /// [`MIN_COIN_ROUND_INTERVAL`](crate::constants::MIN_COIN_ROUND_INTERVAL)
    /// by [`EngineConfig::sanitized`]; every participant must use the same
    /// value or fame decisions diverge.
    pub coin_round_interval: i64,
    /// Capacity of the read cache fronting a persistent store.
    pub event_cache: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            coin_round_interval: crate::constants::COIN_ROUND_INTERVAL,
            event_cache: crate::constants::DEFAULT_EVENT_CACHE,
        }
    }
}

impl EngineConfig {
    /// Return a copy with out-of-range values clamped to safe minimums.
    pub fn sanitized(&self) -> Self {
        let mut cfg = self.clone();
        if cfg.coin_round_interval < crate::constants::MIN_COIN_ROUND_INTERVAL {
            tracing::warn!(
                interval = cfg.coin_round_interval,
                "coin_round_interval below minimum, clamping"
            );
            cfg.coin_round_interval = crate::constants::MIN_COIN_ROUND_INTERVAL;
        }
        if cfg.event_cache == 0 {
            cfg.event_cache = crate::constants::DEFAULT_EVENT_CACHE;
        }
        cfg
    }
}

/// Node shell tuning.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Bound on loaded-but-unordered events before inbound gossip is paused.
    pub pending_cap: usize,
    /// Capacity of the inbound event channel.
    pub channel_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            pending_cap: crate::constants::DEFAULT_PENDING_CAP,
            channel_capacity: crate::constants::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl BraidConfig {
    /// Load configuration from `braid.toml` in the given directory.
    /// Returns `Default` if the file doesn't exist.
    pub fn load(data_dir: &Path) -> Self {
        let config_path = data_dir.join("braid.toml");
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse {}: {}, using defaults",
                        config_path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_valid() {
        let config = BraidConfig::default();
        assert_eq!(
            config.engine.coin_round_interval,
            crate::constants::COIN_ROUND_INTERVAL
        );
        assert_eq!(config.node.pending_cap, crate::constants::DEFAULT_PENDING_CAP);
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[engine]
coin_round_interval = 4
event_cache = 64

[node]
pending_cap = 100
"#;
        let config: BraidConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.coin_round_interval, 4);
        assert_eq!(config.engine.event_cache, 64);
        assert_eq!(config.node.pending_cap, 100);
        assert_eq!(
            config.node.channel_capacity,
            crate::constants::DEFAULT_CHANNEL_CAPACITY
        );
    }

    #[test]
    fn missing_config_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = BraidConfig::load(dir.path());
        assert_eq!(
            config.engine.coin_round_interval,
            crate::constants::COIN_ROUND_INTERVAL
        );
    }

    #[test]
    fn sanitized_clamps_degenerate_values() {
        let cfg = EngineConfig {
            coin_round_interval: 1,
            event_cache: 0,
        };
        let clean = cfg.sanitized();
        assert_eq!(
            clean.coin_round_interval,
            crate::constants::MIN_COIN_ROUND_INTERVAL
        );
        assert_eq!(clean.event_cache, crate::constants::DEFAULT_EVENT_CACHE);
    }
}
