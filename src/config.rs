//! Server configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file,
//! then `COMBATD_`-prefixed environment variables (`__` separates nested
//! keys, e.g. `COMBATD_REALTIME__OUTBOUND_QUEUE=128`).

use std::net::SocketAddr;
use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// SQLite file; `None` keeps everything in memory
    pub db_path: Option<String>,
    pub realtime: RealtimeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            db_path: None,
            realtime: RealtimeConfig::default(),
        }
    }
}

/// Realtime connection tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Capacity of each connection's outbound queue
    pub outbound_queue: usize,
    /// Consecutive dropped messages before a connection is evicted
    pub slow_consumer_limit: u32,
    /// Time allowed for the auth message after connect
    pub handshake_timeout_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            outbound_queue: 64,
            slow_consumer_limit: 32,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then the environment
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("COMBATD_").split("__"))
    }

    pub fn load(file: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(file).extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert!(config.db_path.is_none());
        assert_eq!(config.realtime.outbound_queue, 64);
        assert_eq!(config.realtime.slow_consumer_limit, 32);
        assert_eq!(config.realtime.handshake_timeout_ms, 10_000);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::string(
                r#"
                bind_addr = "0.0.0.0:9000"
                db_path = "combat.db"

                [realtime]
                outbound_queue = 8
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.db_path.as_deref(), Some("combat.db"));
        assert_eq!(config.realtime.outbound_queue, 8);
        // Untouched keys keep their defaults
        assert_eq!(config.realtime.slow_consumer_limit, 32);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.realtime, RealtimeConfig::default());
    }
}
