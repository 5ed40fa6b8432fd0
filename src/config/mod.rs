//! Application configuration.
//!
//! Aggregates broker and queue settings into a single `Config` that can
//! be loaded from YAML files or environment variables.

use std::path::PathBuf;

use serde::Deserialize;

use crate::queue::{QueueConfig, QueueType};

/// Environment variable naming the tracing filter.
pub const LOG_ENV_VAR: &str = "CTH_BROKER_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker configuration.
    pub broker: BrokerConfig,
    /// Queue backend configuration.
    pub queue: QueueConfig,
}

/// Broker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Filesystem path for the queue spool.
    pub spool: PathBuf,
    /// Number of accept-queue consumers.
    pub accept_consumers: usize,
    /// Number of delivery workers and redeliver-queue consumers.
    pub delivery_consumers: usize,
    /// Server certificate; forwarded to the transport layer for TLS
    /// client authentication.
    pub ssl_cert: Option<PathBuf>,
    /// Mount path for the websocket handler.
    pub websocket_path: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            spool: PathBuf::from("spool"),
            accept_consumers: 4,
            delivery_consumers: 16,
            ssl_cert: None,
            websocket_path: "/pcp".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in the current directory (if it exists)
    /// 2. File specified by `CTH_BROKER_CONFIG` (if set)
    /// 3. Environment variables with the `CTH_BROKER_` prefix
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new("config", FileFormat::Yaml).required(false))
            .add_source(File::new("config.yaml", FileFormat::Yaml).required(false));

        if let Ok(config_path) = std::env::var("CTH_BROKER_CONFIG") {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("CTH_BROKER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing: in-memory queue, small worker pools.
    pub fn for_test() -> Self {
        Self {
            broker: BrokerConfig {
                accept_consumers: 2,
                delivery_consumers: 4,
                ..Default::default()
            },
            queue: QueueConfig {
                queue_type: QueueType::Memory,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.broker.spool, PathBuf::from("spool"));
        assert_eq!(config.broker.accept_consumers, 4);
        assert_eq!(config.broker.delivery_consumers, 16);
        assert_eq!(config.broker.websocket_path, "/pcp");
        assert!(config.broker.ssl_cert.is_none());
        assert_eq!(config.queue.queue_type, QueueType::Spool);
    }

    #[test]
    fn test_config_for_test_uses_memory_queue() {
        let config = Config::for_test();
        assert_eq!(config.queue.queue_type, QueueType::Memory);
        assert_eq!(config.broker.accept_consumers, 2);
    }
}
