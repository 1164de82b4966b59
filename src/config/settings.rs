use config::ConfigError;
use serde::Deserialize;

use crate::client::OverflowPolicy;

/// Top-level configuration settings for the application.
///
/// Includes settings for the HTTP server, the broker, the embedded store and
/// logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub storage: StorageSettings,
    pub log: LogSettings,
}

/// Configuration settings for the server.
///
/// Defines the bind address, the secret used to verify bearer tokens, the
/// CORS allow-list and the per-frame write timeout of the delivery pump.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub allowed_origins: Vec<String>,
    pub write_timeout_ms: u64,
}

/// Configuration settings for the broker.
///
/// Bounds the per-connection outbound queue and the command channel, selects
/// what happens when a queue is full and caps topic name length.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub outbound_queue_capacity: usize,
    pub command_buffer: usize,
    pub overflow_policy: OverflowPolicy,
    pub max_topic_len: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Every field is optional; `Settings::merge` fills the gaps from the defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub storage: Option<PartialStorageSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub jwt_secret: Option<String>,
    pub allowed_origins: Option<Vec<String>>,
    pub write_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub outbound_queue_capacity: Option<usize>,
    pub command_buffer: Option<usize>,
    pub overflow_policy: Option<OverflowPolicy>,
    pub max_topic_len: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialStorageSettings {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 3001,
                jwt_secret: "change-me".to_string(),
                allowed_origins: vec!["http://localhost:3000".to_string()],
                write_timeout_ms: 10_000,
            },
            broker: BrokerSettings {
                outbound_queue_capacity: 256,
                command_buffer: 1024,
                overflow_policy: OverflowPolicy::Disconnect,
                max_topic_len: 256,
            },
            storage: StorageSettings {
                path: "relay_db".to_string(),
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fills every missing value of `partial` from the defaults.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let server = partial.server.unwrap_or_default();
        let broker = partial.broker.unwrap_or_default();
        let storage = partial.storage.unwrap_or_default();
        let log = partial.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
                jwt_secret: server.jwt_secret.unwrap_or(default.server.jwt_secret),
                allowed_origins: server
                    .allowed_origins
                    .unwrap_or(default.server.allowed_origins),
                write_timeout_ms: server
                    .write_timeout_ms
                    .unwrap_or(default.server.write_timeout_ms),
            },
            broker: BrokerSettings {
                outbound_queue_capacity: broker
                    .outbound_queue_capacity
                    .filter(|c| *c > 0)
                    .unwrap_or(default.broker.outbound_queue_capacity),
                command_buffer: broker
                    .command_buffer
                    .filter(|c| *c > 0)
                    .unwrap_or(default.broker.command_buffer),
                overflow_policy: broker
                    .overflow_policy
                    .unwrap_or(default.broker.overflow_policy),
                max_topic_len: broker
                    .max_topic_len
                    .unwrap_or(default.broker.max_topic_len),
            },
            storage: StorageSettings {
                path: storage.path.unwrap_or(default.storage.path),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }

    /// Rejects values the server cannot start with. Credentialed CORS
    /// cannot be combined with a wildcard origin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.allowed_origins.iter().any(|o| o.trim() == "*") {
            return Err(ConfigError::Message(
                "server.allowed_origins must list explicit origins, not \"*\"".to_string(),
            ));
        }
        Ok(())
    }
}
