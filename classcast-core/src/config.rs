use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub logging: LoggingConfig,
    pub media: MediaConfig,
    pub fleet: FleetConfig,
    pub room: RoomConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Externally reachable address of this instance, announced to clients
    /// for WebRTC transports. Falls back to loopback when unset and the
    /// room record carries no address either.
    pub public_address: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 3000,
            public_address: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub connect_timeout_seconds: u64,
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout_seconds: 5,
            key_prefix: "classcast:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Upper bound on the worker pool; the effective pool size is
    /// `min(max_workers, CPU cores)`. 0 means "one per core".
    pub max_workers: usize,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            rtc_min_port: 10000,
            rtc_max_port: 59999,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Prebuilt machine image every room instance boots from.
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: Option<String>,
    pub security_group: Option<String>,
    /// Port the room application listens on once booted.
    pub app_port: u16,
    /// Grace period after the provider reports "running" before the
    /// application on the instance is assumed reachable.
    pub settle_delay_seconds: u64,
    /// Upper bound on waiting for the provider to report "running".
    pub launch_timeout_seconds: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            image_id: String::new(),
            instance_type: "t3.medium".to_string(),
            subnet_id: None,
            security_group: None,
            app_port: 3000,
            settle_delay_seconds: 30,
            launch_timeout_seconds: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Room records expire this long after creation.
    pub ttl_hours: u64,
    /// Chat history kept per room; oldest entries are trimmed beyond this.
    pub chat_history_limit: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            chat_history_limit: 100,
        }
    }
}

impl Config {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (CLASSCAST_SERVER_HOST, etc.)
        builder = builder.add_source(
            Environment::with_prefix("CLASSCAST")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    #[must_use]
    pub fn redis_url(&self) -> &str {
        &self.redis.url
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.http_port, 3000);
        assert_eq!(config.redis.key_prefix, "classcast:");
        assert_eq!(config.room.ttl_hours, 24);
        assert_eq!(config.room.chat_history_limit, 100);
        assert_eq!(config.fleet.settle_delay_seconds, 30);
    }

    #[test]
    fn test_http_address() {
        let config = Config::default();
        assert_eq!(config.http_address(), "0.0.0.0:3000");
    }
}
