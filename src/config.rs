//! Bridge configuration
//!
//! Loaded from a TOML file when one is given, otherwise built from defaults.
//! Broker credentials are never stored in the file: the file names the
//! environment variables that hold them. `MQTT_BROKER_URL` overrides the
//! broker URL in either case.

use crate::bridge::ReconnectConfig;
use crate::protocol::TopicScheme;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `[broker].broker_url`
pub const BROKER_URL_ENV: &str = "MQTT_BROKER_URL";

/// Main bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub topics: TopicsSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub commands: CommandsSection,
    #[serde(default)]
    pub health: HealthSection,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL with protocol and port (`mqtt://` or `mqtts://`)
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// Environment variable containing the username
    #[serde(default = "default_username_env")]
    pub username_env: Option<String>,
    /// Environment variable containing the password
    #[serde(default = "default_password_env")]
    pub password_env: Option<String>,
    /// Client id prefix; a random suffix keeps ids unique per process
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// How long a publish or subscribe waits for the broker's acknowledgement
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

fn default_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_username_env() -> Option<String> {
    Some("MQTT_USERNAME".to_string())
}

fn default_password_env() -> Option<String> {
    Some("MQTT_PASSWORD".to_string())
}

fn default_client_id_prefix() -> String {
    "botbridge".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_keepalive_secs() -> u64 {
    60
}

fn default_ack_timeout_ms() -> u64 {
    5000
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            username_env: default_username_env(),
            password_env: default_password_env(),
            client_id_prefix: default_client_id_prefix(),
            connect_timeout_ms: default_connect_timeout_ms(),
            keepalive_secs: default_keepalive_secs(),
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

impl BrokerSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Username from the configured environment variable
    pub fn username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_ref())
    }

    /// Password from the configured environment variable
    pub fn password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_ref())
    }
}

/// Topic namespace settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicsSection {
    /// Literal root the deployed workers listen under
    #[serde(default = "default_topic_root")]
    pub root: String,
}

fn default_topic_root() -> String {
    "hbot".to_string()
}

impl Default for TopicsSection {
    fn default() -> Self {
        Self {
            root: default_topic_root(),
        }
    }
}

/// Automatic reconnection after an unexpected disconnect
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delays for the first attempts, in milliseconds
    #[serde(default = "default_backoff_pattern")]
    pub backoff_pattern_ms: Vec<u64>,
    /// Delay once the pattern is exhausted, in milliseconds
    #[serde(default = "default_sustained_delay_ms")]
    pub sustained_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_backoff_pattern() -> Vec<u64> {
    vec![1000, 2000, 4000]
}

fn default_sustained_delay_ms() -> u64 {
    5000
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_pattern_ms: default_backoff_pattern(),
            sustained_delay_ms: default_sustained_delay_ms(),
        }
    }
}

impl ReconnectSection {
    pub fn to_reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts: self.max_attempts,
            backoff_pattern: self.backoff_pattern_ms.clone(),
            sustained_delay: self.sustained_delay_ms,
        }
    }
}

/// Command publishing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandsSection {
    /// Pause between the stop and start halves of a restart
    #[serde(default = "default_restart_grace_ms")]
    pub restart_grace_ms: u64,
}

fn default_restart_grace_ms() -> u64 {
    1000
}

impl Default for CommandsSection {
    fn default() -> Self {
        Self {
            restart_grace_ms: default_restart_grace_ms(),
        }
    }
}

impl CommandsSection {
    pub fn restart_grace(&self) -> Duration {
        Duration::from_millis(self.restart_grace_ms)
    }
}

/// Health HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default = "default_health_port")]
    pub port: u16,
}

fn default_health_port() -> u16 {
    8080
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            port: default_health_port(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: BridgeConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for deployments without a file
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = BridgeConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(BROKER_URL_ENV) {
            if !url.trim().is_empty() {
                self.broker.broker_url = url;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        TopicScheme::new(self.topics.root.clone()).map_err(|e| {
            ConfigError::InvalidConfig(format!("[topics] root '{}': {e}", self.topics.root))
        })?;

        if self.broker.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "[broker] connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.broker.ack_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "[broker] ack_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.broker.client_id_prefix.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "[broker] client_id_prefix cannot be empty".to_string(),
            ));
        }

        self.reconnect
            .to_reconnect_config()
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(format!("[reconnect] {e}")))?;

        Ok(())
    }

    /// Topic scheme for the configured root
    pub fn topic_scheme(&self) -> Result<TopicScheme, ConfigError> {
        TopicScheme::new(self.topics.root.clone())
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}
