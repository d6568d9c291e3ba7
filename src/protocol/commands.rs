//! Control command payloads published to workers
//!
//! Payload structs carry the defaults the workers expect; callers override
//! individual fields with struct update syntax or through
//! [`Command::from_request`], which merges a JSON override object into the
//! same defaults.

use super::topics::{TopicScheme, WorkerId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Strategy types whose workers can apply a config update without restarting
pub const HOT_RELOAD_STRATEGIES: &[&str] = &["v2"];

/// Log level a worker starts with unless the caller names another
pub const DEFAULT_WORKER_LOG_LEVEL: &str = "INFO";

/// `{root}/{worker}/start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartPayload {
    /// Passed to the worker as given; workers accept any level name
    pub log_level: String,
    pub script: Option<String>,
    pub is_quickstart: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_type: Option<String>,
    /// Keys the bridge does not model, forwarded untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for StartPayload {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_WORKER_LOG_LEVEL.to_string(),
            script: None,
            is_quickstart: true,
            config: None,
            strategy_type: None,
            extra: Map::new(),
        }
    }
}

/// `{root}/{worker}/stop`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StopPayload {
    pub skip_order_cancellation: bool,
}

/// `{root}/{worker}/config/update`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdatePayload {
    #[serde(flatten)]
    pub settings: Map<String, Value>,
    pub strategy_type: String,
    pub remote_reload: bool,
}

impl ConfigUpdatePayload {
    /// Build an update whose `remote_reload` flag follows the strategy's
    /// hot-reload capability.
    pub fn for_strategy(settings: Map<String, Value>, strategy_type: impl Into<String>) -> Self {
        let strategy_type = strategy_type.into();
        let remote_reload = supports_hot_reload(&strategy_type);
        Self {
            settings,
            strategy_type,
            remote_reload,
        }
    }
}

pub fn supports_hot_reload(strategy_type: &str) -> bool {
    HOT_RELOAD_STRATEGIES.contains(&strategy_type)
}

/// Payloads for the two halves of a restart
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RestartPayload {
    pub stop: StopPayload,
    pub start: StartPayload,
}

/// Command kinds accepted by the publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Start,
    Stop,
    Restart,
    ConfigUpdate,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
            CommandKind::Restart => "restart",
            CommandKind::ConfigUpdate => "config-update",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "start" => Ok(CommandKind::Start),
            "stop" => Ok(CommandKind::Stop),
            "restart" => Ok(CommandKind::Restart),
            "config-update" | "config/update" | "config_update" => Ok(CommandKind::ConfigUpdate),
            other => Err(format!("Unknown command: {other}")),
        }
    }
}

/// A high-level bot command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(StartPayload),
    Stop(StopPayload),
    Restart(RestartPayload),
    ConfigUpdate(ConfigUpdatePayload),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Start(_) => CommandKind::Start,
            Command::Stop(_) => CommandKind::Stop,
            Command::Restart(_) => CommandKind::Restart,
            Command::ConfigUpdate(_) => CommandKind::ConfigUpdate,
        }
    }

    /// Merge a JSON override object into the defaults for `kind`.
    ///
    /// For restart the same overrides feed both halves, each keeping only the
    /// fields it understands. A config update requires `strategy_type` and
    /// derives `remote_reload` from it unless the object sets it explicitly.
    pub fn from_request(kind: CommandKind, overrides: Value) -> Result<Self, serde_json::Error> {
        let overrides = match overrides {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        match kind {
            CommandKind::Start => Ok(Command::Start(serde_json::from_value(overrides)?)),
            CommandKind::Stop => Ok(Command::Stop(serde_json::from_value(overrides)?)),
            CommandKind::Restart => {
                let stop: StopPayload = serde_json::from_value(overrides.clone())?;
                let mut start: StartPayload = serde_json::from_value(overrides)?;
                start.extra.remove("skip_order_cancellation");
                Ok(Command::Restart(RestartPayload { stop, start }))
            }
            CommandKind::ConfigUpdate => {
                let mut object = match overrides {
                    Value::Object(object) => object,
                    other => {
                        return Err(serde::de::Error::custom(format!(
                            "config update must be a JSON object, got {other}"
                        )))
                    }
                };
                if !object.contains_key("remote_reload") {
                    let reload = object
                        .get("strategy_type")
                        .and_then(Value::as_str)
                        .map(supports_hot_reload)
                        .unwrap_or(false);
                    object.insert("remote_reload".to_string(), Value::Bool(reload));
                }
                Ok(Command::ConfigUpdate(serde_json::from_value(
                    Value::Object(object),
                )?))
            }
        }
    }
}

/// A single wire-level message: topic plus encoded JSON payload
#[derive(Debug, Clone, PartialEq)]
pub struct WireCommand {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A command addressed to one worker
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub worker_id: WorkerId,
    pub command: Command,
}

impl CommandEnvelope {
    pub fn new(worker_id: WorkerId, command: Command) -> Self {
        Self { worker_id, command }
    }

    /// Encode into one wire message. Restart yields `None`; the publisher
    /// sequences its two halves itself.
    pub fn encode(&self, scheme: &TopicScheme) -> Result<Option<WireCommand>, serde_json::Error> {
        let worker = &self.worker_id;
        let wire = match &self.command {
            Command::Start(payload) => WireCommand {
                topic: scheme.start(worker),
                payload: serde_json::to_vec(payload)?,
            },
            Command::Stop(payload) => WireCommand {
                topic: scheme.stop(worker),
                payload: serde_json::to_vec(payload)?,
            },
            Command::ConfigUpdate(payload) => WireCommand {
                topic: scheme.config_update(worker),
                payload: serde_json::to_vec(payload)?,
            },
            Command::Restart(_) => return Ok(None),
        };
        Ok(Some(wire))
    }
}
