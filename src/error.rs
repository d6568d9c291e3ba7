//! Top-level error type and error sanitizing
//!
//! Each layer owns its own `thiserror` enum; [`BridgeError`] gathers them for
//! the binary. Anything that leaves the process through the health surface
//! passes through [`sanitize_error_message`] first.

use crate::bridge::{ConnectFailure, PublishFailure};
use crate::config::ConfigError;
use crate::protocol::TopicError;
use crate::transport::TransportError;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Longest sanitized message, suffix included
pub const MAX_SANITIZED_LEN: usize = 500;

const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Errors surfaced by the `botbridge` binary
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connect(#[from] ConnectFailure),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishFailure),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid topic: {0}")]
    Topic(#[from] TopicError),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Health server error: {message}")]
    HealthServer { message: String },

    #[error("Reconnection gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

impl BridgeError {
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn health_server<S: Into<String>>(message: S) -> Self {
        Self::HealthServer {
            message: message.into(),
        }
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            BridgeError::Config(_) | BridgeError::InvalidInput { .. } | BridgeError::Topic(_) => 2,
            _ => 1,
        }
    }
}

/// Result type for bridge operations at the binary level
pub type BridgeResult<T> = Result<T, BridgeError>;

fn secret_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)(password|passwd|token|key|secret)[=:]\s*\S+").ok())
        .as_ref()
}

fn url_credentials_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(mqtts?|tcp|ssl)://[^/\s:@]+:[^/\s@]+@").ok())
        .as_ref()
}

fn sensitive_path_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+").ok()
        })
        .as_ref()
}

/// Redact secrets and credential-bearing paths, then cap the length
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(pattern) = secret_pattern() {
        sanitized = pattern.replace_all(&sanitized, "${1}=***").to_string();
    }

    if let Some(pattern) = url_credentials_pattern() {
        sanitized = pattern.replace_all(&sanitized, "${1}://***@").to_string();
    }

    if let Some(pattern) = sensitive_path_pattern() {
        sanitized = pattern
            .replace_all(&sanitized, "/***REDACTED***/")
            .to_string();
    }

    if sanitized.len() > MAX_SANITIZED_LEN {
        let mut cut = MAX_SANITIZED_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], TRUNCATE_SUFFIX);
    }

    sanitized
}
