//! Error types for the autoresponder.
//!
//! Nothing in here is fatal once the poll loop is running: every variant is
//! logged and the affected message (or cycle) is skipped.

use std::time::Duration;

/// Startup failures: everything that can stop the process before the loop runs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox connection, fetch, and send failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Login rejected for {user}")]
    LoginRejected { user: String },

    #[error("{command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Connection closed by server")]
    Closed,

    #[error("Failed to send reply to {to}: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("Blocking task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A raw message that could not be turned into an `InboundEmail`.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Message {handle} is not a parsable RFC 5322 message")]
    Malformed { handle: String },

    #[error("Message {handle} has no From address")]
    MissingSender { handle: String },
}

/// Text-generation service errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} returned an empty response")]
    EmptyResponse { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The classifier could not reach a decision for a message.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Spam check unavailable: {0}")]
    Unavailable(#[from] LlmError),
}

/// History document load/save failures.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("History document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the autoresponder.
pub type Result<T> = std::result::Result<T, Error>;
