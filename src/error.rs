//! Error types for verba-metrics.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dictionary error: {0}")]
    Dictionary(#[from] DictionaryError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised while loading dictionaries and the slot table.
#[derive(Debug, thiserror::Error)]
pub enum DictionaryError {
    #[error("Failed to read dictionary file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse dictionaries: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Slot {slot} is not bound to a strategy")]
    MissingSlot { slot: String },

    #[error("Invalid binding for slot {slot}: {reason}")]
    InvalidBinding { slot: String, reason: String },
}

/// Slot-local classification errors.
///
/// These never abort a message: the processor records the slot as absent.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("Failed to build pattern for phrase {phrase:?}: {source}")]
    Pattern {
        phrase: String,
        source: regex::Error,
    },

    #[error("Strategy panicked: {0}")]
    Panicked(String),

    #[error("Strategy failed: {0}")]
    Internal(String),
}

/// Message-broker transport errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Channel operation failed: {0}")]
    Channel(String),

    #[error("Publish to {queue} failed: {reason}")]
    Publish { queue: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<lapin::Error> for BrokerError {
    fn from(e: lapin::Error) -> Self {
        Self::Channel(e.to_string())
    }
}

/// Per-message failures. Every variant ends with the delivery rejected.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Invalid message body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Text processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("Processing worker failed: {0}")]
    Worker(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
