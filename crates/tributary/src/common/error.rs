//! Error types for the apply engine
//!
//! Errors are classified so the supervisor loop can decide, per the
//! configured strategy, whether a failure kills the connector or only the
//! event that produced it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Bad connector arguments, unsupported flavor, malformed rule file
    #[error("Configuration error: {0}")]
    Config(String),

    /// Producer fetch/offset/stop failure
    #[error("Producer error: {0}")]
    Producer(String),

    /// Malformed envelope or missing required JSON path
    #[error("Parse error: {0}")]
    Parse(String),

    /// Unresolvable type or object name
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Undefined time representation, corrupt base64, out-of-range value
    #[error("Decode error: {0}")]
    Decode(String),

    /// Destination schema or table missing
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// SQL or tuple execution failure reported by the destination
    #[error("Apply error: {0}")]
    Apply(String),

    /// Lock poisoning, allocation, or other invariant breakage
    #[error("Internal error: {0}")]
    Internal(String),

    /// JSON deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (offset files, rule files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new producer error
    pub fn producer(msg: impl Into<String>) -> Self {
        Self::Producer(msg.into())
    }

    /// Create a new parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a new mapping error
    pub fn mapping(msg: impl Into<String>) -> Self {
        Self::Mapping(msg.into())
    }

    /// Create a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new catalog error
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Create a new apply error
    pub fn apply(msg: impl Into<String>) -> Self {
        Self::Apply(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is scoped to a single event.
    ///
    /// Event-scoped errors are handled by the error strategy (skip, exit,
    /// retry); everything else tears the connector down.
    pub fn is_event_scoped(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::Mapping(_) | Self::Decode(_) | Self::Apply(_) | Self::Json(_)
        )
    }

    /// Whether this error must stop the connector regardless of strategy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Producer(_) | Self::Catalog(_) | Self::Internal(_)
        )
    }

    /// Metric-safe error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Producer(_) => "producer",
            Self::Parse(_) => "parse",
            Self::Mapping(_) => "mapping",
            Self::Decode(_) => "decode",
            Self::Catalog(_) => "catalog",
            Self::Apply(_) => "apply",
            Self::Internal(_) => "internal",
            Self::Json(_) => "json",
            Self::Io(_) => "io",
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// How the supervisor reacts to an event-scoped error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Count the event as bad and move on (default)
    #[default]
    Skip,
    /// Stop the connector on the first bad event
    Exit,
    /// Ask the producer to redeliver; degrade to skip when it cannot
    Retry,
}
