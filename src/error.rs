//! Error types for airwall-bundler
//!
//! Errors fall into three groups:
//! - Fatal startup errors (`Config`, `Resolution`) that stop the process before the
//!   collection loop starts
//! - Per-device errors (`Controller`, `Network`, `Io`, ...) that are demoted to a
//!   device outcome inside a cycle and never abort it
//! - `ShuttingDown`, returned when a stop signal cancels an in-flight cycle

use thiserror::Error;

/// Result type alias for airwall-bundler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for airwall-bundler
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "airwall_ids")
        key: Option<String>,
    },

    /// A configured device could not be resolved at startup
    #[error("could not access Airwall info for ID {device_id}: {source}")]
    Resolution {
        /// The configured device identifier
        device_id: String,
        /// The underlying lookup failure
        #[source]
        source: Box<Error>,
    },

    /// The controller answered, but not the way we expected
    #[error("controller error: {0}")]
    Controller(#[from] ControllerError),

    /// Transport-level HTTP failure
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - the current cycle was abandoned
    #[error("shutdown in progress: cycle cancelled")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors describing an unexpected controller response
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Non-2xx status code
    #[error("{endpoint} returned {status}: {body}")]
    UnexpectedStatus {
        /// Request path that failed
        endpoint: String,
        /// HTTP status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// 2xx response whose body could not be understood
    #[error("invalid response from {endpoint}: {reason}")]
    InvalidResponse {
        /// Request path that failed
        endpoint: String,
        /// What was wrong with the body
        reason: String,
    },
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Machine-readable error code, used as a structured log field
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config",
            Error::Resolution { .. } => "resolution",
            Error::Controller(ControllerError::UnexpectedStatus { .. }) => "unexpected_status",
            Error::Controller(ControllerError::InvalidResponse { .. }) => "invalid_response",
            Error::Network(_) => "network",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "other",
        }
    }

    /// Process exit code for errors that end the program
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config { .. } => 2,
            Error::Resolution { .. } => 3,
            _ => 1,
        }
    }

    /// Whether the error is fatal at startup (configuration or device resolution)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config { .. } | Error::Resolution { .. })
    }
}
