//! Error taxonomy shared across the workspace.
//!
//! [`PollError`] covers everything that can go wrong inside one poll cycle and
//! is always contained to that cycle. [`RegistryError`] and [`ConfigError`] are
//! startup-time conditions.

use std::time::Duration;

/// Errors that end a single poll cycle for one source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PollError {
    /// TCP connect, DNS or request transmission failed
    #[error("connection error: {0}")]
    Connection(String),
    /// The peer certificate was rejected by the configured trust anchors
    #[error("TLS verification failed: {0}")]
    TlsVerification(String),
    /// Authorization handshake failed or the device rejected the session
    #[error("authorization error: {0}")]
    Auth(String),
    /// The request or the whole cycle exceeded its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The device answered with a non-success status
    #[error("HTTP status {status}: {message}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Response excerpt or reason phrase
        message: String,
    },
    /// The payload could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl PollError {
    /// Short, stable name of the error kind, used as a log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::TlsVerification(_) => "tls_verification",
            Self::Auth(_) => "auth",
            Self::Timeout(_) => "timeout",
            Self::HttpStatus { .. } => "http_status",
            Self::Decode(_) => "decode",
        }
    }
}

/// A device payload that could not be turned into records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("decode error: {message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    /// Create a decode error with a description of what was malformed.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Description of the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Errors raised while building the source registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A source with the same id is already registered
    #[error("duplicate source id `{0}`")]
    DuplicateSource(String),
}

/// Errors raised while reading source configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read {path}: {message}")]
    Read {
        /// File path
        path: String,
        /// I/O error message
        message: String,
    },
    /// Document is not valid YAML or has the wrong shape
    #[error("invalid configuration document: {0}")]
    Yaml(String),
    /// Endpoint URL is malformed
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),
    /// Source type cannot be determined
    #[error("unknown source type `{0}`")]
    UnknownKind(String),
    /// Active window is malformed or empty
    #[error("invalid active window: {0}")]
    InvalidWindow(String),
    /// A trust anchor is empty or unreadable
    #[error("invalid certificate: {0}")]
    Certificate(String),
    /// Error attributed to a named source
    #[error("source `{id}`: {source}")]
    Source {
        /// Source id from the configuration key
        id: String,
        /// Underlying error
        source: Box<ConfigError>,
    },
}

impl ConfigError {
    /// Attach the source id to an error.
    #[must_use]
    pub fn for_source(self, id: &str) -> Self {
        Self::Source {
            id: id.to_string(),
            source: Box::new(self),
        }
    }
}
