//! Unified error handling for portero
//!
//! Every concern (input validation, transport, probing, persistence,
//! registry bookkeeping, configuration) has its own error type. They are
//! unified by [`PorteroError`] for the places that only need to know
//! whether something is fatal.

use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for portero operations
#[derive(Debug, Error)]
pub enum PorteroError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed login or probe input
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Errors while talking to a Redis server
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Database discovery failures
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Persistence collaborator failures
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Registry bookkeeping errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Rejections produced while turning a login request into a descriptor.
///
/// The display strings are sent back to the operator verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid or missing hostname or socket path")]
    MissingTarget,

    #[error("invalid database index")]
    InvalidDbIndex,

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("invalid host:port entry '{entry}' in {list} list")]
    InvalidEndpoint { list: &'static str, entry: String },

    #[error("no {0} servers given")]
    EmptyEndpointList(&'static str),

    #[error("missing sentinel group name")]
    MissingSentinelName,
}

/// Errors raised by the Redis transport while connecting or running commands
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("{operation} timed out")]
    Timeout { operation: String },

    /// Error reply sent by the server (`-ERR ...`, `-WRONGPASS ...`)
    #[error("{0}")]
    Server(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed")]
    Closed,

    #[error("no sentinel could resolve master '{group}'")]
    NoSentinel { group: String },

    #[error("{0}")]
    Unsupported(String),
}

/// Database probe failures
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The transient connection never became ready
    #[error("Error connecting to Redis to get all databases used: {0}")]
    Connect(TransportError),

    /// `INFO keyspace` failed, which makes the probe pointless
    #[error("{0}")]
    Keyspace(TransportError),
}

/// Persistence collaborator errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Could not remove {connection_id} from saved connections")]
    NotFound { connection_id: String },
}

/// Registry bookkeeping errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no live connection with id {connection_id}")]
    NotFound { connection_id: String },
}

/// Result type alias for portero operations
pub type PorteroResult<T> = Result<T, PorteroError>;

impl PorteroError {
    /// Check if this error is recoverable (the operator can simply retry)
    pub fn is_recoverable(&self) -> bool {
        match self {
            PorteroError::Transport(e) => e.is_recoverable(),
            PorteroError::Probe(ProbeError::Connect(e)) => e.is_recoverable(),
            PorteroError::Probe(ProbeError::Keyspace(e)) => e.is_recoverable(),
            PorteroError::Store(StoreError::Io(_)) => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PorteroError::Config(_) => ErrorSeverity::Critical,
            PorteroError::Store(StoreError::NotFound { .. }) => ErrorSeverity::Info,
            PorteroError::Store(_) => ErrorSeverity::Error,
            PorteroError::Transport(_) => ErrorSeverity::Warning,
            PorteroError::Probe(_) => ErrorSeverity::Warning,
            PorteroError::Validation(_) => ErrorSeverity::Info,
            PorteroError::Registry(_) => ErrorSeverity::Info,
        }
    }
}

impl TransportError {
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        TransportError::Timeout {
            operation: operation.into(),
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        TransportError::Protocol(message.into())
    }

    pub fn tls<S: Into<String>>(message: S) -> Self {
        TransportError::Tls(message.into())
    }

    /// Network hiccups and timeouts are worth retrying, bad credentials are not
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_)
                | TransportError::Timeout { .. }
                | TransportError::Closed
                | TransportError::NoSentinel { .. }
        )
    }
}

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}
