//! Error types for engine operations.

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Error types for the batching engine and its collaborators
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration error - detected at startup, never at runtime
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Session protocol violation - a programming error in the surrounding
    /// processor code (commit with unresolved records, double transfer,
    /// operating on a stale record version). Fails fast, never recovered from.
    #[error("Session protocol violation: {message}")]
    SessionViolation { message: String },

    /// Session infrastructure failure - the unit-of-work backend could not
    /// complete a commit, rollback or transfer
    #[error("Session error: {message}")]
    Session {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Client handle failure in the consumer pool
    #[error("Pool client error: {message}")]
    PoolClient {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The consumer pool is shutting down and no longer hands out leases
    #[error("Pool is closed")]
    PoolClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Check if this error is a session protocol violation
    pub fn is_session_violation(&self) -> bool {
        matches!(self, EngineError::SessionViolation { .. })
    }

    /// Check if this error was detected at configuration time
    pub fn is_configuration(&self) -> bool {
        matches!(self, EngineError::Configuration(_))
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Configuration(message.into())
    }

    /// Create a session protocol violation
    pub fn session_violation(message: impl Into<String>) -> Self {
        EngineError::SessionViolation {
            message: message.into(),
        }
    }

    /// Create a session infrastructure error from a message
    pub fn session(message: impl Into<String>) -> Self {
        EngineError::Session {
            message: message.into(),
            source: None,
        }
    }

    /// Create a session infrastructure error with source
    pub fn session_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        EngineError::Session {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a pool client error from a message
    pub fn pool_client(message: impl Into<String>) -> Self {
        EngineError::PoolClient {
            message: message.into(),
            source: None,
        }
    }

    /// Create a pool client error with source
    pub fn pool_client_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        EngineError::PoolClient {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
