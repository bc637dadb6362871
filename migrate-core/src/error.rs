//! Driver error types

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for driver operations
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Broad classification of a [`DriverError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad descriptor or configuration, never worth retrying
    Config,
    /// Network or authentication failure talking to the database
    Connection,
    /// A migration script failed
    Execution,
    /// The version record could not be read or written
    State,
    /// The migration lock could not be taken or released
    Lock,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::Execution => write!(f, "execution"),
            ErrorKind::State => write!(f, "state"),
            ErrorKind::Lock => write!(f, "lock"),
        }
    }
}

/// Errors reported by migration drivers
#[derive(Debug, Error)]
pub enum DriverError {
    /// The descriptor path did not name a database
    #[error("no database name")]
    NoDatabaseName,

    /// The descriptor did not select a transport scheme
    #[error("no http schema")]
    NoHttpSchema,

    /// The descriptor could not be parsed
    #[error("invalid connection descriptor: {0}")]
    InvalidDescriptor(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// No driver is registered for the descriptor's scheme
    #[error("no driver registered for scheme: {0}")]
    UnknownScheme(String),

    /// Connection-related errors
    #[error("{operation}: connection failed: {message}")]
    Connection {
        operation: &'static str,
        message: String,
    },

    /// The driver was closed
    #[error("driver is closed")]
    Closed,

    /// A statement of a migration script failed (1-based index)
    #[error("migration failed at statement {statement}: {message}")]
    Execution { statement: usize, message: String },

    /// The migration script could not be interpreted
    #[error("invalid migration script: {0}")]
    InvalidScript(String),

    /// Version record errors
    #[error("{operation}: version state error: {message}")]
    State {
        operation: &'static str,
        message: String,
    },

    /// Lock store errors
    #[error("{operation}: lock error: {message}")]
    Lock {
        operation: &'static str,
        message: String,
    },

    /// The lock is held, by this instance or another one
    #[error("can't acquire lock")]
    AlreadyLocked,

    /// Unlock was called without holding the lock
    #[error("can't unlock, as not currently locked")]
    NotLocked,

    /// Waiting for the lock took too long
    #[error("timed out waiting for migration lock after {0:?}")]
    LockTimeout(Duration),

    /// Waiting for the lock was cancelled
    #[error("lock acquisition cancelled")]
    LockCancelled,

    /// Reading the migration stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    pub fn connection(operation: &'static str, message: impl fmt::Display) -> Self {
        DriverError::Connection {
            operation,
            message: message.to_string(),
        }
    }

    pub fn state(operation: &'static str, message: impl fmt::Display) -> Self {
        DriverError::State {
            operation,
            message: message.to_string(),
        }
    }

    pub fn lock(operation: &'static str, message: impl fmt::Display) -> Self {
        DriverError::Lock {
            operation,
            message: message.to_string(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::NoDatabaseName
            | DriverError::NoHttpSchema
            | DriverError::InvalidDescriptor(_)
            | DriverError::Config(_)
            | DriverError::UnknownScheme(_) => ErrorKind::Config,
            DriverError::Connection { .. } | DriverError::Closed => ErrorKind::Connection,
            DriverError::Execution { .. } | DriverError::InvalidScript(_) | DriverError::Io(_) => {
                ErrorKind::Execution
            }
            DriverError::State { .. } => ErrorKind::State,
            DriverError::Lock { .. }
            | DriverError::AlreadyLocked
            | DriverError::NotLocked
            | DriverError::LockTimeout(_)
            | DriverError::LockCancelled => ErrorKind::Lock,
        }
    }

    /// Whether a runner may reasonably try the operation again.
    ///
    /// Drivers never retry on their own; this is advisory for the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriverError::Connection { .. } | DriverError::AlreadyLocked | DriverError::LockTimeout(_)
        )
    }

    /// Get error code for runner output
    pub fn error_code(&self) -> &'static str {
        match self {
            DriverError::NoDatabaseName => "NO_DATABASE_NAME",
            DriverError::NoHttpSchema => "NO_HTTP_SCHEMA",
            DriverError::InvalidDescriptor(_) => "INVALID_DESCRIPTOR",
            DriverError::Config(_) => "CONFIG_ERROR",
            DriverError::UnknownScheme(_) => "UNKNOWN_SCHEME",
            DriverError::Connection { .. } => "CONNECTION_ERROR",
            DriverError::Closed => "DRIVER_CLOSED",
            DriverError::Execution { .. } => "EXECUTION_ERROR",
            DriverError::InvalidScript(_) => "INVALID_SCRIPT",
            DriverError::State { .. } => "STATE_ERROR",
            DriverError::Lock { .. } => "LOCK_ERROR",
            DriverError::AlreadyLocked => "ALREADY_LOCKED",
            DriverError::NotLocked => "NOT_LOCKED",
            DriverError::LockTimeout(_) => "LOCK_TIMEOUT",
            DriverError::LockCancelled => "LOCK_CANCELLED",
            DriverError::Io(_) => "IO_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(DriverError::NoDatabaseName.kind(), ErrorKind::Config);
        assert_eq!(DriverError::NoHttpSchema.kind(), ErrorKind::Config);
        assert_eq!(DriverError::connection("open", "refused").kind(), ErrorKind::Connection);
        assert_eq!(
            DriverError::Execution {
                statement: 2,
                message: "syntax error".to_string()
            }
            .kind(),
            ErrorKind::Execution
        );
        assert_eq!(DriverError::state("version", "unreachable").kind(), ErrorKind::State);
        assert_eq!(DriverError::NotLocked.kind(), ErrorKind::Lock);
    }

    #[test]
    fn test_error_messages_carry_operation() {
        let err = DriverError::state("set_version", "collection is read-only");
        assert_eq!(
            err.to_string(),
            "set_version: version state error: collection is read-only"
        );
        assert_eq!(DriverError::NoDatabaseName.to_string(), "no database name");
        assert_eq!(DriverError::NoHttpSchema.to_string(), "no http schema");
    }

    #[test]
    fn test_error_retryable() {
        assert!(DriverError::connection("lock", "reset by peer").is_retryable());
        assert!(DriverError::AlreadyLocked.is_retryable());
        assert!(!DriverError::NoDatabaseName.is_retryable());
        assert!(!DriverError::Execution {
            statement: 1,
            message: "boom".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(DriverError::NoHttpSchema.error_code(), "NO_HTTP_SCHEMA");
        assert_eq!(DriverError::LockCancelled.error_code(), "LOCK_CANCELLED");
        assert_eq!(DriverError::Closed.error_code(), "DRIVER_CLOSED");
    }
}
