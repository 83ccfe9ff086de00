//! Error types for lock store operations

use std::fmt;

/// Result type alias for lock store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the lock store
#[derive(Debug)]
pub enum StoreError {
    /// Connection to the store failed
    ConnectionFailed(String),

    /// A store command failed
    CommandFailed(String),

    /// Schema migration failed
    MigrationFailed(String),

    /// Invalid configuration
    InvalidConfig(String),

    /// The store has been closed and no longer accepts commands
    Closed,

    /// I/O error (file access, etc.)
    IoError(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to lock store: {}", msg)
            }
            StoreError::CommandFailed(msg) => write!(f, "lock store command failed: {}", msg),
            StoreError::MigrationFailed(msg) => write!(f, "lock store migration failed: {}", msg),
            StoreError::InvalidConfig(msg) => write!(f, "invalid lock store configuration: {}", msg),
            StoreError::Closed => write!(f, "lock store is closed"),
            StoreError::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::IoError(err)
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StoreError::IoError(io_err),
            sqlx::Error::PoolClosed => StoreError::Closed,
            _ => StoreError::CommandFailed(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::MigrationFailed(err.to_string())
    }
}
