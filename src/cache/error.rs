//! Error types for host source and host cache operations

use std::fmt;

/// Result type alias for host cache operations
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug)]
pub enum CacheError {
    /// Connection to the host database failed
    ConnectionFailed(String),

    /// A query against the host database failed
    QueryFailed(String),

    /// Schema migration failed
    MigrationFailed(String),

    /// I/O error (file access, etc.)
    IoError(std::io::Error),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to host database: {}", msg)
            }
            CacheError::QueryFailed(msg) => write!(f, "host query failed: {}", msg),
            CacheError::MigrationFailed(msg) => write!(f, "host database migration failed: {}", msg),
            CacheError::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::IoError(err)
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => CacheError::IoError(io_err),
            _ => CacheError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for CacheError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        CacheError::MigrationFailed(err.to_string())
    }
}
