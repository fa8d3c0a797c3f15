//! Core error types for viewguard-core.
//!
//! The evaluation path (schedule evaluator, content filter, timer tick) never
//! returns these; it degrades to a deny/lock default instead. Errors surface
//! only where a caller can act on them: opening the cache, loading config,
//! pulling settings, and the parent-side lock cascade.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for viewguard-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Local settings cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Lock cascade errors
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Settings pull errors
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Device identity errors
    #[error("Device id error: {0}")]
    DeviceId(#[from] crate::device_id::DeviceIdError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the SQLite-backed settings cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Failed to open the cache file
    #[error("Failed to open cache at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Cache file is locked by another process
    #[error("Cache is locked")]
    Locked,

    /// Stored payload could not be (de)serialized
    #[error("Corrupt cache payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Transport-level failures talking to the remote key-value store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Store unreachable (offline, timeout)
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// Credentials missing or rejected
    #[error("Not authorized to access remote store")]
    Unauthorized,

    /// The store refused the write (rules, validation)
    #[error("Remote store rejected the write: {0}")]
    Rejected(String),

    /// A record could not be decoded
    #[error("Malformed remote record at '{path}': {message}")]
    Malformed { path: String, message: String },
}

impl RemoteError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

/// Errors raised to the parent-control caller of a lock/unlock action.
#[derive(Error, Debug)]
pub enum LockError {
    /// Target collection does not exist remotely
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Target video does not exist remotely
    #[error("Video not found: {0}")]
    VideoNotFound(String),

    /// The content tree could not be read, so no closure was computed
    #[error("Failed to read content tree: {0}")]
    Read(#[source] RemoteError),

    /// The batch never committed; nothing was applied
    #[error("Lock batch failed after {attempts} attempt(s): {source}")]
    Remote {
        attempts: u32,
        #[source]
        source: RemoteError,
    },
}

/// Settings pull errors.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Fetching remote settings failed
    #[error("Remote fetch failed: {0}")]
    Remote(#[from] RemoteError),

    /// Writing the fetched snapshot to the cache failed
    #[error("Cache write failed: {0}")]
    Cache(#[from] CacheError),
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _msg) => {
                if inner.code == rusqlite::ErrorCode::DatabaseLocked
                    || inner.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    CacheError::Locked
                } else {
                    CacheError::QueryFailed(err.to_string())
                }
            }
            _ => CacheError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
