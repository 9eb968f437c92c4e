//! Error types for overlaysync
//!
//! This module defines all error types used throughout the crate, from
//! local walk failures to remote backend errors and scheduler failures.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Main error type for overlay synchronization
#[derive(Error, Debug)]
pub enum OverlaySyncError {
    /// I/O error on a local path
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Remote entry does not exist
    #[error("Remote path not found: {0}")]
    RemoteNotFound(String),

    /// A remote operation failed
    #[error("Remote {op} failed for '{path}': {message}")]
    RemoteOperation {
        op: &'static str,
        path: String,
        message: String,
    },

    /// Connection to the remote backend failed
    #[error("Connection error to '{host}': {message}")]
    ConnectionError { host: String, message: String },

    /// Authentication against the remote backend failed
    #[error("Authentication failed for '{user}@{host}': {message}")]
    AuthenticationError {
        user: String,
        host: String,
        message: String,
    },

    /// No mapping entry covers the virtual path
    #[error("No path mapping covers virtual path '{0}'")]
    NoMappingFound(String),

    /// The mapping table is malformed
    #[error("Invalid path mapping: {0}")]
    InvalidMapping(String),

    /// Invalid path format
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Walking the upper layer failed
    #[error("Failed to walk '{path}': {message}")]
    Walk { path: PathBuf, message: String },

    /// A scheduled task failed; the scheduler drained the remaining tasks
    #[error("Task '{task}' failed: {source}")]
    SchedulerFailed {
        task: String,
        #[source]
        source: Arc<OverlaySyncError>,
    },

    /// The scheduler no longer accepts tasks
    #[error("Scheduling is closed")]
    SchedulingClosed,

    /// Worker pool or dispatch thread error
    #[error("Thread pool error: {0}")]
    ThreadPoolError(String),

    /// A task panicked while running
    #[error("Task '{0}' panicked")]
    TaskPanicked(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<OverlaySyncError>,
    },
}

impl OverlaySyncError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a remote operation error
    pub fn remote(op: &'static str, path: impl Into<String>, message: impl ToString) -> Self {
        Self::RemoteOperation {
            op,
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a connection error
    pub fn connection(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionError {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth(
        user: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::AuthenticationError {
            user: user.into(),
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if this error means the remote entry does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::RemoteNotFound(_) => true,
            Self::WithContext { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error invalidates the whole session rather than one entry
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidMapping(_)
            | Self::ConfigError(_)
            | Self::ConnectionError { .. }
            | Self::AuthenticationError { .. } => true,
            Self::WithContext { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Get the local path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } | Self::Walk { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for overlaysync operations
pub type Result<T> = std::result::Result<T, OverlaySyncError>;

impl From<std::io::Error> for OverlaySyncError {
    fn from(err: std::io::Error) -> Self {
        OverlaySyncError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for OverlaySyncError {
    fn from(err: serde_json::Error) -> Self {
        OverlaySyncError::InvalidMapping(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| OverlaySyncError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = OverlaySyncError::io("/upper/a", io_err);
        assert_eq!(err.path(), Some(&PathBuf::from("/upper/a")));
    }

    #[test]
    fn test_not_found_through_context() {
        let err = OverlaySyncError::RemoteNotFound("/zone/a".to_string())
            .with_context("deleting whiteout target");
        assert!(err.is_not_found());

        let err = OverlaySyncError::remote("stat", "/zone/a", "timeout");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_scheduler_failed_keeps_source() {
        let cause = Arc::new(OverlaySyncError::remote("upload", "/zone/f", "denied"));
        let err = OverlaySyncError::SchedulerFailed {
            task: "sync file".to_string(),
            source: Arc::clone(&cause),
        };
        let msg = err.to_string();
        assert!(msg.contains("sync file"));
        assert!(msg.contains("denied"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(OverlaySyncError::InvalidMapping("dup".into()).is_fatal());
        assert!(!OverlaySyncError::NoMappingFound("/x".into()).is_fatal());
        assert!(OverlaySyncError::connection("store", "reset")
            .with_context("clearing opaque directory /o")
            .is_fatal());
    }
}
