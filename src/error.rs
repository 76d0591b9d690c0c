//! Error types for FanCopy
//!
//! Fatal errors (configuration, endpoint parsing, mounting) abort a run
//! before any replication work starts. Per-task errors are produced by the
//! same enum but are contained by the worker pool and only logged.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for FanCopy operations
#[derive(Error, Debug)]
pub enum FanCopyError {
    /// Invalid or incomplete run configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Endpoint URI could not be parsed
    #[error("Invalid endpoint '{uri}': {reason}")]
    InvalidEndpoint { uri: String, reason: String },

    /// Backend could not be mounted
    #[error("Failed to mount {node}: {message}")]
    Mount { node: String, message: String },

    /// Backend could not be unmounted cleanly
    #[error("Failed to unmount {node}: {message}")]
    Unmount { node: String, message: String },

    /// Node index out of range or node not opened
    #[error("Node unavailable: {0}")]
    NodeUnavailable(String),

    /// I/O error during a backend operation
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Path does not belong to the tree it was resolved against
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A non-directory already occupies a directory path
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Source tree could not be walked
    #[error("Failed to walk '{root}': {message}")]
    Walk { root: String, message: String },

    /// Worker pool failure
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Logging could not be initialised
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// Run report could not be rendered
    #[error("Report error: {0}")]
    Report(String),
}

impl FanCopyError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an endpoint parse error
    pub fn endpoint(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Create a mount error for the named node
    pub fn mount(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mount {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Check if this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::InvalidEndpoint { .. } | Self::Mount { .. } | Self::Logging(_)
        )
    }

    /// Check if this error means the path does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } | Self::NotADirectory(path) => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for FanCopy operations
pub type Result<T> = std::result::Result<T, FanCopyError>;

impl From<std::io::Error> for FanCopyError {
    fn from(err: std::io::Error) -> Self {
        FanCopyError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for FanCopyError {
    fn from(err: serde_json::Error) -> Self {
        FanCopyError::Report(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| FanCopyError::io(path, e))
    }
}
