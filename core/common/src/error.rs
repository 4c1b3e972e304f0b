//! Common error types for mirrorsync.

use thiserror::Error;

/// Top-level error type for mirrorsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A directory could not be enumerated during change detection.
    ///
    /// Aborts the whole detection pass.
    #[error("Listing failed for {path}: {reason}")]
    ListingFailed { path: String, reason: String },

    /// A non-directory occupies a path segment that must be a directory.
    #[error("Directory conflict: {path} exists but is not a directory")]
    DirectoryConflict { path: String },

    /// Streaming a file from source to target failed.
    #[error("Transfer failed for {path}: {reason}")]
    TransferFailed { path: String, reason: String },

    /// Source and target disagree after a transfer.
    #[error("Integrity mismatch for {path}: {reason}")]
    Mismatch { path: String, reason: String },

    /// The remote end does not implement the requested capability.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Connecting to a remote endpoint failed.
    #[error("Network error: {0}")]
    Network(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Whether this error means the path does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Whether this error means the path already exists.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists(_) => true,
            Error::Io(err) => err.kind() == std::io::ErrorKind::AlreadyExists,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(Error::NotFound("/x".to_string()).is_not_found());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(Error::Io(io).is_not_found());
        assert!(!Error::Storage("boom".to_string()).is_not_found());
    }

    #[test]
    fn test_already_exists_classification() {
        assert!(Error::AlreadyExists("/x".to_string()).is_already_exists());
        let io = std::io::Error::new(std::io::ErrorKind::AlreadyExists, "dup");
        assert!(Error::Io(io).is_already_exists());
        assert!(!Error::NotFound("/x".to_string()).is_already_exists());
    }

    #[test]
    fn test_display_includes_path() {
        let err = Error::DirectoryConflict {
            path: "/a/b".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Directory conflict: /a/b exists but is not a directory"
        );
    }
}
