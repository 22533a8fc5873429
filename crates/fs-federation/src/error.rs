use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Projection '{projection}' is read-only; cannot {operation} {address}")]
    ReadOnly {
        projection: String,
        operation: &'static str,
        address: String,
    },

    #[error("IO failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Stale binary handle: {}", .0.display())]
    StaleHandle(PathBuf),

    #[error("Node already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Monitor error: {0}")]
    Monitor(String),
}

/// Host-facing classification of a [`ConnectorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ReadOnlyViolation,
    IoFailure,
    UnsupportedOperation,
    StaleHandle,
    InvalidInput,
    Internal,
}

impl ConnectorError {
    /// Wraps an IO error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ReadOnly { .. } => ErrorKind::ReadOnlyViolation,
            Self::Io { .. } => ErrorKind::IoFailure,
            Self::Unsupported(_) => ErrorKind::UnsupportedOperation,
            Self::StaleHandle(_) => ErrorKind::StaleHandle,
            Self::AlreadyExists(_) | Self::InvalidInput(_) | Self::Config(_) => {
                ErrorKind::InvalidInput
            }
            Self::Serialization(_) | Self::Monitor(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Canonicalizes a path, returning the original if canonicalization fails.
pub fn canonicalize_existing_path(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}

/// Maps a `NotFound` IO error to [`ConnectorError::NotFound`], anything else to `Io`.
pub(crate) fn not_found_or_io(path: &Path, address: &str, source: std::io::Error) -> ConnectorError {
    if source.kind() == std::io::ErrorKind::NotFound {
        ConnectorError::NotFound(address.to_string())
    } else {
        ConnectorError::io(path, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_path_in_message() {
        let error = ConnectorError::io(
            "/tmp/missing",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(error.kind(), ErrorKind::IoFailure);
        assert!(error.to_string().contains("/tmp/missing"));
    }

    #[test]
    fn missing_entries_classify_as_not_found() {
        let error = not_found_or_io(
            Path::new("/tmp/x"),
            "/fs/x",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }
}
