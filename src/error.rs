//! Error types for retar

use thiserror::Error;

/// Main error type for retar operations
#[derive(Error, Debug)]
pub enum RetarError {
    #[error("not a valid {format} archive: {reason}")]
    HeaderParse {
        format: &'static str,
        reason: String,
    },

    #[error("unsupported {kind} version {found} (supported: {supported})")]
    UnsupportedVersion {
        kind: &'static str,
        found: String,
        supported: &'static str,
    },

    #[error("delta lacks {0}")]
    MissingDeltaEntry(String),

    #[error("delta type mismatch: requested {requested}, stored {stored}")]
    CompressionMismatch { requested: String, stored: String },

    #[error("parameter outside whitelist: {0}")]
    ParamValidation(String),

    #[error("unable to reproduce archive: {0}")]
    ReproductionFailure(String),

    #[error("reproduced file has wrong checksum: expected {expected}, got {actual}")]
    Sha1Mismatch { expected: String, actual: String },

    #[error("{program} failed: {status}")]
    SubprocessFailure { program: String, status: String },

    #[error("repository lookup failed: {0}")]
    RepositoryLookup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for retar operations
pub type Result<T> = std::result::Result<T, RetarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RetarError::HeaderParse {
            format: "gzip",
            reason: "bad magic".to_string(),
        };
        assert_eq!(err.to_string(), "not a valid gzip archive: bad magic");

        let err = RetarError::UnsupportedVersion {
            kind: "tar delta",
            found: "3.0".to_string(),
            supported: "2.x",
        };
        assert!(err.to_string().contains("3.0"));
        assert!(err.to_string().contains("2.x"));

        let err = RetarError::MissingDeltaEntry("manifest".to_string());
        assert_eq!(err.to_string(), "delta lacks manifest");

        let err = RetarError::CompressionMismatch {
            requested: "tar".to_string(),
            stored: "gz".to_string(),
        };
        assert!(err.to_string().contains("requested tar"));

        let err = RetarError::ParamValidation("--evil".to_string());
        assert!(err.to_string().contains("--evil"));

        let err = RetarError::ReproductionFailure("no candidate matched".to_string());
        assert!(err.to_string().contains("no candidate matched"));

        let err = RetarError::Sha1Mismatch {
            expected: "abc".to_string(),
            actual: "def".to_string(),
        };
        assert!(err.to_string().contains("abc"));
        assert!(err.to_string().contains("def"));

        let err = RetarError::SubprocessFailure {
            program: "xdelta".to_string(),
            status: "exit status: 2".to_string(),
        };
        assert!(err.to_string().contains("xdelta"));

        let err = RetarError::RepositoryLookup("no such branch".to_string());
        assert!(err.to_string().contains("no such branch"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RetarError = io_err.into();
        assert!(matches!(err, RetarError::Io(_)));
    }
}
