use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum S3FetchError {
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid regular expression: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Prefix '{prefix}' not found in key '{key}'")]
    PrefixMismatch { key: String, prefix: String },

    #[error("Key '{key}' would be written outside the download directory")]
    PathTraversal { key: String },

    #[error("Key '{0}' does not name a file")]
    InvalidKey(String),

    #[error("Key '{key}' maps to {}, which another key already claimed", .destination.display())]
    DestinationConflict { key: String, destination: PathBuf },

    #[error("No AWS credentials found: {0}")]
    NoCredentials(String),

    #[error("Invalid AWS credentials: {0}")]
    InvalidCredentials(String),

    #[error("Access denied: {0}")]
    PermissionDenied(String),

    #[error("Bucket does not exist: {0}")]
    NoSuchBucket(String),

    #[error("Object does not exist: {0}")]
    NoSuchKey(String),

    #[error("S3 operation failed: {0}")]
    S3Error(String),

    #[error("Download cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

impl S3FetchError {
    /// Errors that stop the whole run rather than a single key.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            S3FetchError::InvalidUri(_)
                | S3FetchError::InvalidArgument(_)
                | S3FetchError::InvalidPattern(_)
                | S3FetchError::PrefixMismatch { .. }
                | S3FetchError::NoCredentials(_)
                | S3FetchError::InvalidCredentials(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, S3FetchError>;
