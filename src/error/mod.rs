//! Error types for registry synchronization
//!
//! Every fallible operation in the crate returns [`SyncError`]. The variants follow
//! the failure classes of the external systems involved: registries, the
//! vulnerability scanner, the patcher, the signer and the local filesystem.

pub mod handlers;

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Connection, DNS or transport failures
    #[error("Network error: {0}")]
    Network(String),

    /// Credential resolution or token exchange failures
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Registry answered with an unexpected non-2xx status
    #[error("Registry error: {0}")]
    Registry(String),

    /// Manifest, tag or blob does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Digest mismatch for {reference}: expected {expected}, got {actual}")]
    DigestMismatch {
        reference: String,
        expected: String,
        actual: String,
    },

    /// Requested architecture is absent from a multi-platform index
    #[error("No manifest in {reference} matches platform {platform}")]
    PlatformNotFound { reference: String, platform: String },

    #[error("Invalid platform: {0}")]
    InvalidPlatform(String),

    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    #[error("Scan of {image} failed: {message}")]
    Scan { image: String, message: String },

    #[error("Patch of {image} failed: {message}")]
    Patch { image: String, message: String },

    #[error("Signing {image} failed: {message}")]
    Sign { image: String, message: String },

    #[error("Archive error at {}: {message}", path.display())]
    Archive { message: String, path: PathBuf },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker task panicked or was aborted
    #[error("Task error: {0}")]
    Task(String),
}

impl SyncError {
    /// True when the registry confirmed the content is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

impl From<serde_yaml::Error> for SyncError {
    fn from(err: serde_yaml::Error) -> Self {
        SyncError::Configuration(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::Configuration(format!("invalid URL: {}", err))
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Task(err.to_string())
    }
}
