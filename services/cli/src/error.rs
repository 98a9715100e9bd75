//! services/cli/src/error.rs
//!
//! Defines the primary error type for the entire CLI service.

use studyshelf_core::ports::PortError;
use studyshelf_core::upload::UploadError;

use crate::config::ConfigError;

/// The primary error type for the `cli` service.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents a failure inside an upload batch.
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    /// Represents an error from the HTTP client talking to the backend.
    #[error("HTTP Error: {0}")]
    Http(#[from] reqwest::Error),

    /// Represents a standard Input/Output error (e.g., reading a local file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The invoked operation requires a privilege the current user lacks.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// A user-supplied value failed validation before any network call.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
