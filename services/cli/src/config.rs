//! services/cli/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The
//! `.env` file is used for local development.

use std::path::PathBuf;

use reqwest::Url;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the hosted backend (auth, rows, and storage share it).
    pub backend_url: Url,
    /// The anonymous API key sent with every request.
    pub anon_key: String,
    /// The designated owner: the single email auto-promoted to super_admin
    /// on first login, compared case-sensitively.
    pub owner_email: String,
    pub log_level: Level,
    /// Storage bucket holding the uploaded note files.
    pub notes_bucket: String,
    /// Where the active session is cached between invocations.
    pub session_cache_path: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for
    /// development, but this is skipped in test environments to keep tests
    /// hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let backend_url_str = std::env::var("SUPABASE_URL")
            .map_err(|_| ConfigError::MissingVar("SUPABASE_URL".to_string()))?;
        let backend_url = backend_url_str
            .parse::<Url>()
            .map_err(|e| ConfigError::InvalidValue("SUPABASE_URL".to_string(), e.to_string()))?;

        let anon_key = std::env::var("SUPABASE_ANON_KEY")
            .map_err(|_| ConfigError::MissingVar("SUPABASE_ANON_KEY".to_string()))?;

        let owner_email = std::env::var("OWNER_EMAIL")
            .map_err(|_| ConfigError::MissingVar("OWNER_EMAIL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let notes_bucket =
            std::env::var("NOTES_BUCKET").unwrap_or_else(|_| "notes".to_string());

        let session_cache_path = std::env::var("SESSION_CACHE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_session_cache_path());

        Ok(Self {
            backend_url,
            anon_key,
            owner_email,
            log_level,
            notes_bucket,
            session_cache_path,
        })
    }
}

fn default_session_cache_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("studyshelf")
        .join("session.json")
}
