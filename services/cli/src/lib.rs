pub mod adapters;
pub mod commands;
pub mod config;
pub mod error;
pub mod session_cache;
pub mod session_watch;

// Re-export the pieces the binary wires together.
pub use commands::{App, Cli, Command};
pub use config::Config;
pub use error::AppError;
