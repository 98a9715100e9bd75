//! services/cli/src/bin/studyshelf.rs

use std::sync::Arc;

use clap::Parser;
use cli_lib::{App, AppError, Cli, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- 2. Parse Arguments & Build the Adapter Set ---
    let cli = Cli::parse();
    let app = App::new(config)?;

    // --- 3. Dispatch ---
    app.run(cli.command).await
}
