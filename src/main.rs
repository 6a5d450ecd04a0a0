//! expod - Development server orchestration for Expo projects
//!
//! This is the binary entry point. All logic lives in the library.

use clap::Parser;
use expod::cli::{Cli, Command};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    if let Err(e) = expod_core::logging::init() {
        eprintln!("Warning: could not initialize logging: {}", e);
    }

    let result = match cli.command {
        Command::Start(args) => expod::start::run(args).await,
    };

    if let Err(e) = result {
        tracing::error!("expod start failed: {}", e);
        eprintln!("Error: {}", e);
        eprintln!(
            "Logs: {}",
            expod_core::logging::log_directory().display()
        );
        std::process::exit(1);
    }
    Ok(())
}
