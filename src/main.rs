//! Ferrokv - An In-Memory, Redis-Compatible Key-Value Store
//!
//! This is the main entry point for the Ferrokv server.
//! It parses flags, sets up logging and runs the server until Ctrl+C.

use ferrokv::config::{Config, ConfigError, USAGE};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &Config) {
    println!(
        r#"
Ferrokv v{} - In-Memory Key-Value Store
──────────────────────────────────────────────────────────────
Address:  {}
Store:    {}
Snapshot: {}

Use Ctrl+C to shutdown gracefully.
"#,
        ferrokv::VERSION,
        config.bind_address(),
        config.store,
        config
            .dbfilename
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "disabled".to_string()),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(ConfigError::Help) => {
            println!("Ferrokv - In-Memory Key-Value Store\n{USAGE}");
            return Ok(());
        }
        Err(ConfigError::Version) => {
            println!("ferrokv {}", ferrokv::VERSION);
            return Ok(());
        }
        Err(e) => anyhow::bail!("{e}"),
    };

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner(&config);

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, stopping server..."),
        }
    };

    ferrokv::server::run(config, shutdown).await?;

    info!("Server shutdown complete");
    Ok(())
}
