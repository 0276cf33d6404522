//! Line-protocol Chat Server - Entry Point
//!
//! Loads settings, starts the TCP listener and the engine actor, and
//! accepts connections.

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chatline::{accept_loop, Config, Engine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chatline=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatline=info")),
        )
        .init();

    // Load settings from the environment
    let config = Config::from_env()?;

    // Start TCP listener
    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!("Chat server listening on {}", config.bind_addr());

    // Create the engine actor and start it
    let (engine, cmd_tx) = Engine::new(config);
    tokio::spawn(engine.run());

    info!("Engine actor started");

    // Connection accept loop
    accept_loop(listener, cmd_tx).await;

    Ok(())
}
