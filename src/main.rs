//! # File Server - Entry Point
//! src/main.rs
//!
//! Lee la configuración de la CLI y del entorno, inicializa el logging y
//! bloquea sirviendo hasta que el proceso termine.

use anyhow::{anyhow, Context};
use file_server::config::Config;
use file_server::server::Server;
use tracing::info;

fn main() -> anyhow::Result<()> {
    let config = Config::new();
    config.validate().map_err(|e| anyhow!(e))?;

    let level = config.tracing_level().map_err(|e| anyhow!(e))?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    info!("File server v{}", env!("CARGO_PKG_VERSION"));
    config.log_summary();

    let server = Server::bind(config).context("Failed to start server")?;
    server.run().context("Server stopped with an error")?;

    Ok(())
}
