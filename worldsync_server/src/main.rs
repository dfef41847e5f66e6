//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p worldsync_server -- [--addr 127.0.0.1:40000] [--tick-hz 60]
//!
//! The server listens for client connections, runs the fixed timestep
//! simulation, and broadcasts full-world snapshots to every session.

use std::env;

use anyhow::Context;
use tracing::info;
use worldsync_server::WorldServer;
use worldsync_shared::config::SyncConfig;

fn parse_args() -> SyncConfig {
    let mut cfg = SyncConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(60);
                i += 2;
            }
            "--max-sub-steps" if i + 1 < args.len() => {
                cfg.max_sub_steps = args[i + 1].parse().unwrap_or(3);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, "Starting server");

    let mut server = WorldServer::bind(cfg).await.context("bind server")?;
    info!(local = %server.local_addr(), "Server listening");

    server.run().await;
    Ok(())
}
