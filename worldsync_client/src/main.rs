//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p worldsync_client -- [--addr 127.0.0.1:40000] [--name Player]
//!
//! Connects, completes the identity handshake, then reports the (fixed)
//! viewpoint pose upstream at the configured tick rate while mirroring
//! snapshots into the shadow registry.

use std::env;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use worldsync_client::client::{ClientState, WorldClient};
use worldsync_client::shadow::{FixedViewpoint, NullSink};
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
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
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
    info!(server = %cfg.server_addr, "Starting client");

    let mut sink = NullSink;
    let mut client = WorldClient::connect(&cfg, &mut sink).await.context("connect")?;
    info!(session = %client.session_id, name = %client.display_name, "Connected");

    let viewpoint = FixedViewpoint::default();
    let tick_interval = Duration::from_secs_f64(1.0 / f64::from(cfg.tick_hz));
    let mut next_tick = tokio::time::Instant::now();

    loop {
        client
            .poll_message(Duration::from_millis(5), &mut sink)
            .await?;

        if client.state == ClientState::Disconnected {
            info!("Disconnected from server.");
            break;
        }

        if tokio::time::Instant::now() >= next_tick {
            next_tick += tick_interval;
            client.tick(&viewpoint).await?;

            if let Some(snap) = client.reconciler().snapshots().last_snapshot() {
                if snap.tick % 60 == 0 {
                    info!(
                        tick = snap.tick,
                        entries = snap.entries.len(),
                        ping = client.ping,
                        "Snapshot"
                    );
                }
            }
        }
    }

    Ok(())
}
