//! Client implementation.
//!
//! The client maintains:
//! - One framed TCP connection to the server
//! - The identity handshake (server assigns an id, we answer with a name)
//! - A per-tick upstream report of the local viewpoint pose and latency
//! - The reconciler that mirrors snapshots into shadow state
//!
//! The periodic tick is armed by the caller only after `connect` returns,
//! so the server never hears from an unnamed session.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{debug, info, warn};
use worldsync_shared::{
    config::SyncConfig,
    net::{decode_from_bytes, FramedConn, PoseUpdate, SessionId, UpstreamUpdate, WorldMsg},
    scenario::ScenarioSet,
};

use crate::reconcile::Reconciler;
use crate::shadow::{RenderSink, ViewpointSource};

/// Client connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Handshake complete, ticking.
    Ready,
    /// Connection lost.
    Disconnected,
}

/// High-level world client.
pub struct WorldClient {
    pub session_id: SessionId,
    pub display_name: String,
    pub scenario: i32,
    pub state: ClientState,
    /// Latest measured round-trip estimate, -1 before the first tick pair.
    pub ping: i64,

    conn: FramedConn,
    scenarios: ScenarioSet,
    recon: Reconciler,
    last_timestamp: i64,
}

impl WorldClient {
    /// Connects and completes the identity handshake: the first inbound
    /// frame must assign our id, and we acknowledge with a display name
    /// before returning.
    pub async fn connect(cfg: &SyncConfig, sink: &mut dyn RenderSink) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %addr, "Connecting to server");

        let mut conn = FramedConn::connect(addr).await?;
        let (id, name_seed, scenario) = match conn.recv().await? {
            WorldMsg::Identity {
                id,
                name_seed,
                scenario,
            } => (id, name_seed, scenario),
            other => bail!("expected Identity, got {other:?}"),
        };

        let display_name = format!("{} {}", cfg.player_name, name_seed);
        conn.send(&WorldMsg::SetName {
            name: display_name.clone(),
        })
        .await?;
        info!(session = %id, name = %display_name, "identity acknowledged");

        let mut client = Self {
            recon: Reconciler::new(id.clone()),
            session_id: id,
            display_name,
            scenario,
            state: ClientState::Ready,
            ping: -1,
            conn,
            scenarios: ScenarioSet::builtin(),
            last_timestamp: now_ms(),
        };
        client.apply_scenario(scenario, sink);
        Ok(client)
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.recon
    }

    /// Polls the connection for one message. Returns false on timeout or
    /// after the connection drops.
    pub async fn poll_message(
        &mut self,
        timeout: Duration,
        sink: &mut dyn RenderSink,
    ) -> anyhow::Result<bool> {
        match tokio::time::timeout(timeout, self.conn.recv_frame()).await {
            Ok(Ok(payload)) => {
                match decode_from_bytes(&payload) {
                    Ok(msg) => self.handle_message(msg, sink),
                    Err(e) => {
                        warn!(error = %e, "malformed message dropped");
                    }
                }
                Ok(true)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "connection lost");
                self.state = ClientState::Disconnected;
                Ok(false)
            }
            Err(_) => {
                // Timeout, no message available.
                Ok(false)
            }
        }
    }

    fn handle_message(&mut self, msg: WorldMsg, sink: &mut dyn RenderSink) {
        match msg {
            WorldMsg::Snapshot(snap) => {
                self.recon.apply_snapshot(snap, sink);
            }
            WorldMsg::ScenarioChanged { index } => {
                info!(index, "scenario changed");
                self.apply_scenario(index, sink);
            }
            WorldMsg::SessionRemoved { id } => {
                info!(session = %id, "session removed");
                self.recon.on_session_removed(&id, sink);
            }
            other => {
                debug!(?other, "unexpected message dropped");
            }
        }
    }

    /// Client session tick: sample the viewpoint, refresh the latency
    /// estimate, and report upstream.
    pub async fn tick(&mut self, viewpoint: &dyn ViewpointSource) -> anyhow::Result<()> {
        let now = now_ms();
        self.ping = now - self.last_timestamp;
        self.last_timestamp = now;

        let update = UpstreamUpdate {
            pose: Some(PoseUpdate::full(viewpoint.current_pose())),
            ping: self.ping,
            timestamp: now,
        };
        self.conn.send(&WorldMsg::Update(update)).await
    }

    /// Asks the server to switch scenarios. Fire-and-forget; the switch
    /// lands via the `ScenarioChanged` broadcast.
    pub async fn request_scenario(&mut self, index: i32) -> anyhow::Result<()> {
        self.conn.send(&WorldMsg::ChangeScenario { index }).await
    }

    /// Rebuilds local world content for a scenario index. A failed local
    /// build leaves the world empty; the authoritative registry is
    /// unaffected either way.
    fn apply_scenario(&mut self, index: i32, sink: &mut dyn RenderSink) {
        self.scenario = index;
        match self.scenarios.build(index) {
            Ok(defs) => self.recon.rebuild_world(&defs, sink),
            Err(e) => {
                warn!(error = %e, index, "local scenario build failed");
                self.recon.rebuild_world(&[], sink);
            }
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
