//! Server implementation.
//!
//! The authoritative world lives here: one entity registry, one simulation,
//! one session table, all mutated from a single event-loop task. Connection
//! readers and writers run as separate tasks and talk to the loop through
//! channels, so no handler ever blocks the tick.
//!
//! Ordering within one tick: pending events are drained first, then the
//! physics step runs, then the snapshot is assembled and fanned out.

use anyhow::Context;
use std::{
    collections::BTreeMap,
    net::SocketAddr,
    time::{Duration, Instant},
};
use tokio::{sync::mpsc, time::sleep_until};
use tracing::{debug, info, warn};
use worldsync_shared::{
    config::SyncConfig,
    net::{
        decode_from_bytes, EntityRecord, FrameListener, FramedConn, PoseUpdate, SessionId,
        Snapshot, UpstreamUpdate, WorldMsg,
    },
    physics::{FixedStep, SimWorld},
    registry::{
        is_session_owned, player_body_name, player_part, session_owner, Body, EntityRegistry,
        PLAYER_INFIX, WORLD_ENT_PREFIX,
    },
    scenario::{player_parts, ScenarioSet},
};

/// Events delivered to the server loop by the transport tasks.
pub enum ServerEvent {
    Connected(FramedConn),
    Message(SessionId, WorldMsg),
    Disconnected(SessionId),
}

/// One connected participant.
pub struct Session {
    pub id: SessionId,
    /// Empty until the `SetName` acknowledgement arrives.
    pub display_name: String,
    pub ping: i64,
    pub timestamp: i64,
    /// Last pose payload the client reported, echoed into its roster record.
    pub last_pose: Option<PoseUpdate>,
    outbound: mpsc::UnboundedSender<WorldMsg>,
}

/// Authoritative world server.
pub struct WorldServer {
    cfg: SyncConfig,
    registry: EntityRegistry,
    sim: SimWorld,
    stepper: FixedStep,
    scenarios: ScenarioSet,
    current_scenario: i32,
    sessions: BTreeMap<SessionId, Session>,

    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
    local_addr: SocketAddr,

    started: Instant,
    tick: u64,
}

impl WorldServer {
    /// Binds the listener and spawns the accept task.
    pub async fn bind(cfg: SyncConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = FrameListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let accept_tx = events_tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((conn, peer)) => {
                        debug!(%peer, "connection accepted");
                        if accept_tx.send(ServerEvent::Connected(conn)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        });

        Ok(Self {
            stepper: FixedStep::new(cfg.tick_hz, cfg.max_sub_steps),
            cfg,
            registry: EntityRegistry::new(),
            sim: SimWorld::default(),
            scenarios: ScenarioSet::builtin(),
            current_scenario: -1,
            sessions: BTreeMap::new(),
            events_tx,
            events_rx,
            local_addr,
            started: Instant::now(),
            tick: 0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn current_scenario(&self) -> i32 {
        self.current_scenario
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn scenarios_mut(&mut self) -> &mut ScenarioSet {
        &mut self.scenarios
    }

    /// Executes one server tick: drain transport events, advance the
    /// simulation, then broadcast the snapshot.
    pub fn step(&mut self) {
        self.pump_events();

        let now = self.started.elapsed().as_secs_f64();
        let sub_steps = self.stepper.advance(now);
        let dt = self.stepper.time_step() as f32;
        for _ in 0..sub_steps {
            self.sim.step(&mut self.registry, dt);
        }

        self.broadcast_snapshot();
        self.tick += 1;
    }

    /// Runs the tick loop for a bounded number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) {
        let dt = Duration::from_secs_f64(1.0 / f64::from(self.cfg.tick_hz));
        let mut next = tokio::time::Instant::now();
        for _ in 0..ticks {
            next += dt;
            self.step();
            sleep_until(next).await;
        }
    }

    /// Runs the tick loop until the process exits.
    pub async fn run(&mut self) {
        let dt = Duration::from_secs_f64(1.0 / f64::from(self.cfg.tick_hz));
        let mut next = tokio::time::Instant::now();
        loop {
            next += dt;
            self.step();
            sleep_until(next).await;
        }
    }

    fn pump_events(&mut self) {
        while let Ok(ev) = self.events_rx.try_recv() {
            if let Err(e) = self.handle_event(ev) {
                warn!(error = %e, "event handling failed");
            }
        }
    }

    fn handle_event(&mut self, ev: ServerEvent) -> anyhow::Result<()> {
        match ev {
            ServerEvent::Connected(conn) => self.handle_connected(conn),
            ServerEvent::Message(id, msg) => self.handle_message(id, msg),
            ServerEvent::Disconnected(id) => self.on_disconnect(&id),
        }
    }

    /// Wires a fresh connection into reader/writer tasks and registers the
    /// session.
    fn handle_connected(&mut self, conn: FramedConn) -> anyhow::Result<()> {
        let (mut reader, mut writer) = conn.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WorldMsg>();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if writer.send(&msg).await.is_err() {
                    // Slow or gone; the reader task reports the disconnect.
                    break;
                }
            }
        });

        let id = self.on_connect(tx)?;

        let events_tx = self.events_tx.clone();
        let reader_id = id.clone();
        tokio::spawn(async move {
            loop {
                match reader.recv_frame().await {
                    Ok(payload) => match decode_from_bytes(&payload) {
                        Ok(msg) => {
                            if events_tx
                                .send(ServerEvent::Message(reader_id.clone(), msg))
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(session = %reader_id, error = %e, "malformed message dropped");
                        }
                    },
                    Err(_) => {
                        let _ = events_tx.send(ServerEvent::Disconnected(reader_id.clone()));
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    /// Allocates identity, spawns the session's owned bodies, and sends the
    /// identity handshake.
    pub fn on_connect(
        &mut self,
        outbound: mpsc::UnboundedSender<WorldMsg>,
    ) -> anyhow::Result<SessionId> {
        let (id, seed) = SessionId::new_unique();

        let spawn = self
            .scenarios
            .spawn_region()
            .sample(&mut rand::thread_rng());
        for def in player_parts(spawn) {
            let name = player_body_name(id.as_str(), &def.name);
            self.registry
                .add(&name, Body::driven(def.pose, def.shape))
                .with_context(|| format!("spawn player body {name}"))?;
        }

        let identity = WorldMsg::Identity {
            id: id.clone(),
            name_seed: seed,
            scenario: self.current_scenario,
        };
        let _ = outbound.send(identity);

        self.sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                display_name: String::new(),
                ping: -1,
                timestamp: now_ms(),
                last_pose: None,
                outbound,
            },
        );

        info!(session = %id, "session connected");
        Ok(id)
    }

    fn handle_message(&mut self, id: SessionId, msg: WorldMsg) -> anyhow::Result<()> {
        match msg {
            WorldMsg::SetName { name } => self.on_set_name(&id, name),
            WorldMsg::Update(update) => self.on_update(&id, update),
            WorldMsg::ChangeScenario { index } => self.on_change_scenario(index),
            other => {
                debug!(session = %id, msg = ?other, "unexpected message dropped");
                Ok(())
            }
        }
    }

    /// Completes the identity handshake; the session now appears in the
    /// human-readable roster and its bodies in per-entity records.
    pub fn on_set_name(&mut self, id: &SessionId, name: String) -> anyhow::Result<()> {
        let Some(session) = self.sessions.get_mut(id) else {
            debug!(session = %id, "set-name for unknown session dropped");
            return Ok(());
        };
        info!(session = %id, name = %name, "session named");
        session.display_name = name;
        Ok(())
    }

    /// Applies a client's periodic report: latency bookkeeping plus a pose
    /// write-through onto every body the session owns.
    pub fn on_update(&mut self, id: &SessionId, update: UpstreamUpdate) -> anyhow::Result<()> {
        let Some(session) = self.sessions.get_mut(id) else {
            // Expected under the benign race with disconnect.
            debug!(session = %id, "update for unknown session dropped");
            return Ok(());
        };
        session.ping = update.ping;
        session.timestamp = update.timestamp;

        if let Some(pose) = update.pose {
            session.last_pose = Some(pose.clone());
            for name in self.registry.owned_names(id.as_str()) {
                if let Some(body) = self.registry.get_mut(&name) {
                    pose.apply_to(&mut body.pose);
                }
            }
        }
        Ok(())
    }

    /// Tears the session down: owned bodies out of the registry, removal
    /// notice to everyone, and an empty world once the room is empty.
    pub fn on_disconnect(&mut self, id: &SessionId) -> anyhow::Result<()> {
        if self.sessions.remove(id).is_none() {
            return Ok(());
        }
        for name in self.registry.owned_names(id.as_str()) {
            self.registry.remove(&name);
        }
        info!(session = %id, "session disconnected");
        self.broadcast(WorldMsg::SessionRemoved { id: id.clone() });

        if self.sessions.is_empty() {
            // No observers left; equivalent to an explicit "scenario -1".
            self.on_change_scenario(-1)?;
        }
        Ok(())
    }

    /// Switches world content. Session-owned bodies survive; everything
    /// else is rebuilt from the scenario builder.
    pub fn on_change_scenario(&mut self, index: i32) -> anyhow::Result<()> {
        self.registry.retain(|name, _| is_session_owned(name));

        if index >= 0 {
            let defs = match self.scenarios.build(index) {
                Ok(defs) => defs,
                Err(e) => {
                    self.current_scenario = -1;
                    return Err(e).with_context(|| format!("build scenario {index}"));
                }
            };
            for def in defs {
                if let Err(e) = self
                    .registry
                    .add(&def.name, Body::new(def.pose, def.mass, def.shape))
                {
                    self.registry.retain(|name, _| is_session_owned(name));
                    self.current_scenario = -1;
                    return Err(e).with_context(|| format!("populate scenario {index}"));
                }
            }
            self.current_scenario = index;
        } else {
            self.current_scenario = -1;
        }

        info!(index = self.current_scenario, "scenario changed");
        self.broadcast(WorldMsg::ScenarioChanged {
            index: self.current_scenario,
        });
        Ok(())
    }

    /// Assembles the full-state snapshot: every world body (prefixed), every
    /// named session's owned bodies, and every live session's own record.
    pub fn build_snapshot(&self) -> Snapshot {
        let now = now_ms();
        let mut entries = BTreeMap::new();

        for (name, body) in self.registry.iter() {
            if let Some(owner) = session_owner(name) {
                let Some(session) = self.sessions.get(&SessionId(owner.to_string())) else {
                    continue;
                };
                let part = player_part(name).unwrap_or_default();
                entries.insert(
                    name.to_string(),
                    EntityRecord {
                        id: name.to_string(),
                        display_name: format!("{}{}{}", session.display_name, PLAYER_INFIX, part),
                        pose: PoseUpdate::full(body.pose),
                        timestamp: now,
                        ping: -1,
                    },
                );
            } else {
                let wire = format!("{WORLD_ENT_PREFIX}{name}");
                entries.insert(
                    wire.clone(),
                    EntityRecord {
                        id: wire,
                        display_name: "server".to_string(),
                        pose: PoseUpdate::full(body.pose),
                        timestamp: now,
                        ping: -1,
                    },
                );
            }
        }

        for (id, session) in &self.sessions {
            entries.insert(
                id.to_string(),
                EntityRecord {
                    id: id.to_string(),
                    display_name: session.display_name.clone(),
                    pose: session.last_pose.clone().unwrap_or_default(),
                    timestamp: session.timestamp,
                    ping: session.ping,
                },
            );
        }

        Snapshot {
            tick: self.tick,
            entries,
        }
    }

    fn broadcast_snapshot(&self) {
        let msg = WorldMsg::Snapshot(self.build_snapshot());
        self.broadcast(msg);
    }

    /// Best-effort fan-out; a backlogged session never blocks the others.
    fn broadcast(&self, msg: WorldMsg) {
        for session in self.sessions.values() {
            let _ = session.outbound.send(msg.clone());
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(WorldServer, SyncConfig)> {
    let cfg = SyncConfig {
        server_addr: "127.0.0.1:0".to_string(),
        tick_hz,
        ..Default::default()
    };
    let server = WorldServer::bind(cfg.clone()).await?;
    let mut cfg = cfg;
    cfg.server_addr = server.local_addr().to_string();
    Ok((server, cfg))
}
