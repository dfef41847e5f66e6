//! Snapshot reconciliation.
//!
//! Turns the inbound snapshot stream into shadow proxies and render-sink
//! calls. Proxy creation follows snapshot membership; destruction follows
//! explicit `SessionRemoved` notices rather than snapshot diffing, which
//! avoids races with a simultaneous reconnect. Depends on nothing but the
//! wire protocol.

use std::collections::BTreeMap;

use tracing::debug;
use worldsync_shared::net::{SessionId, Snapshot};
use worldsync_shared::registry::{session_owner, WORLD_ENT_PREFIX};
use worldsync_shared::scenario::EntityDef;

use crate::interp::SnapshotBuffer;
use crate::shadow::{RenderSink, ShadowRegistry};

/// One roster row: a named, live session as last reported by the server.
#[derive(Debug, Clone, Default)]
pub struct RosterEntry {
    pub display_name: String,
    pub ping: i64,
    pub timestamp: i64,
}

/// Applies snapshots and removal notices to the client's shadow state.
pub struct Reconciler {
    local_id: SessionId,
    shadow: ShadowRegistry,
    roster: BTreeMap<String, RosterEntry>,
    snaps: SnapshotBuffer,
    /// Blend factor between the two newest snapshots; 1.0 pins to newest.
    blend: f32,
}

impl Reconciler {
    pub fn new(local_id: SessionId) -> Self {
        Self {
            local_id,
            shadow: ShadowRegistry::new(),
            roster: BTreeMap::new(),
            snaps: SnapshotBuffer::new(32),
            blend: 0.5,
        }
    }

    pub fn with_blend(mut self, blend: f32) -> Self {
        self.blend = blend.clamp(0.0, 1.0);
        self
    }

    pub fn local_id(&self) -> &SessionId {
        &self.local_id
    }

    pub fn shadow(&self) -> &ShadowRegistry {
        &self.shadow
    }

    pub fn roster(&self) -> &BTreeMap<String, RosterEntry> {
        &self.roster
    }

    pub fn snapshots(&self) -> &SnapshotBuffer {
        &self.snaps
    }

    /// Applies one snapshot: proxies are created for unseen names, poses are
    /// overwritten (interpolated once two snapshots are buffered), and the
    /// roster is refreshed. The local player's own entities are mirrored but
    /// never forwarded to the sink.
    pub fn apply_snapshot(&mut self, snap: Snapshot, sink: &mut dyn RenderSink) {
        self.snaps.push(snap.clone());

        for (name, record) in &snap.entries {
            if let Some(bare) = name.strip_prefix(WORLD_ENT_PREFIX) {
                // World entity: the wire prefix is stripped before lookup.
                let base = self.shadow.pose(bare).unwrap_or_default();
                let target = record.pose.resolve(base);
                let pose = self.snaps.interp_pose(name, self.blend).unwrap_or(target);
                self.shadow.upsert(bare, pose, &record.display_name);
                sink.upsert(bare, &pose);
            } else if let Some(owner) = session_owner(name) {
                let own = owner == self.local_id.as_str();
                let base = self.shadow.pose(name).unwrap_or_default();
                let target = record.pose.resolve(base);
                let pose = self.snaps.interp_pose(name, self.blend).unwrap_or(target);
                self.shadow.upsert(name, pose, &record.display_name);
                // Display suppression: the local avatar is authored locally,
                // not rendered back from the server echo.
                if !own {
                    sink.upsert(name, &pose);
                }
            } else {
                // Roster record. Unnamed sessions stay off the roster until
                // their handshake completes.
                if record.display_name.is_empty() {
                    continue;
                }
                self.roster.insert(
                    name.clone(),
                    RosterEntry {
                        display_name: record.display_name.clone(),
                        ping: record.ping,
                        timestamp: record.timestamp,
                    },
                );
            }
        }
    }

    /// Drops every proxy and roster row belonging to a removed session.
    pub fn on_session_removed(&mut self, id: &SessionId, sink: &mut dyn RenderSink) {
        debug!(session = %id, "dropping proxies for removed session");
        self.roster.remove(id.as_str());
        for name in self.shadow.names_owned_by(id.as_str()) {
            self.shadow.remove(&name);
            sink.remove(&name);
        }
    }

    /// Rebuilds local world content on a scenario switch. Session-owned
    /// proxies survive, exactly as their bodies do on the server.
    pub fn rebuild_world(&mut self, defs: &[EntityDef], sink: &mut dyn RenderSink) {
        for name in self.shadow.world_names() {
            self.shadow.remove(&name);
            sink.remove(&name);
        }
        for def in defs {
            self.shadow.upsert(&def.name, def.pose, "");
            sink.upsert(&def.name, &def.pose);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldsync_shared::math::{Pose, Vec3};
    use worldsync_shared::net::{EntityRecord, PoseUpdate};
    use worldsync_shared::scenario::box_scenario;

    use crate::shadow::{RecordingSink, SinkOp};

    fn record(id: &str, display_name: &str, pose: Option<Pose>) -> EntityRecord {
        EntityRecord {
            id: id.to_string(),
            display_name: display_name.to_string(),
            pose: pose.map(PoseUpdate::full).unwrap_or_default(),
            timestamp: 7,
            ping: 12,
        }
    }

    fn snapshot(entries: Vec<EntityRecord>) -> Snapshot {
        Snapshot {
            tick: 0,
            entries: entries.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(SessionId("s1".to_string()))
    }

    #[test]
    fn world_prefix_is_stripped() {
        let mut recon = reconciler();
        let mut sink = RecordingSink::default();
        let snap = snapshot(vec![record(
            "world_ent_floor",
            "server",
            Some(Pose::default()),
        )]);
        recon.apply_snapshot(snap, &mut sink);
        assert!(recon.shadow().contains("floor"));
        assert_eq!(sink.upserted_names(), ["floor"]);
    }

    #[test]
    fn own_player_entities_are_suppressed_but_mirrored() {
        let mut recon = reconciler();
        let mut sink = RecordingSink::default();
        let pose = Pose::at(Vec3::new(0.0, 2.0, 0.0));
        let snap = snapshot(vec![
            record("s1_player_camera", "Alice_player_camera", Some(pose)),
            record("s2_player_camera", "Bob_player_camera", Some(pose)),
        ]);
        recon.apply_snapshot(snap, &mut sink);

        assert!(recon.shadow().contains("s1_player_camera"));
        assert_eq!(sink.upserted_names(), ["s2_player_camera"]);
    }

    #[test]
    fn roster_excludes_unnamed_sessions() {
        let mut recon = reconciler();
        let mut sink = RecordingSink::default();
        let snap = snapshot(vec![record("s1", "Alice", None), record("s2", "", None)]);
        recon.apply_snapshot(snap, &mut sink);
        assert!(recon.roster().contains_key("s1"));
        assert!(!recon.roster().contains_key("s2"));
        assert_eq!(recon.roster()["s1"].ping, 12);
    }

    #[test]
    fn removal_notice_drops_only_that_session() {
        let mut recon = reconciler();
        let mut sink = RecordingSink::default();
        let pose = Pose::default();
        let snap = snapshot(vec![
            record("s2_player_camera", "Bob_player_camera", Some(pose)),
            record("s20_player_camera", "Eve_player_camera", Some(pose)),
            record("s2", "Bob", None),
        ]);
        recon.apply_snapshot(snap, &mut sink);

        recon.on_session_removed(&SessionId("s2".to_string()), &mut sink);
        assert!(!recon.shadow().contains("s2_player_camera"));
        assert!(recon.shadow().contains("s20_player_camera"));
        assert!(!recon.roster().contains_key("s2"));
        assert_eq!(sink.removed_names(), ["s2_player_camera"]);
    }

    #[test]
    fn partial_pose_keeps_previous_fields() {
        let mut recon = reconciler().with_blend(1.0);
        let mut sink = RecordingSink::default();
        let spin = worldsync_shared::math::Quat {
            x: 0.0,
            y: 1.0,
            z: 0.0,
            w: 0.0,
        };
        let mut first = Pose::at(Vec3::new(1.0, 1.0, 1.0));
        first.orientation = spin;
        recon.apply_snapshot(
            snapshot(vec![record("world_ent_box", "server", Some(first))]),
            &mut sink,
        );

        let mut partial = record("world_ent_box", "server", None);
        partial.pose = PoseUpdate {
            position: Some(Vec3::new(2.0, 2.0, 2.0)),
            orientation: None,
        };
        recon.apply_snapshot(snapshot(vec![partial]), &mut sink);

        let entry = recon.shadow().get("box").unwrap();
        assert_eq!(entry.pose.position, Vec3::new(2.0, 2.0, 2.0));
        assert_eq!(entry.pose.orientation, spin);
    }

    #[test]
    fn scenario_rebuild_preserves_player_proxies() {
        let mut recon = reconciler();
        let mut sink = RecordingSink::default();
        let snap = snapshot(vec![
            record("world_ent_floor", "server", Some(Pose::default())),
            record("s2_player_camera", "Bob_player_camera", Some(Pose::default())),
        ]);
        recon.apply_snapshot(snap, &mut sink);

        recon.rebuild_world(&box_scenario(), &mut sink);
        assert!(recon.shadow().contains("s2_player_camera"));
        assert!(recon.shadow().contains("floor"));
        assert!(recon.shadow().contains("box"));
    }

    #[test]
    fn interpolation_blends_consecutive_snapshots() {
        let mut recon = reconciler().with_blend(0.5);
        let mut sink = RecordingSink::default();
        recon.apply_snapshot(
            snapshot(vec![record(
                "world_ent_box",
                "server",
                Some(Pose::at(Vec3::new(0.0, 4.0, 0.0))),
            )]),
            &mut sink,
        );
        recon.apply_snapshot(
            snapshot(vec![record(
                "world_ent_box",
                "server",
                Some(Pose::at(Vec3::new(0.0, 2.0, 0.0))),
            )]),
            &mut sink,
        );
        let pose = recon.shadow().pose("box").unwrap();
        assert_eq!(pose.position.y, 3.0);
        if let SinkOp::Upsert(_, sunk) = sink.ops.last().unwrap() {
            assert_eq!(sunk.position.y, 3.0);
        } else {
            panic!("expected an upsert");
        }
    }
}
