//! Interpolation.
//!
//! The server sends discrete snapshots at tick boundaries.
//! The client renders at its own rate and blends named poses between the
//! two most recent snapshots.

use std::collections::VecDeque;

use worldsync_shared::math::Pose;
use worldsync_shared::net::{EntityRecord, Snapshot};

/// Buffered snapshot history for interpolation.
#[derive(Default)]
pub struct SnapshotBuffer {
    history: VecDeque<Snapshot>,
    max: usize,
}

impl SnapshotBuffer {
    pub fn new(max: usize) -> Self {
        Self {
            history: VecDeque::new(),
            max,
        }
    }

    pub fn push(&mut self, snap: Snapshot) {
        self.history.push_back(snap);
        while self.history.len() > self.max {
            self.history.pop_front();
        }
    }

    /// Returns the number of buffered snapshots.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Returns true if no snapshots are buffered.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Blends the named entry's pose between the two newest snapshots.
    ///
    /// `alpha` should be in $[0,1]$ where 0 = older snapshot, 1 = newer.
    /// Returns `None` until both snapshots carry a full pose for the name.
    pub fn interp_pose(&self, name: &str, alpha: f32) -> Option<Pose> {
        if self.history.len() < 2 {
            return None;
        }
        let a = &self.history[self.history.len() - 2];
        let b = &self.history[self.history.len() - 1];

        let pa = full_pose(a.entries.get(name)?)?;
        let pb = full_pose(b.entries.get(name)?)?;
        Some(pa.lerp(pb, alpha))
    }

    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.history.back()
    }
}

fn full_pose(record: &EntityRecord) -> Option<Pose> {
    Some(Pose::new(record.pose.position?, record.pose.orientation?))
}

/// Convenience: find a record in a snapshot.
pub fn find_record<'a>(snap: &'a Snapshot, name: &str) -> Option<&'a EntityRecord> {
    snap.entries.get(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use worldsync_shared::math::Vec3;
    use worldsync_shared::net::PoseUpdate;

    fn snap_with(tick: u64, name: &str, y: f32) -> Snapshot {
        let mut entries = BTreeMap::new();
        entries.insert(
            name.to_string(),
            EntityRecord {
                id: name.to_string(),
                display_name: "server".to_string(),
                pose: PoseUpdate::full(Pose::at(Vec3::new(0.0, y, 0.0))),
                timestamp: 0,
                ping: -1,
            },
        );
        Snapshot { tick, entries }
    }

    #[test]
    fn blends_between_last_two_snapshots() {
        let mut buf = SnapshotBuffer::new(4);
        buf.push(snap_with(1, "world_ent_box", 2.0));
        buf.push(snap_with(2, "world_ent_box", 4.0));
        let mid = buf.interp_pose("world_ent_box", 0.5).unwrap();
        assert_eq!(mid.position.y, 3.0);
    }

    #[test]
    fn single_snapshot_yields_none() {
        let mut buf = SnapshotBuffer::new(4);
        buf.push(snap_with(1, "world_ent_box", 2.0));
        assert!(buf.interp_pose("world_ent_box", 0.5).is_none());
    }

    #[test]
    fn history_is_bounded() {
        let mut buf = SnapshotBuffer::new(2);
        for tick in 0..5 {
            buf.push(snap_with(tick, "world_ent_box", tick as f32));
        }
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.last_snapshot().unwrap().tick, 4);
    }
}
