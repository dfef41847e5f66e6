//! Client-side shadow state and collaborator seams.
//!
//! The shadow registry mirrors registry entities as renderable proxies:
//! pose only, no mass or shape semantics. It is mutated strictly by snapshot
//! application and explicit removal notices, never by client-local logic.
//! Rendering and viewpoint input live behind traits so the client runs
//! headless in tests and binaries.

use std::collections::HashMap;

use worldsync_shared::math::Pose;
use worldsync_shared::registry::session_owner;

/// Source of the local player's pose (a controllable camera in a real
/// frontend).
pub trait ViewpointSource {
    fn current_pose(&self) -> Pose;
}

/// A viewpoint pinned to one pose.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedViewpoint(pub Pose);

impl ViewpointSource for FixedViewpoint {
    fn current_pose(&self) -> Pose {
        self.0
    }
}

/// Presentation layer. The first `upsert` of a name is the cue to build
/// whatever aggregate represents it; later upserts move it.
pub trait RenderSink {
    fn upsert(&mut self, name: &str, pose: &Pose);
    fn remove(&mut self, name: &str);
}

/// No-op sink useful for headless runs.
#[derive(Default)]
pub struct NullSink;

impl RenderSink for NullSink {
    fn upsert(&mut self, _name: &str, _pose: &Pose) {}
    fn remove(&mut self, _name: &str) {}
}

/// Records every call for assertions in headless tests.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkOp {
    Upsert(String, Pose),
    Remove(String),
}

#[derive(Default)]
pub struct RecordingSink {
    pub ops: Vec<SinkOp>,
}

impl RecordingSink {
    /// Names upserted at least once, in first-seen order.
    pub fn upserted_names(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for op in &self.ops {
            if let SinkOp::Upsert(name, _) = op {
                if !seen.contains(&name.as_str()) {
                    seen.push(name.as_str());
                }
            }
        }
        seen
    }

    pub fn removed_names(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                SinkOp::Remove(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl RenderSink for RecordingSink {
    fn upsert(&mut self, name: &str, pose: &Pose) {
        self.ops.push(SinkOp::Upsert(name.to_string(), *pose));
    }

    fn remove(&mut self, name: &str) {
        self.ops.push(SinkOp::Remove(name.to_string()));
    }
}

/// One mirrored proxy.
#[derive(Debug, Clone, Default)]
pub struct ShadowEntry {
    pub pose: Pose,
    pub display_name: String,
}

/// Client-local mirror of registry entities.
#[derive(Debug, Default)]
pub struct ShadowRegistry {
    entries: HashMap<String, ShadowEntry>,
}

impl ShadowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or updates a proxy. Returns true when the name was new.
    pub fn upsert(&mut self, name: &str, pose: Pose, display_name: &str) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.pose = pose;
                entry.display_name = display_name.to_string();
                false
            }
            None => {
                self.entries.insert(
                    name.to_string(),
                    ShadowEntry {
                        pose,
                        display_name: display_name.to_string(),
                    },
                );
                true
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<ShadowEntry> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ShadowEntry> {
        self.entries.get(name)
    }

    pub fn pose(&self, name: &str) -> Option<Pose> {
        self.entries.get(name).map(|e| e.pose)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ShadowEntry)> {
        self.entries.iter().map(|(name, e)| (name.as_str(), e))
    }

    /// Proxy names owned by the given session.
    pub fn names_owned_by(&self, session: &str) -> Vec<String> {
        self.entries
            .keys()
            .filter(|name| session_owner(name) == Some(session))
            .cloned()
            .collect()
    }

    /// Proxy names that are world entities (not session-owned).
    pub fn world_names(&self) -> Vec<String> {
        self.entries
            .keys()
            .filter(|name| session_owner(name).is_none())
            .cloned()
            .collect()
    }
}
