//! Entity registry.
//!
//! Maps a unique name to a registered body. Ownership is a naming
//! convention enforced by callers: world entities carry bare scenario names,
//! session-owned entities are named `<session>_player_<part>`. The registry
//! preserves insertion order so a single snapshot enumerates bodies stably.

use anyhow::bail;
use std::collections::HashMap;

use crate::math::{Pose, Vec3};
use crate::shape::ShapeDesc;

/// Prefix applied to world-entity names on the wire, distinguishing them
/// from session records in the snapshot's flat namespace.
pub const WORLD_ENT_PREFIX: &str = "world_ent_";

/// Infix separating a session id from the owned part name.
pub const PLAYER_INFIX: &str = "_player_";

/// Builds the registry name for a session-owned body part.
pub fn player_body_name(session: &str, part: &str) -> String {
    format!("{session}{PLAYER_INFIX}{part}")
}

/// True if the name follows the session-owned grammar.
pub fn is_session_owned(name: &str) -> bool {
    name.contains(PLAYER_INFIX)
}

/// The owning session id of a session-owned name, if any.
///
/// Matching on the full `_player_` infix rather than a bare id prefix keeps
/// `s1` from claiming `s10_player_camera`.
pub fn session_owner(name: &str) -> Option<&str> {
    name.split_once(PLAYER_INFIX).map(|(owner, _)| owner)
}

/// The part name of a session-owned name, if any.
pub fn player_part(name: &str) -> Option<&str> {
    name.split_once(PLAYER_INFIX).map(|(_, part)| part)
}

/// A registered rigid body.
#[derive(Debug, Clone)]
pub struct Body {
    pub pose: Pose,
    pub velocity: Vec3,
    /// 0 = static/kinematic.
    pub mass: f32,
    pub shape: ShapeDesc,
    /// Session-owned bodies are driven by upstream updates, never by the
    /// integrator. They stay registered so free bodies still collide with
    /// their volume.
    pub driven: bool,
}

impl Body {
    pub fn new(pose: Pose, mass: f32, shape: ShapeDesc) -> Self {
        Self {
            pose,
            velocity: Vec3::ZERO,
            mass,
            shape,
            driven: false,
        }
    }

    pub fn driven(pose: Pose, shape: ShapeDesc) -> Self {
        Self {
            pose,
            velocity: Vec3::ZERO,
            mass: 0.0,
            shape,
            driven: true,
        }
    }

    /// Free bodies are integrated by the simulation step.
    pub fn is_free(&self) -> bool {
        self.mass > 0.0 && !self.driven
    }
}

/// Insertion-ordered name → body map.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entries: Vec<(String, Body)>,
    index: HashMap<String, usize>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a body under a name that must not already be present.
    pub fn add(&mut self, name: &str, body: Body) -> anyhow::Result<()> {
        if self.index.contains_key(name) {
            bail!("entity name already registered: {name}");
        }
        self.index.insert(name.to_string(), self.entries.len());
        self.entries.push((name.to_string(), body));
        Ok(())
    }

    /// Removes a body. Absent names are a no-op.
    pub fn remove(&mut self, name: &str) -> Option<Body> {
        let at = self.index.remove(name)?;
        let (_, body) = self.entries.remove(at);
        self.reindex(at);
        Some(body)
    }

    /// Drops every body the predicate rejects.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &Body) -> bool) {
        self.entries.retain(|(name, body)| keep(name, body));
        self.index.clear();
        for (at, (name, _)) in self.entries.iter().enumerate() {
            self.index.insert(name.clone(), at);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Body> {
        self.index.get(name).map(|&at| &self.entries[at].1)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Body> {
        let at = *self.index.get(name)?;
        Some(&mut self.entries[at].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Body)> {
        self.entries.iter().map(|(name, body)| (name.as_str(), body))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Body)> {
        self.entries
            .iter_mut()
            .map(|(name, body)| (name.as_str(), body))
    }

    /// Names of every body owned by the given session.
    pub fn owned_names(&self, session: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(name, _)| session_owner(name) == Some(session))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn reindex(&mut self, from: usize) {
        for (at, (name, _)) in self.entries.iter().enumerate().skip(from) {
            self.index.insert(name.clone(), at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> Body {
        Body::new(
            Pose::default(),
            1.0,
            ShapeDesc::Sphere { radius: 1.0 },
        )
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut reg = EntityRegistry::new();
        reg.add("box", body()).unwrap();
        assert!(reg.add("box", body()).is_err());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut reg = EntityRegistry::new();
        reg.add("box", body()).unwrap();
        assert!(reg.remove("box").is_some());
        assert!(reg.remove("box").is_none());
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut reg = EntityRegistry::new();
        for name in ["floor", "box", "sphere"] {
            reg.add(name, body()).unwrap();
        }
        reg.remove("box");
        reg.add("ramp", body()).unwrap();
        let names: Vec<&str> = reg.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["floor", "sphere", "ramp"]);
        assert!(reg.get("ramp").is_some());
    }

    #[test]
    fn owner_match_is_exact() {
        let mut reg = EntityRegistry::new();
        reg.add(&player_body_name("s1", "camera"), body()).unwrap();
        reg.add(&player_body_name("s10", "camera"), body()).unwrap();
        assert_eq!(reg.owned_names("s1"), ["s1_player_camera"]);
    }

    #[test]
    fn name_grammar_helpers() {
        let name = player_body_name("s3", "camera");
        assert!(is_session_owned(&name));
        assert_eq!(session_owner(&name), Some("s3"));
        assert_eq!(player_part(&name), Some("camera"));
        assert!(!is_session_owned("floor"));
        assert_eq!(session_owner("floor"), None);
    }
}
