//! Scenario definitions.
//!
//! A scenario is an indexed builder that yields the initial set of world
//! entities. Index `-1` means "no scenario": an empty world. The builders
//! here mirror the shipped demo content; servers and clients register the
//! same set so both sides agree on world-entity names.

use anyhow::bail;
use rand::Rng;

use crate::math::{Pose, Vec3};
use crate::shape::ShapeDesc;

/// One entity a scenario builder wants registered.
#[derive(Debug, Clone)]
pub struct EntityDef {
    pub name: String,
    pub pose: Pose,
    pub mass: f32,
    pub shape: ShapeDesc,
}

impl EntityDef {
    pub fn new(name: &str, pose: Pose, mass: f32, shape: ShapeDesc) -> Self {
        Self {
            name: name.to_string(),
            pose,
            mass,
            shape,
        }
    }
}

/// Where newly connected players are placed.
#[derive(Debug, Clone, Copy)]
pub struct SpawnRegion {
    pub center: Vec3,
    pub radius: f32,
}

impl Default for SpawnRegion {
    fn default() -> Self {
        Self {
            center: Vec3::new(0.0, 1.0, 0.0),
            radius: 2.0,
        }
    }
}

impl SpawnRegion {
    /// Picks a spawn point with horizontal jitter inside the region.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Vec3 {
        let dx = rng.gen_range(-self.radius..=self.radius);
        let dz = rng.gen_range(-self.radius..=self.radius);
        Vec3::new(self.center.x + dx, self.center.y, self.center.z + dz)
    }
}

type BuildFn = Box<dyn Fn() -> anyhow::Result<Vec<EntityDef>> + Send + Sync>;

/// Registered list of scenario builders.
pub struct ScenarioSet {
    entries: Vec<(String, BuildFn)>,
    spawn: SpawnRegion,
}

impl ScenarioSet {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            spawn: SpawnRegion::default(),
        }
    }

    /// The demo content: `box` at index 0, `sphere` at index 1.
    pub fn builtin() -> Self {
        let mut set = Self::new();
        set.register("box", || Ok(box_scenario()));
        set.register("sphere", || Ok(sphere_scenario()));
        set
    }

    pub fn register(
        &mut self,
        title: &str,
        build: impl Fn() -> anyhow::Result<Vec<EntityDef>> + Send + Sync + 'static,
    ) {
        self.entries.push((title.to_string(), Box::new(build)));
    }

    pub fn titles(&self) -> Vec<&str> {
        self.entries.iter().map(|(t, _)| t.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn spawn_region(&self) -> SpawnRegion {
        self.spawn
    }

    pub fn set_spawn_region(&mut self, spawn: SpawnRegion) {
        self.spawn = spawn;
    }

    /// Runs the builder for `index`. `-1` yields an empty world.
    pub fn build(&self, index: i32) -> anyhow::Result<Vec<EntityDef>> {
        if index == -1 {
            return Ok(Vec::new());
        }
        let Some((_, build)) = usize::try_from(index)
            .ok()
            .and_then(|at| self.entries.get(at))
        else {
            bail!("unknown scenario index {index}");
        };
        build()
    }
}

impl Default for ScenarioSet {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Static floor shared by the demo scenarios.
fn floor() -> EntityDef {
    EntityDef::new(
        "floor",
        Pose::at(Vec3::ZERO),
        0.0,
        ShapeDesc::Box {
            half_extents: Vec3::new(5.0, 0.1, 5.0),
        },
    )
}

/// Floor plus a unit box dropped from y = 3.
pub fn box_scenario() -> Vec<EntityDef> {
    vec![
        floor(),
        EntityDef::new(
            "box",
            Pose::at(Vec3::new(0.0, 3.0, 0.0)),
            1.0,
            ShapeDesc::Box {
                half_extents: Vec3::new(0.5, 0.5, 0.5),
            },
        ),
    ]
}

/// Floor plus a unit sphere dropped from (3, 3, 0).
pub fn sphere_scenario() -> Vec<EntityDef> {
    vec![
        floor(),
        EntityDef::new(
            "sphere",
            Pose::at(Vec3::new(3.0, 3.0, 0.0)),
            1.0,
            ShapeDesc::Sphere { radius: 1.0 },
        ),
    ]
}

/// The body parts every player avatar registers, relative to its spawn
/// point. Currently a single camera proxy box.
pub fn player_parts(spawn: Vec3) -> Vec<EntityDef> {
    vec![EntityDef::new(
        "camera",
        Pose::at(spawn),
        0.0,
        ShapeDesc::Box {
            half_extents: Vec3::new(0.25, 0.25, 0.25),
        },
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_box_scenario_contents() {
        let set = ScenarioSet::builtin();
        let defs = set.build(0).unwrap();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["floor", "box"]);
        assert_eq!(defs[0].mass, 0.0);
        assert_eq!(defs[1].mass, 1.0);
    }

    #[test]
    fn minus_one_is_empty_world() {
        assert!(ScenarioSet::builtin().build(-1).unwrap().is_empty());
    }

    #[test]
    fn unknown_index_fails() {
        assert!(ScenarioSet::builtin().build(7).is_err());
    }

    #[test]
    fn spawn_sample_stays_in_region() {
        let region = SpawnRegion::default();
        let mut rng = rand::thread_rng();
        for _ in 0..32 {
            let p = region.sample(&mut rng);
            assert!((p.x - region.center.x).abs() <= region.radius);
            assert!((p.z - region.center.z).abs() <= region.radius);
            assert_eq!(p.y, region.center.y);
        }
    }
}
