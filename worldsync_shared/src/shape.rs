//! Collision shape descriptors.
//!
//! Scenario builders produce these explicitly with typed parameters; nothing
//! is inferred from loosely typed metadata. The simulation only consumes the
//! bounding extents, so mesh variants carry their raw geometry untouched.

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Tagged shape variant carried by every registered body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShapeDesc {
    Sphere {
        radius: f32,
    },
    Box {
        half_extents: Vec3,
    },
    Capsule {
        radius: f32,
        half_height: f32,
    },
    ConvexMesh {
        points: Vec<Vec3>,
    },
    TriMesh {
        points: Vec<Vec3>,
        indices: Vec<[u32; 3]>,
    },
}

impl ShapeDesc {
    /// Axis-aligned bounding half-extents around the shape's local origin.
    pub fn half_extents(&self) -> Vec3 {
        match self {
            ShapeDesc::Sphere { radius } => Vec3::new(*radius, *radius, *radius),
            ShapeDesc::Box { half_extents } => *half_extents,
            ShapeDesc::Capsule {
                radius,
                half_height,
            } => Vec3::new(*radius, half_height + radius, *radius),
            ShapeDesc::ConvexMesh { points } | ShapeDesc::TriMesh { points, .. } => {
                let mut he = Vec3::ZERO;
                for p in points {
                    he.x = he.x.max(p.x.abs());
                    he.y = he.y.max(p.y.abs());
                    he.z = he.z.max(p.z.abs());
                }
                he
            }
        }
    }

    /// Vertical half-extent, used by the resting-contact pass.
    pub fn half_height(&self) -> f32 {
        self.half_extents().y
    }
}
