//! Fixed-timestep simulation.
//!
//! `FixedStep` implements the catch-up policy: step by a constant increment,
//! using elapsed wall time to decide how many increments to apply, bounded
//! so a stalled host cannot spiral. `SimWorld` is the single writer of world
//! entity poses; session-owned (driven) bodies are skipped by integration
//! because their pose is written from upstream updates, but they still act
//! as collision volumes for free bodies.

use crate::math::Vec3;
use crate::registry::EntityRegistry;

/// Fixed-timestep stepper with bounded catch-up.
///
/// Pure function of the timestamps passed to [`FixedStep::advance`], so the
/// cadence is testable with simulated time.
#[derive(Debug, Clone)]
pub struct FixedStep {
    time_step: f64,
    max_sub_steps: u32,
    last_call: Option<f64>,
    accumulator: f64,
}

impl FixedStep {
    pub fn new(tick_hz: u32, max_sub_steps: u32) -> Self {
        Self {
            time_step: 1.0 / tick_hz.max(1) as f64,
            max_sub_steps: max_sub_steps.max(1),
            last_call: None,
            accumulator: 0.0,
        }
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    /// Forgets the previous call time; the next advance takes a single step.
    pub fn reset(&mut self) {
        self.last_call = None;
        self.accumulator = 0.0;
    }

    /// Returns how many fixed steps to run for wall-clock time `now` (in
    /// seconds). The first call after (re)start cannot guess elapsed time
    /// and takes exactly one step.
    pub fn advance(&mut self, now: f64) -> u32 {
        let Some(last) = self.last_call else {
            self.last_call = Some(now);
            return 1;
        };
        self.last_call = Some(now);
        self.accumulator += (now - last).max(0.0);

        // The epsilon absorbs float rounding so an exact-cadence caller
        // lands on one step, not zero.
        let steps = ((self.accumulator + 1e-9) / self.time_step) as u32;
        let steps = steps.min(self.max_sub_steps);
        self.accumulator = (self.accumulator - f64::from(steps) * self.time_step).max(0.0);
        // Unspent backlog beyond one step's worth is dropped: simulated time
        // stays near wall time without a runaway queue.
        if self.accumulator > self.time_step {
            self.accumulator = self.time_step;
        }
        steps
    }
}

/// Gravity integrator over the registry's free bodies.
#[derive(Debug, Clone, Copy)]
pub struct SimWorld {
    pub gravity: Vec3,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.8, 0.0),
        }
    }
}

impl SimWorld {
    /// Advances every free body by one fixed step, then resolves resting
    /// contact against non-free bodies' upper faces.
    pub fn step(&self, registry: &mut EntityRegistry, dt: f32) {
        // Support surfaces: statics and driven bodies, captured before
        // integration (none of them move during this step).
        let supports: Vec<(Vec3, Vec3)> = registry
            .iter()
            .filter(|(_, body)| !body.is_free())
            .map(|(_, body)| (body.pose.position, body.shape.half_extents()))
            .collect();

        for (_, body) in registry.iter_mut() {
            if !body.is_free() {
                continue;
            }
            body.velocity = body.velocity.add(self.gravity.scale(dt));
            body.pose.position = body.pose.position.add(body.velocity.scale(dt));

            if body.velocity.y > 0.0 {
                continue;
            }
            let he = body.shape.half_extents();
            for (center, sup_he) in &supports {
                let dx = (body.pose.position.x - center.x).abs();
                let dz = (body.pose.position.z - center.z).abs();
                if dx > he.x + sup_he.x || dz > he.z + sup_he.z {
                    continue;
                }
                let top = center.y + sup_he.y;
                let bottom = body.pose.position.y - he.y;
                // Landed on (or sank into) the support this step.
                if bottom <= top && body.pose.position.y > center.y {
                    body.pose.position.y = top + he.y;
                    body.velocity.y = 0.0;
                    break;
                }
            }
        }
    }
}
