use preyflock_index::{QuadtreeConfig, Rect};
use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};

use crate::WorldStateError;

/// What happens when one of the two populations dies out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SimulationMode {
    /// Refill the extinct population from just outside the world border.
    #[default]
    Infinite,
    /// Pause the world.
    DeathMatch,
    /// Rebuild the world from its initial population.
    Retry,
}

/// Load shedding applied when admission refuses a spawn because the frame rate dropped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum LowFpsAction {
    /// Cull 5% of whichever population dominates.
    #[default]
    PopulationControl,
    /// Cull half of both populations.
    BudgetCuts,
}

/// Static configuration for a flocking world.
///
/// Every field has a default so partial JSON files deserialize cleanly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Width of the world in world units.
    pub world_width: f32,
    /// Height of the world in world units.
    pub world_height: f32,
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,
    /// Number of tick summaries retained in memory.
    pub history_capacity: usize,
    pub simulation_mode: SimulationMode,

    /// Entities a quadtree leaf holds before splitting.
    pub quadtree_capacity: usize,
    /// Depth at which leaves stop splitting.
    pub quadtree_max_depth: u32,
    /// Maximum neighbours gathered by one radius query.
    pub range_query_cap: usize,

    /// Distance from an edge at which border avoidance kicks in.
    pub border_distance: f32,
    /// Magnitude of the per-edge border nudge.
    pub border_avoidance_force: f32,

    pub initial_boids: usize,
    pub boid_max_velocity: f32,
    pub boid_max_steering_force: f32,
    pub alignment_radius: f32,
    pub cohesion_radius: f32,
    pub boid_separation_radius: f32,
    pub flee_radius: f32,
    /// Weight of the flee force; zero disables predator lookups entirely.
    pub flee_factor: f32,
    /// Flee magnitude below which a boid counts the tick as quiet.
    pub flee_force_threshold: f32,
    /// Reset quiet time to zero whenever a boid flees.
    pub flee_reset: bool,
    /// Ticks between two matings.
    pub boid_reproduction_rate: f32,
    /// Quiet time needed before mating.
    pub reproduction_threshold: f32,
    pub reproduction_radius: f32,
    /// Percent chance that a mating produces a child.
    pub boid_reproduction_chance: f32,
    /// Percent chance that a newborn boid mutates.
    pub boid_evolution_chance: f32,
    /// Size of one mutation, in percent of the current value.
    pub boid_evolution_step: f32,
    /// Largest drift from the default, in percent.
    pub boid_evolution_cap: f32,
    /// Shifts boid reproduction; positive values breed faster.
    pub boid_reproduction_modifier: f32,
    /// Maximum angle (radians) between velocities of two mates.
    pub mating_angle_threshold: f32,
    /// Cohesion multiplier (and separation divisor) while seeking a mate.
    pub mating_cohesion_bias: f32,

    pub initial_predators: usize,
    pub predator_max_velocity: f32,
    pub predator_max_steering_force: f32,
    pub predator_separation_radius: f32,
    /// Refractory ticks after a capture.
    pub predator_reproduction_rate: f32,
    /// Percent chance that a capture produces a child.
    pub predator_reproduction_chance: f32,
    pub predator_evolution_chance: f32,
    pub predator_evolution_step: f32,
    pub predator_evolution_cap: f32,
    pub predator_reproduction_modifier: f32,
    /// Shifts starvation; positive values starve later.
    pub predator_starvation_modifier: f32,
    /// Distance travelled without eating before a predator starves.
    pub starvation_threshold: f32,
    pub capture_distance: f32,
    /// Prefer prey nobody else is chasing.
    pub predator_cooperativeness: bool,
    /// Re-evaluate the closest prey every tick instead of sticking to a claim.
    pub predator_versatility: bool,

    /// Per-tick velocity multiplier for starved predators.
    pub dead_velocity_decay: f32,
    /// Per-tick alpha decrement for starved predators.
    pub dead_alpha_decay: f32,
    /// Alpha at or below which a starved predator is removed.
    pub dead_alpha_threshold: f32,

    /// Frame rate under which the governor refuses spawns.
    pub min_fps: f32,
    /// Milliseconds between two frame-rate estimates.
    pub fps_update_interval_ms: u64,
    /// Estimates during which further spawns are silently refused after a refusal.
    pub notice_fade_intervals: u32,
    pub low_fps_action: LowFpsAction,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            world_width: 800.0,
            world_height: 600.0,
            rng_seed: None,
            history_capacity: 256,
            simulation_mode: SimulationMode::Infinite,
            quadtree_capacity: 24,
            quadtree_max_depth: 16,
            range_query_cap: 6,
            border_distance: 50.0,
            border_avoidance_force: 5.0,
            initial_boids: 150,
            boid_max_velocity: 2.0,
            boid_max_steering_force: 0.1,
            alignment_radius: 30.0,
            cohesion_radius: 40.0,
            boid_separation_radius: 20.0,
            flee_radius: 60.0,
            flee_factor: 5.0,
            flee_force_threshold: 0.2,
            flee_reset: false,
            boid_reproduction_rate: 300.0,
            reproduction_threshold: 1000.0,
            reproduction_radius: 20.0,
            boid_reproduction_chance: 10.0,
            boid_evolution_chance: 5.0,
            boid_evolution_step: 5.0,
            boid_evolution_cap: 50.0,
            boid_reproduction_modifier: 0.0,
            mating_angle_threshold: 0.1,
            mating_cohesion_bias: 1.2,
            initial_predators: 3,
            predator_max_velocity: 2.5,
            predator_max_steering_force: 0.12,
            predator_separation_radius: 50.0,
            predator_reproduction_rate: 300.0,
            predator_reproduction_chance: 10.0,
            predator_evolution_chance: 5.0,
            predator_evolution_step: 5.0,
            predator_evolution_cap: 50.0,
            predator_reproduction_modifier: 0.0,
            predator_starvation_modifier: 0.0,
            starvation_threshold: 1000.0,
            capture_distance: 5.0,
            predator_cooperativeness: true,
            predator_versatility: true,
            dead_velocity_decay: 0.98,
            dead_alpha_decay: 0.01,
            dead_alpha_threshold: 0.01,
            min_fps: 20.0,
            fps_update_interval_ms: 100,
            notice_fade_intervals: 50,
            low_fps_action: LowFpsAction::PopulationControl,
        }
    }
}

impl SimulationConfig {
    /// Reject values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), WorldStateError> {
        if !(self.world_width > 0.0 && self.world_height > 0.0)
            || !self.world_width.is_finite()
            || !self.world_height.is_finite()
        {
            return Err(WorldStateError::InvalidConfig(
                "world dimensions must be positive and finite",
            ));
        }
        if self.quadtree_capacity == 0 {
            return Err(WorldStateError::InvalidConfig(
                "quadtree_capacity must be non-zero",
            ));
        }
        if self.range_query_cap == 0 {
            return Err(WorldStateError::InvalidConfig(
                "range_query_cap must be non-zero",
            ));
        }
        if self.history_capacity == 0 {
            return Err(WorldStateError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        if self.alignment_radius <= 0.0
            || self.cohesion_radius <= 0.0
            || self.boid_separation_radius <= 0.0
            || self.flee_radius <= 0.0
            || self.reproduction_radius <= 0.0
            || self.predator_separation_radius <= 0.0
            || self.capture_distance <= 0.0
        {
            return Err(WorldStateError::InvalidConfig("radii must be positive"));
        }
        if self.boid_max_velocity <= 0.0
            || self.predator_max_velocity <= 0.0
            || self.boid_max_steering_force <= 0.0
            || self.predator_max_steering_force <= 0.0
        {
            return Err(WorldStateError::InvalidConfig(
                "velocities and steering forces must be positive",
            ));
        }
        if self.boid_reproduction_rate <= 0.0 || self.predator_reproduction_rate <= 0.0 {
            return Err(WorldStateError::InvalidConfig(
                "reproduction rates must be positive",
            ));
        }
        if self.reproduction_threshold < 0.0
            || self.starvation_threshold < 0.0
            || self.border_distance < 0.0
            || self.border_avoidance_force < 0.0
            || self.flee_force_threshold < 0.0
        {
            return Err(WorldStateError::InvalidConfig(
                "thresholds and border parameters must be non-negative",
            ));
        }
        let percentages = [
            self.boid_reproduction_chance,
            self.boid_evolution_chance,
            self.predator_reproduction_chance,
            self.predator_evolution_chance,
        ];
        if percentages.iter().any(|p| !(0.0..=100.0).contains(p)) {
            return Err(WorldStateError::InvalidConfig(
                "chances must be percentages in [0, 100]",
            ));
        }
        if self.boid_evolution_step < 0.0
            || self.predator_evolution_step < 0.0
            || !(0.0..100.0).contains(&self.boid_evolution_cap)
            || !(0.0..100.0).contains(&self.predator_evolution_cap)
        {
            return Err(WorldStateError::InvalidConfig(
                "evolution steps must be non-negative and caps in [0, 100)",
            ));
        }
        if !(0.0..=1.0).contains(&self.dead_velocity_decay)
            || self.dead_alpha_decay <= 0.0
            || !(0.0..1.0).contains(&self.dead_alpha_threshold)
        {
            return Err(WorldStateError::InvalidConfig(
                "dead predator decay factors must lie in [0, 1)",
            ));
        }
        if self.mating_cohesion_bias <= 0.0 || self.mating_angle_threshold < 0.0 {
            return Err(WorldStateError::InvalidConfig(
                "mating parameters must be positive",
            ));
        }
        if self.min_fps < 0.0 || self.fps_update_interval_ms == 0 {
            return Err(WorldStateError::InvalidConfig(
                "min_fps must be non-negative and fps_update_interval_ms non-zero",
            ));
        }
        Ok(())
    }

    /// World rectangle anchored at the origin.
    #[must_use]
    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.world_width, self.world_height)
    }

    #[must_use]
    pub fn quadtree(&self) -> QuadtreeConfig {
        QuadtreeConfig {
            bounds: self.bounds(),
            capacity: self.quadtree_capacity,
            max_depth: self.quadtree_max_depth,
        }
    }

    /// Largest radius a boid needs to look at in one tick.
    #[must_use]
    pub fn boid_query_radius(&self) -> f32 {
        self.alignment_radius
            .max(self.cohesion_radius)
            .max(self.boid_separation_radius)
            .max(self.reproduction_radius)
    }

    /// Multiplier applied to boid reproduction timings.
    #[must_use]
    pub fn boid_rate_scale(&self) -> f32 {
        (11.0 - self.boid_reproduction_modifier) / 10.0
    }

    /// Multiplier applied to the predator refractory period.
    #[must_use]
    pub fn predator_rate_scale(&self) -> f32 {
        (11.0 - self.predator_reproduction_modifier) / 10.0
    }

    /// Starvation counter value at which a predator dies.
    #[must_use]
    pub fn starvation_limit(&self) -> f32 {
        self.starvation_threshold * (11.0 + self.predator_starvation_modifier) / 10.0
    }

    /// Quiet time a boid needs before it looks for a mate.
    #[must_use]
    pub fn mating_threshold(&self) -> f32 {
        self.reproduction_threshold * self.boid_rate_scale()
    }

    /// Squared flee magnitude under which a tick counts as quiet.
    #[must_use]
    pub fn quiet_flee_limit_sq(&self) -> f32 {
        self.flee_force_threshold.powi(2) * (1.1 + self.boid_reproduction_modifier / 10.0)
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    pub(crate) fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}
