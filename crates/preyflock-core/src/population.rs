//! Agent construction helpers: role defaults, inheritance with mutation,
//! initial scattering and depletion refills.

use glam::Vec2;
use rand::Rng;

use crate::agent::{Agent, Role};
use crate::config::{SimulationConfig, SimulationMode};

/// Margin outside the world at which refill agents appear.
pub const REFILL_MARGIN: f32 = 5.0;

/// Per-role defaults and evolution parameters, percentages already divided by 100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoleProfile {
    pub max_velocity: f32,
    pub reproduction_rate: f32,
    pub evolution_chance: f32,
    pub evolution_step: f32,
    pub evolution_cap: f32,
}

impl RoleProfile {
    #[must_use]
    pub fn of(role: Role, config: &SimulationConfig) -> Self {
        match role {
            Role::Boid => Self {
                max_velocity: config.boid_max_velocity,
                reproduction_rate: config.boid_reproduction_rate,
                evolution_chance: config.boid_evolution_chance / 100.0,
                evolution_step: config.boid_evolution_step / 100.0,
                evolution_cap: config.boid_evolution_cap / 100.0,
            },
            Role::Predator => Self {
                max_velocity: config.predator_max_velocity,
                reproduction_rate: config.predator_reproduction_rate,
                evolution_chance: config.predator_evolution_chance / 100.0,
                evolution_step: config.predator_evolution_step / 100.0,
                evolution_cap: config.predator_evolution_cap / 100.0,
            },
        }
    }

    /// One mutation step up or down, bounded by the cap around `default`.
    fn mutate(&self, value: f32, default: f32, increase: bool) -> f32 {
        if increase {
            (value * (1.0 + self.evolution_step)).min(default * (1.0 + self.evolution_cap))
        } else {
            (value * (1.0 - self.evolution_step)).max(default * (1.0 - self.evolution_cap))
        }
    }
}

/// Velocity with both components uniform in `[-1, 1]`.
pub fn random_velocity<R: Rng + ?Sized>(rng: &mut R) -> Vec2 {
    Vec2::new(rng.random_range(-1.0..=1.0), rng.random_range(-1.0..=1.0))
}

/// Uniform position inside the world.
pub fn random_position<R: Rng + ?Sized>(rng: &mut R, config: &SimulationConfig) -> Vec2 {
    Vec2::new(
        rng.random::<f32>() * config.world_width,
        rng.random::<f32>() * config.world_height,
    )
}

/// Position just outside a random world edge.
pub fn border_position<R: Rng + ?Sized>(rng: &mut R, config: &SimulationConfig) -> Vec2 {
    let vertical_edge = rng.random_bool(0.5);
    let far_side = rng.random_bool(0.5);
    if vertical_edge {
        let x = if far_side {
            config.world_width + REFILL_MARGIN
        } else {
            -REFILL_MARGIN
        };
        Vec2::new(x, rng.random::<f32>() * config.world_height)
    } else {
        let y = if far_side {
            config.world_height + REFILL_MARGIN
        } else {
            -REFILL_MARGIN
        };
        Vec2::new(rng.random::<f32>() * config.world_width, y)
    }
}

/// Agent with role defaults, random velocity and a cooldown uniform in `[0, rate)`.
pub fn scattered<R: Rng + ?Sized>(
    rng: &mut R,
    config: &SimulationConfig,
    role: Role,
    position: Vec2,
) -> Agent {
    let profile = RoleProfile::of(role, config);
    let cooldown = rng.random::<f32>() * profile.reproduction_rate;
    Agent::new(
        role,
        position,
        random_velocity(rng),
        profile.max_velocity,
        profile.reproduction_rate,
    )
    .with_cooldown(cooldown)
}

/// Agent with role defaults and a ready cooldown, as placed by the user.
pub fn fresh<R: Rng + ?Sized>(
    rng: &mut R,
    config: &SimulationConfig,
    role: Role,
    position: Vec2,
) -> Agent {
    let profile = RoleProfile::of(role, config);
    Agent::new(
        role,
        position,
        random_velocity(rng),
        profile.max_velocity,
        profile.reproduction_rate,
    )
}

/// Child of `parent`: same role and traits, possibly mutated once.
pub fn offspring<R: Rng + ?Sized>(rng: &mut R, config: &SimulationConfig, parent: &Agent) -> Agent {
    let profile = RoleProfile::of(parent.role, config);
    let mut max_velocity = parent.max_velocity;
    let mut reproduction_rate = parent.reproduction_rate;
    let mut evolved = parent.evolved;

    if rng.random::<f32>() < profile.evolution_chance {
        evolved = true;
        let mutate_speed = rng.random_bool(0.5);
        let increase = rng.random_bool(0.5);
        if mutate_speed {
            max_velocity = profile.mutate(max_velocity, profile.max_velocity, increase);
        } else {
            reproduction_rate =
                profile.mutate(reproduction_rate, profile.reproduction_rate, increase);
        }
    }

    let mut child = Agent::new(
        parent.role,
        parent.position,
        random_velocity(rng),
        max_velocity,
        reproduction_rate,
    )
    .with_cooldown(reproduction_rate * 2.0);
    child.evolved = evolved;
    child
}

/// What the world should do at the start of a tick when a population is extinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depletion {
    /// Both populations are alive.
    Healthy,
    Pause,
    Reset,
    Refill { role: Role, count: usize },
}

/// Decide the depletion response for the given head counts.
#[must_use]
pub fn depletion(mode: SimulationMode, boids: usize, predators: usize) -> Depletion {
    if boids != 0 && predators != 0 {
        return Depletion::Healthy;
    }
    match mode {
        SimulationMode::DeathMatch => Depletion::Pause,
        SimulationMode::Retry => Depletion::Reset,
        SimulationMode::Infinite if boids == 0 => Depletion::Refill {
            role: Role::Boid,
            count: predators.clamp(4, 100),
        },
        SimulationMode::Infinite => Depletion::Refill {
            role: Role::Predator,
            count: (boids / 20).clamp(2, 20),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::SmallRng};

    #[test]
    fn offspring_traits_stay_within_cap() {
        let config = SimulationConfig {
            boid_evolution_chance: 100.0,
            boid_evolution_step: 30.0,
            boid_evolution_cap: 50.0,
            ..SimulationConfig::default()
        };
        let mut rng = SmallRng::seed_from_u64(3);
        let mut parent = fresh(&mut rng, &config, Role::Boid, Vec2::new(10.0, 20.0));
        for _ in 0..200 {
            let child = offspring(&mut rng, &config, &parent);
            assert!(child.evolved);
            assert_eq!(child.role, Role::Boid);
            assert_eq!(child.position, parent.position);
            assert!((1.0..=3.0).contains(&child.max_velocity));
            assert!((150.0..=450.0).contains(&child.reproduction_rate));
            assert!((child.reproduction_cooldown - child.reproduction_rate * 2.0).abs() < 1e-3);
            parent = child;
        }
    }

    #[test]
    fn offspring_without_evolution_copies_parent() {
        let config = SimulationConfig {
            predator_evolution_chance: 0.0,
            ..SimulationConfig::default()
        };
        let mut rng = SmallRng::seed_from_u64(11);
        let mut parent = fresh(&mut rng, &config, Role::Predator, Vec2::ZERO);
        parent.max_velocity = 2.7;
        let child = offspring(&mut rng, &config, &parent);
        assert!(!child.evolved);
        assert_eq!(child.max_velocity, 2.7);
        assert_eq!(child.reproduction_rate, parent.reproduction_rate);
        assert!(child.velocity.x.abs() <= 1.0 && child.velocity.y.abs() <= 1.0);
    }

    #[test]
    fn border_positions_sit_just_outside() {
        let config = SimulationConfig::default();
        let mut rng = SmallRng::seed_from_u64(5);
        for _ in 0..100 {
            let p = border_position(&mut rng, &config);
            let outside_x = p.x == -REFILL_MARGIN || p.x == config.world_width + REFILL_MARGIN;
            let outside_y = p.y == -REFILL_MARGIN || p.y == config.world_height + REFILL_MARGIN;
            assert!(outside_x ^ outside_y, "{p:?}");
        }
    }

    #[test]
    fn depletion_matches_mode() {
        use SimulationMode::*;
        assert_eq!(depletion(Infinite, 10, 2), Depletion::Healthy);
        assert_eq!(
            depletion(Infinite, 0, 2),
            Depletion::Refill {
                role: Role::Boid,
                count: 4
            }
        );
        assert_eq!(
            depletion(Infinite, 0, 300),
            Depletion::Refill {
                role: Role::Boid,
                count: 100
            }
        );
        assert_eq!(
            depletion(Infinite, 1000, 0),
            Depletion::Refill {
                role: Role::Predator,
                count: 20
            }
        );
        assert_eq!(
            depletion(Infinite, 100, 0),
            Depletion::Refill {
                role: Role::Predator,
                count: 5
            }
        );
        assert_eq!(depletion(DeathMatch, 0, 0), Depletion::Pause);
        assert_eq!(depletion(Retry, 5, 0), Depletion::Reset);
    }

    #[test]
    fn scattered_cooldown_is_below_rate() {
        let config = SimulationConfig::default();
        let mut rng = SmallRng::seed_from_u64(9);
        for _ in 0..50 {
            let agent = scattered(&mut rng, &config, Role::Boid, Vec2::ZERO);
            assert!((0.0..300.0).contains(&agent.reproduction_cooldown));
        }
    }
}
