//! Pure force computations shared by boids and predators.

use glam::Vec2;

use crate::config::SimulationConfig;

/// Position and velocity of a neighbour, captured before any force is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: Vec2,
    pub velocity: Vec2,
}

/// The three classic flocking terms.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Flock {
    /// Average velocity of neighbours inside the alignment radius.
    pub alignment: Vec2,
    /// Unit vector towards the centre of neighbours inside the cohesion radius.
    pub cohesion: Vec2,
    /// Sum of unit vectors pointing away from neighbours inside the separation radius.
    pub separation: Vec2,
}

/// Radii consulted by [`flock`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlockRadii {
    pub alignment: f32,
    pub cohesion: f32,
    pub separation: f32,
}

impl FlockRadii {
    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            alignment: config.alignment_radius,
            cohesion: config.cohesion_radius,
            separation: config.boid_separation_radius,
        }
    }
}

/// Compute alignment, cohesion and separation from `neighbors` (which must not contain `origin`'s own agent).
#[must_use]
pub fn flock(origin: Vec2, neighbors: &[Neighbor], radii: FlockRadii) -> Flock {
    let alignment_sq = radii.alignment * radii.alignment;
    let cohesion_sq = radii.cohesion * radii.cohesion;

    let mut velocity_sum = Vec2::ZERO;
    let mut aligned = 0u32;
    let mut position_sum = Vec2::ZERO;
    let mut cohesive = 0u32;

    for neighbor in neighbors {
        let distance_sq = origin.distance_squared(neighbor.position);
        if distance_sq < alignment_sq {
            velocity_sum += neighbor.velocity;
            aligned += 1;
        }
        if distance_sq < cohesion_sq {
            position_sum += neighbor.position;
            cohesive += 1;
        }
    }

    let alignment = if aligned > 0 {
        velocity_sum / aligned as f32
    } else {
        Vec2::ZERO
    };
    let cohesion = if cohesive > 0 {
        (position_sum / cohesive as f32 - origin).normalize_or_zero()
    } else {
        Vec2::ZERO
    };

    Flock {
        alignment,
        cohesion,
        separation: separation(origin, neighbors.iter().map(|n| n.position), radii.separation),
    }
}

/// Sum of unit vectors away from every position closer than `radius`; coincident positions contribute nothing.
#[must_use]
pub fn separation(origin: Vec2, others: impl IntoIterator<Item = Vec2>, radius: f32) -> Vec2 {
    let radius_sq = radius * radius;
    others
        .into_iter()
        .filter(|other| origin.distance_squared(*other) < radius_sq)
        .map(|other| (origin - other).normalize_or_zero())
        .sum()
}

/// Unit vector away from the last threat inside `radius`.
///
/// Threats are checked in order, predators first and the pointer last, and
/// each hit overwrites the previous one.
#[must_use]
pub fn flee(
    origin: Vec2,
    predators: impl IntoIterator<Item = Vec2>,
    pointer: Option<Vec2>,
    radius: f32,
) -> Vec2 {
    let radius_sq = radius * radius;
    let mut force = Vec2::ZERO;
    for threat in predators.into_iter().chain(pointer) {
        let distance_sq = origin.distance_squared(threat);
        if distance_sq < radius_sq && distance_sq > 0.0 {
            force = (origin - threat) / distance_sq.sqrt();
        }
    }
    force
}

/// Fixed nudge away from every world edge closer than `border_distance`.
#[must_use]
pub fn border_avoidance(position: Vec2, config: &SimulationConfig) -> Vec2 {
    let force = config.border_avoidance_force;
    let margin = config.border_distance;
    let mut avoid = Vec2::ZERO;
    if position.x < margin {
        avoid.x += force;
    }
    if position.x > config.world_width - margin {
        avoid.x -= force;
    }
    if position.y < margin {
        avoid.y += force;
    }
    if position.y > config.world_height - margin {
        avoid.y -= force;
    }
    avoid
}

/// Whether two headings differ by less than `threshold` radians. Zero vectors never match.
#[must_use]
pub fn headings_match(a: Vec2, b: Vec2, threshold: f32) -> bool {
    let magnitudes = a.length() * b.length();
    if magnitudes <= 0.0 {
        return false;
    }
    let cosine = (a.dot(b) / magnitudes).clamp(-1.0, 1.0);
    cosine.acos() < threshold
}

/// Scale `force` down so its magnitude does not exceed `limit`.
#[must_use]
pub fn cap(force: Vec2, limit: f32) -> Vec2 {
    force.clamp_length_max(limit)
}
