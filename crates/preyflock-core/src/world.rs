use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use glam::Vec2;
use preyflock_index::{LeafSnapshot, Quadtree, RegionId};
use rand::{Rng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::admission::{Admission, AdmissionPolicy, AlwaysAdmit, Census, LoadShed};
use crate::agent::{Agent, AgentId, AgentStore, PreyClaims, Role};
use crate::config::SimulationConfig;
use crate::population::{self, Depletion};
use crate::steering::{self, FlockRadii, Neighbor};
use crate::{SpawnError, WorldStateError};

/// Alpha multiplier applied every refractory tick.
const REFRACTORY_ALPHA_DECAY: f32 = 0.99;
/// Largest alpha drop caused by a fresh refractory period.
const REFRACTORY_ALPHA_SPAN: f32 = 0.7;
/// Speed multiplier applied every refractory tick.
const REFRACTORY_SPEED_DECAY: f32 = 0.99;
/// Refractory speed never falls under this fraction of the personal maximum.
const REFRACTORY_MIN_SPEED_FRACTION: f32 = 1.0 / 3.0;
/// Steering is this many times weaker while digesting away from borders.
const REFRACTORY_STEERING_DIVISOR: f32 = 10.0;

/// Spatial index specialised for agents tagged with their role.
pub type AgentIndex = Quadtree<AgentId, Role>;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Events emitted after processing a world tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    /// False when the world was paused and nothing moved.
    pub advanced: bool,
    /// Agents added from outside the border because a population died out.
    pub refilled: usize,
    /// The world paused itself because a population died out.
    pub paused: bool,
    /// The world rebuilt its initial population because one died out.
    pub reset: bool,
}

/// Per-tick population bookkeeping retained in the world history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickSummary {
    pub tick: Tick,
    pub boids: usize,
    pub predators: usize,
    pub births: usize,
    pub captures: usize,
    /// Predators that starved this tick (they fade out over later ticks).
    pub starvations: usize,
    /// Faded predators removed from the world.
    pub decayed: usize,
    /// Agents culled by load shedding.
    pub culled: usize,
    /// Spawn requests refused by admission control.
    pub refusals: usize,
    /// Non-empty quadtree leaves at the end of the tick.
    pub leaves: usize,
}

impl TickSummary {
    /// Agents that left the world this tick.
    #[must_use]
    pub const fn deaths(&self) -> usize {
        self.captures + self.decayed + self.culled
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TickCounters {
    births: usize,
    captures: usize,
    starvations: usize,
    decayed: usize,
    culled: usize,
    refusals: usize,
}

/// A predator/prey flocking session: agents, spatial index, claims and admission.
pub struct WorldState {
    config: SimulationConfig,
    tick: Tick,
    paused: bool,
    rng: SmallRng,
    agents: AgentStore,
    index: AgentIndex,
    claims: PreyClaims,
    admission: Box<dyn AdmissionPolicy>,
    pointer: Option<Vec2>,
    last_boid_birth: Vec2,
    boids_at_tick_start: usize,
    counters: TickCounters,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldState")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("paused", &self.paused)
            .field("boids", &self.agents.boid_count())
            .field("predators", &self.agents.predator_count())
            .finish()
    }
}

impl WorldState {
    /// Instantiate a new world, admitting every spawn.
    pub fn new(config: SimulationConfig) -> Result<Self, WorldStateError> {
        Self::with_admission(config, Box::new(AlwaysAdmit))
    }

    /// Instantiate a new world whose spawns go through `admission`.
    ///
    /// The initial population is scattered immediately and is itself subject
    /// to admission.
    pub fn with_admission(
        config: SimulationConfig,
        admission: Box<dyn AdmissionPolicy>,
    ) -> Result<Self, WorldStateError> {
        config.validate()?;
        let index = Quadtree::new(config.quadtree())?;
        let rng = config.seeded_rng();
        let history_capacity = config.history_capacity;
        let mut world = Self {
            config,
            tick: Tick::zero(),
            paused: false,
            rng,
            agents: AgentStore::new(),
            index,
            claims: PreyClaims::new(),
            admission,
            pointer: None,
            last_boid_birth: Vec2::ZERO,
            boids_at_tick_start: 0,
            counters: TickCounters::default(),
            history: VecDeque::with_capacity(history_capacity),
        };
        world.populate();
        Ok(world)
    }

    fn populate(&mut self) {
        let mut refused = 0usize;
        for (role, count) in [
            (Role::Boid, self.config.initial_boids),
            (Role::Predator, self.config.initial_predators),
        ] {
            for _ in 0..count {
                let position = population::random_position(&mut self.rng, &self.config);
                let agent = population::scattered(&mut self.rng, &self.config, role, position);
                if self.try_insert(agent).is_err() {
                    refused += 1;
                }
            }
        }
        debug!(
            boids = self.agents.boid_count(),
            predators = self.agents.predator_count(),
            refused,
            "initial population scattered"
        );
    }

    /// Execute one simulation tick, returning what happened.
    ///
    /// A paused world does nothing and reports `advanced == false`.
    pub fn step(&mut self) -> TickEvents {
        if self.paused {
            return TickEvents {
                tick: self.tick,
                ..TickEvents::default()
            };
        }

        let mut events = TickEvents::default();
        self.boids_at_tick_start = self.agents.boid_count();
        self.stage_depletion(&mut events);

        let snapshot: Vec<AgentId> = self.agents.iter_handles().collect();
        for id in snapshot {
            self.update_agent(id);
        }
        self.agents.compact();

        let next_tick = self.tick.next();
        self.stage_history(next_tick);
        self.tick = next_tick;
        self.debug_assert_coherent();

        events.tick = next_tick;
        events.advanced = true;
        events
    }

    fn stage_depletion(&mut self, events: &mut TickEvents) {
        let boids = self.agents.boid_count();
        let predators = self.agents.predator_count();
        match population::depletion(self.config.simulation_mode, boids, predators) {
            Depletion::Healthy => {}
            Depletion::Pause => {
                debug!(boids, predators, "population extinct; pausing");
                self.paused = true;
                events.paused = true;
            }
            Depletion::Reset => {
                debug!(boids, predators, "population extinct; resetting");
                self.reset();
                events.reset = true;
            }
            Depletion::Refill { role, count } => {
                for _ in 0..count {
                    let position = population::border_position(&mut self.rng, &self.config);
                    let agent = population::scattered(&mut self.rng, &self.config, role, position);
                    if self.try_insert(agent).is_ok() {
                        events.refilled += 1;
                    }
                }
                debug!(?role, requested = count, added = events.refilled, "population refilled");
            }
        }
    }

    fn stage_history(&mut self, tick: Tick) {
        let counters = std::mem::take(&mut self.counters);
        let summary = TickSummary {
            tick,
            boids: self.agents.boid_count(),
            predators: self.agents.predator_count(),
            births: counters.births,
            captures: counters.captures,
            starvations: counters.starvations,
            decayed: counters.decayed,
            culled: counters.culled,
            refusals: counters.refusals,
            leaves: self.index.leaves().len(),
        };
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    fn update_agent(&mut self, id: AgentId) {
        let Some(mut agent) = self.agents.get(id).copied() else {
            return;
        };
        let border = steering::border_avoidance(agent.position, &self.config);

        if agent.dead {
            if !self.update_dead(id, &mut agent) {
                return;
            }
        } else if agent.role == Role::Boid {
            self.update_boid(id, &mut agent, border);
        } else {
            self.update_predator(id, &mut agent, border);
        }

        agent.position += agent.velocity;
        // Load shedding triggered by a refused birth may have culled this agent.
        let Some(stored) = self.agents.get_mut(id) else {
            return;
        };
        *stored = agent;
        self.index.relocate(id, agent.position);
    }

    /// Fade a starved predator; returns false once it has been removed.
    fn update_dead(&mut self, id: AgentId, agent: &mut Agent) -> bool {
        agent.velocity *= self.config.dead_velocity_decay;
        self.claims.release_predator(id);
        agent.alpha = (agent.alpha - self.config.dead_alpha_decay).max(0.0);
        if agent.alpha <= self.config.dead_alpha_threshold {
            self.remove_agent(id);
            self.counters.decayed += 1;
            debug!(?id, "faded predator removed");
            return false;
        }
        true
    }

    fn update_boid(&mut self, id: AgentId, agent: &mut Agent, border: Vec2) {
        let cap = self.config.range_query_cap;
        let neighbors: Vec<Neighbor> = self
            .index
            .query_radius(id, self.config.boid_query_radius(), cap, |role| {
                *role == Role::Boid
            })
            .into_iter()
            .filter(|other| *other != id)
            .filter_map(|other| self.agents.get(other))
            .map(|other| Neighbor {
                position: other.position,
                velocity: other.velocity,
            })
            .collect();
        let threats: Vec<Vec2> = if self.config.flee_factor != 0.0 {
            self.index
                .query_radius(id, self.config.flee_radius, cap, |role| role.is_predator())
                .into_iter()
                .filter_map(|other| self.agents.get(other).map(|a| a.position))
                .collect()
        } else {
            Vec::new()
        };

        let mut forces = steering::flock(
            agent.position,
            &neighbors,
            FlockRadii::from_config(&self.config),
        );

        let rate_scale = self.config.boid_rate_scale();
        agent.reproduction_cooldown = (agent.reproduction_cooldown - 1.0)
            .min(agent.reproduction_rate * rate_scale)
            .max(0.0);

        if agent.predation_counter >= self.config.mating_threshold()
            && agent.reproduction_cooldown <= 0.0
        {
            self.try_to_reproduce(id, agent);
            forces.cohesion *= self.config.mating_cohesion_bias;
            forces.separation /= self.config.mating_cohesion_bias;
        }

        let flee = steering::flee(agent.position, threats, self.pointer, self.config.flee_radius);
        if flee.length_squared() < self.config.quiet_flee_limit_sq() {
            agent.predation_counter += 1.0;
        } else if self.config.flee_reset {
            agent.predation_counter = 0.0;
        }

        let steer = steering::cap(
            forces.separation
                + forces.alignment
                + forces.cohesion
                + border
                + flee * self.config.flee_factor,
            self.config.boid_max_steering_force,
        );
        agent.velocity = steering::cap(agent.velocity + steer, agent.max_velocity);
    }

    /// Look for a willing mate nearby and, on success, maybe give birth.
    fn try_to_reproduce(&mut self, id: AgentId, agent: &mut Agent) {
        let radius = self.config.reproduction_radius;
        let radius_sq = radius * radius;
        let threshold = self.config.mating_threshold();
        let angle = self.config.mating_angle_threshold;

        let partners: Vec<AgentId> = self
            .index
            .query_radius(id, radius, usize::MAX, |role| *role == Role::Boid)
            .into_iter()
            .filter(|other| *other != id)
            .filter(|other| {
                self.agents.get(*other).is_some_and(|mate| {
                    mate.position.distance_squared(agent.position) < radius_sq
                        && steering::headings_match(agent.velocity, mate.velocity, angle)
                        && mate.predation_counter >= threshold
                        && mate.reproduction_cooldown <= 0.0
                })
            })
            .collect();
        if partners.is_empty() {
            return;
        }

        let partner = partners[self.rng.random_range(0..partners.len())];
        if self.rng.random::<f32>() < self.config.boid_reproduction_chance / 100.0 {
            self.give_birth(agent);
        }

        let rate_scale = self.config.boid_rate_scale();
        agent.reproduction_cooldown = agent.reproduction_rate * rate_scale;
        agent.predation_counter = 0.0;
        if let Some(mate) = self.agents.get_mut(partner) {
            mate.reproduction_cooldown = mate.reproduction_rate * rate_scale;
            mate.predation_counter = 0.0;
        }
    }

    fn update_predator(&mut self, id: AgentId, agent: &mut Agent, border: Vec2) {
        let radius = self.config.predator_separation_radius;
        let others: Vec<Vec2> = self
            .index
            .query_radius(id, radius, self.config.range_query_cap, |role| {
                role.is_predator()
            })
            .into_iter()
            .filter(|other| *other != id)
            .filter_map(|other| self.agents.get(other).map(|a| a.position))
            .collect();
        let separation = steering::separation(agent.position, others, radius);

        let mut chase = Vec2::ZERO;
        let mut speed_limit = agent.max_velocity;
        let mut steering_limit = self.config.predator_max_steering_force;
        let speed_before = agent.speed();

        if agent.reproduction_cooldown <= 0.0 {
            if agent.predation_counter >= self.config.starvation_limit() {
                agent.dead = true;
                self.counters.starvations += 1;
                debug!(?id, counter = agent.predation_counter, "predator starved");
            } else if let Some(target) = self.select_prey(id) {
                chase = self.hunt(id, agent, target);
            }
        } else {
            let rate_scale = self.config.predator_rate_scale();
            agent.reproduction_cooldown = (agent.reproduction_cooldown - 1.0)
                .min(agent.reproduction_rate * rate_scale)
                .max(0.0);
            let digestion = agent.reproduction_cooldown / agent.reproduction_rate;
            agent.alpha = (agent.alpha * REFRACTORY_ALPHA_DECAY)
                .max(1.0 - digestion.min(REFRACTORY_ALPHA_SPAN));
            speed_limit = (speed_before * REFRACTORY_SPEED_DECAY)
                .max(agent.max_velocity * REFRACTORY_MIN_SPEED_FRACTION);
            if border == Vec2::ZERO {
                steering_limit /= REFRACTORY_STEERING_DIVISOR;
            }
        }

        if chase == Vec2::ZERO && self.boids_at_tick_start != 0 {
            chase = (self.last_boid_birth - agent.position + border) * speed_limit;
        }

        agent.velocity += steering::cap(separation + chase, steering_limit);
        let capped = agent.velocity.length_squared() > speed_limit * speed_limit;
        if capped {
            agent.velocity = steering::cap(agent.velocity, speed_limit);
        }
        if agent.reproduction_cooldown <= 0.0 {
            agent.predation_counter += if capped {
                agent.max_velocity
            } else {
                agent.speed()
            };
        }
    }

    /// Current claim for stubborn predators, otherwise the closest suitable boid.
    fn select_prey(&self, id: AgentId) -> Option<AgentId> {
        if !self.config.predator_versatility {
            let current = self
                .claims
                .prey_of(id)
                .filter(|prey| self.agents.contains(*prey));
            if current.is_some() {
                return current;
            }
        }
        let cooperative = self.config.predator_cooperativeness;
        let claims = &self.claims;
        self.index.find_closest(
            id,
            |_, role| *role == Role::Boid,
            |candidate| !cooperative || claims.hunter_of(candidate).is_none_or(|h| h == id),
        )
    }

    /// Capture `target` when in reach, otherwise claim it and return the chase force.
    fn hunt(&mut self, id: AgentId, agent: &mut Agent, target: AgentId) -> Vec2 {
        let Some(prey) = self.agents.get(target).copied() else {
            return Vec2::ZERO;
        };
        let reach = self.config.capture_distance;
        if agent.position.distance_squared(prey.position) < reach * reach {
            self.remove_agent(target);
            self.counters.captures += 1;
            debug!(predator = ?id, prey = ?target, "boid captured");
            if self.rng.random::<f32>() < self.config.predator_reproduction_chance / 100.0 {
                self.give_birth(agent);
            }
            agent.reproduction_cooldown = agent.reproduction_rate;
            agent.predation_counter = 0.0;
            self.claims.release_predator(id);
            return Vec2::ZERO;
        }

        if self.claims.hunter_of(target).is_none() {
            self.claims.claim(id, target);
        }
        (prey.position + prey.velocity - agent.position) * agent.max_velocity
    }

    fn give_birth(&mut self, parent: &Agent) {
        let child = population::offspring(&mut self.rng, &self.config, parent);
        match self.try_insert(child) {
            Ok(id) => {
                self.counters.births += 1;
                debug!(?id, role = ?child.role, evolved = child.evolved, "agent born");
            }
            Err(err) => debug!(%err, "birth refused"),
        }
    }

    /// Run admission for `agent` and insert it on success.
    fn try_insert(&mut self, agent: Agent) -> Result<AgentId, SpawnError> {
        let census = Census {
            boids: self.agents.boid_count(),
            predators: self.agents.predator_count(),
            paused: self.paused,
        };
        match self.admission.admit(census) {
            Admission::Admit => Ok(self.insert_agent(agent)),
            Admission::Throttle => {
                self.counters.refusals += 1;
                Err(SpawnError::Throttled)
            }
            Admission::Refuse(shed) => {
                self.counters.refusals += 1;
                let notice = self.admission.notice().unwrap_or_default().to_owned();
                warn!(role = ?agent.role, %notice, "spawn refused");
                self.shed_load(shed);
                Err(SpawnError::Refused { notice })
            }
        }
    }

    fn insert_agent(&mut self, agent: Agent) -> AgentId {
        let id = self.agents.insert(agent);
        self.index.insert(id, agent.position, agent.role);
        if agent.role == Role::Boid {
            self.last_boid_birth = agent.position;
        }
        id
    }

    /// Cull the oldest agents of each role.
    fn shed_load(&mut self, shed: LoadShed) {
        if shed.is_empty() {
            return;
        }
        let victims: Vec<AgentId> = self
            .agents
            .ids(Role::Boid)
            .take(shed.boids)
            .chain(self.agents.ids(Role::Predator).take(shed.predators))
            .collect();
        let mut culled = 0;
        for id in victims {
            if self.remove_agent(id).is_some() {
                culled += 1;
            }
        }
        self.counters.culled += culled;
        debug!(boids = shed.boids, predators = shed.predators, culled, "load shed");
    }

    /// Create an agent of `role` at `position` with role defaults and a random heading.
    pub fn spawn_at(&mut self, position: Vec2, role: Role) -> Result<AgentId, SpawnError> {
        let agent = population::fresh(&mut self.rng, &self.config, role, position);
        self.try_insert(agent)
    }

    /// Remove an agent from the store, the index and the claim table.
    pub fn remove_agent(&mut self, id: AgentId) -> Option<Agent> {
        let agent = self.agents.remove(id)?;
        self.index.remove(id);
        self.claims.forget(id);
        Some(agent)
    }

    /// Drop every agent and rebuild the initial population.
    pub fn reset(&mut self) {
        self.agents.clear();
        self.index.clear();
        self.claims.clear();
        self.history.clear();
        self.counters = TickCounters::default();
        self.tick = Tick::zero();
        self.paused = false;
        self.last_boid_birth = Vec2::ZERO;
        self.boids_at_tick_start = 0;
        self.populate();
    }

    /// Forward the duration of the last frame to the admission policy.
    pub fn record_frame(&mut self, elapsed: Duration) {
        self.admission.record_frame(elapsed);
    }

    /// Replace the admission policy.
    pub fn set_admission(&mut self, admission: Box<dyn AdmissionPolicy>) {
        self.admission = admission;
    }

    /// Notice raised by the admission policy, if any.
    #[must_use]
    pub fn notice(&self) -> Option<&str> {
        self.admission.notice()
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Position of the pointer threat boids flee from, if any.
    #[must_use]
    pub const fn pointer(&self) -> Option<Vec2> {
        self.pointer
    }

    pub fn set_pointer(&mut self, pointer: Option<Vec2>) {
        self.pointer = pointer;
    }

    /// Where the most recent boid entered the world.
    #[must_use]
    pub const fn last_boid_birth(&self) -> Vec2 {
        self.last_boid_birth
    }

    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    /// Iterate over live agents, boids first, each role oldest first.
    pub fn agents(&self) -> impl Iterator<Item = (AgentId, &Agent)> + '_ {
        self.agents.iter()
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub const fn boid_count(&self) -> usize {
        self.agents.boid_count()
    }

    #[must_use]
    pub const fn predator_count(&self) -> usize {
        self.agents.predator_count()
    }

    /// Read-only access to the claim table.
    #[must_use]
    pub fn claims(&self) -> &PreyClaims {
        &self.claims
    }

    /// Read-only access to the spatial index.
    #[must_use]
    pub fn index(&self) -> &AgentIndex {
        &self.index
    }

    /// Snapshot of every non-empty quadtree leaf, for rendering.
    #[must_use]
    pub fn leaves(&self) -> Vec<LeafSnapshot> {
        self.index.leaves()
    }

    /// Leaf region currently holding `id`.
    #[must_use]
    pub fn leaf_of(&self, id: AgentId) -> Option<RegionId> {
        self.index.leaf_of(id)
    }

    /// Iterate over retained tick summaries.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Borrow the world RNG mutably for deterministic sampling.
    #[must_use]
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    fn debug_assert_coherent(&self) {
        if cfg!(debug_assertions) {
            debug_assert_eq!(self.index.len(), self.agents.len());
            for (id, agent) in self.agents.iter() {
                debug_assert_eq!(self.index.position_of(id), Some(agent.position));
            }
            if let Err(err) = self.index.validate() {
                debug_assert!(false, "spatial index incoherent: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::LOW_FPS_NOTICE;
    use crate::config::SimulationMode;

    fn empty_config() -> SimulationConfig {
        SimulationConfig {
            initial_boids: 0,
            initial_predators: 0,
            rng_seed: Some(7),
            simulation_mode: SimulationMode::DeathMatch,
            predator_reproduction_chance: 0.0,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn world_state_initialises_from_config() {
        let config = SimulationConfig {
            rng_seed: Some(42),
            ..SimulationConfig::default()
        };
        let world = WorldState::new(config).expect("world");
        assert_eq!(world.boid_count(), 150);
        assert_eq!(world.predator_count(), 3);
        assert_eq!(world.index().len(), 153);
        assert_eq!(world.tick(), Tick::zero());
        world.index().validate().expect("index");
        for (id, agent) in world.agents() {
            let leaf = world.leaf_of(id).expect("leaf");
            let region = world.index().region(leaf).expect("region");
            assert!(region.bounds().contains(agent.position));
            assert!(agent.reproduction_cooldown < agent.reproduction_rate);
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let config = SimulationConfig {
            range_query_cap: 0,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            WorldState::new(config),
            Err(WorldStateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn predator_captures_boid_at_distance_zero() {
        let mut world = WorldState::new(empty_config()).expect("world");
        let spot = Vec2::new(400.0, 300.0);
        let boid = world.spawn_at(spot, Role::Boid).expect("boid");
        let predator = world.spawn_at(spot, Role::Predator).expect("predator");

        let events = world.step();
        assert!(events.advanced);
        assert_eq!(events.tick, Tick(1));
        assert!(world.agent(boid).is_none());
        assert!(world.index().placement(boid).is_none());
        assert_eq!(world.boid_count(), 0);

        let hunter = world.agent(predator).expect("predator alive");
        assert_eq!(hunter.reproduction_cooldown, hunter.reproduction_rate);
        assert_eq!(hunter.predation_counter, 0.0);
        assert!(world.claims().is_empty());

        let summary = world.history().last().expect("summary");
        assert_eq!(summary.captures, 1);
        assert_eq!(summary.deaths(), 1);
    }

    #[test]
    fn distant_prey_is_claimed() {
        let mut world = WorldState::new(empty_config()).expect("world");
        let predator = world
            .spawn_at(Vec2::new(200.0, 300.0), Role::Predator)
            .expect("predator");
        let boid = world
            .spawn_at(Vec2::new(350.0, 300.0), Role::Boid)
            .expect("boid");

        world.step();
        assert_eq!(world.claims().prey_of(predator), Some(boid));
        assert_eq!(world.claims().hunter_of(boid), Some(predator));

        world.remove_agent(boid).expect("removed");
        assert!(world.claims().is_empty());
        assert!(world.remove_agent(boid).is_none());
    }

    #[test]
    fn cooperative_predators_split_targets() {
        let mut world = WorldState::new(empty_config()).expect("world");
        let near = world.spawn_at(Vec2::new(300.0, 300.0), Role::Boid).expect("near");
        let far = world.spawn_at(Vec2::new(500.0, 300.0), Role::Boid).expect("far");
        let first = world
            .spawn_at(Vec2::new(290.0, 300.0), Role::Predator)
            .expect("first");
        let second = world
            .spawn_at(Vec2::new(285.0, 300.0), Role::Predator)
            .expect("second");

        world.step();
        assert_eq!(world.claims().prey_of(first), Some(near));
        assert_eq!(world.claims().prey_of(second), Some(far));
    }

    #[test]
    fn selfish_predators_chase_claimed_prey_without_claiming() {
        let config = SimulationConfig {
            predator_cooperativeness: false,
            ..empty_config()
        };
        let mut world = WorldState::new(config).expect("world");
        let near = world.spawn_at(Vec2::new(300.0, 300.0), Role::Boid).expect("near");
        world.spawn_at(Vec2::new(500.0, 300.0), Role::Boid).expect("far");
        let first = world
            .spawn_at(Vec2::new(290.0, 300.0), Role::Predator)
            .expect("first");
        let second = world
            .spawn_at(Vec2::new(285.0, 300.0), Role::Predator)
            .expect("second");

        world.step();
        assert_eq!(world.claims().prey_of(first), Some(near));
        assert_eq!(world.claims().prey_of(second), None);
    }

    #[test]
    fn starving_predator_fades_out() {
        let config = SimulationConfig {
            starvation_threshold: 1.0,
            ..empty_config()
        };
        let mut world = WorldState::new(config).expect("world");
        world.spawn_at(Vec2::new(750.0, 550.0), Role::Boid).expect("boid");
        let predator = world
            .spawn_at(Vec2::new(60.0, 60.0), Role::Predator)
            .expect("predator");

        let mut starved_at = None;
        for _ in 0..400 {
            world.step();
            if starved_at.is_none() && world.agent(predator).is_some_and(|p| p.dead) {
                starved_at = Some(world.tick());
            }
            if world.predator_count() == 0 {
                break;
            }
        }
        assert!(starved_at.is_some(), "predator never starved");
        assert!(world.agent(predator).is_none());
        assert_eq!(world.history().map(|s| s.starvations).sum::<usize>(), 1);
        assert_eq!(world.history().map(|s| s.decayed).sum::<usize>(), 1);

        // Death match: no predators left, so the next tick pauses the world.
        let events = world.step();
        assert!(events.paused);
        assert!(world.is_paused());
        assert!(!world.step().advanced);
    }

    #[test]
    fn infinite_mode_refills_extinct_boids_outside_the_border() {
        let config = SimulationConfig {
            simulation_mode: SimulationMode::Infinite,
            initial_predators: 3,
            ..empty_config()
        };
        let mut world = WorldState::new(config).expect("world");
        assert_eq!(world.boid_count(), 0);
        let events = world.step();
        assert_eq!(events.refilled, 4);
        let summary = *world.history().last().expect("summary");
        assert_eq!(world.boid_count() + summary.captures, 4);
        let last = world.last_boid_birth();
        let bounds = world.config().bounds();
        assert!(!bounds.contains(last), "refill spawns outside: {last:?}");
    }

    #[test]
    fn infinite_mode_refills_extinct_predators() {
        let config = SimulationConfig {
            simulation_mode: SimulationMode::Infinite,
            initial_boids: 100,
            ..empty_config()
        };
        let mut world = WorldState::new(config).expect("world");
        let events = world.step();
        assert_eq!(events.refilled, 5);
        assert_eq!(world.predator_count(), 5);
    }

    #[test]
    fn retry_mode_resets_the_world() {
        let config = SimulationConfig {
            simulation_mode: SimulationMode::Retry,
            initial_boids: 10,
            ..empty_config()
        };
        let mut world = WorldState::new(config).expect("world");
        world.step();
        world.step();
        let events = world.step();
        assert!(events.reset);
        assert_eq!(events.tick, Tick(1));
        assert_eq!(world.history().count(), 1);
    }

    #[test]
    fn paused_world_does_not_move() {
        let config = SimulationConfig {
            initial_boids: 20,
            initial_predators: 2,
            ..empty_config()
        };
        let mut world = WorldState::new(config).expect("world");
        let before: Vec<Vec2> = world.agents().map(|(_, a)| a.position).collect();
        world.set_paused(true);
        let events = world.step();
        assert!(!events.advanced);
        assert_eq!(world.tick(), Tick::zero());
        let after: Vec<Vec2> = world.agents().map(|(_, a)| a.position).collect();
        assert_eq!(before, after);

        world.set_paused(false);
        assert!(world.step().advanced);
    }

    #[test]
    fn pointer_scares_nearby_boids() {
        let config = SimulationConfig {
            flee_force_threshold: 0.0,
            ..empty_config()
        };
        let mut world = WorldState::new(config).expect("world");
        let boid = world.spawn_at(Vec2::new(400.0, 300.0), Role::Boid).expect("boid");
        world.spawn_at(Vec2::new(100.0, 500.0), Role::Predator).expect("predator");
        world.set_pointer(Some(Vec2::new(380.0, 300.0)));
        let before = world.agent(boid).expect("boid").velocity;
        world.step();
        let after = world.agent(boid).expect("boid").velocity;
        assert!(after.x > before.x, "boid should accelerate away from the pointer");
    }

    #[test]
    fn reset_restores_initial_population() {
        let config = SimulationConfig {
            initial_boids: 30,
            initial_predators: 2,
            ..empty_config()
        };
        let mut world = WorldState::new(config).expect("world");
        for _ in 0..5 {
            world.step();
        }
        world.spawn_at(Vec2::new(10.0, 10.0), Role::Boid).expect("extra");
        world.reset();
        assert_eq!(world.tick(), Tick::zero());
        assert_eq!(world.boid_count(), 30);
        assert_eq!(world.predator_count(), 2);
        assert_eq!(world.history().count(), 0);
        assert!(world.claims().is_empty());
        world.index().validate().expect("index");
    }

    struct Budget {
        remaining: usize,
        shed: LoadShed,
    }

    impl AdmissionPolicy for Budget {
        fn admit(&mut self, _census: Census) -> Admission {
            if self.remaining == 0 {
                return Admission::Refuse(self.shed);
            }
            self.remaining -= 1;
            Admission::Admit
        }

        fn notice(&self) -> Option<&str> {
            (self.remaining == 0).then_some(LOW_FPS_NOTICE)
        }
    }

    #[test]
    fn refused_spawn_sheds_oldest_agents() {
        let config = SimulationConfig {
            initial_boids: 5,
            initial_predators: 1,
            ..empty_config()
        };
        let policy = Budget {
            remaining: 6,
            shed: LoadShed {
                boids: 2,
                predators: 0,
            },
        };
        let mut world = WorldState::with_admission(config, Box::new(policy)).expect("world");
        let oldest: Vec<AgentId> = world.agents().map(|(id, _)| id).take(2).collect();

        let err = world
            .spawn_at(Vec2::new(100.0, 100.0), Role::Boid)
            .expect_err("refused");
        assert_eq!(
            err,
            SpawnError::Refused {
                notice: LOW_FPS_NOTICE.to_owned()
            }
        );
        assert_eq!(world.boid_count(), 3);
        for id in oldest {
            assert!(world.agent(id).is_none());
            assert!(world.index().placement(id).is_none());
        }
        assert_eq!(world.notice(), Some(LOW_FPS_NOTICE));

        world.step();
        let summary = world.history().last().expect("summary");
        assert_eq!(summary.refusals, 1);
        assert_eq!(summary.culled, 2);
    }

    #[test]
    fn history_is_bounded() {
        let config = SimulationConfig {
            initial_boids: 5,
            initial_predators: 1,
            history_capacity: 3,
            starvation_threshold: 1e9,
            ..empty_config()
        };
        let mut world = WorldState::new(config).expect("world");
        for _ in 0..10 {
            world.step();
        }
        let ticks: Vec<u64> = world.history().map(|s| s.tick.0).collect();
        assert_eq!(ticks, vec![8, 9, 10]);
    }
}
