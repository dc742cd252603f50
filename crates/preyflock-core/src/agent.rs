use glam::Vec2;
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap, new_key_type};

new_key_type! {
    /// Stable handle for an agent.
    pub struct AgentId;
}

/// Convenience alias for associating side data with agents.
pub type AgentMap<T> = SecondaryMap<AgentId, T>;

/// Which population an agent belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    Boid,
    Predator,
}

impl Role {
    #[must_use]
    pub const fn is_predator(self) -> bool {
        matches!(self, Role::Predator)
    }
}

/// Scalar state for one boid or predator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub position: Vec2,
    pub velocity: Vec2,
    /// Personal speed limit; drifts through evolution.
    pub max_velocity: f32,
    pub role: Role,
    /// Set once any ancestor mutated.
    pub evolved: bool,
    /// Opacity in `[0, 1]`; predators fade while digesting and after starving.
    pub alpha: f32,
    /// Starved predator fading out.
    pub dead: bool,
    /// Personal refractory period between two births.
    pub reproduction_rate: f32,
    /// Ticks left before the agent may reproduce (or hunt) again.
    pub reproduction_cooldown: f32,
    /// Quiet time for boids, distance travelled without eating for predators.
    pub predation_counter: f32,
}

impl Agent {
    /// Fresh agent with full opacity and zeroed counters.
    #[must_use]
    pub fn new(
        role: Role,
        position: Vec2,
        velocity: Vec2,
        max_velocity: f32,
        reproduction_rate: f32,
    ) -> Self {
        Self {
            position,
            velocity,
            max_velocity,
            role,
            evolved: false,
            alpha: 1.0,
            dead: false,
            reproduction_rate,
            reproduction_cooldown: 0.0,
            predation_counter: 0.0,
        }
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: f32) -> Self {
        self.reproduction_cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn speed(&self) -> f32 {
        self.velocity.length()
    }
}

/// Agent storage with stable handles and per-role insertion order.
///
/// Removal frees the handle immediately; the ordered lists are compacted
/// lazily by [`AgentStore::compact`] so that a tick can keep iterating over a
/// snapshot while agents disappear underneath it.
#[derive(Debug, Default)]
pub struct AgentStore {
    slots: SlotMap<AgentId, Agent>,
    boids: Vec<AgentId>,
    predators: Vec<AgentId>,
    boid_count: usize,
    predator_count: usize,
}

impl AgentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true when no agents are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub const fn boid_count(&self) -> usize {
        self.boid_count
    }

    #[must_use]
    pub const fn predator_count(&self) -> usize {
        self.predator_count
    }

    #[must_use]
    pub fn count(&self, role: Role) -> usize {
        match role {
            Role::Boid => self.boid_count,
            Role::Predator => self.predator_count,
        }
    }

    /// Returns true if `id` refers to a live agent.
    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.slots.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.slots.get(id)
    }

    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.slots.get_mut(id)
    }

    /// Insert a new agent at the end of its role's order.
    pub fn insert(&mut self, agent: Agent) -> AgentId {
        let role = agent.role;
        let id = self.slots.insert(agent);
        match role {
            Role::Boid => {
                self.boids.push(id);
                self.boid_count += 1;
            }
            Role::Predator => {
                self.predators.push(id);
                self.predator_count += 1;
            }
        }
        id
    }

    /// Remove `id`, returning its data if it was present.
    pub fn remove(&mut self, id: AgentId) -> Option<Agent> {
        let agent = self.slots.remove(id)?;
        match agent.role {
            Role::Boid => self.boid_count -= 1,
            Role::Predator => self.predator_count -= 1,
        }
        Some(agent)
    }

    /// Live handles of one role, oldest first.
    pub fn ids(&self, role: Role) -> impl Iterator<Item = AgentId> + '_ {
        let order = match role {
            Role::Boid => &self.boids,
            Role::Predator => &self.predators,
        };
        order.iter().copied().filter(|id| self.slots.contains_key(*id))
    }

    /// Live handles in tick order: boids first, then predators.
    pub fn iter_handles(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.ids(Role::Boid).chain(self.ids(Role::Predator))
    }

    /// Iterate over live agents in tick order.
    pub fn iter(&self) -> impl Iterator<Item = (AgentId, &Agent)> + '_ {
        self.iter_handles()
            .filter_map(|id| self.slots.get(id).map(|agent| (id, agent)))
    }

    /// Drop handles of removed agents from the ordered lists.
    pub fn compact(&mut self) {
        let slots = &self.slots;
        self.boids.retain(|id| slots.contains_key(*id));
        self.predators.retain(|id| slots.contains_key(*id));
        debug_assert_eq!(self.boids.len(), self.boid_count);
        debug_assert_eq!(self.predators.len(), self.predator_count);
    }

    /// Clear all stored agents.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.boids.clear();
        self.predators.clear();
        self.boid_count = 0;
        self.predator_count = 0;
    }
}

/// Symmetric predator/prey claim table.
///
/// A predator claims at most one boid and a boid is claimed by at most one
/// predator. Claims are advisory: they steer target selection of cooperative
/// predators but never block a capture.
#[derive(Debug, Default)]
pub struct PreyClaims {
    prey_of: AgentMap<AgentId>,
    hunter_of: AgentMap<AgentId>,
}

impl PreyClaims {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Boid currently claimed by `predator`.
    #[must_use]
    pub fn prey_of(&self, predator: AgentId) -> Option<AgentId> {
        self.prey_of.get(predator).copied()
    }

    /// Predator currently claiming `prey`.
    #[must_use]
    pub fn hunter_of(&self, prey: AgentId) -> Option<AgentId> {
        self.hunter_of.get(prey).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.prey_of.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prey_of.is_empty()
    }

    /// Link `predator` to `prey`, dropping both sides' previous claims.
    pub fn claim(&mut self, predator: AgentId, prey: AgentId) {
        self.release_predator(predator);
        self.release_prey(prey);
        self.prey_of.insert(predator, prey);
        self.hunter_of.insert(prey, predator);
        self.debug_assert_coherent();
    }

    /// Drop the claim held by `predator`, if any.
    pub fn release_predator(&mut self, predator: AgentId) -> Option<AgentId> {
        let prey = self.prey_of.remove(predator)?;
        self.hunter_of.remove(prey);
        Some(prey)
    }

    /// Drop the claim on `prey`, if any.
    pub fn release_prey(&mut self, prey: AgentId) -> Option<AgentId> {
        let predator = self.hunter_of.remove(prey)?;
        self.prey_of.remove(predator);
        Some(predator)
    }

    /// Remove every claim involving `agent`, on either side.
    pub fn forget(&mut self, agent: AgentId) {
        self.release_predator(agent);
        self.release_prey(agent);
    }

    pub fn clear(&mut self) {
        self.prey_of.clear();
        self.hunter_of.clear();
    }

    fn debug_assert_coherent(&self) {
        if cfg!(debug_assertions) {
            debug_assert_eq!(self.prey_of.len(), self.hunter_of.len());
            for (predator, prey) in &self.prey_of {
                debug_assert_eq!(
                    self.hunter_of.get(*prey).copied(),
                    Some(predator),
                    "claim table must stay symmetric"
                );
            }
        }
    }
}
