//! Predator/prey flocking simulation built on the `preyflock-index` quadtree.
//!
//! [`WorldState`] owns the agents, the spatial index, the prey-claim table
//! and the admission policy, and advances them one tick at a time with
//! [`WorldState::step`].

mod admission;
mod agent;
mod config;
pub mod population;
pub mod steering;
mod world;

pub use admission::{
    Admission, AdmissionPolicy, AlwaysAdmit, Census, FrameRateGovernor, LOW_FPS_NOTICE, LoadShed,
};
pub use agent::{Agent, AgentId, AgentMap, AgentStore, PreyClaims, Role};
pub use config::{LowFpsAction, SimulationConfig, SimulationMode};
pub use preyflock_index::{IndexError, LeafSnapshot, Rect, RegionId};
pub use world::{AgentIndex, Tick, TickEvents, TickSummary, WorldState};

use thiserror::Error;

/// Errors that can occur when constructing world state.
#[derive(Debug, Error)]
pub enum WorldStateError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The spatial index rejected its derived configuration.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Reasons a spawn request did not produce an agent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpawnError {
    /// Admission control refused the spawn and may have shed load.
    #[error("spawn refused: {notice}")]
    Refused { notice: String },
    /// A recent refusal is still cooling down.
    #[error("spawn throttled after a recent refusal")]
    Throttled,
}
