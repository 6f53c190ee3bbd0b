//! Decentralised multi-agent navigation on a partially observed grid. Every agent
//! keeps its own occupancy belief and plans with POMCP over belief particles.

use std::fmt::Display;

use serde::Serialize;

pub mod belief;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod observation;

pub use belief::{AgentBelief, BeliefStore};
pub use config::PlannerConfig;
pub use coordinator::{Coordinator, EpisodeSummary, StepReport};
pub use error::{Error, Result};
pub use model::GridPomdp;
pub use observation::{Observation, ObservationEntry};

// 1-indexed, assigned once from the row-major scan of agent start cells
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
#[serde(transparent)]
pub struct AgentId(u8);

impl AgentId {
  pub fn new(id: u8) -> Self {
    AgentId(id)
  }

  // position in per-agent registries; id 0 is never valid
  pub(crate) fn index(&self) -> Option<usize> {
    (self.0 as usize).checked_sub(1)
  }
}

impl From<AgentId> for u8 {
  fn from(a: AgentId) -> Self {
    a.0
  }
}

impl Display for AgentId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "agent {}", self.0)
  }
}
