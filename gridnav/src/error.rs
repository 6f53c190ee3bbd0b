use lib::GridError;
use mcts::TreeError;
use thiserror::Error;

use crate::AgentId;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
  // a wiring error, never recovered from
  #[error("unknown {0}")]
  NotFound(AgentId),

  #[error("grid has no agents")]
  NoAgents,

  #[error("grid has {0} agents, at most 255 are supported")]
  TooManyAgents(usize),

  #[error("invalid configuration: {message}")]
  InvalidConfiguration { message: String },

  #[error("a planning thread panicked")]
  PlannerPanicked,

  #[error(transparent)]
  Grid(#[from] GridError),

  #[error(transparent)]
  Tree(#[from] TreeError),

  #[error("failed to parse configuration: {0}")]
  Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
