use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerConfig {
  /// Planner discount, in (0, 1).
  pub discount: f32,
  /// Tree depth of a simulation.
  pub horizon: u32,
  /// Simulations per agent per step.
  pub simulations: u32,
  /// Manhattan radius inside which cells are observed directly.
  pub radius: u32,
  /// Particles kept per agent belief, also the cap of a node's particle cache.
  pub particles: usize,
  /// UCB exploration constant.
  pub exploration: f32,
  /// Discount of the potential based shaping term, independent of `discount`.
  pub shaping_discount: f32,
  /// Probability that a rollout step follows the greedy goal seeking action.
  pub greedy_rollout: f32,
  pub seed: Option<u64>,
  /// Plan every agent on its own thread.
  pub parallel: bool,
  /// Observe the start neighbourhood before the first step instead of planning
  /// it from the uniform prior.
  pub sense_on_start: bool,
}

impl Default for PlannerConfig {
  fn default() -> Self {
    Self {
      discount: 0.95,
      horizon: 10,
      simulations: 100,
      radius: 2,
      particles: 100,
      exploration: 3.0,
      shaping_discount: 0.90,
      greedy_rollout: 0.9,
      seed: None,
      parallel: false,
      sense_on_start: false,
    }
  }
}

impl PlannerConfig {
  pub fn from_json(s: &str) -> Result<Self> {
    let config: PlannerConfig = serde_json::from_str(s)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    let invalid = |message: &str| {
      Err(Error::InvalidConfiguration {
        message: message.to_string(),
      })
    };
    if !(self.discount > 0.0 && self.discount < 1.0) {
      return invalid("discount must be in (0, 1)");
    }
    if self.horizon == 0 {
      return invalid("horizon must be positive");
    }
    if self.simulations == 0 {
      return invalid("simulations must be positive");
    }
    if self.particles == 0 {
      return invalid("particles must be positive");
    }
    if !(self.exploration > 0.0 && self.exploration.is_finite()) {
      return invalid("exploration must be a positive number");
    }
    if !(self.shaping_discount > 0.0 && self.shaping_discount <= 1.0) {
      return invalid("shaping_discount must be in (0, 1]");
    }
    if !(0.0..=1.0).contains(&self.greedy_rollout) {
      return invalid("greedy_rollout must be a probability");
    }
    Ok(())
  }
}
