pub mod bandits;
pub mod error;
pub mod rollout;
pub mod search;
pub mod tree;

pub use error::TreeError;
pub use rollout::{EmptyInit, GreedyRollout};

// simulations per planning call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchLimit {
  simulations: u32,
}

impl SearchLimit {
  fn more(&self, n: u32) -> bool {
    n < self.simulations
  }

  pub fn new(n: u32) -> Self {
    SearchLimit { simulations: n }
  }

  pub fn simulations(&self) -> u32 {
    self.simulations
  }
}
