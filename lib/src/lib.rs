use std::fmt::Debug;

use rand::Rng;

pub mod error;
pub mod grid;
pub mod utils;

pub use error::GridError;

pub trait PomcpProblem {
  type Action: Copy + Ord + Debug;

  type Observation: Clone + Ord;

  // what the planner samples hidden states from, owned outside the search
  type BeliefState;

  type HiddenState: Clone;

  // the slice of a hidden state cached on decision nodes
  type Particle: Clone;

  fn actions(&self) -> &[Self::Action];

  fn sample_h_state<R: Rng + ?Sized>(
    &self,
    b_state: &mut Self::BeliefState,
    rng: &mut R,
  ) -> Self::HiddenState;

  // advances the simulated state in place, returns the reward of the transition
  // and the observation emitted from the resulting state
  fn apply_action(
    &self,
    h_state: &mut Self::HiddenState,
    action: &Self::Action,
  ) -> (f32, Self::Observation);

  // problem specific default policy, used to order untried actions, in rollouts and
  // as the fallback when the search produced nothing
  fn greedy_action<R: Rng + ?Sized>(&self, h_state: &Self::HiddenState, rng: &mut R)
    -> Self::Action;

  fn particle(&self, h_state: &Self::HiddenState) -> Self::Particle;

  // utils
  fn discount(&self) -> f32 {
    1.0
  }
}
