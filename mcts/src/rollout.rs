use lib::PomcpProblem;
use rand::{seq::SliceRandom, Rng};

// value estimate for a freshly expanded leaf; nothing below the leaf is tracked
pub trait Rollout<P: PomcpProblem>: Copy {
  fn estimate<R: Rng + ?Sized>(
    &self,
    problem: &P,
    state: &mut P::HiddenState,
    depth: u32,
    horizon: u32,
    rng: &mut R,
  ) -> f32;
}

// follows the problem's greedy action with the given probability, otherwise a
// uniformly random one
#[derive(Copy, Clone, Debug)]
pub struct GreedyRollout(pub f32);

#[derive(Clone, Copy, Debug)]
pub struct EmptyInit;

impl<P: PomcpProblem> Rollout<P> for GreedyRollout {
  fn estimate<R: Rng + ?Sized>(
    &self,
    problem: &P,
    state: &mut P::HiddenState,
    mut depth: u32,
    horizon: u32,
    rng: &mut R,
  ) -> f32 {
    let mut total = 0.0;
    let mut factor = 1.0;
    while depth < horizon {
      let action = if rng.gen::<f32>() < self.0 {
        problem.greedy_action(state, rng)
      } else {
        match problem.actions().choose(rng) {
          Some(a) => *a,
          None => break,
        }
      };
      let (reward, _) = problem.apply_action(state, &action);
      total += factor * reward;
      factor *= problem.discount();
      depth += 1;
    }
    total
  }
}

impl<P: PomcpProblem> Rollout<P> for EmptyInit {
  fn estimate<R: Rng + ?Sized>(
    &self,
    _problem: &P,
    _state: &mut P::HiddenState,
    _depth: u32,
    _horizon: u32,
    _rng: &mut R,
  ) -> f32 {
    0.0
  }
}
