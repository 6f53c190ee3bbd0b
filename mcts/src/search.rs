use lib::PomcpProblem;
use rand::Rng;
use tracing::{debug, trace};

use crate::{
  bandits::{normalized, Bandit},
  error::TreeError,
  rollout::Rollout,
  tree::{Edge, NodeId, SearchTree},
  SearchLimit,
};

pub type Tree<P> = SearchTree<
  <P as PomcpProblem>::Action,
  <P as PomcpProblem>::Observation,
  <P as PomcpProblem>::Particle,
>;

// pomcp for a single agent: repeated simulations from the current root, each
// growing the tree by at most one decision node
pub struct Search<P: PomcpProblem, B, E> {
  tree: Tree<P>,
  limit: SearchLimit,
  horizon: u32,
  particle_limit: usize,
  bandit_policy: B,
  rollout: E,
}

impl<P, B, E> Search<P, B, E>
where
  P: PomcpProblem,
  B: Bandit,
  E: Rollout<P>,
{
  pub fn new(
    limit: SearchLimit,
    horizon: u32,
    particle_limit: usize,
    bandit_policy: B,
    rollout: E,
  ) -> Self {
    Search {
      tree: SearchTree::new(particle_limit),
      limit,
      horizon,
      particle_limit,
      bandit_policy,
      rollout,
    }
  }

  pub fn tree(&self) -> &Tree<P> {
    &self.tree
  }

  pub fn limit(&self) -> SearchLimit {
    self.limit
  }

  // forget everything, back to a tree holding only the empty history
  pub fn reset(&mut self) {
    self.tree = SearchTree::new(self.particle_limit);
  }

  /// Runs the simulation budget and returns the most visited root action. Falls
  /// back to the problem's greedy action when the root has no children.
  pub fn best_action<R: Rng + ?Sized>(
    &mut self,
    problem: &P,
    b_state: &mut P::BeliefState,
    rng: &mut R,
  ) -> Result<P::Action, TreeError> {
    let mut simulations = 0;
    while self.limit.more(simulations) {
      let mut state = problem.sample_h_state(b_state, rng);
      let root = self.tree.root();
      let value = self.simulate(problem, root, &mut state, 0, rng)?;
      self.tree.record(root, value);
      trace!(simulation = simulations, value, "simulation finished");
      simulations += 1;
    }

    let root = self.tree.root();
    let mut best: Option<(P::Action, u32)> = None;
    for (action, child) in self.tree.action_children(root) {
      let visits = self.tree.node(child).visits();
      if best.map(|(_, n)| visits > n).unwrap_or(true) {
        best = Some((action, visits));
      }
    }

    let action = match best {
      Some((action, _)) => action,
      None => {
        let state = problem.sample_h_state(b_state, rng);
        let action = problem.greedy_action(&state, rng);
        debug!(?action, "root has no children, using greedy fallback");
        action
      }
    };
    debug!(
      ?action,
      root_visits = self.tree.node(root).visits(),
      tree_size = self.tree.len(),
      "search finished"
    );
    Ok(action)
  }

  /// Re-roots at the history reached by the real step. On `InvalidHistory` the
  /// tree is left untouched and the caller is expected to `reset`.
  pub fn advance(&mut self, action: P::Action, observation: P::Observation) -> Result<(), TreeError> {
    self
      .tree
      .reroot(&[Edge::Action(action), Edge::Observation(observation)])
  }

  // (action, share of root visits, value) for every tried root action
  pub fn root_policy(&self) -> Vec<(P::Action, f32, f32)> {
    let root = self.tree.root();
    let children = self.tree.action_children(root);
    let total: u32 = children
      .iter()
      .map(|(_, c)| self.tree.node(*c).visits())
      .sum();
    children
      .into_iter()
      .map(|(a, c)| {
        let node = self.tree.node(c);
        let share = if total == 0 {
          0.0
        } else {
          node.visits() as f32 / total as f32
        };
        (a, share, node.value())
      })
      .collect()
  }

  // return of one simulation from `node_id` on. The caller records it on the node,
  // with the reward of reaching the node added in
  fn simulate<R: Rng + ?Sized>(
    &mut self,
    problem: &P,
    node_id: NodeId,
    state: &mut P::HiddenState,
    depth: u32,
    rng: &mut R,
  ) -> Result<f32, TreeError> {
    if depth >= self.horizon {
      return Ok(0.0);
    }
    self.tree.push_particle(node_id, problem.particle(state));

    // a node reached for the first time is valued by a rollout, the root
    // always gets expanded
    if depth > 0 && self.tree.node(node_id).visits() == 0 {
      return Ok(
        self
          .rollout
          .estimate(problem, state, depth, self.horizon, rng),
      );
    }

    let action = self.select_action(problem, node_id, state, rng);
    let action_id = self.tree.get_or_create_action_child(node_id, action)?;
    let (reward, observation) = problem.apply_action(state, &action);
    let child_id = self
      .tree
      .get_or_create_observation_child(action_id, observation)?;
    let value =
      reward + problem.discount() * self.simulate(problem, child_id, state, depth + 1, rng)?;

    self.tree.record(action_id, value);
    self.tree.record(child_id, value);
    Ok(value)
  }

  fn select_action<R: Rng + ?Sized>(
    &self,
    problem: &P,
    node_id: NodeId,
    state: &P::HiddenState,
    rng: &mut R,
  ) -> P::Action {
    let untried: Vec<P::Action> = problem
      .actions()
      .iter()
      .filter(|a| self.tree.action_child(node_id, a).is_none())
      .copied()
      .collect();
    if !untried.is_empty() {
      let greedy = problem.greedy_action(state, rng);
      if untried.contains(&greedy) {
        return greedy;
      }
      return untried[rng.gen_range(0..untried.len())];
    }

    // values enter the bandit rescaled over the siblings' range
    let parent_visits = self.tree.node(node_id).visits();
    let children = self.tree.action_children(node_id);
    let (lowest, highest) = children
      .iter()
      .map(|(_, c)| self.tree.node(*c).value())
      .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
      });
    let mut best: Option<(P::Action, f32)> = None;
    for (action, child) in children {
      let child = self.tree.node(child);
      let score = self.bandit_policy.score(
        parent_visits,
        child.visits(),
        normalized(child.value(), lowest, highest),
      );
      if best.map(|(_, s)| score > s).unwrap_or(true) {
        best = Some((action, score));
      }
    }
    match best {
      Some((action, _)) => action,
      None => problem.greedy_action(state, rng),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{bandits::Uct, rollout::EmptyInit, rollout::GreedyRollout};
  use rand::{rngs::StdRng, SeedableRng};
  use std::cell::Cell;

  // walk on a line from 0 towards `goal`, observing the position; reaching the goal
  // pays 10, every other step costs 1
  struct Line {
    goal: i32,
    actions: [i8; 3],
  }

  impl Line {
    fn new(goal: i32) -> Self {
      Line {
        goal,
        actions: [-1, 0, 1],
      }
    }
  }

  impl PomcpProblem for Line {
    type Action = i8;
    type Observation = i32;
    type BeliefState = i32;
    type HiddenState = i32;
    type Particle = i32;

    fn actions(&self) -> &[i8] {
      &self.actions
    }

    fn sample_h_state<R: Rng + ?Sized>(&self, b_state: &mut i32, _rng: &mut R) -> i32 {
      *b_state
    }

    fn apply_action(&self, h_state: &mut i32, action: &i8) -> (f32, i32) {
      *h_state += *action as i32;
      let reward = if *h_state == self.goal { 10.0 } else { -1.0 };
      (reward, *h_state)
    }

    fn greedy_action<R: Rng + ?Sized>(&self, h_state: &i32, _rng: &mut R) -> i8 {
      (self.goal - h_state).signum() as i8
    }

    fn particle(&self, h_state: &i32) -> i32 {
      *h_state
    }

    fn discount(&self) -> f32 {
      0.9
    }
  }

  fn search(simulations: u32, horizon: u32) -> Search<Line, Uct, GreedyRollout> {
    Search::new(
      SearchLimit::new(simulations),
      horizon,
      10,
      Uct(1.0),
      GreedyRollout(0.9),
    )
  }

  // counts the leaves valued by a rollout
  #[derive(Clone, Copy)]
  struct Counted<'a>(GreedyRollout, &'a Cell<u32>);

  impl<P: PomcpProblem> Rollout<P> for Counted<'_> {
    fn estimate<R: Rng + ?Sized>(
      &self,
      problem: &P,
      state: &mut P::HiddenState,
      depth: u32,
      horizon: u32,
      rng: &mut R,
    ) -> f32 {
      self.1.set(self.1.get() + 1);
      self.0.estimate(problem, state, depth, horizon, rng)
    }
  }

  fn counted(simulations: u32, horizon: u32, rollouts: &Cell<u32>) -> Search<Line, Uct, Counted<'_>> {
    Search::new(
      SearchLimit::new(simulations),
      horizon,
      10,
      Uct(1.0),
      Counted(GreedyRollout(0.9), rollouts),
    )
  }

  // action nodes: N = sum over observations. decision nodes: N = sum over actions
  // plus the simulations that ended on the node, one rollout when the node was
  // first reached or every visit on the horizon. returns (rollouts, terminations)
  fn visit_accounting<A: Ord + Clone, O: Ord + Clone, P>(
    tree: &SearchTree<A, O, P>,
    root_depth: u32,
    horizon: u32,
  ) -> (u32, u32) {
    let (mut rollouts, mut terminations) = (0, 0);
    for s in tree.summary() {
      let id = tree.find(&s.history).unwrap();
      let children: u32 = tree
        .children(id)
        .iter()
        .map(|(_, c)| tree.node(*c).visits())
        .sum();
      assert!(children <= s.visits, "children exceed parent visits");
      if !s.is_decision {
        assert_eq!(children, s.visits);
        continue;
      }
      let depth = root_depth + (s.history.len() / 2) as u32;
      let direct = s.visits - children;
      if depth >= horizon {
        assert_eq!(children, 0);
        terminations += direct;
      } else if depth == 0 {
        assert_eq!(direct, 0, "the root is always expanded");
      } else {
        assert_eq!(direct, 1, "{:?}", s.history.len());
        rollouts += direct;
      }
    }
    (rollouts, terminations)
  }

  #[test]
  fn finds_direction_of_goal() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut s = search(200, 6);
    let action = s.best_action(&Line::new(3), &mut 0, &mut rng).unwrap();
    assert_eq!(action, 1);
    let action = s.best_action(&Line::new(-3), &mut 0, &mut rng);
    // the tree still holds statistics of the first problem, only check it runs
    assert!(action.is_ok());
  }

  #[test]
  fn root_counts_every_simulation() {
    let mut rng = StdRng::seed_from_u64(1);
    let rollouts = Cell::new(0);
    let mut s = counted(50, 4, &rollouts);
    s.best_action(&Line::new(2), &mut 0, &mut rng).unwrap();
    let root = s.tree().node(s.tree().root());
    assert_eq!(root.visits(), 50);
    let (leaves, terminations) = visit_accounting(s.tree(), 0, 4);
    assert_eq!(leaves, rollouts.get());
    assert_eq!(leaves + terminations, 50);
    let policy = s.root_policy();
    let share: f32 = policy.iter().map(|(_, p, _)| p).sum();
    assert!((share - 1.0).abs() < 1e-4);
  }

  #[test]
  fn visits_add_up_to_rollouts_and_terminations() {
    let mut rng = StdRng::seed_from_u64(9);
    let rollouts = Cell::new(0);
    let mut s = counted(60, 2, &rollouts);
    s.best_action(&Line::new(2), &mut 0, &mut rng).unwrap();
    let (leaves, terminations) = visit_accounting(s.tree(), 0, 2);
    assert_eq!(leaves, rollouts.get());
    // one leaf per root action, everything after runs into the horizon
    assert_eq!(leaves, 3);
    assert_eq!(terminations, 57);
  }

  #[test]
  fn observation_nodes_hold_the_return_through_them() {
    let mut rng = StdRng::seed_from_u64(2);
    let mut s = search(30, 1);
    s.best_action(&Line::new(1), &mut 0, &mut rng).unwrap();
    let tree = s.tree();
    for (action, _) in tree.action_children(tree.root()) {
      let id = tree
        .find(&[Edge::Action(action), Edge::Observation(action as i32)])
        .unwrap();
      // a single step, the return is the reward of reaching the node
      let expected = if action == 1 { 10.0 } else { -1.0 };
      assert_eq!(tree.node(id).value(), expected);
    }
  }

  #[test]
  fn untried_actions_go_first_then_greedy_leads() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut s: Search<Line, Uct, EmptyInit> =
      Search::new(SearchLimit::new(1), 5, 10, Uct(1.0), EmptyInit);
    s.best_action(&Line::new(4), &mut 0, &mut rng).unwrap();
    // the first simulation tries the greedy action at the root
    let children = s.tree().action_children(s.tree().root());
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].0, 1);
  }

  #[test]
  fn zero_budget_falls_back_to_greedy() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut s = search(0, 5);
    let action = s.best_action(&Line::new(-2), &mut 0, &mut rng).unwrap();
    assert_eq!(action, -1);
    assert_eq!(s.tree().len(), 1);
  }

  #[test]
  fn zero_horizon_falls_back_to_greedy() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut s = search(20, 0);
    let action = s.best_action(&Line::new(2), &mut 0, &mut rng).unwrap();
    assert_eq!(action, 1);
    assert_eq!(s.tree().node(s.tree().root()).visits(), 20);
    assert_eq!(s.tree().len(), 1);
  }

  #[test]
  fn advance_keeps_statistics() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut s = search(300, 6);
    let action = s.best_action(&Line::new(3), &mut 0, &mut rng).unwrap();
    let observation = action as i32;
    let kept = s
      .tree()
      .find(&[Edge::Action(action), Edge::Observation(observation)])
      .map(|id| s.tree().node(id).visits())
      .unwrap();
    s.advance(action, observation).unwrap();
    assert_eq!(s.tree().node(s.tree().root()).visits(), kept);
    visit_accounting(s.tree(), 1, 6);

    assert_eq!(s.advance(1, 42), Err(TreeError::InvalidHistory));
    s.reset();
    assert_eq!(s.tree().len(), 1);
  }
}
