use std::{collections::HashSet, sync::Arc};

use lib::{
  grid::{closest_actions, transition, Action, Occupancy},
  utils::Cell2D,
  PomcpProblem,
};
use rand::{seq::SliceRandom, Rng};

use crate::{
  belief::{entropy, soften, AgentBelief, BeliefMap, Particle, PRIOR},
  AgentId, Observation, ObservationEntry, PlannerConfig,
};

const TIME_PENALTY: f32 = -0.1;
const GOAL_BONUS: f32 = 100.0;
const WALL_PENALTY: f32 = -1.0;
const STAY_PENALTY: f32 = -0.5;
const REVISIT_PENALTY: f32 = -0.5;
const INFO_GAIN_LIMIT: f32 = 1.0;

/// What an agent sees from `position`: cells within `radius` (Manhattan) come from
/// `reference`, every other cell is the agent's belief rounded to blocked when
/// P(free) < 0.5. The goal direction is always appended.
pub fn observe(
  position: Cell2D,
  goal: Cell2D,
  reference: &Occupancy,
  belief: &BeliefMap,
  radius: u32,
) -> Observation {
  let mut entries = Vec::with_capacity(belief.rows() * belief.cols() + 1);
  for cell in belief.cells() {
    let blocked = if cell.manhattan(&position) <= radius {
      reference.is_blocked(&cell)
    } else {
      belief[&cell] < 0.5
    };
    entries.push(ObservationEntry::Cell { cell, blocked });
  }
  entries.push(ObservationEntry::GoalDirection {
    drow: (goal.row() - position.row()).signum() as i8,
    dcol: (goal.col() - position.col()).signum() as i8,
  });
  Observation::new(entries)
}

// shaping potential, d is the Manhattan distance to the goal
pub fn potential(d: u32) -> f32 {
  -1.0 / (1.0 + d as f32)
}

/// One simulated world: the agent's position, the particle standing in for the
/// true map, and the belief the agent would hold at this point of the history.
#[derive(Clone, Debug)]
pub struct SimState {
  pub position: Cell2D,
  pub map: Particle,
  pub belief: BeliefMap,
}

// a single agent's navigation problem, as seen by its own planner
#[derive(Clone, Debug)]
pub struct GridPomdp {
  agent: AgentId,
  goal: Cell2D,
  position: Cell2D,
  visited: HashSet<Cell2D>,
  radius: u32,
  discount: f32,
  shaping_discount: f32,
}

impl GridPomdp {
  pub fn new(agent: AgentId, start: Cell2D, goal: Cell2D, config: &PlannerConfig) -> Self {
    GridPomdp {
      agent,
      goal,
      position: start,
      visited: HashSet::from([start]),
      radius: config.radius,
      discount: config.discount,
      shaping_discount: config.shaping_discount,
    }
  }

  pub fn agent(&self) -> AgentId {
    self.agent
  }

  pub fn goal(&self) -> Cell2D {
    self.goal
  }

  pub fn position(&self) -> Cell2D {
    self.position
  }

  pub fn radius(&self) -> u32 {
    self.radius
  }

  pub fn visited(&self) -> &HashSet<Cell2D> {
    &self.visited
  }

  pub fn at_goal(&self) -> bool {
    self.position == self.goal
  }

  // true position update, only ever called by the coordinator
  pub(crate) fn move_to(&mut self, position: Cell2D) {
    self.position = position;
    self.visited.insert(position);
  }

  // what the agent is sure of: it stands on a free cell, its goal is free and
  // cells in sight hold what was last observed there
  fn known(&self, cell: &Cell2D, belief: &BeliefMap) -> Option<bool> {
    if *cell == self.position || *cell == self.goal {
      return Some(false);
    }
    let p = belief[cell];
    if cell.manhattan(&self.position) > self.radius || p == PRIOR {
      return None;
    }
    Some(p < PRIOR)
  }

  /// Reward of moving `from` -> `to` with `action`. The revisit check reads the
  /// agent's true visited set, which simulations never modify.
  pub fn reward(
    &self,
    from: Cell2D,
    action: Action,
    to: Cell2D,
    belief: &BeliefMap,
    next_belief: &BeliefMap,
  ) -> f32 {
    let mut env = TIME_PENALTY;
    if to == self.goal {
      env += GOAL_BONUS;
    }
    if action != Action::Stay && to == from {
      env += WALL_PENALTY;
    }
    if self.visited.contains(&to) {
      env += REVISIT_PENALTY;
    }
    if action == Action::Stay {
      env += STAY_PENALTY;
    }

    let shaping = self.shaping_discount * potential(to.manhattan(&self.goal))
      - potential(from.manhattan(&self.goal));

    let info = (entropy(belief) - entropy(next_belief))
      .clamp(-3.0, 3.0)
      .clamp(-INFO_GAIN_LIMIT, INFO_GAIN_LIMIT);

    env + shaping + info
  }
}

impl PomcpProblem for GridPomdp {
  type Action = Action;
  type Observation = Observation;
  type BeliefState = AgentBelief;
  type HiddenState = SimState;
  type Particle = Particle;

  fn actions(&self) -> &[Action] {
    &Action::ALL
  }

  fn sample_h_state<R: Rng + ?Sized>(&self, b_state: &mut AgentBelief, rng: &mut R) -> SimState {
    let mut map = b_state.sample_particle(rng);
    let belief = b_state.map();
    for cell in belief.cells() {
      if let Some(blocked) = self.known(&cell, belief) {
        if map.is_blocked(&cell) != blocked {
          Arc::make_mut(&mut map).set_blocked(&cell, blocked);
        }
      }
    }
    SimState {
      position: self.position,
      map,
      belief: belief.clone(),
    }
  }

  fn apply_action(&self, h_state: &mut SimState, action: &Action) -> (f32, Observation) {
    let next = transition(&h_state.map, h_state.position, *action);
    let observation = observe(next, self.goal, &h_state.map, &h_state.belief, self.radius);
    let mut next_belief = h_state.belief.clone();
    soften(&mut next_belief, &observation);
    let reward = self.reward(h_state.position, *action, next, &h_state.belief, &next_belief);
    h_state.position = next;
    h_state.belief = next_belief;
    (reward, observation)
  }

  fn greedy_action<R: Rng + ?Sized>(&self, h_state: &SimState, rng: &mut R) -> Action {
    closest_actions(&h_state.map, h_state.position, self.goal)
      .choose(rng)
      .copied()
      .unwrap_or(Action::Stay)
  }

  fn particle(&self, h_state: &SimState) -> Particle {
    Arc::clone(&h_state.map)
  }

  fn discount(&self) -> f32 {
    self.discount
  }
}
