use std::collections::BTreeMap;

use lib::{
  grid::{transition, Action, Grid, Occupancy},
  utils::Cell2D,
};
use mcts::{
  bandits::Uct,
  search::Search,
  tree::{Edge, History},
  GreedyRollout, SearchLimit, TreeError,
};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
  belief::AgentBelief, model::observe, AgentId, BeliefStore, Error, GridPomdp, Observation,
  PlannerConfig, Result,
};

pub type Planner = Search<GridPomdp, Uct, GreedyRollout>;

/// What happened in one global step.
#[derive(Clone, Debug, Serialize)]
pub struct StepReport {
  pub step: usize,
  pub joint_action: BTreeMap<AgentId, Action>,
  pub observations: BTreeMap<AgentId, Observation>,
  pub rewards: BTreeMap<AgentId, f32>,
  pub positions: BTreeMap<AgentId, Cell2D>,
  // agents whose tree did not contain the new history and was started over
  pub trees_reset: Vec<AgentId>,
}

#[derive(Clone, Debug, Serialize)]
pub struct EpisodeSummary {
  pub steps: usize,
  pub success: bool,
  pub total_rewards: BTreeMap<AgentId, f32>,
}

// everything one agent owns exclusively
struct AgentSlot {
  id: AgentId,
  problem: GridPomdp,
  planner: Planner,
  rng: StdRng,
  history: History<Action, Observation>,
  trail: Vec<Cell2D>,
  total_reward: f32,
}

impl AgentSlot {
  fn plan(&mut self, belief: &mut AgentBelief) -> Result<Action> {
    let action = self.planner.best_action(&self.problem, belief, &mut self.rng)?;
    debug!(agent = %self.id, position = %self.problem.position(), %action, "planned");
    Ok(action)
  }
}

pub struct Coordinator {
  grid: Grid,
  truth: Occupancy,
  config: PlannerConfig,
  beliefs: BeliefStore,
  agents: Vec<AgentSlot>,
  rng: StdRng,
  steps_taken: usize,
}

impl Coordinator {
  /// Sets up one agent per start cell, paired with goals in scan order. Beliefs
  /// start uniform, with `sense_on_start` every agent observes its start
  /// neighbourhood once before the first step.
  pub fn new(grid: Grid, config: PlannerConfig) -> Result<Self> {
    config.validate()?;
    let pairs = grid.agents_and_goals()?;
    if pairs.is_empty() {
      return Err(Error::NoAgents);
    }
    if pairs.len() > u8::MAX as usize {
      return Err(Error::TooManyAgents(pairs.len()));
    }

    let seeded = |offset: u64| match config.seed {
      Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(offset)),
      None => StdRng::from_entropy(),
    };
    let truth = grid.occupancy();
    let mut beliefs =
      BeliefStore::initialize(pairs.len(), grid.rows(), grid.cols(), config.particles);
    let mut rng = seeded(0);

    let mut agents = Vec::with_capacity(pairs.len());
    for (ix, (start, goal)) in pairs.into_iter().enumerate() {
      let id = AgentId::new(ix as u8 + 1);
      if config.sense_on_start {
        let observation = observe(start, goal, &truth, beliefs.get(id)?.map(), config.radius);
        beliefs.update(id, &observation, &mut rng)?;
      }
      agents.push(AgentSlot {
        id,
        problem: GridPomdp::new(id, start, goal, &config),
        planner: Search::new(
          SearchLimit::new(config.simulations),
          config.horizon,
          config.particles,
          Uct(config.exploration),
          GreedyRollout(config.greedy_rollout),
        ),
        rng: seeded(ix as u64 + 1),
        history: vec![],
        trail: vec![start],
        total_reward: 0.0,
      });
      info!(agent = %id, %start, %goal, "agent ready");
    }

    Ok(Coordinator {
      grid,
      truth,
      config,
      beliefs,
      agents,
      rng,
      steps_taken: 0,
    })
  }

  pub fn grid(&self) -> &Grid {
    &self.grid
  }

  pub fn config(&self) -> &PlannerConfig {
    &self.config
  }

  pub fn beliefs(&self) -> &BeliefStore {
    &self.beliefs
  }

  pub fn steps_taken(&self) -> usize {
    self.steps_taken
  }

  pub fn agent_ids(&self) -> Vec<AgentId> {
    self.agents.iter().map(|a| a.id).collect()
  }

  fn slot_index(&self, agent: AgentId) -> Result<usize> {
    agent
      .index()
      .filter(|ix| *ix < self.agents.len())
      .ok_or(Error::NotFound(agent))
  }

  fn slot(&self, agent: AgentId) -> Result<&AgentSlot> {
    Ok(&self.agents[self.slot_index(agent)?])
  }

  pub fn position(&self, agent: AgentId) -> Result<Cell2D> {
    Ok(self.slot(agent)?.problem.position())
  }

  pub fn goal(&self, agent: AgentId) -> Result<Cell2D> {
    Ok(self.slot(agent)?.problem.goal())
  }

  // start cell first, then the position after every step
  pub fn trail(&self, agent: AgentId) -> Result<&[Cell2D]> {
    Ok(&self.slot(agent)?.trail)
  }

  pub fn history(&self, agent: AgentId) -> Result<&[Edge<Action, Observation>]> {
    Ok(&self.slot(agent)?.history)
  }

  pub fn total_reward(&self, agent: AgentId) -> Result<f32> {
    Ok(self.slot(agent)?.total_reward)
  }

  pub fn planner(&self, agent: AgentId) -> Result<&Planner> {
    Ok(&self.slot(agent)?.planner)
  }

  pub fn all_at_goal(&self) -> bool {
    self.agents.iter().all(|a| a.problem.at_goal())
  }

  /// Asks every agent's planner for an action. Agents plan independently, on
  /// their own threads when `parallel` is set.
  pub fn plan(&mut self) -> Result<BTreeMap<AgentId, Action>> {
    let agents = &mut self.agents;
    let beliefs = &mut self.beliefs;
    let actions: Vec<Action> = if self.config.parallel {
      crossbeam::scope(|s| {
        let handles: Vec<_> = agents
          .iter_mut()
          .zip(beliefs.iter_mut())
          .map(|(slot, belief)| s.spawn(move |_| slot.plan(belief)))
          .collect();
        handles
          .into_iter()
          .map(|h| h.join().unwrap_or(Err(Error::PlannerPanicked)))
          .collect::<Result<Vec<_>>>()
      })
      .unwrap_or(Err(Error::PlannerPanicked))?
    } else {
      agents
        .iter_mut()
        .zip(beliefs.iter_mut())
        .map(|(slot, belief)| slot.plan(belief))
        .collect::<Result<Vec<_>>>()?
    };
    Ok(self.agents.iter().map(|a| a.id).zip(actions).collect())
  }

  /// Applies `joint` to the true environment. Beliefs are snapshotted before any
  /// of this step's observations are folded in, and rewards are computed against
  /// the visited cells before the move is recorded.
  pub fn apply(&mut self, joint: &BTreeMap<AgentId, Action>) -> Result<StepReport> {
    let mut indices = Vec::with_capacity(joint.len());
    let mut before = Vec::with_capacity(joint.len());
    for agent in joint.keys() {
      indices.push(self.slot_index(*agent)?);
      before.push(self.beliefs.snapshot(*agent)?);
    }

    // every agent moves on the true map before anyone observes
    let moves: Vec<(Cell2D, Cell2D)> = joint
      .values()
      .zip(&indices)
      .map(|(action, ix)| {
        let from = self.agents[*ix].problem.position();
        (from, transition(&self.truth, from, *action))
      })
      .collect();

    let mut report = StepReport {
      step: self.steps_taken,
      joint_action: joint.clone(),
      observations: BTreeMap::new(),
      rewards: BTreeMap::new(),
      positions: BTreeMap::new(),
      trees_reset: vec![],
    };

    for (((agent, action), ix), ((from, to), belief_before)) in joint
      .iter()
      .zip(indices)
      .zip(moves.into_iter().zip(before))
    {
      let slot = &mut self.agents[ix];
      let observation = observe(
        to,
        slot.problem.goal(),
        &self.truth,
        self.beliefs.get(*agent)?.map(),
        self.config.radius,
      );
      self.beliefs.update(*agent, &observation, &mut self.rng)?;
      let reward = slot.problem.reward(
        from,
        *action,
        to,
        &belief_before,
        self.beliefs.get(*agent)?.map(),
      );

      slot.problem.move_to(to);
      slot.trail.push(to);
      slot.total_reward += reward;
      slot.history.push(Edge::Action(*action));
      slot.history.push(Edge::Observation(observation.clone()));

      match slot.planner.advance(*action, observation.clone()) {
        Ok(()) => {}
        Err(TreeError::InvalidHistory) => {
          warn!(agent = %agent, "history not in tree, starting a fresh tree");
          slot.planner.reset();
          report.trees_reset.push(*agent);
        }
        Err(e) => return Err(e.into()),
      }

      report.observations.insert(*agent, observation);
      report.rewards.insert(*agent, reward);
      report.positions.insert(*agent, to);
    }

    self.steps_taken += 1;
    Ok(report)
  }

  pub fn step(&mut self) -> Result<StepReport> {
    let joint = self.plan()?;
    let report = self.apply(&joint)?;
    for (agent, action) in &report.joint_action {
      info!(
        step = report.step,
        agent = %agent,
        %action,
        position = %report.positions[agent],
        reward = report.rewards[agent],
        "step"
      );
    }
    Ok(report)
  }

  /// Steps until every agent sits on its goal or `max_steps` steps were taken.
  pub fn run_episode(&mut self, max_steps: usize) -> Result<EpisodeSummary> {
    let mut steps = 0;
    while steps < max_steps && !self.all_at_goal() {
      self.step()?;
      steps += 1;
    }
    let success = self.all_at_goal();
    if success {
      info!(steps, "all agents at goal");
    } else {
      warn!(steps, "step limit reached");
    }
    Ok(EpisodeSummary {
      steps,
      success,
      total_rewards: self
        .agents
        .iter()
        .map(|a| (a.id, a.total_reward))
        .collect(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::belief::{BLOCKED_BELIEF, FREE_BELIEF, PRIOR};
  use lib::GridError;

  const CORRIDOR: &str = "
    2 0 0 3
    1 1 0 1
  ";

  fn config() -> PlannerConfig {
    PlannerConfig {
      simulations: 30,
      horizon: 5,
      particles: 20,
      seed: Some(3),
      ..PlannerConfig::default()
    }
  }

  fn coordinator(grid: &str) -> Coordinator {
    Coordinator::new(grid.parse().unwrap(), config()).unwrap()
  }

  fn sensing(grid: &str) -> Coordinator {
    let config = PlannerConfig {
      sense_on_start: true,
      ..config()
    };
    Coordinator::new(grid.parse().unwrap(), config).unwrap()
  }

  #[test]
  fn rejects_grids_without_matching_agents() {
    let grid: Grid = "0 0\n0 3".parse().unwrap();
    assert!(matches!(
      Coordinator::new(grid, config()),
      Err(Error::Grid(GridError::MismatchedAgentsAndGoals { .. }))
    ));
    let grid: Grid = "0 0\n1 0".parse().unwrap();
    assert!(matches!(
      Coordinator::new(grid, config()),
      Err(Error::NoAgents)
    ));
    let bad = PlannerConfig {
      horizon: 0,
      ..config()
    };
    assert!(matches!(
      Coordinator::new(CORRIDOR.parse().unwrap(), bad),
      Err(Error::InvalidConfiguration { .. })
    ));
  }

  #[test]
  fn beliefs_start_uniform() {
    let c = coordinator(CORRIDOR);
    let agent = AgentId::new(1);
    let belief = c.beliefs().get(agent).unwrap();
    assert!(belief.map().values().iter().all(|p| *p == PRIOR));
    assert!(belief.particles().is_empty());
    assert!(c.history(agent).unwrap().is_empty());
  }

  #[test]
  fn agents_sense_before_the_first_step() {
    let c = sensing(CORRIDOR);
    let agent = AgentId::new(1);
    assert_eq!(c.agent_ids(), vec![agent]);
    assert_eq!(c.position(agent).unwrap(), Cell2D::new(0, 0));
    assert_eq!(c.goal(agent).unwrap(), Cell2D::new(0, 3));
    let belief = c.beliefs().get(agent).unwrap();
    assert_eq!(belief.map()[&Cell2D::new(0, 2)], FREE_BELIEF);
    assert_eq!(belief.map()[&Cell2D::new(1, 0)], BLOCKED_BELIEF);
    // out of range, the rounded prior says free
    assert_eq!(belief.map()[&Cell2D::new(1, 3)], FREE_BELIEF);
    assert_eq!(belief.particles().len(), 20);
    assert!(c.history(agent).unwrap().is_empty());
    assert!(matches!(
      c.position(AgentId::new(2)),
      Err(Error::NotFound(_))
    ));
  }

  #[test]
  fn unexplored_history_resets_the_tree() {
    let mut c = coordinator(CORRIDOR);
    let agent = AgentId::new(1);
    // nothing planned yet, the tree only holds the root
    let report = c
      .apply(&BTreeMap::from([(agent, Action::Right)]))
      .unwrap();
    assert_eq!(report.trees_reset, vec![agent]);
    assert_eq!(report.positions[&agent], Cell2D::new(0, 1));
    assert_eq!(c.planner(agent).unwrap().tree().len(), 1);
    assert_eq!(c.history(agent).unwrap().len(), 2);
    assert_eq!(c.trail(agent).unwrap(), &[Cell2D::new(0, 0), Cell2D::new(0, 1)]);
    assert_eq!(c.steps_taken(), 1);
  }

  #[test]
  fn apply_rejects_unknown_agents() {
    let mut c = coordinator(CORRIDOR);
    assert!(matches!(
      c.apply(&BTreeMap::from([(AgentId::new(4), Action::Stay)])),
      Err(Error::NotFound(_))
    ));
    assert_eq!(c.steps_taken(), 0);
  }

  #[test]
  fn true_reward_penalises_walls_and_revisits() {
    let mut c = sensing(CORRIDOR);
    let agent = AgentId::new(1);
    let report = c.apply(&BTreeMap::from([(agent, Action::Down)])).unwrap();
    assert_eq!(report.positions[&agent], Cell2D::new(0, 0));
    // time, wall and revisit, the neighbourhood was already sensed
    assert!(report.rewards[&agent] < -1.5);
    c.apply(&BTreeMap::from([(agent, Action::Right)])).unwrap();
    let back = c.apply(&BTreeMap::from([(agent, Action::Left)])).unwrap();
    assert!(back.rewards[&agent] < -0.45);
    let total = c.total_reward(agent).unwrap();
    assert!(total < 0.0);
  }

  #[test]
  fn planned_steps_keep_the_tree() {
    let mut c = coordinator(CORRIDOR);
    let agent = AgentId::new(1);
    let report = c.step().unwrap();
    assert!(report.joint_action.contains_key(&agent));
    // a kept tree starts from whatever the search had already explored
    if report.trees_reset.is_empty() {
      let tree = c.planner(agent).unwrap().tree();
      assert!(tree.node(tree.root()).visits() > 0);
    }
  }

  #[test]
  fn corridor_episode_succeeds() {
    let mut c = coordinator(CORRIDOR);
    let summary = c.run_episode(20).unwrap();
    assert!(summary.success);
    assert!(summary.steps >= 3);
    assert_eq!(c.position(AgentId::new(1)).unwrap(), Cell2D::new(0, 3));
    // nothing left to do
    let again = c.run_episode(5).unwrap();
    assert_eq!(again.steps, 0);
  }
}
