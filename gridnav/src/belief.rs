use std::sync::Arc;

use lib::grid::{Occupancy, Table};
use rand::{seq::SliceRandom, Rng};
use tracing::trace;

use crate::{AgentId, Error, Observation, Result};

// P(cell is free) per cell
pub type BeliefMap = Table<f32>;

pub type Particle = Arc<Occupancy>;

pub const PRIOR: f32 = 0.5;
// observed cells are softened to these instead of 0 / 1
pub const FREE_BELIEF: f32 = 0.9;
pub const BLOCKED_BELIEF: f32 = 0.1;

const ENTROPY_EPS: f32 = 1e-6;

/// Sets every observed cell to the softened free / blocked value. Goal direction
/// entries carry no map information and are skipped.
pub fn soften(belief: &mut BeliefMap, observation: &Observation) {
  for (cell, blocked) in observation.cells() {
    if belief.contains(&cell) {
      belief[&cell] = if blocked { BLOCKED_BELIEF } else { FREE_BELIEF };
    }
  }
}

/// Binary entropy (nats) of the mean free probability.
pub fn entropy(belief: &BeliefMap) -> f32 {
  let values = belief.values();
  if values.is_empty() {
    return 0.0;
  }
  let mean = values
    .iter()
    .map(|p| p.clamp(ENTROPY_EPS, 1.0 - ENTROPY_EPS))
    .sum::<f32>()
    / values.len() as f32;
  let p = mean.clamp(ENTROPY_EPS, 1.0 - ENTROPY_EPS);
  -(p * p.ln() + (1.0 - p) * (1.0 - p).ln())
}

// one concrete map, every cell independently free with its belief probability
pub fn sample_occupancy<R: Rng + ?Sized>(belief: &BeliefMap, rng: &mut R) -> Occupancy {
  let mut result = Occupancy::new(belief.rows(), belief.cols());
  for cell in belief.cells() {
    if rng.gen::<f32>() >= belief[&cell] {
      result.set_blocked(&cell, true);
    }
  }
  result
}

#[derive(Debug, Clone)]
pub struct AgentBelief {
  map: BeliefMap,
  particles: Vec<Particle>,
  particle_count: usize,
}

impl AgentBelief {
  pub fn new(rows: usize, cols: usize, particle_count: usize) -> Self {
    Self {
      map: Table::new(rows, cols, PRIOR),
      particles: vec![],
      particle_count,
    }
  }

  pub fn map(&self) -> &BeliefMap {
    &self.map
  }

  pub fn particles(&self) -> &[Particle] {
    &self.particles
  }

  pub fn entropy(&self) -> f32 {
    entropy(&self.map)
  }

  pub fn update<R: Rng + ?Sized>(&mut self, observation: &Observation, rng: &mut R) {
    soften(&mut self.map, observation);
    self.resample(rng);
  }

  pub fn resample<R: Rng + ?Sized>(&mut self, rng: &mut R) {
    self.particles = (0..self.particle_count)
      .map(|_| Arc::new(sample_occupancy(&self.map, rng)))
      .collect();
  }

  /// Uniform draw from the cached particles, regenerating them first if empty.
  pub fn sample_particle<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Particle {
    if self.particles.is_empty() {
      self.resample(rng);
    }
    match self.particles.choose(rng) {
      Some(p) => p.clone(),
      // particle_count of zero, sample directly
      None => Arc::new(sample_occupancy(&self.map, rng)),
    }
  }
}

// one belief per agent, indexed by agent id
#[derive(Debug, Clone)]
pub struct BeliefStore {
  agents: Vec<AgentBelief>,
}

impl BeliefStore {
  /// Uniform beliefs for agents `1..=agent_count`.
  pub fn initialize(agent_count: usize, rows: usize, cols: usize, particle_count: usize) -> Self {
    Self {
      agents: (0..agent_count)
        .map(|_| AgentBelief::new(rows, cols, particle_count))
        .collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.agents.len()
  }

  pub fn is_empty(&self) -> bool {
    self.agents.is_empty()
  }

  pub fn get(&self, agent: AgentId) -> Result<&AgentBelief> {
    agent
      .index()
      .and_then(|ix| self.agents.get(ix))
      .ok_or(Error::NotFound(agent))
  }

  pub fn get_mut(&mut self, agent: AgentId) -> Result<&mut AgentBelief> {
    agent
      .index()
      .and_then(|ix| self.agents.get_mut(ix))
      .ok_or(Error::NotFound(agent))
  }

  pub fn update<R: Rng + ?Sized>(
    &mut self,
    agent: AgentId,
    observation: &Observation,
    rng: &mut R,
  ) -> Result<()> {
    let belief = self.get_mut(agent)?;
    belief.update(observation, rng);
    trace!(%agent, entropy = belief.entropy(), "belief updated");
    Ok(())
  }

  pub fn sample_particle<R: Rng + ?Sized>(&mut self, agent: AgentId, rng: &mut R) -> Result<Particle> {
    Ok(self.get_mut(agent)?.sample_particle(rng))
  }

  // copy of the belief map, taken before a step mutates it
  pub fn snapshot(&self, agent: AgentId) -> Result<BeliefMap> {
    Ok(self.get(agent)?.map().clone())
  }

  pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut AgentBelief> {
    self.agents.iter_mut()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ObservationEntry;
  use lib::utils::Cell2D;
  use proptest::prelude::*;
  use rand::{rngs::StdRng, SeedableRng};

  fn observation(cells: &[((i32, i32), bool)]) -> Observation {
    let mut entries: Vec<_> = cells
      .iter()
      .map(|((r, c), blocked)| ObservationEntry::Cell {
        cell: Cell2D::new(*r, *c),
        blocked: *blocked,
      })
      .collect();
    entries.push(ObservationEntry::GoalDirection { drow: 0, dcol: 1 });
    Observation::new(entries)
  }

  #[test]
  fn starts_uniform_without_particles() {
    let store = BeliefStore::initialize(2, 3, 4, 10);
    let b = store.get(AgentId::new(2)).unwrap();
    assert!(b.map().values().iter().all(|p| *p == PRIOR));
    assert!(b.particles().is_empty());
    assert!((b.entropy() - std::f32::consts::LN_2).abs() < 1e-5);
  }

  #[test]
  fn unknown_agents_are_not_found() {
    let mut store = BeliefStore::initialize(1, 2, 2, 10);
    let mut rng = StdRng::seed_from_u64(0);
    assert!(matches!(store.get(AgentId::new(0)), Err(Error::NotFound(_))));
    assert!(matches!(
      store.update(AgentId::new(2), &observation(&[]), &mut rng),
      Err(Error::NotFound(_))
    ));
    assert!(matches!(
      store.sample_particle(AgentId::new(5), &mut rng),
      Err(Error::NotFound(_))
    ));
  }

  #[test]
  fn update_softens_and_resamples() {
    let mut store = BeliefStore::initialize(2, 2, 2, 25);
    let mut rng = StdRng::seed_from_u64(4);
    let agent = AgentId::new(1);
    store
      .update(agent, &observation(&[((0, 0), true), ((1, 1), false)]), &mut rng)
      .unwrap();

    let b = store.get(agent).unwrap();
    assert_eq!(b.map()[&Cell2D::new(0, 0)], BLOCKED_BELIEF);
    assert_eq!(b.map()[&Cell2D::new(1, 1)], FREE_BELIEF);
    assert_eq!(b.map()[&Cell2D::new(0, 1)], PRIOR);
    assert_eq!(b.particles().len(), 25);

    // the other agent never sees it
    let other = store.get(AgentId::new(2)).unwrap();
    assert!(other.map().values().iter().all(|p| *p == PRIOR));
    assert!(other.particles().is_empty());
  }

  #[test]
  fn sampling_regenerates_lazily() {
    let mut store = BeliefStore::initialize(1, 3, 3, 7);
    let mut rng = StdRng::seed_from_u64(2);
    let agent = AgentId::new(1);
    let p = store.sample_particle(agent, &mut rng).unwrap();
    assert_eq!((p.rows(), p.cols()), (3, 3));
    let b = store.get(agent).unwrap();
    assert_eq!(b.particles().len(), 7);
    assert!(b.particles().iter().any(|q| Arc::ptr_eq(q, &p)));
  }

  #[test]
  fn extreme_beliefs_have_finite_entropy() {
    let mut map = Table::new(2, 2, 1.0f32);
    assert!(entropy(&map).is_finite());
    map[&Cell2D::new(0, 0)] = 0.0;
    assert!(entropy(&map).is_finite());
    assert!(entropy(&map) > 0.0);
  }

  proptest! {
    #[test]
    fn beliefs_stay_off_the_boundary(
      cells in prop::collection::vec(((0i32..4, 0i32..4), any::<bool>()), 0..20),
      seed in any::<u64>(),
    ) {
      let mut store = BeliefStore::initialize(1, 4, 4, 3);
      let mut rng = StdRng::seed_from_u64(seed);
      store.update(AgentId::new(1), &observation(&cells), &mut rng).unwrap();
      for p in store.get(AgentId::new(1)).unwrap().map().values() {
        prop_assert!(*p == BLOCKED_BELIEF || *p == FREE_BELIEF || *p == PRIOR);
        prop_assert!(*p > 0.0 && *p < 1.0);
      }
    }
  }
}
