use std::{
  collections::BTreeMap,
  fmt::Display,
};

use lib::utils::RunningAverage;

use crate::error::TreeError;

pub mod render;

// an arena based tree, one per agent. the root is always at index 0 and stands
// for the empty history; re-rooting rebuilds the arena from the kept subtree.

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Edge<A, O> {
  Action(A),
  Observation(O),
}

// alternating action / observation labels, relative to the current root
pub type History<A, O> = Vec<Edge<A, O>>;

#[derive(Clone, Debug)]
pub enum NodeKind<A, O, P> {
  Decision {
    actions: BTreeMap<A, NodeId>,
    // hidden state samples that passed through this history
    particles: Vec<P>,
  },
  Action {
    observations: BTreeMap<O, NodeId>,
  },
}

#[derive(Clone, Debug)]
pub struct Node<A, O, P> {
  // bookkeeping only, ownership flows from the root down
  parent: Option<NodeId>,
  kind: NodeKind<A, O, P>,
  stats: RunningAverage,
}

#[derive(Debug)]
pub struct SearchTree<A, O, P> {
  nodes: Vec<Node<A, O, P>>,
  particle_limit: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeSummary<A, O> {
  pub history: History<A, O>,
  pub is_decision: bool,
  pub visits: u32,
  pub value: f32,
  pub particles: usize,
}

impl<A, O, P> Node<A, O, P> {
  fn decision(parent: Option<NodeId>) -> Self {
    Self {
      parent,
      kind: NodeKind::Decision {
        actions: BTreeMap::new(),
        particles: vec![],
      },
      stats: RunningAverage::new(),
    }
  }

  fn action(parent: NodeId) -> Self {
    Self {
      parent: Some(parent),
      kind: NodeKind::Action {
        observations: BTreeMap::new(),
      },
      stats: RunningAverage::new(),
    }
  }

  pub fn visits(&self) -> u32 {
    self.stats.count()
  }

  pub fn value(&self) -> f32 {
    self.stats.value()
  }

  pub fn parent(&self) -> Option<NodeId> {
    self.parent
  }

  pub fn is_decision(&self) -> bool {
    matches!(self.kind, NodeKind::Decision { .. })
  }

  pub fn kind(&self) -> &NodeKind<A, O, P> {
    &self.kind
  }

  pub fn particles(&self) -> &[P] {
    match &self.kind {
      NodeKind::Decision { particles, .. } => particles,
      NodeKind::Action { .. } => &[],
    }
  }

  fn child_ids(&self) -> Vec<NodeId> {
    match &self.kind {
      NodeKind::Decision { actions, .. } => actions.values().copied().collect(),
      NodeKind::Action { observations } => observations.values().copied().collect(),
    }
  }

  fn remap(&mut self, map: &[Option<usize>]) {
    let fix = |id: &mut NodeId| {
      if let Some(new) = map[id.0] {
        id.0 = new;
      }
    };
    match &mut self.kind {
      NodeKind::Decision { actions, .. } => actions.values_mut().for_each(fix),
      NodeKind::Action { observations } => observations.values_mut().for_each(fix),
    }
    self.parent = self.parent.and_then(|p| map[p.0].map(NodeId));
  }
}

impl<A, O, P> SearchTree<A, O, P>
where
  A: Ord + Clone,
  O: Ord + Clone,
{
  pub fn new(particle_limit: usize) -> Self {
    Self {
      nodes: vec![Node::decision(None)],
      particle_limit,
    }
  }

  pub fn root(&self) -> NodeId {
    NodeId(0)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn contains(&self, node_id: NodeId) -> bool {
    node_id.0 < self.nodes.len()
  }

  pub fn node(&self, node_id: NodeId) -> &Node<A, O, P> {
    &self.nodes[node_id.0]
  }

  pub fn action_child(&self, node_id: NodeId, action: &A) -> Option<NodeId> {
    match &self.nodes.get(node_id.0)?.kind {
      NodeKind::Decision { actions, .. } => actions.get(action).copied(),
      NodeKind::Action { .. } => None,
    }
  }

  pub fn observation_child(&self, node_id: NodeId, observation: &O) -> Option<NodeId> {
    match &self.nodes.get(node_id.0)?.kind {
      NodeKind::Action { observations } => observations.get(observation).copied(),
      NodeKind::Decision { .. } => None,
    }
  }

  pub fn action_children(&self, node_id: NodeId) -> Vec<(A, NodeId)> {
    match &self.nodes[node_id.0].kind {
      NodeKind::Decision { actions, .. } => actions.iter().map(|(a, id)| (a.clone(), *id)).collect(),
      NodeKind::Action { .. } => vec![],
    }
  }

  pub fn children(&self, node_id: NodeId) -> Vec<(Edge<A, O>, NodeId)> {
    match &self.nodes[node_id.0].kind {
      NodeKind::Decision { actions, .. } => actions
        .iter()
        .map(|(a, id)| (Edge::Action(a.clone()), *id))
        .collect(),
      NodeKind::Action { observations } => observations
        .iter()
        .map(|(o, id)| (Edge::Observation(o.clone()), *id))
        .collect(),
    }
  }

  pub fn get_or_create_action_child(
    &mut self,
    node_id: NodeId,
    action: A,
  ) -> Result<NodeId, TreeError> {
    let new_id = NodeId(self.nodes.len());
    let node = self
      .nodes
      .get_mut(node_id.0)
      .ok_or(TreeError::InvalidHistory)?;
    let NodeKind::Decision { actions, .. } = &mut node.kind else {
      return Err(TreeError::KindMismatch {
        node: node_id,
        expected: "decision",
      });
    };
    if let Some(existing) = actions.get(&action) {
      return Ok(*existing);
    }
    actions.insert(action, new_id);
    self.nodes.push(Node::action(node_id));
    Ok(new_id)
  }

  pub fn get_or_create_observation_child(
    &mut self,
    node_id: NodeId,
    observation: O,
  ) -> Result<NodeId, TreeError> {
    let new_id = NodeId(self.nodes.len());
    let node = self
      .nodes
      .get_mut(node_id.0)
      .ok_or(TreeError::InvalidHistory)?;
    let NodeKind::Action { observations } = &mut node.kind else {
      return Err(TreeError::KindMismatch {
        node: node_id,
        expected: "action",
      });
    };
    if let Some(existing) = observations.get(&observation) {
      return Ok(*existing);
    }
    observations.insert(observation, new_id);
    self.nodes.push(Node::decision(Some(node_id)));
    Ok(new_id)
  }

  // folds one simulated return into the node's running mean and visit count
  pub(crate) fn record(&mut self, node_id: NodeId, value: f32) {
    self.nodes[node_id.0].stats.add_sample(value, 1);
  }

  pub(crate) fn push_particle(&mut self, node_id: NodeId, particle: P) {
    let limit = self.particle_limit;
    if let NodeKind::Decision { particles, .. } = &mut self.nodes[node_id.0].kind {
      if particles.len() < limit {
        particles.push(particle);
      }
    }
  }

  pub fn find(&self, history: &[Edge<A, O>]) -> Result<NodeId, TreeError> {
    let mut current = self.root();
    for edge in history {
      current = match edge {
        Edge::Action(a) => self.action_child(current, a),
        Edge::Observation(o) => self.observation_child(current, o),
      }
      .ok_or(TreeError::InvalidHistory)?;
    }
    Ok(current)
  }

  pub fn history_of(&self, node_id: NodeId) -> Result<History<A, O>, TreeError> {
    if !self.contains(node_id) {
      return Err(TreeError::InvalidHistory);
    }
    let mut result = vec![];
    let mut current = node_id;
    while let Some(parent) = self.nodes[current.0].parent {
      let edge = self
        .children(parent)
        .into_iter()
        .find(|(_, id)| *id == current)
        .map(|(edge, _)| edge)
        .ok_or(TreeError::InvalidHistory)?;
      result.push(edge);
      current = parent;
    }
    result.reverse();
    Ok(result)
  }

  pub fn reroot(&mut self, history: &[Edge<A, O>]) -> Result<(), TreeError> {
    let new_root = self.find(history)?;
    self.reroot_at(new_root)
  }

  /// Keeps only the subtree under `new_root`, which becomes the empty history.
  /// Statistics and particle caches of kept nodes are preserved.
  pub fn reroot_at(&mut self, new_root: NodeId) -> Result<(), TreeError> {
    if !self.contains(new_root) {
      return Err(TreeError::InvalidHistory);
    }
    if !self.nodes[new_root.0].is_decision() {
      return Err(TreeError::KindMismatch {
        node: new_root,
        expected: "decision",
      });
    }
    if new_root == self.root() {
      return Ok(());
    }

    // collect the subtree in dfs order, the new root lands at index 0
    let mut order = vec![];
    let mut stack = vec![new_root];
    while let Some(id) = stack.pop() {
      order.push(id);
      let mut children = self.nodes[id.0].child_ids();
      children.reverse();
      stack.extend(children);
    }
    let mut map = vec![None; self.nodes.len()];
    for (new_ix, old) in order.iter().enumerate() {
      map[old.0] = Some(new_ix);
    }

    let mut old_nodes: Vec<Option<Node<A, O, P>>> =
      std::mem::take(&mut self.nodes).into_iter().map(Some).collect();
    let mut nodes = Vec::with_capacity(order.len());
    for old in order {
      if let Some(mut node) = old_nodes[old.0].take() {
        node.remap(&map);
        nodes.push(node);
      }
    }
    nodes[0].parent = None;
    self.nodes = nodes;
    Ok(())
  }

  // every node, sorted by history
  pub fn summary(&self) -> Vec<NodeSummary<A, O>> {
    let mut result = vec![];
    let mut stack = vec![(self.root(), vec![])];
    while let Some((id, history)) = stack.pop() {
      let node = self.node(id);
      for (edge, child) in self.children(id) {
        let mut h = history.clone();
        h.push(edge);
        stack.push((child, h));
      }
      result.push(NodeSummary {
        history,
        is_decision: node.is_decision(),
        visits: node.visits(),
        value: node.value(),
        particles: node.particles().len(),
      });
    }
    result.sort_by(|a, b| a.history.cmp(&b.history));
    result
  }
}

impl Display for NodeId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "#{}", self.0)
  }
}

impl<A: Display, O: Display> Display for Edge<A, O> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Edge::Action(a) => write!(f, "{a}"),
      Edge::Observation(o) => write!(f, "{o}"),
    }
  }
}
