use std::fmt::Display;

use lib::utils::Cell2D;
use serde::Serialize;

// derived order: every cell in row-major order, the goal direction last
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservationEntry {
  Cell { cell: Cell2D, blocked: bool },
  // sign of (goal - position) per axis
  GoalDirection { drow: i8, dcol: i8 },
}

/// Canonically sorted observation, usable directly as a search tree edge label.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Observation(Vec<ObservationEntry>);

impl Observation {
  pub fn new(mut entries: Vec<ObservationEntry>) -> Self {
    entries.sort();
    Observation(entries)
  }

  pub fn entries(&self) -> &[ObservationEntry] {
    &self.0
  }

  pub fn cells(&self) -> impl Iterator<Item = (Cell2D, bool)> + '_ {
    self.0.iter().filter_map(|e| match e {
      ObservationEntry::Cell { cell, blocked } => Some((*cell, *blocked)),
      ObservationEntry::GoalDirection { .. } => None,
    })
  }

  pub fn goal_direction(&self) -> Option<(i8, i8)> {
    self.0.iter().find_map(|e| match e {
      ObservationEntry::GoalDirection { drow, dcol } => Some((*drow, *dcol)),
      ObservationEntry::Cell { .. } => None,
    })
  }
}

impl Display for Observation {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let (drow, dcol) = self.goal_direction().unwrap_or((0, 0));
    let blocked = self.cells().filter(|(_, b)| *b).count();
    write!(
      f,
      "goal({drow:+},{dcol:+}) {blocked}/{} blocked",
      self.cells().count()
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn order_is_canonical() {
    let a = Observation::new(vec![
      ObservationEntry::GoalDirection { drow: 1, dcol: -1 },
      ObservationEntry::Cell {
        cell: Cell2D::new(1, 0),
        blocked: true,
      },
      ObservationEntry::Cell {
        cell: Cell2D::new(0, 1),
        blocked: false,
      },
    ]);
    let b = Observation::new(vec![
      ObservationEntry::Cell {
        cell: Cell2D::new(0, 1),
        blocked: false,
      },
      ObservationEntry::Cell {
        cell: Cell2D::new(1, 0),
        blocked: true,
      },
      ObservationEntry::GoalDirection { drow: 1, dcol: -1 },
    ]);
    assert_eq!(a, b);
    assert!(matches!(
      a.entries().last(),
      Some(ObservationEntry::GoalDirection { .. })
    ));
    assert_eq!(a.goal_direction(), Some((1, -1)));
    assert_eq!(a.to_string(), "goal(+1,-1) 1/2 blocked");
  }
}
