use std::{
  fmt::Display,
  ops::{Index, IndexMut},
  str::FromStr,
};

use fixedbitset::FixedBitSet;
use serde::{Deserialize, Serialize};

use crate::{utils::Cell2D, GridError};

// a rectangular, row-major table sized at runtime
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table<T> {
  rows: usize,
  cols: usize,
  cells: Vec<T>,
}

impl<T: Clone> Table<T> {
  pub fn new(rows: usize, cols: usize, c: T) -> Self {
    Self {
      rows,
      cols,
      cells: vec![c; rows * cols],
    }
  }
}

impl<T> Table<T> {
  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  pub fn contains(&self, cell: &Cell2D) -> bool {
    cell.row() >= 0
      && cell.col() >= 0
      && (cell.row() as usize) < self.rows
      && (cell.col() as usize) < self.cols
  }

  pub fn get(&self, cell: &Cell2D) -> Option<&T> {
    if self.contains(cell) {
      Some(&self.cells[self.flatten(cell)])
    } else {
      None
    }
  }

  pub fn values(&self) -> &[T] {
    &self.cells
  }

  // every cell coordinate in row-major order
  pub fn cells(&self) -> impl Iterator<Item = Cell2D> {
    let cols = self.cols;
    (0..self.rows * self.cols).map(move |ix| Cell2D::new((ix / cols) as i32, (ix % cols) as i32))
  }

  fn flatten(&self, cell: &Cell2D) -> usize {
    cell.row() as usize * self.cols + cell.col() as usize
  }
}

impl<T> Index<&Cell2D> for Table<T> {
  type Output = T;
  fn index(&self, index: &Cell2D) -> &Self::Output {
    debug_assert!(self.contains(index), "{index} outside table");
    &self.cells[self.flatten(index)]
  }
}

impl<T> IndexMut<&Cell2D> for Table<T> {
  fn index_mut(&mut self, index: &Cell2D) -> &mut Self::Output {
    debug_assert!(self.contains(index), "{index} outside table");
    let ix = self.flatten(index);
    &mut self.cells[ix]
  }
}

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum CellCode {
  Free = 0,
  Obstacle = 1,
  AgentStart = 2,
  Goal = 3,
}

impl TryFrom<i64> for CellCode {
  type Error = i64;
  fn try_from(v: i64) -> Result<Self, Self::Error> {
    match v {
      0 => Ok(CellCode::Free),
      1 => Ok(CellCode::Obstacle),
      2 => Ok(CellCode::AgentStart),
      3 => Ok(CellCode::Goal),
      other => Err(other),
    }
  }
}

// the static world layout, immutable for an episode
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
  codes: Table<CellCode>,
}

impl Grid {
  pub fn new(codes: Table<CellCode>) -> Result<Self, GridError> {
    if codes.rows() == 0 || codes.cols() == 0 {
      return Err(GridError::Empty);
    }
    Ok(Self { codes })
  }

  pub fn rows(&self) -> usize {
    self.codes.rows()
  }

  pub fn cols(&self) -> usize {
    self.codes.cols()
  }

  pub fn code(&self, cell: &Cell2D) -> Option<CellCode> {
    self.codes.get(cell).copied()
  }

  pub fn cells(&self) -> impl Iterator<Item = Cell2D> {
    self.codes.cells()
  }

  pub fn occupancy(&self) -> Occupancy {
    Occupancy::from_grid(self)
  }

  /// Start and goal cells paired by row-major enumeration order: the k-th start
  /// found belongs to the k-th goal found.
  pub fn agents_and_goals(&self) -> Result<Vec<(Cell2D, Cell2D)>, GridError> {
    let starts: Vec<_> = self
      .cells()
      .filter(|c| self.codes[c] == CellCode::AgentStart)
      .collect();
    let goals: Vec<_> = self
      .cells()
      .filter(|c| self.codes[c] == CellCode::Goal)
      .collect();
    if starts.len() != goals.len() {
      return Err(GridError::MismatchedAgentsAndGoals {
        agents: starts.len(),
        goals: goals.len(),
      });
    }
    Ok(starts.into_iter().zip(goals).collect())
  }
}

impl FromStr for Grid {
  type Err = GridError;

  // one row per line, cells separated by whitespace and/or commas,
  // blank lines and '#' comments are skipped
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut rows: Vec<Vec<CellCode>> = vec![];
    for line in s.lines() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }
      let row_ix = rows.len();
      let mut row = vec![];
      for (col, token) in line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .enumerate()
      {
        let v: i64 = token.parse().map_err(|_| GridError::InvalidToken {
          token: token.to_string(),
          row: row_ix,
          col,
        })?;
        let code = CellCode::try_from(v).map_err(|code| GridError::UnknownCode {
          code,
          row: row_ix,
          col,
        })?;
        row.push(code);
      }
      if let Some(first) = rows.first() {
        if first.len() != row.len() {
          return Err(GridError::RaggedRow {
            row: row_ix,
            expected: first.len(),
            got: row.len(),
          });
        }
      }
      rows.push(row);
    }

    let height = rows.len();
    let width = rows.first().map(|r| r.len()).unwrap_or(0);
    Grid::new(Table {
      rows: height,
      cols: width,
      cells: rows.into_iter().flatten().collect(),
    })
  }
}

impl Display for Grid {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    for (ix, code) in self.codes.values().iter().enumerate() {
      if ix > 0 && ix % self.cols() == 0 {
        writeln!(f)?;
      } else if ix > 0 {
        write!(f, " ")?;
      }
      write!(f, "{}", *code as u8)?;
    }
    Ok(())
  }
}

// one bit per cell, set bits are blocked. backs the true map and every particle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Occupancy {
  rows: usize,
  cols: usize,
  internal: FixedBitSet,
}

impl Occupancy {
  pub fn new(rows: usize, cols: usize) -> Self {
    Self {
      rows,
      cols,
      internal: FixedBitSet::with_capacity(rows * cols),
    }
  }

  pub fn from_grid(grid: &Grid) -> Self {
    let mut result = Self::new(grid.rows(), grid.cols());
    for cell in grid.cells() {
      if grid.code(&cell) == Some(CellCode::Obstacle) {
        result.set_blocked(&cell, true);
      }
    }
    result
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  pub fn contains(&self, cell: &Cell2D) -> bool {
    cell.row() >= 0
      && cell.col() >= 0
      && (cell.row() as usize) < self.rows
      && (cell.col() as usize) < self.cols
  }

  // cells outside the map count as blocked
  pub fn is_blocked(&self, cell: &Cell2D) -> bool {
    !self.contains(cell) || self.internal[self.flatten(cell)]
  }

  pub fn set_blocked(&mut self, cell: &Cell2D, value: bool) {
    debug_assert!(self.contains(cell), "{cell} outside map");
    let ix = self.flatten(cell);
    self.internal.set(ix, value)
  }

  pub fn blocked_count(&self) -> usize {
    self.internal.count_ones(..)
  }

  fn flatten(&self, cell: &Cell2D) -> usize {
    cell.row() as usize * self.cols + cell.col() as usize
  }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
  Up,
  Down,
  Left,
  Right,
  Stay,
}

impl Action {
  pub const ALL: [Action; 5] = [
    Action::Up,
    Action::Down,
    Action::Left,
    Action::Right,
    Action::Stay,
  ];

  pub fn delta(&self) -> Cell2D {
    match self {
      Action::Up => Cell2D::new(-1, 0),
      Action::Down => Cell2D::new(1, 0),
      Action::Left => Cell2D::new(0, -1),
      Action::Right => Cell2D::new(0, 1),
      Action::Stay => Cell2D::new(0, 0),
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Action::Up => "up",
      Action::Down => "down",
      Action::Left => "left",
      Action::Right => "right",
      Action::Stay => "stay",
    }
  }
}

impl FromStr for Action {
  type Err = GridError;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Action::ALL
      .into_iter()
      .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| GridError::UnknownAction(s.to_string()))
  }
}

impl Display for Action {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Moves one cell in the direction of `action`, staying in place when the
/// destination is off the map or blocked in `map`.
pub fn transition(map: &Occupancy, from: Cell2D, action: Action) -> Cell2D {
  let to = from + action.delta();
  if map.is_blocked(&to) {
    from
  } else {
    to
  }
}

// every action whose resulting position is closest to `goal`, in `Action::ALL` order
pub fn closest_actions(map: &Occupancy, from: Cell2D, goal: Cell2D) -> Vec<Action> {
  let mut best = vec![];
  let mut best_d = u32::MAX;
  for a in Action::ALL {
    let d = transition(map, from, a).manhattan(&goal);
    if d < best_d {
      best_d = d;
      best.clear();
      best.push(a);
    } else if d == best_d {
      best.push(a);
    }
  }
  best
}
