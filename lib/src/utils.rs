use std::{fmt::Display, ops::Add};

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cell<const D: usize> {
  #[serde_as(as = "[_; D]")]
  coordinates: [i32; D],
}

// (row, col), rows grow downwards
pub type Cell2D = Cell<2>;

impl Cell2D {
  pub const fn new(row: i32, col: i32) -> Self {
    Cell {
      coordinates: [row, col],
    }
  }

  pub fn row(&self) -> i32 {
    self.coordinates[0]
  }

  pub fn col(&self) -> i32 {
    self.coordinates[1]
  }
}

impl<const D: usize> Cell<D> {
  pub fn manhattan(&self, other: &Cell<D>) -> u32 {
    self
      .coordinates
      .iter()
      .zip(other.coordinates.iter())
      .map(|(a, b)| a.abs_diff(*b))
      .sum()
  }
}

impl<const D: usize> Add for Cell<D> {
  type Output = Cell<D>;
  fn add(self, rhs: Self) -> Self::Output {
    let mut coordinates = self.coordinates;
    for ix in 0..D {
      coordinates[ix] += rhs.coordinates[ix];
    }
    Cell { coordinates }
  }
}

impl Display for Cell2D {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "({}, {})", self.row(), self.col())
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningAverage {
  mean: f32,
  count: u32,
}

impl RunningAverage {
  pub fn new() -> Self {
    Self {
      mean: 0.0,
      count: 0,
    }
  }

  pub fn value(&self) -> f32 {
    self.mean
  }

  pub fn count(&self) -> u32 {
    self.count
  }

  pub fn add_sample(&mut self, v: f32, n: u32) {
    if n == 0 {
      return;
    }
    self.count += n;
    self.mean += n as f32 * (v - self.mean) / self.count as f32;
  }
}

impl Default for RunningAverage {
  fn default() -> Self {
    Self::new()
  }
}
