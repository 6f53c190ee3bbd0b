pub trait Bandit: Copy {
  // score of a tried child, the highest scoring child is descended into
  fn score(&self, parent_visits: u32, child_visits: u32, child_value: f32) -> f32;
}

#[derive(Copy, Clone, Debug)]
pub struct Uct(pub f32);

/// Upper confidence bound of a child. Unvisited children score +inf so they
/// are always tried first.
pub fn ucb(parent_visits: u32, child_visits: u32, child_value: f32, c: f32) -> f32 {
  if child_visits == 0 {
    return f32::INFINITY;
  }
  if c == 0.0 {
    return child_value;
  }
  let ln_n = (parent_visits.max(1) as f32).ln();
  child_value + c * (ln_n / child_visits as f32).sqrt()
}

/// Maps `value` into [0, 1] over the range spanned by its siblings. Siblings of
/// equal value all map to 0.
pub fn normalized(value: f32, lowest: f32, highest: f32) -> f32 {
  if highest > lowest {
    (value - lowest) / (highest - lowest)
  } else {
    0.0
  }
}

impl Bandit for Uct {
  fn score(&self, parent_visits: u32, child_visits: u32, child_value: f32) -> f32 {
    ucb(parent_visits, child_visits, child_value, self.0)
  }
}
