use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GridError {
  #[error("grid has no cells")]
  Empty,

  #[error("row {row} has {got} cells, expected {expected}")]
  RaggedRow {
    row: usize,
    expected: usize,
    got: usize,
  },

  #[error("invalid cell token '{token}' at row {row}, column {col}")]
  InvalidToken {
    token: String,
    row: usize,
    col: usize,
  },

  #[error("unknown cell code {code} at row {row}, column {col}")]
  UnknownCode { code: i64, row: usize, col: usize },

  #[error("grid has {agents} agent starts but {goals} goals")]
  MismatchedAgentsAndGoals { agents: usize, goals: usize },

  #[error("unknown action '{0}' (expected up, down, left, right or stay)")]
  UnknownAction(String),
}
