use thiserror::Error;

use crate::tree::NodeId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TreeError {
  // recoverable: the owner discards the tree and starts over from an empty history
  #[error("history is not present in the search tree")]
  InvalidHistory,

  #[error("node {node} is not a {expected} node")]
  KindMismatch {
    node: NodeId,
    expected: &'static str,
  },
}
