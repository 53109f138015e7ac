use tidewire_proto::{ComponentId, EditKind, FrameKind};

use crate::node::NodeId;

/// Failure while replaying edits. The edit that failed made no changes to
/// the tree; edits before it in the same list stay applied.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("{edit:?} expects a {expected} node but found {found}")]
    InvalidEditTarget {
        edit: EditKind,
        expected: &'static str,
        found: &'static str,
    },
    #[error("child index {index} out of range for {len} children")]
    OutOfRangeIndex { index: usize, len: usize },
    #[error("unbalanced step-in/step-out")]
    UnbalancedStepInOut,
    #[error("reference frame {0} is missing from the batch")]
    MissingReferenceFrame(usize),
    #[error("unexpected {kind} frame: {context}")]
    UnexpectedFrame {
        kind: FrameKind,
        context: &'static str,
    },
    #[error("no component with id {0} is attached")]
    UnknownComponent(ComponentId),
    #[error("invalid permutation: {0}")]
    InvalidPermutation(&'static str),
    #[error("permutation list was not terminated before the next edit")]
    UnterminatedPermutation,
    #[error("node {0} no longer exists")]
    StaleNode(NodeId),
}
