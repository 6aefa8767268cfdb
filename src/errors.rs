use thiserror::Error;

/// Errors surfaced by forest, tree, and store operations.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ForestError {
    /// A construction option is out of range or inputs have the wrong arity.
    #[error("invalid configuration: {msg}")]
    InvalidConfig { msg: &'static str },

    /// Internal-node slot exhaustion. Fatal for the affected tree; the tree
    /// state is left untouched and the caller should drop the tree.
    #[error("no free slots among {capacity} internal nodes")]
    OutOfCapacity { capacity: usize },

    /// Access to a point-store slot whose reference count is zero.
    #[error("point handle {handle} is not live")]
    DeadHandle { handle: usize },

    /// A delete located a leaf whose stored vector disagrees with the caller,
    /// which indicates a mispaired sampler and tree.
    #[error("tree inconsistency: {msg}")]
    TreeInconsistency { msg: &'static str },

    /// The requested sequence index is absent from a leaf's multiset.
    #[error("sequence index {sequence} not recorded for handle {handle}")]
    SequenceNotFound { handle: usize, sequence: u64 },

    /// An internal contract was violated, e.g. cut generation over a box with
    /// zero range sum.
    #[error("invariant violation: {msg}")]
    InvariantViolation { msg: &'static str },
}

pub type Result<T> = core::result::Result<T, ForestError>;
