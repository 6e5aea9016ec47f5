//! Administrative errors.
//!
//! The data path (enqueue/dequeue) never returns these: it reports outcomes
//! through `Verdict` and `Dequeue`. All checks run before any state is touched,
//! so a rejected operation leaves the scheduler unchanged.

use thiserror::Error;

use crate::class::ClassId;

/// A create/change request that cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("parent class {0} does not exist")]
    UnknownParent(ClassId),
    #[error("class {0} does not exist")]
    UnknownClass(ClassId),
    #[error("class id {0} is already in use")]
    DuplicateId(ClassId),
    #[error("neither a real-time nor a link-sharing curve was given")]
    NoCurveSpecified,
    #[error("parent class {0} is a leaf with queued packets")]
    ParentIsLeaf(ClassId),
    #[error("parent class {0} has no link-sharing curve")]
    ParentLacksLinkShare(ClassId),
    #[error("invalid service curve: {reason}")]
    InvalidCurve { reason: &'static str },
}

/// A delete request refused because the class is still in use.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusyError {
    #[error("class {0} still has children")]
    HasChildren(ClassId),
    #[error("class {0} is referenced by {1} filter(s)")]
    Referenced(ClassId, u32),
    #[error("the root class cannot be deleted")]
    Root,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Busy(#[from] BusyError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
