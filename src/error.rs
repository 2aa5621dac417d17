//! Error taxonomy
//!
//! Argument, conversion, state, commit and I/O failures. Everything is
//! reported synchronously to the immediate caller.
//!
//! Author: Moroya Sakamoto

use thiserror::Error;

use crate::merge::Conflict;
use crate::property::Type;

/// Crate-wide result alias
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by node states, builders and stores
#[derive(Debug, Error)]
pub enum Error {
    /// Empty name or a name containing the path separator
    #[error("invalid name {0:?}: must be non-empty and must not contain '/'")]
    InvalidName(String),

    /// Builder handed to `merge` was not acquired from that store's root
    #[error("builder was not acquired from the root of this store")]
    ForeignBuilder,

    /// Value could not be parsed as a number
    #[error("cannot convert {value:?} to {target}")]
    NumberFormat { value: String, target: Type },

    /// Conversion not defined for this pair of types
    #[error("unsupported conversion from {from} to {to}")]
    UnsupportedConversion { from: Type, to: Type },

    /// Value index outside `[0, count)`
    #[error("index {index} out of range for property with {count} value(s)")]
    IndexOutOfRange { index: usize, count: usize },

    /// Mutation attempted on a builder that represents no node
    #[error("cannot modify non-existent node {0:?}")]
    NonExistentNode(String),

    /// Merge was rejected or could not be completed
    #[error("commit failed: {0}")]
    CommitFailed(#[from] CommitFailed),

    /// Blob sink failure, passed through unchanged
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a merge did not produce a new root
#[derive(Debug, Error)]
pub enum CommitFailed {
    /// Rebase found conflicts the configured policy does not resolve
    #[error("{} unresolved conflict(s), first at {}", .0.len(), first_path(.0))]
    Conflict(Vec<Conflict>),

    /// A commit hook refused the candidate state
    #[error("rejected by commit hook: {0}")]
    Rejected(String),

    /// Lost the root compare-and-swap on every attempt
    #[error("root changed concurrently on all {attempts} attempt(s)")]
    Contention { attempts: u32 },
}

fn first_path(conflicts: &[Conflict]) -> &str {
    conflicts.first().map_or("/", |c| c.path.as_str())
}

impl CommitFailed {
    /// Shorthand for hook rejections
    pub fn rejected(reason: impl Into<String>) -> Self {
        CommitFailed::Rejected(reason.into())
    }
}
