//! ALICE-NodeStore — Versioned Content Tree
//!
//! Immutable snapshots, linked builders, optimistic merge.
//!
//! A hierarchical content tree where every committed root is an immutable
//! snapshot:
//! - Structural sharing: unchanged subtrees are shared between snapshots
//! - Copy-on-write builders with linked child handles
//! - Three-way structural diff with early termination
//! - Rebase of a builder's edits onto a moved root, through a hook chain
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`blob`] | Opaque binary references and the blob sink |
//! | [`builder`] | Mutable, linked node builders |
//! | [`commit`] | Commit hooks, composition, and diff-driven validators |
//! | [`config`] | Store configuration |
//! | [`diff`] | Node state diff handler and change collector |
//! | [`error`] | Error types |
//! | [`merge`] | Rebase of builder edits with conflict detection |
//! | [`property`] | Typed, named property values |
//! | [`state`] | Immutable node states |
//! | [`store`] | Root holder and optimistic merge |
//!
//! # Quick Start
//!
//! ```
//! use alice_nodestore::{MemoryNodeStore, NodeStore, ReadNode};
//!
//! let store = MemoryNodeStore::new();
//!
//! // Edit through a builder obtained from the current root
//! let builder = store.root().builder();
//! builder.child("docs").unwrap().set_property("pages", 3i64).unwrap();
//!
//! // Merge installs a new immutable root
//! let root = store.merge(&builder, &[]).unwrap();
//! assert_eq!(root.child_node("docs").unwrap().get_long("pages"), 3);
//! ```
//!
//! Author: Moroya Sakamoto

pub mod blob;
pub mod builder;
pub mod commit;
pub mod config;
pub mod diff;
pub mod error;
pub mod merge;
pub mod property;
pub mod state;
pub mod store;

#[cfg(test)]
mod testing;

pub use blob::{Blob, BlobStore, MemoryBlobStore};
pub use builder::NodeBuilder;
pub use commit::{CommitHook, CompositeHook, EmptyHook, Validator, ValidatorHook};
pub use config::StoreConfig;
pub use diff::{diff_states, Change, ChangeCollector, NodeStateDiff};
pub use error::{CommitFailed, Error, Result};
pub use merge::{rebase, Conflict, ConflictKind, ConflictPolicy, MergeResult};
pub use property::{PropertyState, Type, Value};
pub use state::{ChildNodeEntry, NodeState, ReadNode};
pub use store::{MemoryNodeStore, NodeStore};
