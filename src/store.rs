//! Node store
//!
//! Holds the current root snapshot and merges builders into it. The root
//! is the only shared mutable state; it is replaced by compare-and-swap,
//! so concurrent merges either install a complete tree or retry against
//! the winner's root.
//!
//! Author: Moroya Sakamoto

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, instrument, warn};

use crate::blob::{BlobStore, MemoryBlobStore};
use crate::builder::NodeBuilder;
use crate::commit::{run_hooks, CommitHook};
use crate::config::StoreConfig;
use crate::error::{CommitFailed, Error, Result};
use crate::merge::{rebase, ConflictPolicy, MergeResult};
use crate::state::{NodeState, Origin};

/// Holder of the current root and merge engine
pub trait NodeStore {
    /// Current immutable root; O(1)
    fn root(&self) -> NodeState;

    /// Merge the edits of a root builder obtained from this store.
    ///
    /// On success `builder` is reset onto the new root. The result carries
    /// the new root and every conflict the configured policy resolved; for
    /// each of those one side's edit was dropped.
    fn merge_with_report(
        &self,
        builder: &NodeBuilder,
        hooks: &[&dyn CommitHook],
    ) -> Result<MergeResult>;

    /// [`merge_with_report`](NodeStore::merge_with_report) returning only the new root
    fn merge(&self, builder: &NodeBuilder, hooks: &[&dyn CommitHook]) -> Result<NodeState> {
        self.merge_with_report(builder, hooks).map(|report| report.state)
    }
}

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// In-memory node store
pub struct MemoryNodeStore {
    id: u64,
    root: ArcSwap<NodeState>,
    blobs: Arc<dyn BlobStore>,
    config: StoreConfig,
}

impl Default for MemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNodeStore {
    /// Store with an empty root
    pub fn new() -> Self {
        Self::with_root(NodeState::empty())
    }

    pub fn with_root(root: NodeState) -> Self {
        Self::with_config(root, StoreConfig::default())
    }

    pub fn with_config(root: NodeState, config: StoreConfig) -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            root: ArcSwap::from_pointee(root.detached()),
            blobs: Arc::new(MemoryBlobStore::new()),
            config,
        }
    }

    /// Replace the blob sink handed to builders
    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn tagged(&self, state: &NodeState) -> NodeState {
        state.clone().with_origin(Origin {
            store_id: self.id,
            blobs: Arc::clone(&self.blobs),
        })
    }

    fn owns(&self, builder: &NodeBuilder) -> bool {
        builder.is_root() && builder.origin_store() == Some(self.id)
    }
}

impl NodeStore for MemoryNodeStore {
    fn root(&self) -> NodeState {
        self.tagged(&self.root.load())
    }

    #[instrument(skip_all, fields(store = self.id))]
    fn merge_with_report(
        &self,
        builder: &NodeBuilder,
        hooks: &[&dyn CommitHook],
    ) -> Result<MergeResult> {
        if !self.owns(builder) {
            return Err(Error::ForeignBuilder);
        }

        let base = builder.base_state();
        let head = builder.node_state();
        let policy = self.config.conflict_policy;
        let attempts = self.config.attempts();

        for attempt in 1..=attempts {
            let current = self.root.load_full();
            let merged = rebase(&current, &base, &head, policy)?;
            if !merged.is_clean() {
                debug!(attempt, conflicts = merged.conflicts.len(), ?policy, "rebase met conflicts");
                if policy == ConflictPolicy::Reject {
                    return Err(CommitFailed::Conflict(merged.conflicts).into());
                }
            }

            let candidate = run_hooks(hooks, &current, merged.state)?;
            let candidate = Arc::new(candidate.detached());
            let previous = self.root.compare_and_swap(&current, Arc::clone(&candidate));
            if Arc::ptr_eq(&*previous, &current) {
                let root = self.tagged(&candidate);
                builder.reset(root.clone());
                if merged.conflicts.is_empty() {
                    debug!(attempt, "merged");
                } else {
                    warn!(
                        attempt,
                        conflicts = merged.conflicts.len(),
                        ?policy,
                        "merged with conflicts resolved by policy"
                    );
                }
                return Ok(MergeResult {
                    state: root,
                    conflicts: merged.conflicts,
                });
            }
            warn!(attempt, attempts, "root moved during merge, retrying");
        }

        Err(CommitFailed::Contention { attempts }.into())
    }
}
