//! Store configuration
//!
//! Author: Moroya Sakamoto

use crate::merge::ConflictPolicy;

/// Default bound on optimistic merge attempts
pub const DEFAULT_MAX_MERGE_RETRIES: u32 = 8;

/// Tuning knobs of a [`MemoryNodeStore`](crate::store::MemoryNodeStore)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Attempts at installing a merged root before giving up on contention
    pub max_merge_retries: u32,
    /// How merge conflicts are settled
    pub conflict_policy: ConflictPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_merge_retries: DEFAULT_MAX_MERGE_RETRIES,
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Bound on merge attempts (at least one)
    pub fn with_max_merge_retries(mut self, retries: u32) -> Self {
        self.max_merge_retries = retries.max(1);
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Effective attempt count
    pub(crate) fn attempts(&self) -> u32 {
        self.max_merge_retries.max(1)
    }
}
