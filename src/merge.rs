//! 3-way structural merge
//!
//! Rebases the edits between a builder's base and head onto the store's
//! current root. Edits on disjoint properties and subtrees combine
//! cleanly; identical edits on both sides auto-resolve; anything else is
//! a [`Conflict`] settled by the [`ConflictPolicy`].
//!
//! Author: Moroya Sakamoto

use tracing::debug;

use crate::builder::NodeBuilder;
use crate::diff::{child_path, NodeStateDiff};
use crate::error::{Error, Result};
use crate::property::PropertyState;
use crate::state::{NodeState, ReadNode};

/// What to do when both sides touched the same item differently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Keep the current side and report the conflict; the store fails the merge
    #[default]
    Reject,
    /// The builder's edit wins
    PreferHead,
    /// The concurrently committed edit wins
    PreferCurrent,
}

/// Kind of clash between the builder's edit and the current root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    AddExistingProperty,
    ChangeChangedProperty,
    ChangeDeletedProperty,
    DeleteChangedProperty,
    AddExistingNode,
    ChangeDeletedNode,
    DeleteChangedNode,
}

/// Merge conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Path of the node holding the conflicting item
    pub path: String,
    /// Property or child name
    pub name: String,
    pub kind: ConflictKind,
}

/// Merge result
#[derive(Debug)]
pub struct MergeResult {
    /// Current root with the edits applied
    pub state: NodeState,
    /// Conflicts met on the way, resolved or not
    pub conflicts: Vec<Conflict>,
}

impl MergeResult {
    /// True if merge is clean (no conflicts)
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Apply the changes `base → head` onto `current`
pub fn rebase(
    current: &NodeState,
    base: &NodeState,
    head: &NodeState,
    policy: ConflictPolicy,
) -> Result<MergeResult> {
    // Nothing to apply, or nothing moved underneath
    if head.same_snapshot(base) {
        return Ok(clean(current.detached()));
    }
    if current.same_snapshot(base) || current == base {
        return Ok(clean(head.detached()));
    }

    let builder = current.builder();
    let mut conflicts = Vec::new();
    let failure = {
        let mut replay = RebaseDiff {
            builder: builder.clone(),
            path: String::from("/"),
            policy,
            conflicts: &mut conflicts,
            failure: None,
        };
        head.compare_against_base_state(base, &mut replay);
        replay.failure
    };
    if let Some(err) = failure {
        return Err(err);
    }

    Ok(MergeResult {
        state: builder.node_state(),
        conflicts,
    })
}

fn clean(state: NodeState) -> MergeResult {
    MergeResult {
        state,
        conflicts: Vec::new(),
    }
}

/// Replays each difference onto a builder over the current state
struct RebaseDiff<'a> {
    builder: NodeBuilder,
    path: String,
    policy: ConflictPolicy,
    conflicts: &'a mut Vec<Conflict>,
    failure: Option<Error>,
}

impl RebaseDiff<'_> {
    /// Record a conflict; `true` if the head side should be applied
    fn conflict(&mut self, name: &str, kind: ConflictKind) -> bool {
        debug!(path = %self.path, item = name, ?kind, policy = ?self.policy, "merge conflict");
        self.conflicts.push(Conflict {
            path: self.path.clone(),
            name: String::from(name),
            kind,
        });
        self.policy == ConflictPolicy::PreferHead
    }

    /// Keep going unless an edit failed
    fn check<T>(&mut self, result: Result<T>) -> bool {
        match result {
            Ok(_) => true,
            Err(err) => {
                self.failure = Some(err);
                false
            }
        }
    }

    fn set(&mut self, after: &PropertyState) -> bool {
        let result = self.builder.set_property_state(after.clone()).map(|_| ());
        self.check(result)
    }

    fn remove(&mut self, name: &str) -> bool {
        let result = self.builder.remove_property(name).map(|_| ());
        self.check(result)
    }

    fn current_child(&self, name: &str) -> Option<NodeState> {
        if !self.builder.has_child_node(name) {
            return None;
        }
        self.builder.child_node(name).ok().map(|c| c.node_state())
    }
}

impl NodeStateDiff for RebaseDiff<'_> {
    fn property_added(&mut self, after: &PropertyState) -> bool {
        match self.builder.property(after.name()) {
            None => self.set(after),
            Some(cur) if cur == *after => true,
            Some(_) => {
                if self.conflict(after.name(), ConflictKind::AddExistingProperty) {
                    return self.set(after);
                }
                true
            }
        }
    }

    fn property_changed(&mut self, before: &PropertyState, after: &PropertyState) -> bool {
        let kind = match self.builder.property(after.name()) {
            Some(cur) if cur == *before => return self.set(after),
            Some(cur) if cur == *after => return true,
            Some(_) => ConflictKind::ChangeChangedProperty,
            None => ConflictKind::ChangeDeletedProperty,
        };
        if self.conflict(after.name(), kind) {
            return self.set(after);
        }
        true
    }

    fn property_deleted(&mut self, before: &PropertyState) -> bool {
        match self.builder.property(before.name()) {
            None => true,
            Some(cur) if cur == *before => self.remove(before.name()),
            Some(_) => {
                if self.conflict(before.name(), ConflictKind::DeleteChangedProperty) {
                    return self.remove(before.name());
                }
                true
            }
        }
    }

    fn child_node_added(&mut self, name: &str, after: &NodeState) -> bool {
        match self.current_child(name) {
            Some(cur) if cur == *after => true,
            Some(_) if !self.conflict(name, ConflictKind::AddExistingNode) => true,
            _ => {
                let result = self.builder.set_child_node(name, after.clone());
                self.check(result)
            }
        }
    }

    fn child_node_changed(&mut self, name: &str, before: &NodeState, after: &NodeState) -> bool {
        if self.current_child(name).is_none() {
            if self.conflict(name, ConflictKind::ChangeDeletedNode) {
                let result = self.builder.set_child_node(name, after.clone());
                return self.check(result);
            }
            return true;
        }

        let child = match self.builder.child(name) {
            Ok(child) => child,
            Err(err) => {
                self.failure = Some(err);
                return false;
            }
        };
        let failure = {
            let mut nested = RebaseDiff {
                builder: child,
                path: child_path(&self.path, name),
                policy: self.policy,
                conflicts: &mut *self.conflicts,
                failure: None,
            };
            after.compare_against_base_state(before, &mut nested);
            nested.failure
        };
        match failure {
            Some(err) => {
                self.failure = Some(err);
                false
            }
            None => true,
        }
    }

    fn child_node_deleted(&mut self, name: &str, before: &NodeState) -> bool {
        match self.current_child(name) {
            None => true,
            Some(cur) if cur != *before && !self.conflict(name, ConflictKind::DeleteChangedNode) => {
                true
            }
            Some(_) => {
                let result = self.builder.remove_child_node(name);
                self.check(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{long_prop, node};

    fn edit(base: &NodeState, f: impl FnOnce(&NodeBuilder)) -> NodeState {
        let b = base.builder();
        f(&b);
        b.node_state()
    }

    #[test]
    fn test_clean_merge_non_overlapping() {
        let base = node(&[long_prop("a", 1), long_prop("b", 1)], &[]);
        let current = edit(&base, |b| {
            b.set_property("a", 2i64).unwrap();
        });
        let head = edit(&base, |b| {
            b.set_property("b", 3i64).unwrap();
        });

        let result = rebase(&current, &base, &head, ConflictPolicy::Reject).unwrap();
        assert!(result.is_clean());
        assert_eq!(result.state.get_long("a"), 2);
        assert_eq!(result.state.get_long("b"), 3);
    }

    #[test]
    fn test_conflict_same_property_different_values() {
        let base = node(&[long_prop("p", 1)], &[]);
        let current = edit(&base, |b| {
            b.set_property("p", 2i64).unwrap();
        });
        let head = edit(&base, |b| {
            b.set_property("p", 3i64).unwrap();
        });

        let result = rebase(&current, &base, &head, ConflictPolicy::Reject).unwrap();
        assert!(!result.is_clean());
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].kind, ConflictKind::ChangeChangedProperty);
        assert_eq!(result.conflicts[0].name, "p");
        assert_eq!(result.state.get_long("p"), 2, "current side kept");
    }

    #[test]
    fn test_auto_resolve_identical_changes() {
        let base = node(&[long_prop("p", 1)], &[]);
        let current = edit(&base, |b| {
            b.set_property("p", 2i64).unwrap();
            b.set_property("q", 5i64).unwrap();
        });
        let head = edit(&base, |b| {
            b.set_property("p", 2i64).unwrap();
            b.set_property("q", 5i64).unwrap();
        });

        let result = rebase(&current, &base, &head, ConflictPolicy::Reject).unwrap();
        assert!(result.is_clean());
        assert_eq!(result.state, current);
    }

    #[test]
    fn test_empty_merge() {
        let base = node(&[long_prop("p", 1)], &[]);
        let current = edit(&base, |b| {
            b.set_property("p", 9i64).unwrap();
        });
        let result = rebase(&current, &base, &base, ConflictPolicy::Reject).unwrap();
        assert!(result.is_clean());
        assert!(result.state.same_snapshot(&current));
    }

    #[test]
    fn test_fast_forward_when_current_is_base() {
        let base = node(&[], &[]);
        let head = edit(&base, |b| {
            b.set_property("p", 1i64).unwrap();
        });
        let result = rebase(&base, &base, &head, ConflictPolicy::Reject).unwrap();
        assert!(result.state.same_snapshot(&head));
    }

    #[test]
    fn test_policies_resolve_deterministically() {
        let base = node(&[long_prop("p", 1)], &[]);
        let current = edit(&base, |b| {
            b.set_property("p", 2i64).unwrap();
        });
        let head = edit(&base, |b| {
            b.set_property("p", 3i64).unwrap();
        });

        let ours = rebase(&current, &base, &head, ConflictPolicy::PreferHead).unwrap();
        assert_eq!(ours.state.get_long("p"), 3);
        assert_eq!(ours.conflicts.len(), 1, "resolved conflicts are still reported");

        let theirs = rebase(&current, &base, &head, ConflictPolicy::PreferCurrent).unwrap();
        assert_eq!(theirs.state.get_long("p"), 2);
    }

    #[test]
    fn test_change_deleted_property() {
        let base = node(&[long_prop("p", 1)], &[]);
        let current = edit(&base, |b| {
            b.remove_property("p").unwrap();
        });
        let head = edit(&base, |b| {
            b.set_property("p", 2i64).unwrap();
        });
        let result = rebase(&current, &base, &head, ConflictPolicy::Reject).unwrap();
        assert_eq!(result.conflicts[0].kind, ConflictKind::ChangeDeletedProperty);
        assert!(!result.state.has_property("p"));
    }

    #[test]
    fn test_delete_changed_property() {
        let base = node(&[long_prop("p", 1)], &[]);
        let current = edit(&base, |b| {
            b.set_property("p", 2i64).unwrap();
        });
        let head = edit(&base, |b| {
            b.remove_property("p").unwrap();
        });
        let result = rebase(&current, &base, &head, ConflictPolicy::PreferHead).unwrap();
        assert_eq!(result.conflicts[0].kind, ConflictKind::DeleteChangedProperty);
        assert!(!result.state.has_property("p"));
    }

    #[test]
    fn test_both_delete_is_clean() {
        let base = node(&[long_prop("p", 1)], &[("c", node(&[], &[]))]);
        let both = |b: &NodeBuilder| {
            b.remove_property("p").unwrap();
            b.remove_child_node("c").unwrap();
        };
        let current = edit(&base, both);
        let head = edit(&base, both);
        let result = rebase(&current, &base, &head, ConflictPolicy::Reject).unwrap();
        assert!(result.is_clean());
        assert_eq!(result.state, current);
    }

    #[test]
    fn test_nested_disjoint_edits() {
        let base = node(&[], &[("a", node(&[], &[("b", node(&[], &[]))]))]);
        let current = edit(&base, |b| {
            b.child("a").unwrap().set_property("x", 1i64).unwrap();
        });
        let head = edit(&base, |b| {
            b.child("a").unwrap().child("b").unwrap().set_property("y", 2i64).unwrap();
            b.child("new").unwrap();
        });
        let result = rebase(&current, &base, &head, ConflictPolicy::Reject).unwrap();
        assert!(result.is_clean());
        let a = result.state.child_node("a").unwrap();
        assert_eq!(a.get_long("x"), 1);
        assert_eq!(a.child_node("b").unwrap().get_long("y"), 2);
        assert!(result.state.has_child_node("new"));
    }

    #[test]
    fn test_add_existing_node_conflict_reports_path() {
        let base = node(&[], &[("a", node(&[], &[]))]);
        let current = edit(&base, |b| {
            b.child("a").unwrap().child("n").unwrap().set_property("v", 1i64).unwrap();
        });
        let head = edit(&base, |b| {
            b.child("a").unwrap().child("n").unwrap().set_property("v", 2i64).unwrap();
        });
        let result = rebase(&current, &base, &head, ConflictPolicy::Reject).unwrap();
        assert_eq!(
            result.conflicts,
            vec![Conflict {
                path: String::from("/a"),
                name: String::from("n"),
                kind: ConflictKind::AddExistingNode,
            }]
        );
    }

    #[test]
    fn test_change_deleted_node() {
        let base = node(&[], &[("a", node(&[long_prop("x", 1)], &[]))]);
        let current = edit(&base, |b| {
            b.remove_child_node("a").unwrap();
        });
        let head = edit(&base, |b| {
            b.child("a").unwrap().set_property("x", 2i64).unwrap();
        });
        let rejected = rebase(&current, &base, &head, ConflictPolicy::Reject).unwrap();
        assert_eq!(rejected.conflicts[0].kind, ConflictKind::ChangeDeletedNode);
        assert!(!rejected.state.has_child_node("a"));

        let revived = rebase(&current, &base, &head, ConflictPolicy::PreferHead).unwrap();
        assert_eq!(revived.state.child_node("a").unwrap().get_long("x"), 2);
    }

    #[test]
    fn test_delete_changed_node() {
        let base = node(&[], &[("a", node(&[long_prop("x", 1)], &[]))]);
        let current = edit(&base, |b| {
            b.child("a").unwrap().set_property("x", 2i64).unwrap();
        });
        let head = edit(&base, |b| {
            b.remove_child_node("a").unwrap();
        });
        let result = rebase(&current, &base, &head, ConflictPolicy::PreferCurrent).unwrap();
        assert_eq!(result.conflicts[0].kind, ConflictKind::DeleteChangedNode);
        assert_eq!(result.state.child_node("a").unwrap().get_long("x"), 2);
    }
}
