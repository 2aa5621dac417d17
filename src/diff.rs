//! Node state diff
//!
//! Structural comparison of two node states. Differences are pushed to a
//! [`NodeStateDiff`] handler: properties first, then children, each in
//! the iteration order of the after-state followed by deletions in the
//! order of the base state. Shared snapshots are skipped in O(1).
//!
//! Only content is compared, not the `exists` flag of the two top-level
//! states: a non-existent state diffs like an empty one. Below the top
//! level a node that exists on one side only is reported as an added or
//! deleted child.
//!
//! Author: Moroya Sakamoto

use crate::property::PropertyState;
use crate::state::NodeState;

/// Handler of node state differences.
///
/// Every callback returns `true` to continue or `false` to stop the
/// comparison. All callbacks default to continuing.
pub trait NodeStateDiff {
    fn property_added(&mut self, _after: &PropertyState) -> bool {
        true
    }

    fn property_changed(&mut self, _before: &PropertyState, _after: &PropertyState) -> bool {
        true
    }

    fn property_deleted(&mut self, _before: &PropertyState) -> bool {
        true
    }

    fn child_node_added(&mut self, _name: &str, _after: &NodeState) -> bool {
        true
    }

    /// Child exists on both sides with non-equal content
    fn child_node_changed(&mut self, _name: &str, _before: &NodeState, _after: &NodeState) -> bool {
        true
    }

    fn child_node_deleted(&mut self, _name: &str, _before: &NodeState) -> bool {
        true
    }
}

/// Compare the content of `after` against `before`. Returns `false` if
/// `diff` aborted.
pub(crate) fn compare(after: &NodeState, before: &NodeState, diff: &mut dyn NodeStateDiff) -> bool {
    if after.same_snapshot(before) {
        return true;
    }

    let (after_props, before_props) = (after.property_map(), before.property_map());
    for (name, a) in after_props {
        let proceed = match before_props.get(name) {
            None => diff.property_added(a),
            Some(b) if b != a => diff.property_changed(b, a),
            Some(_) => true,
        };
        if !proceed {
            return false;
        }
    }
    for (name, b) in before_props {
        if !after_props.contains_key(name) && !diff.property_deleted(b) {
            return false;
        }
    }

    let (after_children, before_children) = (after.child_map(), before.child_map());
    for (name, a) in after_children {
        let proceed = match before_children.get(name) {
            None => diff.child_node_added(name, a),
            Some(b) if b != a => diff.child_node_changed(name, b, a),
            Some(_) => true,
        };
        if !proceed {
            return false;
        }
    }
    for (name, b) in before_children {
        if !after_children.contains_key(name) && !diff.child_node_deleted(name, b) {
            return false;
        }
    }
    true
}

/// Path of `name` below `parent` ("/" is the root)
pub(crate) fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

// ── Change list ───────────────────────────────────────────────────────

/// One difference, addressed by the path of the node it applies to
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    PropertyAdded {
        path: String,
        after: PropertyState,
    },
    PropertyChanged {
        path: String,
        before: PropertyState,
        after: PropertyState,
    },
    PropertyDeleted {
        path: String,
        before: PropertyState,
    },
    /// Whole subtree added at `path`
    NodeAdded { path: String, after: NodeState },
    /// Whole subtree removed from `path`
    NodeDeleted { path: String, before: NodeState },
}

impl Change {
    /// Path of the node the change applies to
    pub fn path(&self) -> &str {
        match self {
            Change::PropertyAdded { path, .. }
            | Change::PropertyChanged { path, .. }
            | Change::PropertyDeleted { path, .. }
            | Change::NodeAdded { path, .. }
            | Change::NodeDeleted { path, .. } => path,
        }
    }
}

/// Collects a flat change list, descending into changed children
pub struct ChangeCollector {
    path: String,
    changes: Vec<Change>,
}

impl Default for ChangeCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeCollector {
    pub fn new() -> Self {
        Self::at(String::from("/"))
    }

    fn at(path: String) -> Self {
        Self {
            path,
            changes: Vec::new(),
        }
    }

    pub fn into_changes(self) -> Vec<Change> {
        self.changes
    }
}

impl NodeStateDiff for ChangeCollector {
    fn property_added(&mut self, after: &PropertyState) -> bool {
        self.changes.push(Change::PropertyAdded {
            path: self.path.clone(),
            after: after.clone(),
        });
        true
    }

    fn property_changed(&mut self, before: &PropertyState, after: &PropertyState) -> bool {
        self.changes.push(Change::PropertyChanged {
            path: self.path.clone(),
            before: before.clone(),
            after: after.clone(),
        });
        true
    }

    fn property_deleted(&mut self, before: &PropertyState) -> bool {
        self.changes.push(Change::PropertyDeleted {
            path: self.path.clone(),
            before: before.clone(),
        });
        true
    }

    fn child_node_added(&mut self, name: &str, after: &NodeState) -> bool {
        self.changes.push(Change::NodeAdded {
            path: child_path(&self.path, name),
            after: after.clone(),
        });
        true
    }

    fn child_node_changed(&mut self, name: &str, before: &NodeState, after: &NodeState) -> bool {
        let mut child = ChangeCollector::at(child_path(&self.path, name));
        compare(after, before, &mut child);
        self.changes.extend(child.changes);
        true
    }

    fn child_node_deleted(&mut self, name: &str, before: &NodeState) -> bool {
        self.changes.push(Change::NodeDeleted {
            path: child_path(&self.path, name),
            before: before.clone(),
        });
        true
    }
}

/// All content changes turning `before` into `after`. Empty for two
/// equal states, and for an empty state against a non-existent one.
pub fn diff_states(before: &NodeState, after: &NodeState) -> Vec<Change> {
    let mut collector = ChangeCollector::new();
    after.compare_against_base_state(before, &mut collector);
    collector.into_changes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ReadNode;
    use crate::testing::{arb_state, long_prop, node};
    use proptest::prelude::*;

    /// Counts callbacks and stops after `limit`
    struct StopAfter {
        limit: usize,
        seen: usize,
    }

    impl StopAfter {
        fn step(&mut self) -> bool {
            self.seen += 1;
            self.seen < self.limit
        }
    }

    impl NodeStateDiff for StopAfter {
        fn property_added(&mut self, _: &PropertyState) -> bool {
            self.step()
        }
        fn property_changed(&mut self, _: &PropertyState, _: &PropertyState) -> bool {
            self.step()
        }
        fn property_deleted(&mut self, _: &PropertyState) -> bool {
            self.step()
        }
        fn child_node_added(&mut self, _: &str, _: &NodeState) -> bool {
            self.step()
        }
        fn child_node_changed(&mut self, _: &str, _: &NodeState, _: &NodeState) -> bool {
            self.step()
        }
        fn child_node_deleted(&mut self, _: &str, _: &NodeState) -> bool {
            self.step()
        }
    }

    #[test]
    fn test_no_diff_identical_states() {
        let a = node(&[long_prop("x", 1)], &[("c", node(&[], &[]))]);
        let b = node(&[long_prop("x", 1)], &[("c", node(&[], &[]))]);
        assert!(diff_states(&a, &b).is_empty());
        assert!(diff_states(&a, &a).is_empty());
    }

    #[test]
    fn test_property_added_changed_deleted() {
        let before = node(&[long_prop("keep", 1), long_prop("edit", 1), long_prop("drop", 1)], &[]);
        let after = node(&[long_prop("keep", 1), long_prop("edit", 2), long_prop("new", 3)], &[]);
        let changes = diff_states(&before, &after);
        assert_eq!(changes.len(), 3);
        assert!(matches!(&changes[0], Change::PropertyChanged { after, .. } if after.name() == "edit"));
        assert!(matches!(&changes[1], Change::PropertyAdded { after, .. } if after.name() == "new"));
        assert!(matches!(&changes[2], Change::PropertyDeleted { before, .. } if before.name() == "drop"));
    }

    #[test]
    fn test_child_changes_are_path_addressed() {
        let before = node(
            &[],
            &[
                ("a", node(&[long_prop("x", 1)], &[])),
                ("gone", node(&[], &[])),
            ],
        );
        let after = node(
            &[],
            &[
                ("a", node(&[long_prop("x", 2)], &[])),
                ("fresh", node(&[], &[])),
            ],
        );
        let changes = diff_states(&before, &after);
        let paths: Vec<_> = changes.iter().map(Change::path).collect();
        assert_eq!(paths, vec!["/a", "/fresh", "/gone"]);
        assert!(matches!(&changes[1], Change::NodeAdded { .. }));
        assert!(matches!(&changes[2], Change::NodeDeleted { .. }));
    }

    #[test]
    fn test_nested_path() {
        let before = node(&[], &[("a", node(&[], &[("b", node(&[], &[]))]))]);
        let after = node(&[], &[("a", node(&[], &[("b", node(&[long_prop("p", 1)], &[]))]))]);
        let changes = diff_states(&before, &after);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path(), "/a/b");
    }

    #[test]
    fn test_handler_can_stop_early() {
        let before = node(&[], &[]);
        let after = node(&[long_prop("a", 1), long_prop("b", 2), long_prop("c", 3)], &[]);
        let mut stop = StopAfter { limit: 2, seen: 0 };
        assert!(!after.compare_against_base_state(&before, &mut stop));
        assert_eq!(stop.seen, 2, "no callbacks after the stop signal");

        let mut all = StopAfter { limit: 10, seen: 0 };
        assert!(after.compare_against_base_state(&before, &mut all));
        assert_eq!(all.seen, 3);
    }

    #[test]
    fn test_diff_against_missing_adds_everything() {
        let after = node(&[long_prop("a", 1)], &[("c", node(&[], &[]))]);
        let changes = diff_states(&NodeState::missing(), &after);
        assert_eq!(changes.len(), 2);
        assert!(after.exists());
    }

    #[test]
    fn test_existence_is_not_compared() {
        assert_ne!(NodeState::empty(), NodeState::missing());
        assert!(diff_states(&NodeState::missing(), &NodeState::empty()).is_empty());

        // One level down, existence surfaces as an added child
        let before = node(&[], &[]);
        let after = node(&[], &[("c", NodeState::empty())]);
        let changes = diff_states(&before, &after);
        assert_eq!(changes.len(), 1);
        assert!(matches!(&changes[0], Change::NodeAdded { path, .. } if path == "/c"));
    }

    #[test]
    fn test_child_path() {
        assert_eq!(child_path("/", "a"), "/a");
        assert_eq!(child_path("/a", "b"), "/a/b");
    }

    proptest! {
        #[test]
        fn prop_self_diff_is_empty(state in arb_state()) {
            let mut stop = StopAfter { limit: 1, seen: 0 };
            prop_assert!(state.compare_against_base_state(&state, &mut stop));
            prop_assert_eq!(stop.seen, 0);
            let copy = state.builder().node_state();
            prop_assert!(diff_states(&state, &copy).is_empty());
        }

        #[test]
        fn prop_diff_empty_iff_equal(a in arb_state(), b in arb_state()) {
            prop_assert_eq!(diff_states(&a, &b).is_empty(), a == b);
        }
    }
}
