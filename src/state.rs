//! Immutable node states
//!
//! A [`NodeState`] is a frozen snapshot of one tree node: its properties
//! and its children. Child states are shared by reference count, so an
//! edited tree re-allocates only the nodes on the changed paths and
//! shares every untouched subtree with its predecessor.
//!
//! Author: Moroya Sakamoto

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::blob::BlobStore;
use crate::builder::NodeBuilder;
use crate::diff::{self, NodeStateDiff};
use crate::error::{Error, Result};
use crate::property::{PropertyState, Type};

/// Path separator; never valid inside a name
pub const PATH_SEPARATOR: char = '/';

/// Returned by `child_node_count` when the count exceeds `max` and is not known exactly
pub const UNBOUNDED_COUNT: u64 = u64::MAX;

/// Check a node or property name
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(PATH_SEPARATOR) {
        return Err(Error::InvalidName(String::from(name)));
    }
    Ok(())
}

// ── Read accessors ────────────────────────────────────────────────────

/// Read access shared by node states and node builders.
///
/// The typed getters match the property type strictly and fall back to a
/// default instead of converting. Use [`PropertyState::value_as`] for
/// coercion.
pub trait ReadNode {
    /// Whether the node exists
    fn exists(&self) -> bool;

    /// Named property, if present
    fn property(&self, name: &str) -> Option<PropertyState>;

    /// All properties, in a stable per-instance order
    fn properties(&self) -> Vec<PropertyState>;

    fn property_count(&self) -> usize;

    /// Names of all children, in a stable per-instance order
    fn child_node_names(&self) -> Vec<String>;

    /// Like `child_node(name).exists()`, but invalid names yield `false`
    fn has_child_node(&self, name: &str) -> bool;

    /// Exact child count when known; otherwise counts at most `max`
    /// entries and returns [`UNBOUNDED_COUNT`] if more remain.
    fn child_node_count(&self, max: u64) -> u64;

    fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    /// BOOLEAN value, or `false`
    fn get_boolean(&self, name: &str) -> bool {
        self.property(name)
            .and_then(|p| p.strict_boolean())
            .unwrap_or(false)
    }

    /// LONG value, or `0`
    fn get_long(&self, name: &str) -> i64 {
        self.property(name)
            .and_then(|p| p.strict_long())
            .unwrap_or(0)
    }

    /// STRING value, or `None`
    fn get_string(&self, name: &str) -> Option<String> {
        self.property(name)
            .and_then(|p| p.strict_text(Type::String).map(String::from))
    }

    /// STRING array values, or empty
    fn get_strings(&self, name: &str) -> Vec<String> {
        self.property(name)
            .and_then(|p| p.strict_texts(Type::String))
            .unwrap_or_default()
    }

    /// NAME value, or `None`
    fn get_name(&self, name: &str) -> Option<String> {
        self.property(name)
            .and_then(|p| p.strict_text(Type::Name).map(String::from))
    }

    /// NAME array values, or empty
    fn get_names(&self, name: &str) -> Vec<String> {
        self.property(name)
            .and_then(|p| p.strict_texts(Type::Name))
            .unwrap_or_default()
    }
}

// ── NodeState ─────────────────────────────────────────────────────────

/// Store a root state was handed out by. Builders inherit it so the store
/// can recognise its own builders and supply the blob sink.
#[derive(Clone)]
pub(crate) struct Origin {
    pub store_id: u64,
    pub blobs: Arc<dyn BlobStore>,
}

struct NodeData {
    exists: bool,
    properties: IndexMap<String, PropertyState>,
    children: IndexMap<String, NodeState>,
}

/// Immutable snapshot of a tree node. Clones are O(1).
#[derive(Clone)]
pub struct NodeState {
    data: Arc<NodeData>,
    origin: Option<Origin>,
}

impl NodeState {
    /// Sentinel for a node that does not exist
    pub fn missing() -> Self {
        Self::with_data(false, IndexMap::new(), IndexMap::new())
    }

    /// Existing node without properties or children
    pub fn empty() -> Self {
        Self::with_data(true, IndexMap::new(), IndexMap::new())
    }

    pub(crate) fn from_parts(
        properties: IndexMap<String, PropertyState>,
        children: IndexMap<String, NodeState>,
    ) -> Self {
        Self::with_data(true, properties, children)
    }

    fn with_data(
        exists: bool,
        properties: IndexMap<String, PropertyState>,
        children: IndexMap<String, NodeState>,
    ) -> Self {
        Self {
            data: Arc::new(NodeData {
                exists,
                properties,
                children,
            }),
            origin: None,
        }
    }

    pub(crate) fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub(crate) fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    /// Same handle with the store tag stripped
    pub(crate) fn detached(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            origin: None,
        }
    }

    pub(crate) fn property_map(&self) -> &IndexMap<String, PropertyState> {
        &self.data.properties
    }

    pub(crate) fn child_map(&self) -> &IndexMap<String, NodeState> {
        &self.data.children
    }

    /// True if both handles point at the same snapshot
    #[inline]
    pub fn same_snapshot(&self, other: &NodeState) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Named child; a non-existent state if absent.
    /// Fails only for invalid names.
    pub fn child_node(&self, name: &str) -> Result<NodeState> {
        validate_name(name)?;
        Ok(self
            .data
            .children
            .get(name)
            .cloned()
            .unwrap_or_else(NodeState::missing))
    }

    /// Iterate `(name, state)` entries in a stable order
    pub fn child_node_entries(&self) -> impl Iterator<Item = ChildNodeEntry> + '_ {
        self.data
            .children
            .iter()
            .map(|(name, state)| ChildNodeEntry::new(name.clone(), state.clone()))
    }

    /// Builder whose base is this state
    pub fn builder(&self) -> NodeBuilder {
        NodeBuilder::new(self.clone())
    }

    /// Report every content difference between `base` and `self` to
    /// `diff`. The `exists` flags of the two states are not compared.
    ///
    /// Returns `false` if the handler stopped the comparison early.
    pub fn compare_against_base_state(
        &self,
        base: &NodeState,
        diff: &mut dyn NodeStateDiff,
    ) -> bool {
        diff::compare(self, base, diff)
    }
}

impl ReadNode for NodeState {
    fn exists(&self) -> bool {
        self.data.exists
    }

    fn property(&self, name: &str) -> Option<PropertyState> {
        self.data.properties.get(name).cloned()
    }

    fn properties(&self) -> Vec<PropertyState> {
        self.data.properties.values().cloned().collect()
    }

    fn property_count(&self) -> usize {
        self.data.properties.len()
    }

    fn child_node_names(&self) -> Vec<String> {
        self.data.children.keys().cloned().collect()
    }

    fn has_child_node(&self, name: &str) -> bool {
        validate_name(name).is_ok()
            && self
                .data
                .children
                .get(name)
                .is_some_and(|c| c.data.exists)
    }

    fn child_node_count(&self, _max: u64) -> u64 {
        // Held in memory, so always exact
        self.data.children.len() as u64
    }

    fn has_property(&self, name: &str) -> bool {
        self.data.properties.contains_key(name)
    }
}

// Order-independent structural equality; the store tag is ignored.
impl PartialEq for NodeState {
    fn eq(&self, other: &Self) -> bool {
        if self.same_snapshot(other) {
            return true;
        }
        let (a, b) = (&*self.data, &*other.data);
        a.exists == b.exists && a.properties == b.properties && a.children == b.children
    }
}

impl Eq for NodeState {}

impl fmt::Debug for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.data.exists {
            return f.write_str("NodeState(missing)");
        }
        f.debug_struct("NodeState")
            .field("properties", &self.data.properties.values().collect::<Vec<_>>())
            .field("children", &self.data.children)
            .finish()
    }
}

// ── ChildNodeEntry ────────────────────────────────────────────────────

/// `(name, state)` pair from a node's child iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildNodeEntry {
    name: String,
    state: NodeState,
}

impl ChildNodeEntry {
    pub fn new(name: String, state: NodeState) -> Self {
        Self { name, state }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_state(&self) -> &NodeState {
        &self.state
    }
}
