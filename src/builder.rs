//! Node builders
//!
//! Mutable overlay over a base [`NodeState`]. All builders derived from
//! one root builder share an arena of slots; a handle is an index into it
//! plus the stamp of the allocation it refers to. A parent slot owns its
//! linked children through a name → slot map and a child only records its
//! parent's index, so ownership stays acyclic while edits made through any
//! handle are visible through all of them.
//!
//! Unlinking a child vacates its slot and its whole linked subtree; vacant
//! slots are reused and every reuse gets a fresh stamp. A handle whose
//! stamp no longer matches is *stale* and edits through it are ignored. A
//! slot is *missing* when it is attached but represents no node; edits
//! through it fail.
//!
//! Builders are single-owner and deliberately `!Send`.
//!
//! Author: Moroya Sakamoto

use std::cell::RefCell;
use std::fmt;
use std::io::Read;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use crate::blob::{Blob, BlobStore, MemoryBlobStore};
use crate::error::{Error, Result};
use crate::property::{PropertyState, Type, Value};
use crate::state::{validate_name, NodeState, Origin, ReadNode, UNBOUNDED_COUNT};

type SlotId = usize;

const ROOT: SlotId = 0;

/// Stamp of a vacant slot; allocated slots get unique non-zero stamps
const VACANT: u64 = 0;

/// Index that never resolves, used for children of stale builders
const NOWHERE: SlotId = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Live,
    Missing,
    Stale,
}

struct Slot {
    stamp: u64,
    parent: Option<SlotId>,
    name: String,
    /// Frozen at construction
    base: NodeState,
    exists: bool,
    /// Installed by `set_child_node` over existing base content
    replaced: bool,
    /// Copy-on-write property overlay; `None` means unchanged from base
    properties: Option<IndexMap<String, PropertyState>>,
    /// Copy-on-write overlay of children without a linked slot
    children: Option<IndexMap<String, NodeState>>,
    /// Linked child builders; their content wins over `children`
    linked: IndexMap<String, SlotId>,
}

impl Slot {
    fn new(parent: Option<SlotId>, name: &str, base: NodeState, exists: bool) -> Self {
        Self {
            stamp: VACANT,
            parent,
            name: String::from(name),
            base,
            exists,
            replaced: false,
            properties: None,
            children: None,
            linked: IndexMap::new(),
        }
    }

    fn vacant() -> Self {
        Self::new(None, "", NodeState::missing(), false)
    }

    fn head_properties(&self) -> &IndexMap<String, PropertyState> {
        self.properties
            .as_ref()
            .unwrap_or_else(|| self.base.property_map())
    }

    fn unlinked_children(&self) -> &IndexMap<String, NodeState> {
        self.children
            .as_ref()
            .unwrap_or_else(|| self.base.child_map())
    }

    fn properties_mut(&mut self) -> &mut IndexMap<String, PropertyState> {
        let base = &self.base;
        self.properties
            .get_or_insert_with(|| base.property_map().clone())
    }

    fn children_mut(&mut self) -> &mut IndexMap<String, NodeState> {
        let base = &self.base;
        self.children.get_or_insert_with(|| base.child_map().clone())
    }
}

// ── Arena ─────────────────────────────────────────────────────────────

struct Arena {
    slots: Vec<Slot>,
    /// Vacant slots available for reuse
    free: Vec<SlotId>,
    last_stamp: u64,
    origin: Option<Origin>,
    /// Used by `create_blob` when the base did not come from a store
    local_blobs: Option<Arc<dyn BlobStore>>,
}

impl Arena {
    fn new(base: NodeState) -> Self {
        let origin = base.origin().cloned();
        let exists = base.exists();
        let mut arena = Self {
            slots: Vec::new(),
            free: Vec::new(),
            last_stamp: VACANT,
            origin,
            local_blobs: None,
        };
        arena.alloc(Slot::new(None, "", base.detached(), exists));
        arena
    }

    fn slot(&self, id: SlotId) -> &Slot {
        &self.slots[id]
    }

    fn slot_mut(&mut self, id: SlotId) -> &mut Slot {
        &mut self.slots[id]
    }

    fn alloc(&mut self, mut slot: Slot) -> SlotId {
        self.last_stamp += 1;
        slot.stamp = self.last_stamp;
        match self.free.pop() {
            Some(id) => {
                self.slots[id] = slot;
                id
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        }
    }

    /// Vacate `id` and everything linked below it
    fn release(&mut self, id: SlotId) {
        let mut pending = vec![id];
        while let Some(i) = pending.pop() {
            let slot = std::mem::replace(&mut self.slots[i], Slot::vacant());
            pending.extend(slot.linked.into_values());
            self.free.push(i);
        }
    }

    fn is_valid(&self, id: SlotId, stamp: u64) -> bool {
        stamp != VACANT && self.slots.get(id).is_some_and(|s| s.stamp == stamp)
    }

    /// Ancestors of an allocated slot are allocated too, so only the
    /// handle itself can be stale
    fn status(&self, id: SlotId, stamp: u64) -> Status {
        if !self.is_valid(id, stamp) {
            return Status::Stale;
        }
        let mut cur = Some(id);
        while let Some(i) = cur {
            let slot = self.slot(i);
            if !slot.exists {
                return Status::Missing;
            }
            cur = slot.parent;
        }
        Status::Live
    }

    fn path(&self, id: SlotId) -> String {
        let mut names = Vec::new();
        let mut cur = id;
        while let Some(parent) = self.slot(cur).parent {
            names.push(self.slot(cur).name.as_str());
            cur = parent;
        }
        if names.is_empty() {
            return String::from("/");
        }
        names.reverse();
        names.iter().fold(String::new(), |mut acc, n| {
            acc.push('/');
            acc.push_str(n);
            acc
        })
    }

    /// True if `id` is `ancestor` or lies below it
    fn is_within(&self, id: SlotId, ancestor: SlotId) -> bool {
        let mut cur = Some(id);
        while let Some(i) = cur {
            if i == ancestor {
                return true;
            }
            cur = self.slot(i).parent;
        }
        false
    }

    fn child_exists(&self, id: SlotId, name: &str) -> bool {
        let slot = self.slot(id);
        match slot.linked.get(name) {
            Some(&cid) => self.slot(cid).exists,
            None => slot.unlinked_children().contains_key(name),
        }
    }

    /// Child names in materialization order
    fn child_names(&self, id: SlotId) -> Vec<String> {
        let slot = self.slot(id);
        let mut names: Vec<String> = slot
            .unlinked_children()
            .keys()
            .filter(|n| self.child_exists(id, n))
            .cloned()
            .collect();
        for (name, &cid) in &slot.linked {
            if self.slot(cid).exists && !slot.unlinked_children().contains_key(name) {
                names.push(name.clone());
            }
        }
        names
    }

    fn materialize(&self, id: SlotId) -> NodeState {
        let slot = self.slot(id);
        if !slot.exists {
            return NodeState::missing();
        }

        let mut changed = slot.properties.is_some() || slot.children.is_some();
        let mut children = slot.unlinked_children().clone();
        for (name, &cid) in &slot.linked {
            let child = self.materialize(cid);
            let unchanged = slot
                .base
                .child_map()
                .get(name)
                .is_some_and(|b| b.same_snapshot(&child));
            changed |= !unchanged && (child.exists() || children.contains_key(name));
            if child.exists() {
                children.insert(name.clone(), child);
            } else {
                children.shift_remove(name);
            }
        }

        // Untouched subtrees keep sharing the base snapshot
        if !changed && slot.base.exists() {
            return slot.base.detached();
        }
        NodeState::from_parts(slot.head_properties().clone(), children)
    }

    /// Linked slot for `name`, created on first access
    fn child_slot(&mut self, id: SlotId, name: &str, vivify: bool) -> SlotId {
        if let Some(&cid) = self.slot(id).linked.get(name) {
            if vivify && !self.slot(cid).exists {
                self.revive(cid);
            }
            return cid;
        }
        let base = self.slot(id).unlinked_children().get(name).cloned();
        let exists = base.is_some() || vivify;
        let slot = Slot::new(
            Some(id),
            name,
            base.unwrap_or_else(NodeState::missing),
            exists,
        );
        let cid = self.alloc(slot);
        self.slot_mut(id).linked.insert(String::from(name), cid);
        cid
    }

    /// Recreate a removed or never-existing slot as an empty node
    fn revive(&mut self, id: SlotId) {
        let slot = self.slot_mut(id);
        slot.exists = true;
        slot.properties = Some(IndexMap::new());
        slot.children = Some(IndexMap::new());
    }

    fn unlink(&mut self, id: SlotId, name: &str) {
        if let Some(cid) = self.slot_mut(id).linked.shift_remove(name) {
            self.release(cid);
        }
    }

    fn clear(&mut self, id: SlotId) {
        let linked: Vec<SlotId> = self.slot_mut(id).linked.drain(..).map(|(_, c)| c).collect();
        for cid in linked {
            self.release(cid);
        }
        let slot = self.slot_mut(id);
        slot.properties = Some(IndexMap::new());
        slot.children = Some(IndexMap::new());
    }

    fn remove_child(&mut self, id: SlotId, name: &str) -> bool {
        let existed = self.child_exists(id, name);
        self.unlink(id, name);
        if self.slot(id).unlinked_children().contains_key(name) {
            self.slot_mut(id).children_mut().shift_remove(name);
        }
        existed
    }

    fn set_child(&mut self, id: SlotId, name: &str, state: NodeState) -> SlotId {
        let replaced = self.slot(id).base.child_map().contains_key(name);
        self.unlink(id, name);
        let state = state.detached();
        let exists = state.exists();
        if exists {
            self.slot_mut(id)
                .children_mut()
                .insert(String::from(name), state.clone());
        } else if self.slot(id).unlinked_children().contains_key(name) {
            self.slot_mut(id).children_mut().shift_remove(name);
        }
        let mut slot = Slot::new(Some(id), name, state, exists);
        slot.replaced = replaced && exists;
        let cid = self.alloc(slot);
        self.slot_mut(id).linked.insert(String::from(name), cid);
        cid
    }

    /// Both slots must be live
    fn move_slot(&mut self, id: SlotId, new_parent: SlotId, new_name: &str) -> bool {
        let old_parent = match self.slot(id).parent {
            Some(p) => p,
            None => return false,
        };
        if self.child_exists(new_parent, new_name) || self.is_within(new_parent, id) {
            return false;
        }

        let old_name = self.slot(id).name.clone();
        self.slot_mut(old_parent).linked.shift_remove(&old_name);
        if self.slot(old_parent).unlinked_children().contains_key(&old_name) {
            self.slot_mut(old_parent).children_mut().shift_remove(&old_name);
        }
        // A ghost handle may still sit at the target name
        self.unlink(new_parent, new_name);

        let slot = self.slot_mut(id);
        slot.parent = Some(new_parent);
        slot.name = String::from(new_name);
        self.slot_mut(new_parent)
            .linked
            .insert(String::from(new_name), id);
        true
    }

    /// Drop every slot but the root, which keeps its stamp
    fn reset(&mut self, base: NodeState) {
        let stamp = self.slot(ROOT).stamp;
        self.slots.truncate(1);
        self.free.clear();
        self.origin = base.origin().cloned();
        let exists = base.exists();
        let mut root = Slot::new(None, "", base.detached(), exists);
        root.stamp = stamp;
        self.slots[ROOT] = root;
    }
}

// ── NodeBuilder ───────────────────────────────────────────────────────

/// Mutable, linked view of a node being edited.
///
/// Cloning a builder yields another handle to the same node.
#[derive(Clone)]
pub struct NodeBuilder {
    arena: Rc<RefCell<Arena>>,
    id: SlotId,
    stamp: u64,
}

impl NodeBuilder {
    pub(crate) fn new(base: NodeState) -> Self {
        let arena = Arena::new(base);
        let stamp = arena.slot(ROOT).stamp;
        Self {
            arena: Rc::new(RefCell::new(arena)),
            id: ROOT,
            stamp,
        }
    }

    fn with_id(&self, id: SlotId) -> Self {
        let stamp = self.arena.borrow().slot(id).stamp;
        Self {
            arena: Rc::clone(&self.arena),
            id,
            stamp,
        }
    }

    /// Handle that never resolves to a slot
    fn unlinked(&self) -> Self {
        Self {
            arena: Rc::clone(&self.arena),
            id: NOWHERE,
            stamp: VACANT,
        }
    }

    fn status(&self) -> Status {
        self.arena.borrow().status(self.id, self.stamp)
    }

    /// Run `f` on this handle's slot unless the handle is stale
    fn with_slot<R>(&self, f: impl FnOnce(&Slot) -> R) -> Option<R> {
        let arena = self.arena.borrow();
        if arena.is_valid(self.id, self.stamp) {
            Some(f(arena.slot(self.id)))
        } else {
            None
        }
    }

    /// Gate for mutations: `Ok(true)` to proceed, `Ok(false)` to ignore
    fn writable(&self, op: &str) -> Result<bool> {
        match self.status() {
            Status::Live => Ok(true),
            Status::Stale => {
                trace!(op, "ignoring edit on unlinked builder");
                Ok(false)
            }
            Status::Missing => Err(Error::NonExistentNode(self.path())),
        }
    }

    /// Path from the root builder; empty once the builder is unlinked
    pub fn path(&self) -> String {
        let arena = self.arena.borrow();
        if arena.is_valid(self.id, self.stamp) {
            arena.path(self.id)
        } else {
            String::new()
        }
    }

    /// True if both handles address the same builder
    pub fn same_builder(&self, other: &NodeBuilder) -> bool {
        Rc::ptr_eq(&self.arena, &other.arena) && self.id == other.id && self.stamp == other.stamp
    }

    pub(crate) fn is_root(&self) -> bool {
        self.id == ROOT
    }

    pub(crate) fn origin_store(&self) -> Option<u64> {
        self.arena.borrow().origin.as_ref().map(|o| o.store_id)
    }

    /// Rebase the whole builder tree onto `base`; every derived handle goes stale
    pub(crate) fn reset(&self, base: NodeState) {
        self.arena.borrow_mut().reset(base);
    }

    /// Slots held by the builder tree, vacant ones included
    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.arena.borrow().slots.len()
    }

    /// Frozen snapshot of the current content; the builder stays mutable
    pub fn node_state(&self) -> NodeState {
        let arena = self.arena.borrow();
        match arena.status(self.id, self.stamp) {
            Status::Live => arena.materialize(self.id),
            _ => NodeState::missing(),
        }
    }

    /// State this builder started from; non-existent for new nodes
    pub fn base_state(&self) -> NodeState {
        self.with_slot(|s| s.base.clone())
            .unwrap_or_else(NodeState::missing)
    }

    /// Node exists now but had no counterpart in the base
    pub fn is_new(&self) -> bool {
        !self.is_root() && self.exists() && self.with_slot(|s| !s.base.exists()).unwrap_or(false)
    }

    pub fn is_property_new(&self, name: &str) -> bool {
        self.has_property(name)
            && self
                .with_slot(|s| !s.base.has_property(name))
                .unwrap_or(false)
    }

    /// Any difference from the base, including deep changes below
    pub fn is_modified(&self) -> bool {
        if self.status() == Status::Stale {
            return false;
        }
        self.node_state() != self.base_state()
    }

    /// Existing base content at this position was wholesale replaced
    pub fn is_replaced(&self) -> bool {
        self.exists() && self.with_slot(|s| s.replaced).unwrap_or(false)
    }

    /// Base has the property and its content was replaced or removed
    pub fn is_property_replaced(&self, name: &str) -> bool {
        match self.with_slot(|s| s.base.property(name)).flatten() {
            Some(b) => self.property(name).as_ref() != Some(&b),
            None => false,
        }
    }

    /// Linked builder for `name`, creating an empty child if absent.
    /// Repeated calls return the same builder until the link is broken.
    pub fn child(&self, name: &str) -> Result<NodeBuilder> {
        validate_name(name)?;
        match self.status() {
            Status::Missing => Err(Error::NonExistentNode(self.path())),
            // Stale parents hand out stale children
            Status::Stale => Ok(self.unlinked()),
            Status::Live => {
                let cid = self.arena.borrow_mut().child_slot(self.id, name, true);
                Ok(self.with_id(cid))
            }
        }
    }

    /// Linked builder for `name` without creating it; mutating a
    /// non-existent child fails.
    pub fn child_node(&self, name: &str) -> Result<NodeBuilder> {
        validate_name(name)?;
        if self.status() == Status::Stale {
            return Ok(self.unlinked());
        }
        let cid = self.arena.borrow_mut().child_slot(self.id, name, false);
        Ok(self.with_id(cid))
    }

    /// Replace the subtree at `name` with `state` (use [`NodeState::empty`]
    /// for a fresh node). A previously returned builder for `name` is
    /// unlinked.
    pub fn set_child_node(&self, name: &str, state: NodeState) -> Result<NodeBuilder> {
        validate_name(name)?;
        if !self.writable("set_child_node")? {
            return Ok(self.unlinked());
        }
        let cid = self.arena.borrow_mut().set_child(self.id, name, state);
        Ok(self.with_id(cid))
    }

    /// Remove the named child; `true` if it existed
    pub fn remove_child_node(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        if self.status() != Status::Live {
            return Ok(false);
        }
        Ok(self.arena.borrow_mut().remove_child(self.id, name))
    }

    /// Remove this node from its parent. `false` if it did not exist or
    /// is the root.
    pub fn remove(&self) -> bool {
        if self.is_root() || self.status() != Status::Live {
            return false;
        }
        let mut arena = self.arena.borrow_mut();
        arena.clear(self.id);
        arena.slot_mut(self.id).exists = false;
        true
    }

    /// Move this node below `new_parent` as `new_name`.
    ///
    /// Fails, leaving both sides untouched, unless both builders exist,
    /// belong to the same builder tree, the target name is free and
    /// `new_parent` is outside this node's subtree.
    pub fn move_to(&self, new_parent: &NodeBuilder, new_name: &str) -> Result<bool> {
        validate_name(new_name)?;
        if !Rc::ptr_eq(&self.arena, &new_parent.arena)
            || self.status() != Status::Live
            || new_parent.status() != Status::Live
        {
            return Ok(false);
        }
        Ok(self
            .arena
            .borrow_mut()
            .move_slot(self.id, new_parent.id, new_name))
    }

    pub fn set_property_state(&self, property: PropertyState) -> Result<&Self> {
        validate_name(property.name())?;
        if self.writable("set_property")? {
            let mut arena = self.arena.borrow_mut();
            arena
                .slot_mut(self.id)
                .properties_mut()
                .insert(String::from(property.name()), property);
        }
        Ok(self)
    }

    /// Set a single-valued property of the value's native type
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<&Self> {
        self.set_property_state(PropertyState::new(name, value)?)
    }

    /// Set a single-valued property converted to `value_type`
    pub fn set_property_as(
        &self,
        name: &str,
        value: impl Into<Value>,
        value_type: Type,
    ) -> Result<&Self> {
        self.set_property_state(PropertyState::with_type(name, value, value_type)?)
    }

    /// No effect if the property is absent
    pub fn remove_property(&self, name: &str) -> Result<&Self> {
        validate_name(name)?;
        if self.status() != Status::Live {
            return Ok(self);
        }
        let mut arena = self.arena.borrow_mut();
        let slot = arena.slot_mut(self.id);
        if slot.head_properties().contains_key(name) {
            slot.properties_mut().shift_remove(name);
        }
        Ok(self)
    }

    /// Store the stream's bytes in the blob sink and return a reference
    /// usable as a BINARY value.
    pub fn create_blob(&self, reader: &mut dyn Read) -> Result<Blob> {
        let sink = {
            let mut arena = self.arena.borrow_mut();
            match arena.origin.as_ref().map(|o| Arc::clone(&o.blobs)) {
                Some(blobs) => blobs,
                None => Arc::clone(arena.local_blobs.get_or_insert_with(|| {
                    Arc::new(MemoryBlobStore::new()) as Arc<dyn BlobStore>
                })),
            }
        };
        Ok(sink.write_blob(reader)?)
    }
}

impl fmt::Debug for NodeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeBuilder")
            .field("path", &self.path())
            .field("status", &self.status())
            .finish()
    }
}

impl ReadNode for NodeBuilder {
    fn exists(&self) -> bool {
        self.status() == Status::Live
    }

    fn property(&self, name: &str) -> Option<PropertyState> {
        if !self.exists() {
            return None;
        }
        self.arena
            .borrow()
            .slot(self.id)
            .head_properties()
            .get(name)
            .cloned()
    }

    fn properties(&self) -> Vec<PropertyState> {
        if !self.exists() {
            return Vec::new();
        }
        self.arena
            .borrow()
            .slot(self.id)
            .head_properties()
            .values()
            .cloned()
            .collect()
    }

    fn property_count(&self) -> usize {
        if !self.exists() {
            return 0;
        }
        self.arena.borrow().slot(self.id).head_properties().len()
    }

    fn child_node_names(&self) -> Vec<String> {
        if !self.exists() {
            return Vec::new();
        }
        self.arena.borrow().child_names(self.id)
    }

    fn has_child_node(&self, name: &str) -> bool {
        validate_name(name).is_ok()
            && self.exists()
            && self.arena.borrow().child_exists(self.id, name)
    }

    fn child_node_count(&self, max: u64) -> u64 {
        if !self.exists() {
            return 0;
        }
        let arena = self.arena.borrow();
        let slot = arena.slot(self.id);
        if slot.children.is_none() && slot.linked.is_empty() {
            return slot.base.child_map().len() as u64;
        }
        // Overlaid: count lazily, at most max + 1 entries
        let mut count = 0u64;
        let unlinked = slot
            .unlinked_children()
            .keys()
            .filter(|n| arena.child_exists(self.id, n));
        let linked_only = slot
            .linked
            .iter()
            .filter(|(n, cid)| {
                arena.slot(**cid).exists && !slot.unlinked_children().contains_key(n.as_str())
            })
            .map(|(n, _)| n);
        for _ in unlinked.chain(linked_only) {
            if count == max {
                return UNBOUNDED_COUNT;
            }
            count += 1;
        }
        count
    }
}
