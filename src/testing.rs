//! Shared test fixtures
//!
//! Author: Moroya Sakamoto

use std::collections::BTreeMap;

use proptest::prelude::*;

use crate::property::PropertyState;
use crate::state::NodeState;

pub(crate) fn long_prop(name: &str, value: i64) -> PropertyState {
    PropertyState::new(name, value).unwrap()
}

/// Existing node with the given properties and children
pub(crate) fn node(props: &[PropertyState], children: &[(&str, NodeState)]) -> NodeState {
    NodeState::from_parts(
        props
            .iter()
            .map(|p| (String::from(p.name()), p.clone()))
            .collect(),
        children
            .iter()
            .map(|(n, s)| (String::from(*n), s.clone()))
            .collect(),
    )
}

fn from_maps(props: BTreeMap<String, i64>, children: BTreeMap<String, NodeState>) -> NodeState {
    NodeState::from_parts(
        props
            .into_iter()
            .map(|(n, v)| {
                let p = long_prop(&n, v);
                (n, p)
            })
            .collect(),
        children.into_iter().collect(),
    )
}

/// Small random trees: up to three LONG properties and three children per level
pub(crate) fn arb_state() -> impl Strategy<Value = NodeState> {
    let props = || prop::collection::btree_map("[a-c]", 0i64..4, 0..3);
    let leaf = props().prop_map(|p| from_maps(p, BTreeMap::new()));
    leaf.prop_recursive(3, 24, 3, move |inner| {
        (props(), prop::collection::btree_map("[x-z]", inner, 0..3))
            .prop_map(|(p, c)| from_maps(p, c))
    })
}
