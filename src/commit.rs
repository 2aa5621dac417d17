//! Commit hooks
//!
//! Hooks see `(before, after)` during a merge and return the state to
//! commit, possibly transformed, or reject the change. They run in the
//! caller's order; each one receives the previous hook's output.
//!
//! Author: Moroya Sakamoto

use crate::diff::NodeStateDiff;
use crate::error::CommitFailed;
use crate::property::PropertyState;
use crate::state::NodeState;

/// Validation or transformation step applied while merging
pub trait CommitHook {
    fn process(&self, before: &NodeState, after: &NodeState) -> Result<NodeState, CommitFailed>;
}

impl<F> CommitHook for F
where
    F: Fn(&NodeState, &NodeState) -> Result<NodeState, CommitFailed>,
{
    fn process(&self, before: &NodeState, after: &NodeState) -> Result<NodeState, CommitFailed> {
        self(before, after)
    }
}

/// Passes the candidate through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyHook;

impl CommitHook for EmptyHook {
    fn process(&self, _before: &NodeState, after: &NodeState) -> Result<NodeState, CommitFailed> {
        Ok(after.clone())
    }
}

/// Run `hooks` in order; the first rejection aborts
pub(crate) fn run_hooks(
    hooks: &[&dyn CommitHook],
    before: &NodeState,
    after: NodeState,
) -> Result<NodeState, CommitFailed> {
    hooks
        .iter()
        .try_fold(after, |state, hook| hook.process(before, &state))
}

/// Fixed sequence of hooks acting as one
#[derive(Default)]
pub struct CompositeHook {
    hooks: Vec<Box<dyn CommitHook>>,
}

impl CompositeHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook; it runs after those already added
    pub fn with(mut self, hook: impl CommitHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl CommitHook for CompositeHook {
    fn process(&self, before: &NodeState, after: &NodeState) -> Result<NodeState, CommitFailed> {
        self.hooks
            .iter()
            .try_fold(after.clone(), |state, hook| hook.process(before, &state))
    }
}

// ── Validators ────────────────────────────────────────────────────────

/// Result of descending into a child: a validator for the subtree, or
/// `None` to skip it
pub type ChildValidator = Result<Option<Box<dyn Validator>>, CommitFailed>;

/// Diff-driven check of a commit. Every callback defaults to accepting.
///
/// Added and deleted subtrees are visited as if compared against a
/// non-existent node, so a validator sees every property inside them.
pub trait Validator {
    fn property_added(&mut self, _after: &PropertyState) -> Result<(), CommitFailed> {
        Ok(())
    }

    fn property_changed(
        &mut self,
        _before: &PropertyState,
        _after: &PropertyState,
    ) -> Result<(), CommitFailed> {
        Ok(())
    }

    fn property_deleted(&mut self, _before: &PropertyState) -> Result<(), CommitFailed> {
        Ok(())
    }

    fn child_node_added(&mut self, _name: &str, _after: &NodeState) -> ChildValidator {
        Ok(None)
    }

    fn child_node_changed(
        &mut self,
        _name: &str,
        _before: &NodeState,
        _after: &NodeState,
    ) -> ChildValidator {
        Ok(None)
    }

    fn child_node_deleted(&mut self, _name: &str, _before: &NodeState) -> ChildValidator {
        Ok(None)
    }
}

/// Hook that runs a fresh [`Validator`] over every commit
pub struct ValidatorHook<F> {
    provider: F,
}

impl<F> ValidatorHook<F>
where
    F: Fn() -> Box<dyn Validator>,
{
    pub fn new(provider: F) -> Self {
        Self { provider }
    }
}

impl<F> CommitHook for ValidatorHook<F>
where
    F: Fn() -> Box<dyn Validator>,
{
    fn process(&self, before: &NodeState, after: &NodeState) -> Result<NodeState, CommitFailed> {
        let mut validator = (self.provider)();
        validate(validator.as_mut(), before, after)?;
        Ok(after.clone())
    }
}

fn validate(
    validator: &mut dyn Validator,
    before: &NodeState,
    after: &NodeState,
) -> Result<(), CommitFailed> {
    let mut visit = ValidatingDiff {
        validator,
        failure: None,
    };
    after.compare_against_base_state(before, &mut visit);
    match visit.failure {
        Some(failed) => Err(failed),
        None => Ok(()),
    }
}

struct ValidatingDiff<'a> {
    validator: &'a mut dyn Validator,
    failure: Option<CommitFailed>,
}

impl ValidatingDiff<'_> {
    fn check(&mut self, result: Result<(), CommitFailed>) -> bool {
        match result {
            Ok(()) => true,
            Err(failed) => {
                self.failure = Some(failed);
                false
            }
        }
    }

    fn descend(&mut self, child: ChildValidator, before: &NodeState, after: &NodeState) -> bool {
        let result = match child {
            Ok(Some(mut sub)) => validate(sub.as_mut(), before, after),
            Ok(None) => Ok(()),
            Err(failed) => Err(failed),
        };
        self.check(result)
    }
}

impl NodeStateDiff for ValidatingDiff<'_> {
    fn property_added(&mut self, after: &PropertyState) -> bool {
        let result = self.validator.property_added(after);
        self.check(result)
    }

    fn property_changed(&mut self, before: &PropertyState, after: &PropertyState) -> bool {
        let result = self.validator.property_changed(before, after);
        self.check(result)
    }

    fn property_deleted(&mut self, before: &PropertyState) -> bool {
        let result = self.validator.property_deleted(before);
        self.check(result)
    }

    fn child_node_added(&mut self, name: &str, after: &NodeState) -> bool {
        let child = self.validator.child_node_added(name, after);
        self.descend(child, &NodeState::missing(), after)
    }

    fn child_node_changed(&mut self, name: &str, before: &NodeState, after: &NodeState) -> bool {
        let child = self.validator.child_node_changed(name, before, after);
        self.descend(child, before, after)
    }

    fn child_node_deleted(&mut self, name: &str, before: &NodeState) -> bool {
        let child = self.validator.child_node_deleted(name, before);
        self.descend(child, before, &NodeState::missing())
    }
}
