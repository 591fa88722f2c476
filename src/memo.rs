//! `Memo`: a synchronous derived node (§4.4 "Memo").

use std::any::Any;
use std::marker::PhantomData;

use crate::error::{NodeLabel, ReactiveError};
use crate::node::{self, always_differs, ComputeOutcome, DerivedBody, EqualsFn, NodeBody, NodeId, ReactiveNode};
use crate::ownership::attach_to_owner;
use crate::root::Root;
use crate::signal::StateOptions;

/// A handle to a synchronous derived value.
///
/// The first read (or the read that follows an upstream change) runs
/// `compute` with dependency tracking active, exactly like an effect body;
/// the resulting edges replace the previous set via `trim_sources` (§4.1).
pub struct Memo<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Memo<T> {}

impl<T> Memo<T> {
    /// The underlying node handle. Used by composites (`Collection`) that
    /// need to dispose a per-item `Memo` outside the normal owner-tree walk.
    pub(crate) fn id(self) -> NodeId {
        self.id
    }
}

/// Creates a `Memo` computing `f(previous_value)` on demand. `f` receives
/// `None` on the very first run and `Some(prev)` thereafter, matching the
/// "reducer pattern" support called out in §4.4.
#[track_caller]
pub fn create_memo<T: PartialEq + Clone + 'static>(f: impl FnMut(Option<T>) -> T + 'static) -> Memo<T> {
    let opts = StateOptions { equals: Some(Box::new(T::eq)), guard: None };
    create_memo_with(f, opts)
}

/// Creates a `Memo` with custom equality options.
#[track_caller]
pub fn create_memo_with<T: Clone + 'static>(
    mut f: impl FnMut(Option<T>) -> T + 'static,
    opts: StateOptions<T>,
) -> Memo<T> {
    let label = NodeLabel::new("Memo");
    let equals: EqualsFn = match opts.equals {
        Some(eq) => crate::signal::erase_equals(eq),
        None => always_differs(),
    };

    let compute = move |_root: &Root, prev: Option<Box<dyn Any>>| -> ComputeOutcome {
        let prev_typed: Option<T> = prev.and_then(|v| v.downcast::<T>().ok()).map(|b| *b);
        let new_value = f(prev_typed.clone());
        let changed = match &prev_typed {
            Some(old) => !equals(old as &dyn Any, &new_value as &dyn Any),
            None => true,
        };
        ComputeOutcome { changed, value: Box::new(new_value), error: None }
    };

    let root = Root::global();
    let owner = root.active_owner.get();
    let body = DerivedBody { value: None, error: None, equals, compute: Some(Box::new(compute)) };
    let id = root.arena.borrow_mut().insert(ReactiveNode::new(NodeBody::Memo(body), owner, label));
    attach_to_owner(root, owner, id);
    // Born dirty: a fresh Memo has never computed, so the first `refresh`
    // must not short-circuit on `Clean` (node.rs `refresh`).
    node::set_state(root, id, node::NodeState::Dirty);

    Memo { id, _marker: PhantomData }
}

impl<T: 'static> Memo<T> {
    /// Reads the memoized value, refreshing it first if stale, and links an
    /// edge to the active sink.
    ///
    /// # Errors
    /// Returns the error captured from the most recent failed recompute
    /// (§7: Memo bodies that error keep serving the last-known-good value
    /// while rethrowing on every subsequent read until a fresh recompute
    /// succeeds).
    #[track_caller]
    pub fn try_get(self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        let root = Root::global();
        node::track(root, self.id);
        node::refresh(root, self.id)?;
        self.read()
    }

    /// Convenience wrapper over [`Memo::try_get`].
    ///
    /// # Panics
    /// Panics if the most recent recompute errored.
    #[track_caller]
    pub fn get(self) -> T
    where
        T: Clone,
    {
        self.try_get().unwrap_or_else(|e| panic!("{e}"))
    }

    /// Reads without linking an edge, still refreshing first if stale.
    pub fn get_untracked(self) -> T
    where
        T: Clone,
    {
        let root = Root::global();
        let _ = node::refresh(root, self.id);
        self.read().unwrap_or_else(|e| panic!("{e}"))
    }

    fn read(self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        let root = Root::global();
        let arena = root.arena.borrow();
        let node = arena.get(self.id).unwrap_or_else(|| panic!("memo was disposed"));
        let NodeBody::Memo(derived) = &node.body else {
            unreachable!("Memo always wraps a Memo node")
        };
        if let Some(err) = &derived.error {
            return Err(err.clone());
        }
        let value = derived.value.as_ref().expect("a Memo always has a value once refreshed");
        Ok(value.downcast_ref::<T>().expect("type mismatch").clone())
    }

    /// Links an edge to the active sink, refreshing first if stale, without
    /// reading the value out.
    pub fn track(self) {
        let root = Root::global();
        node::track(root, self.id);
        let _ = node::refresh(root, self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::*;

    #[test]
    fn diamond_dependency_recomputes_sink_once() {
        let _ = create_root(|| {
            let root_state = create_signal(1);
            let left = create_memo(move |_: Option<i32>| root_state.get() + 1);
            let right = create_memo(move |_: Option<i32>| root_state.get() * 10);
            let runs = Rc::new(Cell::new(0));
            let runs_c = runs.clone();
            let bottom = create_memo(move |_: Option<i32>| {
                runs_c.set(runs_c.get() + 1);
                left.get() + right.get()
            });

            assert_eq!(bottom.get(), 2 + 10);
            assert_eq!(runs.get(), 1);

            root_state.set(2);
            assert_eq!(bottom.get(), 3 + 20);
            assert_eq!(runs.get(), 2, "bottom must recompute exactly once per change, not once per parent");
        });
    }

    #[test]
    fn equality_stops_propagation_to_downstream_effect() {
        let _ = create_root(|| {
            let state = create_signal(10);
            let parity = create_memo(move |_: Option<bool>| state.get() % 2 == 0);
            let effect_runs = create_signal(0);
            create_effect(move || {
                parity.track();
                effect_runs.set(effect_runs.get_untracked() + 1);
            });
            assert_eq!(effect_runs.get(), 1);

            state.set(12); // still even: parity unchanged
            assert_eq!(effect_runs.get(), 1, "effect must not rerun when the memo's value is unchanged");

            state.set(13); // now odd: parity changes
            assert_eq!(effect_runs.get(), 2);
        });
    }

    #[test]
    fn reducer_pattern_receives_previous_value() {
        let _ = create_root(|| {
            let tick = create_signal(0);
            let history = create_memo(move |prev: Option<Vec<i32>>| {
                let mut v = prev.unwrap_or_default();
                v.push(tick.get());
                v
            });
            assert_eq!(history.get(), vec![0]);
            tick.set(1);
            assert_eq!(history.get(), vec![0, 1]);
        });
    }
}
