//! `State`: the mutable leaf source (§4.4 "State").

use std::any::Any;
use std::marker::PhantomData;

use crate::error::{NodeLabel, ReactiveError};
use crate::node::{self, always_differs, EqualsFn, NodeBody, NodeId, ReactiveNode, StateBody};
use crate::ownership::attach_to_owner;
use crate::root::Root;

/// Options for [`create_signal_with`]: a custom equality test and/or a
/// write-time guard (§4.4 State: "`set(v)` validates ... checks equality").
pub struct StateOptions<T> {
    #[allow(clippy::type_complexity)]
    pub equals: Option<Box<dyn Fn(&T, &T) -> bool>>,
    #[allow(clippy::type_complexity)]
    pub guard: Option<Box<dyn Fn(&T) -> std::result::Result<(), String>>>,
}

impl<T> Default for StateOptions<T> {
    fn default() -> Self {
        Self { equals: None, guard: None }
    }
}

impl<T> StateOptions<T> {
    /// Every write always propagates, regardless of value equality — used
    /// for "same-object, contents changed" notification (§4.4 Sensor).
    pub fn always_differs() -> Self {
        Self { equals: Some(Box::new(|_, _| false)), guard: None }
    }
}

/// A handle to a mutable reactive leaf value.
///
/// Cheap to copy (it is just a node handle); reads inside a tracked
/// computation (a `Memo`/`Task`/`Effect` body) link an edge to the active
/// sink. Writes compare against the previous value with `equals` and only
/// propagate when the value actually changed.
pub struct Signal<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Signal<T> {}

impl<T> Signal<T> {
    /// The underlying node handle. Used by other composites (`Sensor`,
    /// `Collection`) that need to attach a lazy start/stop lifecycle to a
    /// plain `State` node instead of going through a dedicated node kind.
    pub(crate) fn id(self) -> NodeId {
        self.id
    }
}

/// Creates a `State` node with the given initial value and the type's
/// `PartialEq` as its equality test.
#[track_caller]
pub fn create_signal<T: PartialEq + 'static>(value: T) -> Signal<T> {
    let opts = StateOptions { equals: Some(Box::new(T::eq)), guard: None };
    create_signal_with(value, opts).expect("initial value accepted")
}

/// Creates a `State` node with custom equality/guard options.
#[track_caller]
pub fn create_signal_with<T: 'static>(
    value: T,
    opts: StateOptions<T>,
) -> Result<Signal<T>, ReactiveError> {
    let label = NodeLabel::new("State");
    if let Some(guard) = &opts.guard {
        guard(&value).map_err(|reason| ReactiveError::InvalidValue { node: label.clone(), reason })?;
    }

    let equals: EqualsFn = match opts.equals {
        Some(eq) => erase_equals(eq),
        None => always_differs(),
    };
    let guard = opts.guard.map(erase_guard);

    let root = Root::global();
    let owner = root.active_owner.get();
    let body = StateBody { value: Some(Box::new(value)), equals, guard };
    let id = root.arena.borrow_mut().insert(ReactiveNode::new(NodeBody::State(body), owner, label));
    attach_to_owner(root, owner, id);

    Ok(Signal { id, _marker: PhantomData })
}

pub(crate) fn erase_equals<T: 'static>(f: Box<dyn Fn(&T, &T) -> bool>) -> EqualsFn {
    Box::new(move |a: &dyn Any, b: &dyn Any| {
        f(a.downcast_ref::<T>().expect("type mismatch"), b.downcast_ref::<T>().expect("type mismatch"))
    })
}

#[allow(clippy::type_complexity)]
fn erase_guard<T: 'static>(
    f: Box<dyn Fn(&T) -> std::result::Result<(), String>>,
) -> Box<dyn Fn(&dyn Any) -> std::result::Result<(), String>> {
    Box::new(move |a: &dyn Any| f(a.downcast_ref::<T>().expect("type mismatch")))
}

impl<T: 'static> Signal<T> {
    /// Reads the value, linking an edge to the active sink if one is
    /// tracking.
    ///
    /// # Panics
    /// Panics if the signal currently holds `UNSET` (see
    /// [`Signal::get_option`] for a non-panicking variant) or if the node
    /// was disposed.
    #[track_caller]
    pub fn get(self) -> T
    where
        T: Clone,
    {
        self.with(|v| v.clone())
    }

    /// Reads the value without linking an edge.
    pub fn get_untracked(self) -> T
    where
        T: Clone,
    {
        self.with_untracked(|v| v.clone())
    }

    /// Reads the value as `None` if `UNSET`, linking an edge to the active
    /// sink.
    pub fn get_option(self) -> Option<T>
    where
        T: Clone,
    {
        node::track(Root::global(), self.id);
        self.read_option()
    }

    fn read_option(self) -> Option<T>
    where
        T: Clone,
    {
        let root = Root::global();
        let arena = root.arena.borrow();
        let node = arena.get(self.id).unwrap_or_else(|| panic!("{} was disposed", self.label()));
        let NodeBody::State(state) = &node.body else {
            unreachable!("Signal always wraps a State node")
        };
        state.value.as_ref().map(|v| v.downcast_ref::<T>().expect("type mismatch").clone())
    }

    /// Runs `f` against a reference to the current value, linking an edge.
    ///
    /// # Panics
    /// Panics if `UNSET`.
    #[track_caller]
    pub fn with<R>(self, f: impl FnOnce(&T) -> R) -> R {
        node::track(Root::global(), self.id);
        self.with_untracked(f)
    }

    /// Runs `f` against a reference to the current value without linking an
    /// edge.
    #[track_caller]
    pub fn with_untracked<R>(self, f: impl FnOnce(&T) -> R) -> R {
        let root = Root::global();
        let arena = root.arena.borrow();
        let node = arena.get(self.id).unwrap_or_else(|| panic!("{} was disposed", self.label()));
        let NodeBody::State(state) = &node.body else {
            unreachable!("Signal always wraps a State node")
        };
        match &state.value {
            Some(v) => f(v.downcast_ref::<T>().expect("type mismatch")),
            None => panic!("{} read while UNSET", self.label()),
        }
    }

    /// Links an edge to the active sink without reading the value.
    pub fn track(self) {
        node::track(Root::global(), self.id);
    }

    fn label(self) -> NodeLabel {
        let root = Root::global();
        root.arena.borrow().get(self.id).map(|n| n.label.clone()).unwrap_or_else(|| NodeLabel::new("<disposed>"))
    }

    /// Writes a new value: validates against the guard (if any), compares
    /// against the previous value with `equals`, writes, and propagates if
    /// changed (§4.4 State).
    ///
    /// # Errors
    /// Returns [`ReactiveError::InvalidValue`] if a guard rejects `value`.
    pub fn try_set(self, value: T) -> Result<(), ReactiveError> {
        let root = Root::global();
        let boxed: Box<dyn Any> = Box::new(value);
        let changed = {
            let mut arena = root.arena.borrow_mut();
            let node = arena.get_mut(self.id).unwrap_or_else(|| panic!("signal was disposed"));
            let NodeBody::State(state) = &mut node.body else {
                unreachable!()
            };
            if let Some(guard) = &state.guard {
                guard(boxed.as_ref()).map_err(|reason| ReactiveError::InvalidValue {
                    node: node.label.clone(),
                    reason,
                })?;
            }
            let changed = match &state.value {
                Some(old) => !(state.equals)(old.as_ref(), boxed.as_ref()),
                None => true,
            };
            if changed {
                state.value = Some(boxed);
            }
            changed
        };
        if changed {
            node::propagate(root, self.id);
            crate::scheduler::flush_unless_batched(root);
        }
        Ok(())
    }

    /// Convenience wrapper over [`Signal::try_set`] for signals with no
    /// guard (panics if one is somehow installed and rejects the value).
    pub fn set(self, value: T) {
        self.try_set(value).expect("no guard installed");
    }

    /// Writes `UNSET`: clears the signal's committed value and propagates
    /// the change, treating the signal as released (§4.4 State, GLOSSARY
    /// "UNSET").
    pub fn set_unset(self) {
        let root = Root::global();
        {
            let mut arena = root.arena.borrow_mut();
            let node = arena.get_mut(self.id).unwrap_or_else(|| panic!("signal was disposed"));
            let NodeBody::State(state) = &mut node.body else {
                unreachable!()
            };
            state.value = None;
        }
        node::propagate(root, self.id);
        crate::scheduler::flush_unless_batched(root);
    }

    /// Computes `fn(current)` and writes the result via [`Signal::set`].
    pub fn update<R>(self, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Clone,
    {
        let mut value = self.get_untracked();
        let ret = f(&mut value);
        self.set(value);
        ret
    }
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn signal_read_write() {
        let _ = create_root(|| {
            let state = create_signal(0);
            assert_eq!(state.get(), 0);
            state.set(1);
            assert_eq!(state.get(), 1);
        });
    }

    #[test]
    fn signal_update() {
        let _ = create_root(|| {
            let state = create_signal(1);
            state.update(|v| *v += 1);
            assert_eq!(state.get(), 2);
        });
    }

    #[test]
    fn equal_write_does_not_propagate() {
        let _ = create_root(|| {
            let state = create_signal(1);
            let runs = create_signal(0);
            create_effect(move || {
                state.track();
                runs.set(runs.get_untracked() + 1);
            });
            assert_eq!(runs.get(), 1);
            state.set(1);
            assert_eq!(runs.get(), 1);
            state.set(2);
            assert_eq!(runs.get(), 2);
        });
    }

    #[test]
    fn unset_clears_value_and_propagates() {
        let _ = create_root(|| {
            let state = create_signal(1);
            assert_eq!(state.get_option(), Some(1));
            state.set_unset();
            assert_eq!(state.get_option(), None);
        });
    }

    #[test]
    fn guard_rejects_invalid_value() {
        let _ = create_root(|| {
            let state = create_signal_with(
                1,
                StateOptions {
                    equals: None,
                    guard: Some(Box::new(|v: &i32| {
                        if *v >= 0 {
                            Ok(())
                        } else {
                            Err("must be non-negative".into())
                        }
                    })),
                },
            )
            .unwrap();
            assert!(state.try_set(-1).is_err());
            assert_eq!(state.get(), 1);
            assert!(state.try_set(5).is_ok());
            assert_eq!(state.get(), 5);
        });
    }
}
