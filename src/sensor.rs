//! `Sensor`: an externally-driven lazy source (§4.4 "Sensor").
//!
//! A `Sensor` has no recompute function of its own; instead it exposes a
//! `start`/`stop` lifecycle hook pair, run the first time something tracks it
//! and the last time something stops tracking it (`node::LazyLifecycle`).
//! Between `start` and `stop` the external driver pushes values in through
//! the setter it received, exactly like writing a `Signal`.

use std::any::Any;
use std::cell::Cell;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::{NodeLabel, ReactiveError};
use crate::node::{self, always_differs, EqualsFn, NodeBody, NodeId, ReactiveNode, SensorBody};
use crate::ownership::attach_to_owner;
use crate::root::Root;
use crate::signal::StateOptions;

/// A setter handed to a `Sensor`'s `start` callback: pushes a new value and
/// propagates to dependents, exactly like [`crate::Signal::set`].
pub struct SensorSetter<T> {
    id: NodeId,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for SensorSetter<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for SensorSetter<T> {}

impl<T: 'static> SensorSetter<T> {
    pub fn set(self, value: T) {
        let root = Root::global();
        let changed = {
            let mut arena = root.arena.borrow_mut();
            let Some(node) = arena.get_mut(self.id) else { return };
            let NodeBody::Sensor(sensor) = &mut node.body else {
                unreachable!("SensorSetter always wraps a Sensor node")
            };
            let boxed: Box<dyn Any> = Box::new(value);
            let changed = match &sensor.value {
                Some(old) => !(sensor.equals)(old.as_ref(), boxed.as_ref()),
                None => true,
            };
            if changed {
                sensor.value = Some(boxed);
            }
            changed
        };
        if changed {
            node::propagate(root, self.id);
            crate::scheduler::flush_unless_batched(root);
        }
    }
}

/// A handle to an externally-driven lazy value.
pub struct Sensor<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Sensor<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Sensor<T> {}

/// Creates a `Sensor` whose `start` callback is invoked (with a setter and
/// an initial-value slot) only once something first tracks it, and whose
/// `stop` callback runs once the last tracking sink detaches (§4.4 Sensor,
/// §4.1 `link`/`unlink`).
///
/// `initial` seeds the value read before `start` has had a chance to push
/// one; if `None` and the sensor is read before `start` produces a value,
/// reads fail with [`ReactiveError::UnsetValue`].
#[track_caller]
pub fn create_sensor<T: PartialEq + 'static>(
    initial: Option<T>,
    start: impl FnMut(SensorSetter<T>) -> Box<dyn FnOnce()> + 'static,
) -> Sensor<T> {
    let opts = StateOptions { equals: Some(Box::new(T::eq)), guard: None };
    create_sensor_with(initial, opts, start)
}

/// Creates a `Sensor` with custom equality options.
#[track_caller]
pub fn create_sensor_with<T: 'static>(
    initial: Option<T>,
    opts: StateOptions<T>,
    mut start: impl FnMut(SensorSetter<T>) -> Box<dyn FnOnce()> + 'static,
) -> Sensor<T> {
    let label = NodeLabel::new("Sensor");
    let equals: EqualsFn = match opts.equals {
        Some(eq) => crate::signal::erase_equals(eq),
        None => always_differs(),
    };

    let root = Root::global();
    let owner = root.active_owner.get();
    let body = SensorBody { value: initial.map(|v| Box::new(v) as Box<dyn Any>), equals };
    let id = root.arena.borrow_mut().insert(ReactiveNode::new(NodeBody::Sensor(body), owner, label));
    attach_to_owner(root, owner, id);

    let stop_slot: Rc<Cell<Option<Box<dyn FnOnce()>>>> = Rc::new(Cell::new(None));
    let stop_slot_for_start = stop_slot.clone();
    let start_thunk = move |id: NodeId, _root: &Root| {
        let setter = SensorSetter { id, _marker: PhantomData };
        let stopper = start(setter);
        stop_slot_for_start.set(Some(stopper));
    };
    let stop_thunk = move || {
        if let Some(stopper) = stop_slot.take() {
            stopper();
        }
    };

    if let Some(node) = root.arena.borrow_mut().get_mut(id) {
        node.lazy = Some(node::LazyLifecycle {
            start: std::cell::RefCell::new(Some(Box::new(start_thunk))),
            stop: std::cell::RefCell::new(Some(Box::new(stop_thunk))),
            started: Cell::new(false),
        });
    }

    Sensor { id, _marker: PhantomData }
}

impl<T: 'static> Sensor<T> {
    /// Reads the current value, starting the sensor if this is the first
    /// tracked read, and linking an edge to the active sink.
    ///
    /// # Errors
    /// Returns [`ReactiveError::UnsetValue`] if read before `start` has
    /// produced a value and no initial value was supplied.
    #[track_caller]
    pub fn try_get(self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        node::track(Root::global(), self.id);
        self.read()
    }

    /// Convenience wrapper over [`Sensor::try_get`].
    ///
    /// # Panics
    /// Panics if the sensor has no value yet (see [`Sensor::try_get`]).
    #[track_caller]
    pub fn get(self) -> T
    where
        T: Clone,
    {
        self.try_get().unwrap_or_else(|e| panic!("{e}"))
    }

    fn read(self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        let root = Root::global();
        let arena = root.arena.borrow();
        let node = arena.get(self.id).unwrap_or_else(|| panic!("sensor was disposed"));
        let NodeBody::Sensor(sensor) = &node.body else {
            unreachable!("Sensor always wraps a Sensor node")
        };
        match &sensor.value {
            Some(v) => Ok(v.downcast_ref::<T>().expect("type mismatch").clone()),
            None => Err(ReactiveError::UnsetValue { node: node.label.clone() }),
        }
    }

    /// Links an edge to the active sink without reading the value.
    pub fn track(self) {
        node::track(Root::global(), self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::*;

    #[test]
    fn lazy_sensor_starts_on_first_track_and_stops_on_last_untrack() {
        let _ = create_root(|| {
            let starts = Rc::new(RefCell::new(0));
            let stops = Rc::new(RefCell::new(0));
            let starts_c = starts.clone();
            let stops_c = stops.clone();

            let sensor = create_sensor(Some(0), move |setter| {
                *starts_c.borrow_mut() += 1;
                setter.set(1);
                let stops_c = stops_c.clone();
                Box::new(move || {
                    *stops_c.borrow_mut() += 1;
                })
            });

            assert_eq!(*starts.borrow(), 0, "sensor must not start before first track");

            let scope = create_scope(|| {
                create_effect(move || {
                    let _ = sensor.get();
                });
            });
            assert_eq!(*starts.borrow(), 1);
            assert_eq!(sensor.get(), 1);

            scope.dispose();
            assert_eq!(*stops.borrow(), 1, "sensor must stop once its last sink detaches");
        });
    }

    #[test]
    fn unset_sensor_without_initial_errors_on_read() {
        let _ = create_root(|| {
            let sensor = create_sensor::<i32>(None, |_setter| Box::new(|| {}));
            assert!(sensor.try_get().is_err());
        });
    }
}
