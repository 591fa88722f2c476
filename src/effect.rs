//! `Effect`: the terminal observer node (§4.4 "Effect").

use crate::error::NodeLabel;
use crate::node::{EffectBody, NodeBody, NodeId, ReactiveNode};
use crate::ownership::{attach_to_owner, dispose};
use crate::root::Root;

/// A handle to a created `Effect`, letting a caller dispose it individually
/// rather than only through its owning scope (§3 "Lifecycle": an Effect "may
/// be explicitly disposed").
#[derive(Clone, Copy)]
pub struct EffectHandle {
    id: NodeId,
}

impl EffectHandle {
    /// Disposes this effect: runs its cleanups and removes it from the
    /// graph. It will not run again, even if its sources change.
    pub fn dispose(self) {
        dispose(Root::global(), self.id);
    }
}

/// Creates an `Effect` that runs `f` once immediately (establishing its
/// initial dependency set) and again every time a tracked source changes.
/// Runs are scheduled through the effect queue rather than synchronously,
/// except for the very first run which happens eagerly so observers set up
/// inside a scope see consistent state the moment the scope returns (§4.3
/// `create_scope`, §4.4 Effect).
#[track_caller]
pub fn create_effect(mut f: impl FnMut() + 'static) -> EffectHandle {
    let label = NodeLabel::new("Effect");
    let root = Root::global();
    let owner = root.active_owner.get();

    let run: Box<dyn FnMut(&Root, NodeId)> = Box::new(move |_root, _id| f());
    let body = EffectBody { run: Some(run) };
    let id = root.arena.borrow_mut().insert(ReactiveNode::new(NodeBody::Effect(body), owner, label));
    attach_to_owner(root, owner, id);

    root.enqueue_effect(id);
    crate::scheduler::flush_unless_batched(root);

    EffectHandle { id }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use crate::*;

    #[test]
    fn effect_runs_immediately_and_on_dependency_change() {
        let _ = create_root(|| {
            let state = create_signal(0);
            let seen = Rc::new(RefCell::new(Vec::new()));
            let seen_c = seen.clone();
            create_effect(move || seen_c.borrow_mut().push(state.get()));
            assert_eq!(*seen.borrow(), vec![0]);
            state.set(1);
            assert_eq!(*seen.borrow(), vec![0, 1]);
        });
    }

    #[test]
    fn effect_only_subscribes_once_to_the_same_signal() {
        let _ = create_root(|| {
            let state = create_signal(0);
            let runs = Rc::new(Cell::new(0));
            let runs_c = runs.clone();
            create_effect(move || {
                // Read the same signal twice in a row: must still produce
                // exactly one edge, so a single write triggers one rerun.
                let _ = state.get();
                let _ = state.get();
                runs_c.set(runs_c.get() + 1);
            });
            assert_eq!(runs.get(), 1);
            state.set(1);
            assert_eq!(runs.get(), 2);
        });
    }

    #[test]
    fn effect_recreates_dependencies_each_run() {
        let _ = create_root(|| {
            let gate = create_signal(true);
            let a = create_signal(1);
            let b = create_signal(100);
            let runs = Rc::new(Cell::new(0));
            let runs_c = runs.clone();
            create_effect(move || {
                runs_c.set(runs_c.get() + 1);
                if gate.get() {
                    let _ = a.get();
                } else {
                    let _ = b.get();
                }
            });
            assert_eq!(runs.get(), 1);

            gate.set(false);
            assert_eq!(runs.get(), 2);

            // `a` is no longer read; writing it must not trigger a rerun.
            a.set(2);
            assert_eq!(runs.get(), 2);

            b.set(200);
            assert_eq!(runs.get(), 3);
        });
    }

    #[test]
    fn outer_effects_run_before_nested_scope_effects() {
        let _ = create_root(|| {
            let order = Rc::new(RefCell::new(Vec::new()));
            let order_c = order.clone();
            create_effect(move || {
                order_c.borrow_mut().push("outer");
            });
            let order_c = order.clone();
            create_scope(move || {
                create_effect(move || {
                    order_c.borrow_mut().push("inner");
                });
            });
            assert_eq!(*order.borrow(), vec!["outer", "inner"]);
        });
    }

    #[test]
    fn disposing_scope_stops_its_effects() {
        let _ = create_root(|| {
            let state = create_signal(0);
            let runs = Rc::new(Cell::new(0));
            let runs_c = runs.clone();
            let scope = create_scope(move || {
                create_effect(move || {
                    state.track();
                    runs_c.set(runs_c.get() + 1);
                });
            });
            assert_eq!(runs.get(), 1);
            scope.dispose();
            state.set(1);
            assert_eq!(runs.get(), 1, "a disposed effect must not rerun");
        });
    }

    #[test]
    fn disposing_an_individual_effect_stops_it_without_touching_its_scope() {
        let _ = create_root(|| {
            let state = create_signal(0);
            let runs = Rc::new(Cell::new(0));
            let runs_c = runs.clone();
            let other_runs = Rc::new(Cell::new(0));
            let other_runs_c = other_runs.clone();
            let handle = create_effect(move || {
                state.track();
                runs_c.set(runs_c.get() + 1);
            });
            create_effect(move || {
                state.track();
                other_runs_c.set(other_runs_c.get() + 1);
            });
            assert_eq!(runs.get(), 1);
            assert_eq!(other_runs.get(), 1);

            handle.dispose();
            state.set(1);
            assert_eq!(runs.get(), 1, "a disposed effect must not rerun");
            assert_eq!(other_runs.get(), 2, "disposing one effect must not affect sibling effects");
        });
    }

    #[test]
    fn on_cleanup_runs_before_effect_rerun() {
        let _ = create_root(|| {
            let state = create_signal(0);
            let cleanups = Rc::new(Cell::new(0));
            let cleanups_c = cleanups.clone();
            create_effect(move || {
                state.track();
                let cleanups_c = cleanups_c.clone();
                on_cleanup(move || cleanups_c.set(cleanups_c.get() + 1));
            });
            assert_eq!(cleanups.get(), 0);
            state.set(1);
            assert_eq!(cleanups.get(), 1);
            state.set(2);
            assert_eq!(cleanups.get(), 2);
        });
    }
}
