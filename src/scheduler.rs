//! The scheduler (§4.2): a single process-wide queue of effect nodes
//! awaiting flush, a batch-depth counter, and a flushing reentrancy guard.

use crate::node::{get_state, refresh, NodeState};
use crate::root::Root;

/// Batches updates from related signals together, deferring effect flushing
/// until the outermost `batch` call returns (§4.2 `batch`).
///
/// # Example
/// ```
/// # use reactive_graph::*;
/// # create_root(|| {
/// let state = create_signal(1);
/// let double = create_memo(move |_: Option<i32>| state.get() * 2);
/// batch(move || {
///     state.set(2);
///     assert_eq!(double.get(), 2); // reads still see the old value
/// });
/// assert_eq!(double.get(), 4);
/// # });
/// ```
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    let root = Root::global();
    root.batch_depth.set(root.batch_depth.get() + 1);
    let result = f();
    let depth = root.batch_depth.get() - 1;
    root.batch_depth.set(depth);
    if depth == 0 {
        flush(root);
    }
    result
}

/// Runs `f` with dependency tracking disabled: reads inside create no edges
/// (§4.1 "Untracked execution").
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    crate::node::untrack(Root::global(), f)
}

/// Called after a write propagates, unless currently inside a [`batch`].
pub(crate) fn flush_unless_batched(root: &Root) {
    if root.batch_depth.get() == 0 {
        flush(root);
    }
}

/// Drains the effect queue, running each entry that is still `DIRTY`/`CHECK`
/// through `refresh` (which may resolve a `CHECK` without actually running
/// the effect body, if its sources turn out unchanged). Effects enqueued
/// *during* the flush run in the same pass, since the queue is iterated by
/// index with its length read dynamically (§4.2 `flush`).
#[cfg_attr(feature = "trace", tracing::instrument(level = "trace", skip(root)))]
pub(crate) fn flush(root: &Root) {
    if root.flushing.get() {
        return;
    }
    root.flushing.set(true);

    let mut i = 0;
    loop {
        let len = root.effect_queue.borrow().len();
        if i >= len {
            break;
        }
        let id = root.effect_queue.borrow()[i];
        i += 1;
        let alive = root.arena.borrow().contains_key(id);
        if alive && matches!(get_state(root, id), NodeState::Dirty | NodeState::Check) {
            // Effects never themselves fail the caller: compute errors are
            // routed to the pluggable reporter inside `effect.rs`'s run
            // closure, per §7 "Errors thrown from Effect bodies ... do not
            // poison the graph".
            let _ = refresh(root, id);
        }
    }
    root.effect_queue.borrow_mut().clear();

    root.flushing.set(false);
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn batch_defers_effect_until_outermost_exit() {
        let _ = create_root(|| {
            let state1 = create_signal(1);
            let state2 = create_signal(2);
            let counter = create_signal(0);
            create_effect(move || {
                counter.set(counter.get_untracked() + 1);
                let _ = state1.get() + state2.get();
            });
            assert_eq!(counter.get(), 1);

            batch(move || {
                state1.set(3);
                assert_eq!(counter.get(), 1);
                state2.set(4);
                assert_eq!(counter.get(), 1);
            });
            assert_eq!(counter.get(), 2);
        });
    }

    #[test]
    fn nested_batches_flush_once_at_outermost_exit() {
        let _ = create_root(|| {
            let state = create_signal(0);
            let runs = create_signal(0);
            create_effect(move || {
                state.track();
                runs.set(runs.get_untracked() + 1);
            });
            assert_eq!(runs.get(), 1);

            batch(|| {
                batch(|| {
                    state.set(1);
                });
                assert_eq!(runs.get(), 1);
                state.set(2);
            });
            assert_eq!(runs.get(), 2);
        });
    }

    #[test]
    fn untrack_prevents_dependency_capture() {
        let _ = create_root(|| {
            let state = create_signal(1);
            let double = create_memo(move |_: Option<i32>| untrack(|| state.get() * 2));
            assert_eq!(double.get(), 2);
            state.set(2);
            assert_eq!(double.get(), 2);
        });
    }
}
