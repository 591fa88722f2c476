//! Ownership & cleanup (§4.3): the scope tree, polymorphic cleanup slots,
//! and automatic child disposal.

use smallvec::SmallVec;

use crate::error::NodeLabel;
use crate::node::{dispose_children_and_cleanup, NodeBody, NodeId, ReactiveNode};
use crate::root::Root;

/// Most nodes register at most one or two cleanups (`on_cleanup` calls per
/// effect run), so the `Many` variant inlines a couple of entries before
/// spilling to the heap.
type CleanupVec = SmallVec<[Box<dyn FnOnce()>; 2]>;

/// Polymorphic cleanup storage: empty / one callback / many, so the
/// overwhelmingly common "one cleanup" case costs no allocation at all
/// (§4.3, §9 "Polymorphic cleanup storage").
#[derive(Default)]
pub(crate) enum CleanupSlot {
    #[default]
    Empty,
    One(Box<dyn FnOnce()>),
    Many(CleanupVec),
}

impl CleanupSlot {
    pub(crate) fn push(&mut self, f: Box<dyn FnOnce()>) {
        *self = match std::mem::take(self) {
            CleanupSlot::Empty => CleanupSlot::One(f),
            CleanupSlot::One(prev) => {
                let mut v = CleanupVec::new();
                v.push(prev);
                v.push(f);
                CleanupSlot::Many(v)
            }
            CleanupSlot::Many(mut v) => {
                v.push(f);
                CleanupSlot::Many(v)
            }
        };
    }

    /// Runs every registered callback in LIFO order and empties the slot.
    /// Per §7 "Propagation policy", a panic from one cleanup must not abort
    /// the rest — each is isolated with `catch_unwind`.
    pub(crate) fn run(self) {
        match self {
            CleanupSlot::Empty => {}
            CleanupSlot::One(f) => {
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
            }
            CleanupSlot::Many(v) => {
                for f in v.into_iter().rev() {
                    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
                }
            }
        }
    }
}

/// Creates the implicit top-level scope for a fresh [`Root`]. Not part of
/// the public API: every other scope is created via [`create_scope`].
pub(crate) fn create_root_scope(root: &Root) -> NodeId {
    root.arena.borrow_mut().insert(ReactiveNode::new(NodeBody::Scope, None, NodeLabel::new("Scope")))
}

/// A handle to a scope (or any other owner node), returned by
/// [`create_scope`]. Disposing it recursively disposes every child
/// effect/scope/signal that was created underneath it.
#[derive(Clone, Copy)]
pub struct Scope {
    pub(crate) id: NodeId,
}

impl Scope {
    /// Disposes this scope and everything transitively owned by it.
    pub fn dispose(self) {
        dispose(Root::global(), self.id);
    }
}

/// Creates a child scope, runs `f` with it as the active owner, flushes any
/// effects queued during `f` synchronously (so components built inside
/// finish their initial runs), and returns a disposer (§4.3).
#[track_caller]
pub fn create_scope(f: impl FnOnce()) -> Scope {
    let root = Root::global();
    let parent = root.active_owner.get();
    let id = root
        .arena
        .borrow_mut()
        .insert(ReactiveNode::new(NodeBody::Scope, parent, NodeLabel::new("Scope")));
    attach_to_owner(root, parent, id);

    let prev_owner = root.active_owner.replace(Some(id));
    f();
    root.active_owner.set(prev_owner);

    crate::scheduler::flush(root);
    Scope { id }
}

/// Registers `child` as owned by `owner` (or the root scope, if `owner` is
/// `None`) so that disposing the owner recursively disposes `child`.
pub(crate) fn attach_to_owner(root: &Root, owner: Option<NodeId>, child: NodeId) {
    let owner = owner.or_else(|| root.root_scope.get());
    let Some(owner) = owner else {
        return;
    };
    if let Some(node) = root.arena.borrow_mut().get_mut(owner) {
        node.children.push(child);
    }
}

/// Recursively disposes `id`: runs its cleanups, disposes its children, then
/// removes it and its edges from the arena.
///
/// Edge teardown goes through [`crate::node::unlink`] rather than splicing
/// the `sources`/`sinks` vectors directly, so that disposing the last sink
/// of a lazy source (a `Sensor`, or the externally-driven flavor of
/// `Collection`) still runs its `stop_callback` exactly as if that sink had
/// been trimmed during a normal recomputation (§4.1 `unlink`, §8 "zero sinks
/// after at least one attach-detach cycle").
pub(crate) fn dispose(root: &Root, id: NodeId) {
    dispose_children_and_cleanup(root, id);

    let (sources, sinks) = {
        let mut arena = root.arena.borrow_mut();
        let Some(node) = arena.get_mut(id) else {
            return;
        };
        node.disposed = true;
        (std::mem::take(&mut node.sources), std::mem::take(&mut node.sinks))
    };
    for source in sources {
        crate::node::unlink(root, source, id);
    }
    for sink in sinks {
        crate::node::unlink(root, id, sink);
    }
    // `id` may itself be a lazy source that just lost its last sink above.
    crate::node::maybe_stop_lazy(root, id);
    root.arena.borrow_mut().remove(id);
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn cleanup_runs_on_dispose() {
        let _ = create_root(|| {
            let cleanup_called = create_signal(false);
            let scope = create_scope(|| {
                on_cleanup(move || {
                    cleanup_called.set(true);
                });
            });
            assert!(!cleanup_called.get());
            scope.dispose();
            assert!(cleanup_called.get());
        });
    }

    #[test]
    fn nested_scope_disposed_with_parent() {
        let _ = create_root(|| {
            let inner_cleaned = create_signal(false);
            let outer = create_scope(|| {
                create_scope(|| {
                    on_cleanup(move || inner_cleaned.set(true));
                });
            });
            assert!(!inner_cleaned.get());
            outer.dispose();
            assert!(inner_cleaned.get());
        });
    }
}
