//! [`Root`]: the single-threaded reactor object that owns the graph arena
//! and all the "global" mutable state the design notes call out —
//! active-sink, active-owner, effect queue, batch depth — confined here
//! rather than scattered across thread-locals (§9 "Global mutable state").

use std::cell::{Cell, RefCell};

use slotmap::SlotMap;

use crate::node::{NodeBody, NodeId, ReactiveNode};
use crate::ownership::CleanupSlot;

/// The struct managing the state of the reactive system. Exactly one should
/// be live per scheduling domain (§5).
///
/// Typically leaked to obtain a `&'static Root` via [`create_root`]; the
/// `Root` itself is also dispose-able through [`RootHandle::dispose`], which
/// tears down every node it owns. The `Root` allocation is expected to live
/// for the duration of the program, so leaking it is not a real leak in
/// practice.
pub struct Root {
    /// All nodes created under this root.
    pub(crate) arena: RefCell<SlotMap<NodeId, ReactiveNode>>,
    /// The node currently reading its dependencies (if any). Reads of a
    /// source while this is set record an edge to it.
    pub(crate) active_sink: Cell<Option<NodeId>>,
    /// The scope/effect that newly created owned nodes attach to for
    /// disposal.
    pub(crate) active_owner: Cell<Option<NodeId>>,
    /// The top-level scope created by [`create_root`].
    pub(crate) root_scope: Cell<Option<NodeId>>,
    /// Effects awaiting flush, in enqueue order.
    pub(crate) effect_queue: RefCell<Vec<NodeId>>,
    /// Nesting depth of [`crate::scheduler::batch`].
    pub(crate) batch_depth: Cell<u32>,
    /// Reentrancy guard for [`crate::scheduler::flush`].
    pub(crate) flushing: Cell<bool>,
}

thread_local! {
    /// The current reactive root. One reactor per thread, per the design
    /// notes: "there is deliberately no multi-reactor interop."
    static GLOBAL_ROOT: Cell<Option<&'static Root>> = const { Cell::new(None) };
}

impl Root {
    fn new() -> Self {
        Self {
            arena: RefCell::new(SlotMap::default()),
            active_sink: Cell::new(None),
            active_owner: Cell::new(None),
            root_scope: Cell::new(None),
            effect_queue: RefCell::new(Vec::new()),
            batch_depth: Cell::new(0),
            flushing: Cell::new(false),
        }
    }

    /// Gets the current reactive root.
    ///
    /// # Panics
    /// Panics if called outside of [`create_root`].
    #[track_caller]
    pub fn global() -> &'static Root {
        GLOBAL_ROOT.with(|root| root.get()).expect("no reactive root found; call this inside `create_root`")
    }

    /// Sets the current reactive root, returning the previous one.
    pub(crate) fn set_global(root: Option<&'static Root>) -> Option<&'static Root> {
        GLOBAL_ROOT.with(|r| r.replace(root))
    }

    /// Allocates a new root, leaked to `'static`, with an empty top-level
    /// scope.
    fn new_static() -> &'static Self {
        let this = Box::leak(Box::new(Root::new()));
        let prev = Root::set_global(Some(this));
        let scope = crate::ownership::create_root_scope(this);
        this.root_scope.set(Some(scope));
        Root::set_global(prev);
        this
    }

    /// Tears down every node owned by this root and resets it to a fresh
    /// empty scope, without deallocating the `Root` itself.
    fn reinit(&'static self) {
        if let Some(scope) = self.root_scope.take() {
            let prev = Root::set_global(Some(self));
            crate::ownership::dispose(self, scope);
            Root::set_global(prev);
        }
        self.arena.borrow_mut().clear();
        self.effect_queue.borrow_mut().clear();
        self.batch_depth.set(0);
        self.flushing.set(false);
        self.active_sink.set(None);
        self.active_owner.set(None);

        let prev = Root::set_global(Some(self));
        let scope = crate::ownership::create_root_scope(self);
        self.root_scope.set(Some(scope));
        Root::set_global(prev);
    }

    /// Appends `id` to the effect queue if not already flushing; the caller
    /// is responsible for the "already DIRTY ⇒ already queued" dedup check
    /// (see `node::propagate_to_sink`).
    pub(crate) fn enqueue_effect(&self, id: NodeId) {
        self.effect_queue.borrow_mut().push(id);
    }
}

/// A handle to a root, letting callers dispose or reinitialize it for
/// resource cleanup. Obtained from [`create_root`].
#[derive(Clone, Copy)]
pub struct RootHandle {
    root: &'static Root,
}

impl RootHandle {
    /// Destroys everything created under this root.
    pub fn dispose(&self) {
        self.root.reinit();
    }

    /// Runs `f` with this root as the active global reactor.
    pub fn run_in<T>(&self, f: impl FnOnce() -> T) -> T {
        let prev = Root::set_global(Some(self.root));
        let ret = f();
        Root::set_global(prev);
        ret
    }
}

/// Creates a new reactive root with a top-level scope and runs `f` inside
/// it. The returned [`RootHandle`] can later [`dispose`](RootHandle::dispose)
/// everything the closure (transitively) created.
///
/// # Example
/// ```
/// # use reactive_graph::*;
/// let handle = create_root(|| {
///     let count = create_signal(0);
///     create_effect(move || {
///         println!("count = {}", count.get());
///     });
/// });
/// handle.dispose();
/// ```
#[must_use = "a root should eventually be disposed"]
pub fn create_root(f: impl FnOnce()) -> RootHandle {
    let root = Root::new_static();

    // Keep the leaked allocation reachable for sanitizers/Miri, following the
    // teacher crate's `create_root`; this is bookkeeping, not a real leak,
    // since `Root` is meant to live for the process lifetime.
    #[cfg(not(target_arch = "wasm32"))]
    {
        struct UnsafeSendPtr<T>(*const T);
        unsafe impl<T> Send for UnsafeSendPtr<T> {}
        static KEEP_ALIVE: std::sync::Mutex<Vec<UnsafeSendPtr<Root>>> = std::sync::Mutex::new(Vec::new());
        KEEP_ALIVE.lock().unwrap().push(UnsafeSendPtr(root as *const Root));
    }

    let prev = Root::set_global(Some(root));
    f();
    Root::set_global(prev);
    RootHandle { root }
}

/// Registers `f` to run when the currently active owner (scope or effect)
/// is disposed or re-runs (§4.3).
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    let root = Root::global();
    let Some(owner) = root.active_owner.get() else {
        return;
    };
    if let Some(node) = root.arena.borrow_mut().get_mut(owner) {
        node.cleanups.push(Box::new(f));
    }
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn root_dispose_drops_state() {
        let counter_outside = std::rc::Rc::new(std::cell::Cell::new(0));
        let handle = create_root(|| {
            let counter = counter_outside.clone();
            create_scope(move || {
                on_cleanup(move || counter.set(counter.get() + 1));
            });
        });
        assert_eq!(counter_outside.get(), 0);
        handle.dispose();
        assert_eq!(counter_outside.get(), 1);
    }

    #[test]
    fn reinit_allows_reuse() {
        let handle = create_root(|| {
            create_signal(1);
        });
        handle.dispose();
        handle.run_in(|| {
            let s = create_signal(2);
            assert_eq!(s.get(), 2);
        });
    }
}
