//! The graph core: node storage, the dirty-flag state machine, edge
//! bookkeeping (`link`/`unlink`/`trim_sources`), and the push/pull
//! propagation routines (`propagate`/`refresh`).
//!
//! Nodes live in a single arena (`Root::arena`) keyed by [`NodeId`]. Rather
//! than the intrusive doubly-linked sink/source lists of a language with
//! manual pointer plumbing, each node keeps its source and sink lists as
//! plain `Vec<NodeId>`; the arena's slotmap handles give O(1) lookup by
//! handle regardless, so a vector with a read cursor reproduces the same
//! cost profile (stable dependency set ⇒ zero allocation per read) without
//! hand-rolled linked-list splicing.

use std::any::Any;
use std::cell::{Cell, RefCell};

use slotmap::new_key_type;

use crate::error::{NodeLabel, ReactiveError};
use crate::ownership::CleanupSlot;
use crate::root::Root;

new_key_type! {
    /// A stable handle to a node in the reactive graph.
    pub struct NodeId;
}

/// The dirty-flag state machine driving lazy recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    /// Value is known consistent with all transitive sources.
    Clean,
    /// A transitive (not direct) source may have changed; unresolved.
    Check,
    /// A direct source changed; recomputation is required before next read.
    Dirty,
    /// Recomputation is in progress. Observing this from within `refresh`
    /// on the same node is a circular dependency.
    Running,
}

/// Result of a kind-specific recompute: always carries a value (the new one
/// on success, the previously committed one if the computation errored), so
/// an erroring node keeps serving its last-known-good value while rethrowing
/// the error on read.
pub(crate) struct ComputeOutcome {
    pub value: Box<dyn Any>,
    pub error: Option<ReactiveError>,
    /// Whether `value` differs from the value passed in, as judged by the
    /// node's `equals`. Drives whether `propagate` runs afterwards.
    pub changed: bool,
}

pub(crate) type EqualsFn = Box<dyn Fn(&dyn Any, &dyn Any) -> bool>;

/// Fallback equality for a node constructed with `equals = always_false`:
/// never treat two boxed values as equal, so every write/recompute
/// propagates even when the new value is the same object (§4.4 Sensor's
/// "same-object, contents changed" mode).
pub(crate) fn always_differs() -> EqualsFn {
    Box::new(|_, _| false)
}

/// Body of a mutable leaf source: `State`.
pub(crate) struct StateBody {
    pub value: Option<Box<dyn Any>>,
    pub equals: EqualsFn,
    #[allow(clippy::type_complexity)]
    pub guard: Option<Box<dyn Fn(&dyn Any) -> std::result::Result<(), String>>>,
}

/// Body of an externally-backed lazy source: `Sensor`.
pub(crate) struct SensorBody {
    pub value: Option<Box<dyn Any>>,
    pub equals: EqualsFn,
}

/// Body of a synchronous derived node: `Memo`.
pub(crate) struct DerivedBody {
    pub value: Option<Box<dyn Any>>,
    pub error: Option<ReactiveError>,
    pub equals: EqualsFn,
    #[allow(clippy::type_complexity)]
    pub compute: Option<Box<dyn FnMut(&Root, Option<Box<dyn Any>>) -> ComputeOutcome>>,
}

/// Body of an asynchronous derived node: `Task`. The abort handle and
/// in-flight future live in `task::TaskRuntime`, stashed behind `Any` so
/// `node.rs` stays generic over `T`.
pub(crate) struct AsyncBody {
    pub value: Option<Box<dyn Any>>,
    pub error: Option<ReactiveError>,
    pub equals: EqualsFn,
    pub pending: bool,
    #[allow(clippy::type_complexity)]
    pub start: Option<Box<dyn FnMut(&Root, NodeId, Option<Box<dyn Any>>)>>,
    pub abort: Option<Box<dyn FnOnce()>>,
}

/// Body of a terminal observer: `Effect`.
pub(crate) struct EffectBody {
    #[allow(clippy::type_complexity)]
    pub run: Option<Box<dyn FnMut(&Root, NodeId)>>,
}

/// Tagged union of the five node kinds plus the bare ownership `Scope`.
/// Composites (`Store`/`List`/`Collection`) are *not* additional variants:
/// per the design notes they are plain Rust structs wrapping a `Memo`-shaped
/// structural node plus their own side tables.
pub(crate) enum NodeBody {
    State(StateBody),
    Sensor(SensorBody),
    Memo(DerivedBody),
    Task(AsyncBody),
    Effect(EffectBody),
    Scope,
}

impl NodeBody {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            NodeBody::State(_) => "State",
            NodeBody::Sensor(_) => "Sensor",
            NodeBody::Memo(_) => "Memo",
            NodeBody::Task(_) => "Task",
            NodeBody::Effect(_) => "Effect",
            NodeBody::Scope => "Scope",
        }
    }

    /// Source? — can other nodes depend on this one.
    pub(crate) fn is_source(&self) -> bool {
        !matches!(self, NodeBody::Effect(_) | NodeBody::Scope)
    }

    /// Is this node a "deriving" (Memo/Task) sink, as opposed to a terminal
    /// Effect? Determines whether `propagate` assigns DIRTY+CHECK cascades
    /// or DIRTY+enqueue.
    pub(crate) fn is_deriving(&self) -> bool {
        matches!(self, NodeBody::Memo(_) | NodeBody::Task(_))
    }

    pub(crate) fn is_effect(&self) -> bool {
        matches!(self, NodeBody::Effect(_))
    }
}

/// Lazy start/stop lifecycle shared by `Sensor` and the externally-driven
/// `Collection`: `start` runs on first sink attachment, `stop` runs when the
/// last sink detaches (§3 "Lifecycle", §4.1 `unlink`).
pub(crate) struct LazyLifecycle {
    #[allow(clippy::type_complexity)]
    pub start: RefCell<Option<Box<dyn FnMut(NodeId, &Root)>>>,
    pub stop: RefCell<Option<Box<dyn FnOnce()>>>,
    pub started: Cell<bool>,
}

pub(crate) struct ReactiveNode {
    pub state: NodeState,
    /// Sources read during the last completed computation, in read order.
    pub sources: Vec<NodeId>,
    /// Nodes that read this node during their last completed computation.
    pub sinks: Vec<NodeId>,
    /// Read cursor into `sources`, valid only while this node is `Running`.
    pub cursor: usize,
    /// Owning scope/effect, for disposal-tree walks. `None` for the root.
    pub owner: Option<NodeId>,
    /// Child owner nodes (scopes/effects) created while this node's body was
    /// last running; disposed (recursively) before the next run and on this
    /// node's own disposal.
    pub children: Vec<NodeId>,
    pub cleanups: CleanupSlot,
    pub lazy: Option<LazyLifecycle>,
    pub body: NodeBody,
    pub disposed: bool,
    pub label: NodeLabel,
}

impl ReactiveNode {
    pub(crate) fn new(body: NodeBody, owner: Option<NodeId>, label: NodeLabel) -> Self {
        Self {
            state: NodeState::Clean,
            sources: Vec::new(),
            sinks: Vec::new(),
            cursor: 0,
            owner,
            children: Vec::new(),
            cleanups: CleanupSlot::Empty,
            lazy: None,
            body,
            disposed: false,
            label,
        }
    }
}

/// Records a read of `source` while `sink` is the active sink, reusing the
/// pre-existing edge under the read cursor where possible (§4.1 `link`).
/// Runs a lazy source's `start` callback on the transition from zero to one
/// sink.
pub(crate) fn link(root: &Root, source: NodeId, sink: NodeId) {
    if source == sink {
        return;
    }
    let needs_lazy_start = {
        let mut arena = root.arena.borrow_mut();
        if !arena.contains_key(source) || !arena.contains_key(sink) {
            return;
        }

        // Fast path 1: cursor reuse during recomputation.
        let cursor = arena[sink].cursor;
        if let Some(&existing) = arena[sink].sources.get(cursor) {
            if existing == source {
                arena[sink].cursor += 1;
                return;
            }
        }
        // Fast path 2: same-as-tail skip.
        if arena[sink].sources.last() == Some(&source) {
            return;
        }
        // Fast path 3: duplicate-sink skip.
        if arena[source].sinks.contains(&sink) && arena[sink].sources.contains(&source) {
            return;
        }

        // No reusable edge: splice a fresh one in at the cursor and advance.
        let cursor = arena[sink].cursor;
        if cursor < arena[sink].sources.len() {
            arena[sink].sources.insert(cursor, source);
        } else {
            arena[sink].sources.push(source);
        }
        arena[sink].cursor += 1;
        if !arena[source].sinks.contains(&sink) {
            arena[source].sinks.push(sink);
        }

        arena[source]
            .lazy
            .as_ref()
            .map(|lazy| !lazy.started.get())
            .unwrap_or(false)
    };

    if needs_lazy_start {
        start_lazy(root, source);
    }
}

fn start_lazy(root: &Root, source: NodeId) {
    let start_fn = {
        let arena = root.arena.borrow();
        let Some(lazy) = arena.get(source).and_then(|n| n.lazy.as_ref()) else {
            return;
        };
        if lazy.started.get() {
            return;
        }
        lazy.started.set(true);
        lazy.start.borrow_mut().take()
    };
    if let Some(mut start_fn) = start_fn {
        start_fn(source, root);
    }
}

/// Removes every source edge beyond the read cursor: dependencies that were
/// not re-read during the last recomputation. This is how conditional
/// dependencies shrink the graph. Called once a recomputation finishes.
pub(crate) fn trim_sources(root: &Root, sink: NodeId) {
    let stale: Vec<NodeId> = {
        let mut arena = root.arena.borrow_mut();
        if !arena.contains_key(sink) {
            return;
        }
        let cursor = arena[sink].cursor;
        let stale = arena[sink].sources.split_off(cursor);
        arena[sink].cursor = 0;
        stale
    };
    for source in stale {
        unlink(root, source, sink);
    }
}

/// Removes the edge `source -> sink`, if present, from both endpoints. If
/// the source's sink list becomes empty and it carries a lazy `stop`
/// callback, runs it (§4.1 `unlink`).
pub(crate) fn unlink(root: &Root, source: NodeId, sink: NodeId) {
    {
        let mut arena = root.arena.borrow_mut();
        if let Some(node) = arena.get_mut(sink) {
            node.sources.retain(|&s| s != source);
        }
        if let Some(node) = arena.get_mut(source) {
            node.sinks.retain(|&s| s != sink);
        }
    }
    maybe_stop_lazy(root, source);
}

pub(crate) fn maybe_stop_lazy(root: &Root, source: NodeId) {
    let stop = {
        let arena = root.arena.borrow();
        let Some(node) = arena.get(source) else {
            return;
        };
        if !node.sinks.is_empty() {
            return;
        }
        let Some(lazy) = node.lazy.as_ref() else {
            return;
        };
        if !lazy.started.get() {
            return;
        }
        lazy.started.set(false);
        lazy.stop.borrow_mut().take()
    };
    if let Some(stop) = stop {
        stop();
    }
}

/// Push-side walk: a source's value just changed. Flags direct deriving
/// sinks `DIRTY` (and their transitive sinks `CHECK`), flags direct
/// terminal-effect sinks `DIRTY` and enqueues them, and aborts any `Task`
/// sink whose computation is currently in flight (§4.1 `propagate`, §5
/// cancellation: "any propagation that touches a running Task aborts it").
#[cfg_attr(feature = "trace", tracing::instrument(level = "trace", skip(root)))]
pub(crate) fn propagate(root: &Root, source: NodeId) {
    let sinks = {
        let arena = root.arena.borrow();
        match arena.get(source) {
            Some(n) => n.sinks.clone(),
            None => return,
        }
    };
    for sink in sinks {
        propagate_to_sink(root, sink, true);
    }
}

fn propagate_to_sink(root: &Root, sink: NodeId, is_direct: bool) {
    let (is_effect, is_deriving, state) = {
        let arena = root.arena.borrow();
        let Some(node) = arena.get(sink) else {
            return;
        };
        (node.body.is_effect(), node.body.is_deriving(), node.state)
    };

    if is_effect {
        if state != NodeState::Dirty {
            set_state(root, sink, NodeState::Dirty);
            root.enqueue_effect(sink);
        }
    } else if is_deriving {
        // A direct sink of the changed source is now known-dirty even if it
        // was previously only `Check`; a transitive sink only needs marking
        // the first time it is reached (already `Check`/`Dirty` ⇒ stop).
        let should_mark = if is_direct {
            matches!(state, NodeState::Clean | NodeState::Check)
        } else {
            state == NodeState::Clean
        };
        if should_mark {
            let next = if is_direct { NodeState::Dirty } else { NodeState::Check };
            set_state(root, sink, next);
            let grandsinks = {
                let arena = root.arena.borrow();
                arena[sink].sinks.clone()
            };
            for grandsink in grandsinks {
                propagate_to_sink(root, grandsink, false);
            }
        }
    }

    maybe_abort_task(root, sink);
}

fn maybe_abort_task(root: &Root, id: NodeId) {
    let abort = {
        let mut arena = root.arena.borrow_mut();
        let Some(node) = arena.get_mut(id) else {
            return;
        };
        let NodeBody::Task(task) = &mut node.body else {
            return;
        };
        task.abort.take()
    };
    if let Some(abort) = abort {
        abort();
    }
}

/// Attaches a lazy start/stop lifecycle to an already-created node. Used by
/// `Sensor` and externally-driven `Collection`, both of which are plain
/// `State`-shaped sources whose value only becomes live once something
/// tracks them (§3 "Lifecycle").
pub(crate) fn set_lazy(root: &Root, id: NodeId, lazy: LazyLifecycle) {
    if let Some(node) = root.arena.borrow_mut().get_mut(id) {
        node.lazy = Some(lazy);
    }
}

pub(crate) fn set_state(root: &Root, id: NodeId, state: NodeState) {
    if let Some(node) = root.arena.borrow_mut().get_mut(id) {
        node.state = state;
    }
}

pub(crate) fn get_state(root: &Root, id: NodeId) -> NodeState {
    root.arena
        .borrow()
        .get(id)
        .map(|n| n.state)
        .unwrap_or(NodeState::Clean)
}

/// Pull-side walk: resolves `id` to `CLEAN`, recomputing if necessary
/// (§4.1 `refresh`). Invoked lazily from every `value()`/`get()` call site.
#[cfg_attr(feature = "trace", tracing::instrument(level = "trace", skip(root)))]
pub(crate) fn refresh(root: &Root, id: NodeId) -> Result<(), ReactiveError> {
    loop {
        match get_state(root, id) {
            NodeState::Clean => return Ok(()),
            NodeState::Running => {
                return Err(ReactiveError::CircularDependency { node: node_label(root, id) })
            }
            NodeState::Check => {
                let sources = {
                    let arena = root.arena.borrow();
                    arena.get(id).map(|n| n.sources.clone()).unwrap_or_default()
                };
                for source in sources {
                    let deriving = {
                        let arena = root.arena.borrow();
                        arena.get(source).map(|n| n.body.is_deriving()).unwrap_or(false)
                    };
                    if deriving {
                        refresh(root, source)?;
                    }
                    if get_state(root, id) == NodeState::Dirty {
                        break;
                    }
                }
                if get_state(root, id) != NodeState::Dirty {
                    set_state(root, id, NodeState::Clean);
                    return Ok(());
                }
                // Falls through: loop again, now observing DIRTY.
            }
            NodeState::Dirty => {
                run_update(root, id)?;
                return Ok(());
            }
        }
    }
}

fn node_label(root: &Root, id: NodeId) -> NodeLabel {
    root.arena
        .borrow()
        .get(id)
        .map(|n| n.label.clone())
        .unwrap_or_else(|| NodeLabel::new("<disposed>"))
}

fn run_update(root: &Root, id: NodeId) -> Result<(), ReactiveError> {
    let kind = {
        let arena = root.arena.borrow();
        match arena.get(id).map(|n| &n.body) {
            Some(NodeBody::Memo(_)) => 0,
            Some(NodeBody::Task(_)) => 1,
            Some(NodeBody::Effect(_)) => 2,
            _ => return Ok(()),
        }
    };
    match kind {
        0 => run_derived_update(root, id),
        1 => crate::task::refresh_task_node(root, id),
        2 => {
            run_effect_update(root, id);
            Ok(())
        }
        _ => unreachable!(),
    }
}

/// Disposes every child owner created by the last run of `id` and runs its
/// registered cleanups (LIFO), before it runs again. Shared by Memo/Task/
/// Effect recomputation (§4.3).
pub(crate) fn dispose_children_and_cleanup(root: &Root, id: NodeId) {
    let children = {
        let mut arena = root.arena.borrow_mut();
        let Some(node) = arena.get_mut(id) else {
            return;
        };
        std::mem::take(&mut node.children)
    };
    for child in children {
        crate::ownership::dispose(root, child);
    }
    let cleanups = {
        let mut arena = root.arena.borrow_mut();
        let Some(node) = arena.get_mut(id) else {
            return;
        };
        std::mem::replace(&mut node.cleanups, CleanupSlot::Empty)
    };
    cleanups.run();
}

fn run_derived_update(root: &Root, id: NodeId) -> Result<(), ReactiveError> {
    #[cfg(feature = "trace")]
    tracing::trace!(?id, "recomputing memo");
    set_state(root, id, NodeState::Running);
    dispose_children_and_cleanup(root, id);
    if let Some(node) = root.arena.borrow_mut().get_mut(id) {
        node.cursor = 0;
    }

    let mut compute = root.arena.borrow_mut().get_mut(id).and_then(|n| match &mut n.body {
        NodeBody::Memo(d) => d.compute.take(),
        _ => None,
    });
    let prev_value = root.arena.borrow_mut().get_mut(id).and_then(|n| match &mut n.body {
        NodeBody::Memo(d) => d.value.take(),
        _ => None,
    });

    let prev_sink = root.active_sink.replace(Some(id));
    let prev_owner = root.active_owner.replace(Some(id));
    let outcome = compute.as_mut().map(|f| f(root, prev_value));
    root.active_sink.set(prev_sink);
    root.active_owner.set(prev_owner);

    trim_sources(root, id);

    let Some(outcome) = outcome else {
        set_state(root, id, NodeState::Clean);
        return Ok(());
    };

    {
        let mut arena = root.arena.borrow_mut();
        if let Some(node) = arena.get_mut(id) {
            if let NodeBody::Memo(d) = &mut node.body {
                d.compute = compute;
                d.value = Some(outcome.value);
                d.error = outcome.error.clone();
            }
            node.state = NodeState::Clean;
        }
    }

    if let Some(err) = outcome.error {
        return Err(err);
    }
    if outcome.changed {
        propagate(root, id);
    }
    Ok(())
}

fn run_effect_update(root: &Root, id: NodeId) {
    set_state(root, id, NodeState::Running);
    dispose_children_and_cleanup(root, id);
    if let Some(node) = root.arena.borrow_mut().get_mut(id) {
        node.cursor = 0;
    }

    let mut run = root.arena.borrow_mut().get_mut(id).and_then(|n| match &mut n.body {
        NodeBody::Effect(e) => e.run.take(),
        _ => None,
    });

    let prev_sink = root.active_sink.replace(Some(id));
    let prev_owner = root.active_owner.replace(Some(id));
    if let Some(run) = run.as_mut() {
        run(root, id);
    }
    root.active_sink.set(prev_sink);
    root.active_owner.set(prev_owner);

    trim_sources(root, id);

    if let Some(node) = root.arena.borrow_mut().get_mut(id) {
        if let NodeBody::Effect(e) = &mut node.body {
            e.run = run;
        }
        node.state = NodeState::Clean;
    }
}

/// Runs `f` with the active sink cleared, so any `value()` reads inside
/// create no edges (§4.1 "Untracked execution").
pub(crate) fn untrack<R>(root: &Root, f: impl FnOnce() -> R) -> R {
    let prev = root.active_sink.replace(None);
    let result = f();
    root.active_sink.set(prev);
    result
}

/// If an active sink is tracking, records `source -> active sink`. Used by
/// every `value()`/`get()` implementation.
pub(crate) fn track(root: &Root, source: NodeId) {
    if let Some(sink) = root.active_sink.get() {
        link(root, source, sink);
    }
}
