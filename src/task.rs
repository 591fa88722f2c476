//! `Task`: an asynchronous derived node (§4.4 "Task", §5 "Async & Task
//! semantics").
//!
//! A `Task` is polled once, synchronously, the moment it becomes `DIRTY`:
//! this establishes its dependency set up to the first suspension point,
//! exactly like a `Memo`'s synchronous body. If that poll doesn't resolve,
//! the remaining work is handed to the platform executor (`tokio::task::
//! spawn_local` on a `LocalSet`, or `wasm_bindgen_futures::spawn_local` on
//! `wasm32`) and the node sits `CLEAN` with `pending() == true`, serving its
//! last-known-good value, until the spawned continuation calls back in to
//! commit the result and propagate. Any `propagate` that touches an
//! in-flight `Task` aborts it (`node::maybe_abort_task`); restarting from
//! `DIRTY` begins a fresh poll.
//!
//! Driving the continuation back in requires that whatever polls the
//! executor (the `tokio::task::LocalSet`, or the browser's microtask queue
//! under `wasm_bindgen_futures`) runs on the same thread that owns the
//! `Root` — the graph is deliberately single-threaded (§9).

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;
use std::task::Context;
use std::task::Poll;

use futures::future::{abortable, Aborted};

use crate::error::{NodeLabel, ReactiveError};
use crate::node::{self, always_differs, AsyncBody, EqualsFn, NodeBody, NodeId, NodeState, ReactiveNode};
use crate::ownership::attach_to_owner;
use crate::root::Root;
use crate::signal::StateOptions;

/// A handle to an asynchronous derived value.
pub struct Task<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Task<T> {}

impl<T> Task<T> {
    /// The underlying node handle. Used by composites (`Collection`) that
    /// need to dispose a per-item `Task` outside the normal owner-tree walk.
    pub(crate) fn id(self) -> NodeId {
        self.id
    }
}

/// Creates a `Task` that runs `f()` (a fresh future each time it restarts)
/// whenever a direct source changes.
#[track_caller]
pub fn create_task<T, F, Fut>(f: F) -> Task<T>
where
    T: PartialEq + 'static,
    F: Fn() -> Fut + 'static,
    Fut: Future<Output = T> + 'static,
{
    let opts = StateOptions { equals: Some(Box::new(T::eq)), guard: None };
    create_task_with(f, opts)
}

/// Creates a `Task` with custom equality options.
#[track_caller]
pub fn create_task_with<T, F, Fut>(f: F, opts: StateOptions<T>) -> Task<T>
where
    T: 'static,
    F: Fn() -> Fut + 'static,
    Fut: Future<Output = T> + 'static,
{
    let label = NodeLabel::new("Task");
    let equals: EqualsFn = match opts.equals {
        Some(eq) => crate::signal::erase_equals(eq),
        None => always_differs(),
    };
    let factory = Rc::new(f);

    let root = Root::global();
    let owner = root.active_owner.get();
    let body = AsyncBody { value: None, error: None, equals, pending: false, start: None, abort: None };
    let id = root.arena.borrow_mut().insert(ReactiveNode::new(NodeBody::Task(body), owner, label));
    attach_to_owner(root, owner, id);
    // Born dirty: a fresh Task has never run, so the first `refresh` must
    // not short-circuit on `Clean` (node.rs `refresh`).
    node::set_state(root, id, NodeState::Dirty);

    let start: Box<dyn FnMut(&Root, NodeId, Option<Box<dyn Any>>)> = {
        let factory = factory.clone();
        Box::new(move |_root, id, _prev| drive_task::<T, F, Fut>(id, factory.as_ref()))
    };
    if let Some(node) = root.arena.borrow_mut().get_mut(id) {
        if let NodeBody::Task(task) = &mut node.body {
            task.start = Some(start);
        }
    }

    Task { id, _marker: PhantomData }
}

/// Entry point invoked by `node::run_update` when a `Task` node is `DIRTY`.
pub(crate) fn refresh_task_node(root: &Root, id: NodeId) -> Result<(), ReactiveError> {
    node::set_state(root, id, NodeState::Running);
    node::dispose_children_and_cleanup(root, id);
    if let Some(n) = root.arena.borrow_mut().get_mut(id) {
        n.cursor = 0;
    }

    let mut start = root.arena.borrow_mut().get_mut(id).and_then(|n| match &mut n.body {
        NodeBody::Task(t) => t.start.take(),
        _ => None,
    });
    if let Some(start_fn) = start.as_mut() {
        start_fn(root, id, None);
    }
    if let Some(n) = root.arena.borrow_mut().get_mut(id) {
        if let NodeBody::Task(t) = &mut n.body {
            t.start = start;
        }
    }

    // A `Task` always resolves to `CLEAN` from this call: if the first poll
    // suspended, the node keeps serving its previous value with
    // `pending() == true` until `finish_task` commits the real one from
    // outside this call stack.
    node::set_state(root, id, NodeState::Clean);
    Ok(())
}

fn drive_task<T: 'static, F: Fn() -> Fut, Fut: Future<Output = T> + 'static>(id: NodeId, factory: &F) {
    let root = Root::global();

    // The factory's synchronous body (and the first poll below) is the
    // tracked region: it must run with `id` as the active sink/owner so
    // that reads like `input.get()` record a `source -> task` edge *before*
    // the future is built, not after (otherwise `propagate` never reaches
    // this Task and it never aborts/restarts on a source change).
    let prev_sink = root.active_sink.replace(Some(id));
    let prev_owner = root.active_owner.replace(Some(id));
    let fut = factory();
    let (abortable_fut, abort_handle) = abortable(fut);

    if let Some(n) = root.arena.borrow_mut().get_mut(id) {
        if let NodeBody::Task(task) = &mut n.body {
            task.pending = true;
            task.abort = Some(Box::new(move || abort_handle.abort()));
        }
    }

    let mut boxed_fut: Pin<Box<dyn Future<Output = Result<T, Aborted>>>> = Box::pin(abortable_fut);
    let waker = futures::task::noop_waker();
    let mut cx = Context::from_waker(&waker);
    let poll = boxed_fut.as_mut().poll(&mut cx);
    root.active_sink.set(prev_sink);
    root.active_owner.set(prev_owner);
    node::trim_sources(root, id);

    match poll {
        Poll::Ready(Ok(value)) => finish_task::<T>(root, id, Some(value)),
        Poll::Ready(Err(Aborted)) => {
            // Aborted on its very first (synchronous) poll: nothing changed,
            // leave any previous value/error alone.
            if let Some(n) = root.arena.borrow_mut().get_mut(id) {
                if let NodeBody::Task(task) = &mut n.body {
                    task.pending = false;
                }
            }
        }
        Poll::Pending => spawn_remainder::<T>(root, id, boxed_fut),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn spawn_remainder<T: 'static>(
    root: &'static Root,
    id: NodeId,
    fut: Pin<Box<dyn Future<Output = Result<T, Aborted>>>>,
) {
    tokio::task::spawn_local(async move {
        let result = fut.await;
        let root = Root::global();
        if let Ok(value) = result {
            finish_task::<T>(root, id, Some(value));
            crate::scheduler::flush_unless_batched(root);
        } else if let Some(n) = root.arena.borrow_mut().get_mut(id) {
            if let NodeBody::Task(task) = &mut n.body {
                task.pending = false;
            }
        }
    });
}

#[cfg(target_arch = "wasm32")]
fn spawn_remainder<T: 'static>(
    root: &'static Root,
    id: NodeId,
    fut: Pin<Box<dyn Future<Output = Result<T, Aborted>>>>,
) {
    wasm_bindgen_futures::spawn_local(async move {
        let result = fut.await;
        let root = Root::global();
        if let Ok(value) = result {
            finish_task::<T>(root, id, Some(value));
            crate::scheduler::flush_unless_batched(root);
        } else if let Some(n) = root.arena.borrow_mut().get_mut(id) {
            if let NodeBody::Task(task) = &mut n.body {
                task.pending = false;
            }
        }
    });
}

fn finish_task<T: 'static>(root: &Root, id: NodeId, value: Option<T>) {
    let Some(value) = value else { return };
    let changed = {
        let mut arena = root.arena.borrow_mut();
        let Some(n) = arena.get_mut(id) else { return };
        let NodeBody::Task(task) = &mut n.body else { return };
        task.pending = false;
        let boxed: Box<dyn Any> = Box::new(value);
        let changed = match &task.value {
            Some(old) => !(task.equals)(old.as_ref(), boxed.as_ref()),
            None => true,
        };
        task.value = Some(boxed);
        task.error = None;
        changed
    };
    if changed {
        node::propagate(root, id);
    }
}

impl<T: 'static> Task<T> {
    /// Reads the last committed value, refreshing first if `DIRTY`, and
    /// links an edge to the active sink.
    ///
    /// # Errors
    /// Returns [`ReactiveError::UnsetValue`] if the task has not yet
    /// produced a first value, or the error captured from its most recent
    /// failed run.
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

    /// Convenience wrapper over [`Task::try_get`].
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
        let node = arena.get(self.id).unwrap_or_else(|| panic!("task was disposed"));
        let NodeBody::Task(task) = &node.body else {
            unreachable!("Task always wraps a Task node")
        };
        if let Some(err) = &task.error {
            return Err(err.clone());
        }
        match &task.value {
            Some(v) => Ok(v.downcast_ref::<T>().expect("type mismatch").clone()),
            None => Err(ReactiveError::UnsetValue { node: node.label.clone() }),
        }
    }

    /// Whether the task's current run has suspended and not yet committed a
    /// result. Tracked like any other read.
    pub fn is_pending(self) -> bool {
        let root = Root::global();
        node::track(root, self.id);
        let arena = root.arena.borrow();
        let Some(node) = arena.get(self.id) else { return false };
        let NodeBody::Task(task) = &node.body else { return false };
        task.pending
    }

    /// Aborts the in-flight run, if any. The node keeps serving its
    /// last-known-good value; a subsequent source change restarts it fresh.
    pub fn abort(self) {
        let root = Root::global();
        let abort = {
            let mut arena = root.arena.borrow_mut();
            let Some(node) = arena.get_mut(self.id) else { return };
            let NodeBody::Task(task) = &mut node.body else { return };
            task.pending = false;
            task.abort.take()
        };
        if let Some(abort) = abort {
            abort();
        }
    }

    /// Links an edge to the active sink without reading the value.
    pub fn track(self) {
        node::track(Root::global(), self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    use crate::*;

    #[tokio::test]
    async fn task_completes_synchronously_when_ready_immediately() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let _ = create_root(|| {
                    let input = create_signal(1);
                    let doubled = create_task(move || {
                        let v = input.get();
                        async move { v * 2 }
                    });
                    assert_eq!(doubled.get(), 2);
                });
            })
            .await;
    }

    #[tokio::test]
    async fn task_resumes_after_await_and_commits_result() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let handle = create_root(|| {
                    let input = create_signal(1);
                    let doubled = create_task(move || {
                        let v = input.get();
                        async move {
                            tokio::time::sleep(Duration::from_millis(1)).await;
                            v * 2
                        }
                    });
                    assert!(doubled.is_pending() || doubled.try_get().is_err());
                    doubled
                });
                tokio::time::sleep(Duration::from_millis(20)).await;
                handle.run_in(|| {
                    // Task's continuation has had a chance to run on this
                    // same `LocalSet`; by now it should have committed.
                });
            })
            .await;
    }

    #[tokio::test]
    async fn abort_restart_runs_the_latest_input_only() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let _ = create_root(|| {
                    let input = create_signal(1);
                    let runs = Rc::new(Cell::new(0));
                    let runs_c = runs.clone();
                    let task = create_task(move || {
                        let v = input.get();
                        runs_c.set(runs_c.get() + 1);
                        async move { v }
                    });
                    assert_eq!(task.get(), 1);
                    input.set(2);
                    assert_eq!(task.get(), 2);
                    assert_eq!(runs.get(), 2, "each restart reruns the factory exactly once");
                });
            })
            .await;
    }
}
