//! `Collection`: externally-driven and derived reactive keyed sequences
//! (§4.5 "Collection").
//!
//! Both flavors share one reading interface (`at`/`by_key`/`keys`/`len`).
//! An externally-driven `Collection` is a lazy source, structurally
//! identical to [`crate::Sensor`]: its `start` callback runs once something
//! first tracks it and receives a [`CollectionApplier`] through which the
//! driver pushes adds/changes/removes. A derived `Collection`
//! (`source.derive_collection(f)`) is a read-only mapped view over a `List`
//! or another `Collection`: a driver `Effect` watches only the source's key
//! order and, on a structural change, creates or disposes per-item `Memo`s
//! (or `Task`s, for an async mapper) that each independently track their own
//! source item — so a value change in one item recomputes only that item's
//! node, never the whole collection (§4.5 "Derived").

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::diff::{diff_keys, DiffOp};
use crate::error::NodeLabel;
use crate::list::List;
use crate::memo::{create_memo_with, Memo};
use crate::ownership::{create_scope, dispose};
use crate::root::Root;
use crate::sensor::{create_sensor_with, Sensor, SensorSetter};
use crate::signal::{create_signal, Signal, StateOptions};
use crate::task::{create_task_with, Task};

/// A single mutation handed to a [`CollectionApplier`] (§4.5
/// "externally-driven"): the "diff-shaped value" the `start` callback's
/// driver pushes through.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CollectionChange<V> {
    Add { key: String, value: V },
    Change { key: String, value: V },
    Remove { key: String },
}

/// Initial items for [`create_collection`].
pub struct CollectionOptions<V> {
    pub value: Vec<(String, V)>,
}

impl<V> Default for CollectionOptions<V> {
    fn default() -> Self {
        Self { value: Vec::new() }
    }
}

/// A node backing one item in a `Collection`: `State` for the
/// externally-driven flavor, `Memo`/`Task` for the derived one (sync/async
/// mapper respectively). Just a handle, so this is cheap to copy regardless
/// of `V`.
enum Item<V> {
    State(Signal<V>),
    Memo(Memo<V>),
    Task(Task<V>),
}

impl<V> Clone for Item<V> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<V> Copy for Item<V> {}

impl<V: 'static> Item<V> {
    /// Reads the value, linking an edge to the active sink (every
    /// variant's own `get` already does this).
    fn get(self) -> V
    where
        V: Clone,
    {
        match self {
            Item::State(s) => s.get(),
            Item::Memo(m) => m.get(),
            Item::Task(t) => t.get(),
        }
    }

    fn track(self) {
        match self {
            Item::State(s) => s.track(),
            Item::Memo(m) => m.track(),
            Item::Task(t) => t.track(),
        }
    }

    fn dispose(self) {
        let root = Root::global();
        let id = match self {
            Item::State(s) => s.id(),
            Item::Memo(m) => m.id(),
            Item::Task(t) => t.id(),
        };
        dispose(root, id);
    }
}

/// A setter handed to an externally-driven `Collection`'s `start` callback:
/// applies a batch of [`CollectionChange`]s, mutating the side table and
/// pushing one new key order through the structural source (whose `equals`
/// is `always_false`, so every call propagates — §4.5 "externally-driven").
pub struct CollectionApplier<V> {
    entries: Rc<RefCell<IndexMap<String, Item<V>>>>,
    setter: SensorSetter<Vec<String>>,
}

impl<V: PartialEq + Clone + 'static> CollectionApplier<V> {
    pub fn apply(&self, changes: Vec<CollectionChange<V>>) {
        {
            let mut entries = self.entries.borrow_mut();
            for change in changes {
                match change {
                    CollectionChange::Add { key, value } => {
                        entries.insert(key, Item::State(create_signal(value)));
                    }
                    CollectionChange::Change { key, value } => match entries.get(&key).copied() {
                        Some(Item::State(signal)) => signal.set(value),
                        _ => {
                            entries.insert(key, Item::State(create_signal(value)));
                        }
                    },
                    CollectionChange::Remove { key } => {
                        if let Some(item) = entries.shift_remove(&key) {
                            item.dispose();
                        }
                    }
                }
            }
        }
        let order: Vec<String> = self.entries.borrow().keys().cloned().collect();
        self.setter.set(order);
    }
}

/// The structural backbone of a `Collection`: either a lazy externally-
/// driven source or a plain `Signal` written by the derived flavor's driver
/// effect. Both expose the same "current key order, tracked" read.
enum Structural {
    External(Sensor<Vec<String>>),
    Derived(Signal<Vec<String>>),
}

impl Structural {
    fn keys(&self) -> Vec<String> {
        match self {
            Structural::External(s) => s.get(),
            Structural::Derived(s) => s.get(),
        }
    }
}

/// A handle to a reactive keyed sequence backed either by an external
/// driver or derived from another keyed source.
pub struct Collection<V> {
    entries: Rc<RefCell<IndexMap<String, Item<V>>>>,
    structural: Rc<Structural>,
    label: NodeLabel,
}

impl<V> Clone for Collection<V> {
    fn clone(&self) -> Self {
        Collection { entries: self.entries.clone(), structural: self.structural.clone(), label: self.label.clone() }
    }
}

/// Creates an externally-driven `Collection` (§4.5 "Externally-driven").
///
/// `start` runs only once something first tracks this collection's keys or
/// items, receiving a [`CollectionApplier`] through which to push
/// adds/changes/removes; its return value is a stop callback, run once the
/// last sink detaches — exactly [`crate::create_sensor`]'s lifecycle.
#[track_caller]
pub fn create_collection<V: PartialEq + Clone + 'static>(
    options: CollectionOptions<V>,
    mut start: impl FnMut(CollectionApplier<V>) -> Box<dyn FnOnce()> + 'static,
) -> Collection<V> {
    let label = NodeLabel::new("Collection");
    let mut order = Vec::with_capacity(options.value.len());
    let mut initial = IndexMap::with_capacity(options.value.len());
    for (key, value) in options.value {
        order.push(key.clone());
        initial.insert(key, Item::State(create_signal(value)));
    }
    let entries = Rc::new(RefCell::new(initial));

    let entries_for_start = entries.clone();
    let start_thunk = move |setter: SensorSetter<Vec<String>>| -> Box<dyn FnOnce()> {
        start(CollectionApplier { entries: entries_for_start.clone(), setter })
    };
    let structural = create_sensor_with(Some(order), StateOptions::always_differs(), start_thunk);

    Collection { entries, structural: Rc::new(Structural::External(structural)), label }
}

/// A keyed reactive source a `Collection` can be derived from: implemented
/// by [`List`] and by `Collection` itself, so derived collections chain
/// (§4.5 "Derived collections chain").
pub(crate) trait KeyedSource<T: Clone + 'static> {
    fn keys_tracked(&self) -> Vec<String>;
    fn item_get_tracked(&self, key: &str) -> Option<T>;
}

impl<V: PartialEq + Clone + 'static> KeyedSource<V> for List<V> {
    fn keys_tracked(&self) -> Vec<String> {
        self.keys()
    }

    fn item_get_tracked(&self, key: &str) -> Option<V> {
        self.by_key(key).map(|s| s.get())
    }
}

impl<V: PartialEq + Clone + 'static> KeyedSource<V> for Collection<V> {
    fn keys_tracked(&self) -> Vec<String> {
        self.keys()
    }

    fn item_get_tracked(&self, key: &str) -> Option<V> {
        self.by_key_item(key).map(Item::get)
    }
}

/// Derives a `Collection` that maps each item of `source` through a
/// synchronous `f`, via a per-item `Memo` (§4.5 "Derived").
pub(crate) fn build_derived_sync<S, T, U, F>(source: S, f: F) -> Collection<U>
where
    S: KeyedSource<T> + Clone + 'static,
    T: Clone + 'static,
    U: PartialEq + Clone + 'static,
    F: Fn(T) -> U + Clone + 'static,
{
    let label = NodeLabel::new("Collection");
    let entries: Rc<RefCell<IndexMap<String, Item<U>>>> = Rc::new(RefCell::new(IndexMap::new()));
    let last_keys: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let keys_signal = create_signal(Vec::<String>::new());
    // Per-item nodes must outlive the driver effect's own re-runs (an
    // `Effect` disposes all of its children before each run): give them a
    // stable home scope instead of letting them attach to the effect.
    let item_home = create_scope(|| {});

    {
        let source = source.clone();
        let entries = entries.clone();
        let last_keys = last_keys.clone();
        let f = f.clone();
        crate::effect::create_effect(move || {
            let new_keys = source.keys_tracked();
            let old_keys = last_keys.borrow().clone();
            for op in diff_keys(&old_keys, &new_keys) {
                match op {
                    DiffOp::Remove { key, .. } => {
                        if let Some(item) = entries.borrow_mut().shift_remove(&key) {
                            item.dispose();
                        }
                    }
                    DiffOp::Create { key, .. } => {
                        let source_for_item = source.clone();
                        let f = f.clone();
                        let key_for_item = key.clone();
                        let root = Root::global();
                        let prev_owner = root.active_owner.replace(Some(item_home.id));
                        let memo = create_memo_with(
                            move |_prev: Option<U>| {
                                let value = source_for_item
                                    .item_get_tracked(&key_for_item)
                                    .expect("key present while its per-item memo is alive");
                                f(value)
                            },
                            StateOptions { equals: Some(Box::new(U::eq)), guard: None },
                        );
                        root.active_owner.set(prev_owner);
                        entries.borrow_mut().insert(key, Item::Memo(memo));
                    }
                    DiffOp::Move { .. } => {}
                }
            }
            *last_keys.borrow_mut() = new_keys.clone();
            keys_signal.set(new_keys);
        });
    }

    Collection { entries, structural: Rc::new(Structural::Derived(keys_signal)), label }
}

/// Derives a `Collection` that maps each item of `source` through an async
/// `f`, via a per-item `Task` (§4.5 "Derived": "Task if async").
pub(crate) fn build_derived_async<S, T, U, F, Fut>(source: S, f: F) -> Collection<U>
where
    S: KeyedSource<T> + Clone + 'static,
    T: Clone + 'static,
    U: PartialEq + Clone + 'static,
    F: Fn(T) -> Fut + Clone + 'static,
    Fut: Future<Output = U> + 'static,
{
    let label = NodeLabel::new("Collection");
    let entries: Rc<RefCell<IndexMap<String, Item<U>>>> = Rc::new(RefCell::new(IndexMap::new()));
    let last_keys: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let keys_signal = create_signal(Vec::<String>::new());
    let item_home = create_scope(|| {});

    {
        let source = source.clone();
        let entries = entries.clone();
        let last_keys = last_keys.clone();
        let f = f.clone();
        crate::effect::create_effect(move || {
            let new_keys = source.keys_tracked();
            let old_keys = last_keys.borrow().clone();
            for op in diff_keys(&old_keys, &new_keys) {
                match op {
                    DiffOp::Remove { key, .. } => {
                        if let Some(item) = entries.borrow_mut().shift_remove(&key) {
                            item.dispose();
                        }
                    }
                    DiffOp::Create { key, .. } => {
                        let source_for_item = source.clone();
                        let f = f.clone();
                        let key_for_item = key.clone();
                        let root = Root::global();
                        let prev_owner = root.active_owner.replace(Some(item_home.id));
                        let task = create_task_with(
                            move || {
                                let value = source_for_item
                                    .item_get_tracked(&key_for_item)
                                    .expect("key present while its per-item task is alive");
                                let f = f.clone();
                                async move { f(value).await }
                            },
                            StateOptions { equals: Some(Box::new(U::eq)), guard: None },
                        );
                        root.active_owner.set(prev_owner);
                        entries.borrow_mut().insert(key, Item::Task(task));
                    }
                    DiffOp::Move { .. } => {}
                }
            }
            *last_keys.borrow_mut() = new_keys.clone();
            keys_signal.set(new_keys);
        });
    }

    Collection { entries, structural: Rc::new(Structural::Derived(keys_signal)), label }
}

impl<V: PartialEq + Clone + 'static> List<V> {
    /// Derives a read-only `Collection` mapping each item through sync `f`
    /// (§4.5 "Derived").
    pub fn derive_collection<U, F>(&self, f: F) -> Collection<U>
    where
        U: PartialEq + Clone + 'static,
        F: Fn(V) -> U + Clone + 'static,
    {
        build_derived_sync(self.clone(), f)
    }

    /// Derives a read-only `Collection` mapping each item through async `f`,
    /// one `Task` per item (§4.5 "Derived").
    pub fn derive_collection_async<U, F, Fut>(&self, f: F) -> Collection<U>
    where
        U: PartialEq + Clone + 'static,
        F: Fn(V) -> Fut + Clone + 'static,
        Fut: Future<Output = U> + 'static,
    {
        build_derived_async(self.clone(), f)
    }
}

impl<V: PartialEq + Clone + 'static> Collection<V> {
    /// Derives a read-only `Collection` mapping each item through sync `f`;
    /// derived collections chain (§4.5, §8 scenario 6).
    pub fn derive_collection<U, F>(&self, f: F) -> Collection<U>
    where
        U: PartialEq + Clone + 'static,
        F: Fn(V) -> U + Clone + 'static,
    {
        build_derived_sync(self.clone(), f)
    }

    /// Derives a read-only `Collection` mapping each item through async `f`.
    pub fn derive_collection_async<U, F, Fut>(&self, f: F) -> Collection<U>
    where
        U: PartialEq + Clone + 'static,
        F: Fn(V) -> Fut + Clone + 'static,
        Fut: Future<Output = U> + 'static,
    {
        build_derived_async(self.clone(), f)
    }
}

impl<V: 'static> Collection<V> {
    fn by_key_item(&self, key: &str) -> Option<Item<V>> {
        let found = self.entries.borrow().get(key).copied();
        if found.is_none() {
            // A miss links an edge to the structural source, so a later
            // add of this key wakes it — mirrors `List::by_key`.
            let _ = self.structural.keys();
        }
        found
    }

    /// The item at `index`, if any. Tracks the structural key order.
    pub fn at(&self, index: usize) -> Option<V>
    where
        V: Clone,
    {
        let keys = self.structural.keys();
        let key = keys.get(index)?;
        self.entries.borrow().get(key).copied().map(Item::get)
    }

    /// The item with the given key, if any. A miss tracks the structural
    /// key order.
    pub fn by_key(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        self.by_key_item(key).map(Item::get)
    }

    /// Links an edge to the item with `key` without reading its value, if
    /// it currently exists.
    pub fn track_key(&self, key: &str) {
        if let Some(item) = self.by_key_item(key) {
            item.track();
        }
    }

    /// The current key order. Tracks the structural source.
    pub fn keys(&self) -> Vec<String> {
        self.structural.keys()
    }

    /// The current length. Tracks the structural source.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::*;

    #[test]
    fn externally_driven_collection_starts_lazily_and_applies_changes() {
        let _ = create_root(|| {
            let starts = Rc::new(Cell::new(0));
            let starts_c = starts.clone();
            let collection = create_collection(CollectionOptions { value: vec![("a".into(), 1)] }, move |applier| {
                starts_c.set(starts_c.get() + 1);
                applier.apply(vec![CollectionChange::Add { key: "b".into(), value: 2 }]);
                Box::new(|| {})
            });

            assert_eq!(starts.get(), 0, "must not start before first track");
            assert_eq!(collection.keys(), vec!["a".to_string()], "unread structural source hasn't started yet");

            create_effect({
                let collection = collection.clone();
                move || {
                    let _ = collection.keys();
                }
            });
            assert_eq!(starts.get(), 1);
            assert_eq!(collection.len(), 2);
            assert_eq!(collection.by_key("b"), Some(2));
        });
    }

    #[test]
    fn derived_collection_maps_values_and_tracks_structural_changes() {
        let _ = create_root(|| {
            let src = create_list(vec![1, 2]);
            let dbl = src.derive_collection(|x| x * 2);
            assert_eq!((0..dbl.len()).filter_map(|i| dbl.at(i)).collect::<Vec<_>>(), vec![2, 4]);

            src.add(3);
            assert_eq!((0..dbl.len()).filter_map(|i| dbl.at(i)).collect::<Vec<_>>(), vec![2, 4, 6]);
        });
    }

    #[test]
    fn derived_collection_chains() {
        let _ = create_root(|| {
            let src = create_list(vec![1, 2]);
            let dbl = src.derive_collection(|x| x * 2);
            let qua = dbl.derive_collection(|x| x * 2);

            assert_eq!((0..qua.len()).filter_map(|i| qua.at(i)).collect::<Vec<_>>(), vec![4, 8]);

            src.add(3);
            assert_eq!((0..qua.len()).filter_map(|i| qua.at(i)).collect::<Vec<_>>(), vec![4, 8, 12]);

            let first_key = src.keys()[0].clone();
            src.remove(&first_key);
            assert_eq!((0..qua.len()).filter_map(|i| qua.at(i)).collect::<Vec<_>>(), vec![8, 12]);
        });
    }

    #[test]
    fn derived_collection_item_recomputes_independently_of_siblings() {
        let _ = create_root(|| {
            let src = create_list(vec![1, 2]);
            let runs = Rc::new(Cell::new(0));
            let runs_c = runs.clone();
            let dbl = src.derive_collection(move |x| {
                runs_c.set(runs_c.get() + 1);
                x * 2
            });
            let _ = (0..dbl.len()).filter_map(|i| dbl.at(i)).count();
            let before = runs.get();

            let first_key = src.keys()[0].clone();
            src.by_key(&first_key).unwrap().set(100);
            let _ = dbl.at(0);
            assert_eq!(runs.get(), before + 1, "only the changed item's per-item Memo should recompute");
        });
    }
}
