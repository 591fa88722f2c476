//! `List`: the reactive keyed-sequence composite (§4.5 "List").
//!
//! Like [`crate::store::Store`], a `List` is a plain struct wrapping a
//! structural source (a `Signal<Vec<String>>` holding the current key
//! order) plus a side table of per-item `Signal`s, keyed by a stable string
//! assigned at insertion time rather than by index — so a `sort`/`splice`
//! that only reorders existing items never recreates their per-item
//! `Signal`/`Memo`/`Task` chains (§8 "List: stable keys over sort").

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{NodeLabel, ReactiveError};
use crate::ownership::dispose;
use crate::root::Root;
use crate::signal::{create_signal, Signal};

/// Disposes a removed item's underlying node (§4.5 List `remove`: "unlink
/// and dispose item signal").
fn dispose_item<V: 'static>(signal: Signal<V>) {
    dispose(Root::global(), signal.id());
}

/// How a `List` assigns a key to a newly-added item, when the caller
/// doesn't supply one explicitly via [`List::try_add_with_key`].
enum KeyStrategy {
    /// `"0"`, `"1"`, `"2"`, ... — the default.
    Counter,
    /// `"{prefix}0"`, `"{prefix}1"`, ... — a fixed prefix plus the counter.
    PrefixedCounter(String),
}

impl KeyStrategy {
    fn next(&self, counter: u64) -> String {
        match self {
            KeyStrategy::Counter => counter.to_string(),
            KeyStrategy::PrefixedCounter(prefix) => format!("{prefix}{counter}"),
        }
    }
}

/// A handle to a reactive keyed sequence.
pub struct List<V> {
    entries: Rc<RefCell<Vec<(String, Signal<V>)>>>,
    order: Signal<Vec<String>>,
    counter: Rc<Cell<u64>>,
    key_strategy: Rc<KeyStrategy>,
    label: NodeLabel,
}

impl<V> Clone for List<V> {
    fn clone(&self) -> Self {
        List {
            entries: self.entries.clone(),
            order: self.order,
            counter: self.counter.clone(),
            key_strategy: self.key_strategy.clone(),
            label: self.label.clone(),
        }
    }
}

fn build<V: PartialEq + Clone + 'static>(items: Vec<V>, key_strategy: KeyStrategy) -> List<V> {
    let label = NodeLabel::new("List");
    let counter = Rc::new(Cell::new(0u64));
    let mut entries = Vec::with_capacity(items.len());
    let mut order = Vec::with_capacity(items.len());
    for item in items {
        let key = key_strategy.next(counter.get());
        counter.set(counter.get() + 1);
        order.push(key.clone());
        entries.push((key, create_signal(item)));
    }
    List {
        entries: Rc::new(RefCell::new(entries)),
        order: create_signal(order),
        counter,
        key_strategy: Rc::new(key_strategy),
        label,
    }
}

/// Creates a `List` from `items`, keying each with a monotonic counter
/// (§4.5 List, default key strategy).
#[track_caller]
pub fn create_list<V: PartialEq + Clone + 'static>(items: Vec<V>) -> List<V> {
    build(items, KeyStrategy::Counter)
}

/// Creates a `List` whose keys are `prefix` followed by a monotonic
/// counter, so keys from two independently-created lists never collide if
/// their items are later merged.
#[track_caller]
pub fn create_list_with_prefix<V: PartialEq + Clone + 'static>(
    items: Vec<V>,
    prefix: impl Into<String>,
) -> List<V> {
    build(items, KeyStrategy::PrefixedCounter(prefix.into()))
}

impl<V: PartialEq + Clone + 'static> List<V> {
    /// The item at `index`, if any. Tracks the structural key order: a
    /// `sort`/`splice` that changes what occupies `index` invalidates this,
    /// even when the item's own value hasn't changed.
    pub fn at(&self, index: usize) -> Option<Signal<V>> {
        self.order.track();
        self.entries.borrow().get(index).map(|(_, s)| *s)
    }

    /// The item with the given key, if any. A miss tracks the structural
    /// key order, so a later `add`/`try_add_with_key` of this key wakes it.
    pub fn by_key(&self, key: &str) -> Option<Signal<V>> {
        let found = self.entries.borrow().iter().find(|(k, _)| k == key).map(|(_, s)| *s);
        if found.is_none() {
            self.order.track();
        }
        found
    }

    /// The current key order. Tracks the structural source.
    pub fn keys(&self) -> Vec<String> {
        self.order.get()
    }

    /// The current length. Tracks the structural source.
    pub fn len(&self) -> usize {
        self.order.with(|ks| ks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `value`, assigning it a key per this list's key strategy,
    /// and returns that key.
    pub fn add(&self, value: V) -> String {
        let key = self.key_strategy.next(self.counter.get());
        self.counter.set(self.counter.get() + 1);
        self.entries.borrow_mut().push((key.clone(), create_signal(value)));
        self.order.update(|ks| ks.push(key.clone()));
        key
    }

    /// Appends `value` under an explicit `key`.
    ///
    /// # Errors
    /// Returns [`ReactiveError::DuplicateKey`] if `key` is already present.
    pub fn try_add_with_key(&self, key: impl Into<String>, value: V) -> Result<(), ReactiveError> {
        let key = key.into();
        if self.entries.borrow().iter().any(|(k, _)| k == &key) {
            return Err(ReactiveError::DuplicateKey { node: self.label.clone(), key });
        }
        self.entries.borrow_mut().push((key.clone(), create_signal(value)));
        self.order.update(|ks| ks.push(key));
        Ok(())
    }

    /// Removes the item with `key`, if present, disposing its signal.
    /// Returns whether one was removed.
    pub fn remove(&self, key: &str) -> bool {
        let mut entries = self.entries.borrow_mut();
        let Some(pos) = entries.iter().position(|(k, _)| k == key) else {
            return false;
        };
        let (_, signal) = entries.remove(pos);
        drop(entries);
        self.order.update(|ks| ks.retain(|k| k != key));
        dispose_item(signal);
        true
    }

    /// Removes `delete_count` items starting at `start` and inserts
    /// `replace_with` in their place, returning the keys assigned to the
    /// inserted items (§4.5 `splice`).
    pub fn splice(&self, start: usize, delete_count: usize, replace_with: Vec<V>) -> Vec<String> {
        let mut new_keys = Vec::with_capacity(replace_with.len());
        let mut entries = self.entries.borrow_mut();
        let end = (start + delete_count).min(entries.len());
        let start = start.min(entries.len());
        let mut insertion: Vec<(String, Signal<V>)> = Vec::with_capacity(replace_with.len());
        for value in replace_with {
            let key = self.key_strategy.next(self.counter.get());
            self.counter.set(self.counter.get() + 1);
            new_keys.push(key.clone());
            insertion.push((key, create_signal(value)));
        }
        let removed: Vec<(String, Signal<V>)> = entries.splice(start..end, insertion).collect();
        let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
        drop(entries);
        self.order.set(keys);
        for (_, signal) in removed {
            dispose_item(signal);
        }
        new_keys
    }

    /// Sorts items in place by `cmp`, over each item's current value,
    /// without tearing down and recreating any per-item `Signal` — only the
    /// structural key order changes, and only if the sort actually moved
    /// something (§8 "List: stable keys over sort").
    pub fn sort_by(&self, mut cmp: impl FnMut(&V, &V) -> Ordering) {
        let mut entries = self.entries.borrow_mut();
        let old_keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
        let snapshot: HashMap<String, V> =
            entries.iter().map(|(k, s)| (k.clone(), s.get_untracked())).collect();
        entries.sort_by(|(a, _), (b, _)| cmp(&snapshot[a], &snapshot[b]));
        let new_keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
        drop(entries);
        if new_keys != old_keys {
            self.order.set(new_keys);
        }
    }

    /// Sorts by `V`'s natural order. The spec calls for `Ord`-based
    /// comparison here, not a lexicographic string fallback (see
    /// `DESIGN.md`'s "Open Question" note on this).
    pub fn sort(&self)
    where
        V: Ord,
    {
        self.sort_by(Ord::cmp);
    }

    /// Overwrites the item at `key`, if present. Returns whether it existed.
    pub fn set_item(&self, key: &str, value: V) -> bool {
        match self.by_key(key) {
            Some(signal) => {
                signal.set(value);
                true
            }
            None => false,
        }
    }

    /// The current items in order, skipping any whose `Signal` currently
    /// holds `UNSET` while still counting towards the structural dependency
    /// (§9 "UNSET in composites": List views skip an UNSET item but still
    /// reserve its key). Tracks the structural order and every item visited.
    pub fn values(&self) -> Vec<V> {
        self.order.track();
        self.entries.borrow().iter().filter_map(|(_, s)| s.get_option()).collect()
    }

    /// Replaces the whole list with `new_values`, diffed positionally
    /// against the current items (§4.6): overlapping indices overwrite the
    /// existing `Signal` in place (preserving its identity and only
    /// invalidating readers if the value actually changed); a longer
    /// replacement appends fresh items; a shorter one truncates the tail.
    /// The structural key order only changes (and only invalidates `keys()`/
    /// `at()` readers) when the length actually changes.
    pub fn set(&self, new_values: Vec<V>) {
        let mut entries = self.entries.borrow_mut();
        let old_len = entries.len();
        let new_len = new_values.len();
        for (i, value) in new_values.into_iter().enumerate() {
            if i < old_len {
                entries[i].1.set(value);
            } else {
                let key = self.key_strategy.next(self.counter.get());
                self.counter.set(self.counter.get() + 1);
                entries.push((key, create_signal(value)));
            }
        }
        let removed: Vec<(String, Signal<V>)> = if new_len < old_len { entries.split_off(new_len) } else { Vec::new() };
        let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
        drop(entries);
        if new_len != old_len {
            self.order.set(keys);
        }
        for (_, signal) in removed {
            dispose_item(signal);
        }
    }

    /// Computes `f` against a snapshot of the current values and writes the
    /// result back via [`List::set`].
    pub fn update(&self, f: impl FnOnce(&mut Vec<V>)) {
        let mut values: Vec<V> = self.entries.borrow().iter().map(|(_, s)| s.get_untracked()).collect();
        f(&mut values);
        self.set(values);
    }
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn sort_preserves_per_item_signal_identity() {
        let _ = create_root(|| {
            let list = create_list(vec![3, 1, 2]);
            let first_key = list.keys()[0].clone();
            let first_signal_before = list.by_key(&first_key).unwrap();

            list.sort();
            assert_eq!(
                (0..list.len()).map(|i| list.at(i).unwrap().get()).collect::<Vec<_>>(),
                vec![1, 2, 3]
            );

            let first_signal_after = list.by_key(&first_key).unwrap();
            first_signal_after.set(999);
            assert_eq!(
                first_signal_before.get(),
                999,
                "the key's Signal must be the same node across a sort, not a fresh one"
            );
        });
    }

    #[test]
    fn at_tracks_structural_order_not_item_value() {
        let _ = create_root(|| {
            let list = create_list(vec![10, 20, 30]);
            let renders = create_signal(0);
            create_effect({
                let list = list.clone();
                move || {
                    let _ = list.at(0).map(|s| s.get_untracked());
                    renders.set(renders.get_untracked() + 1);
                }
            });
            assert_eq!(renders.get(), 1);

            list.sort_by(|a, b| b.cmp(a)); // reverses: index 0 now holds a different item
            assert_eq!(renders.get(), 2, "reordering what occupies index 0 must invalidate `at(0)` readers");
        });
    }

    #[test]
    fn splice_replaces_a_range_and_returns_new_keys() {
        let _ = create_root(|| {
            let list = create_list(vec![1, 2, 3, 4]);
            let new_keys = list.splice(1, 2, vec![20, 30, 40]);
            assert_eq!(new_keys.len(), 3);
            assert_eq!((0..list.len()).map(|i| list.at(i).unwrap().get()).collect::<Vec<_>>(), vec![
                1, 20, 30, 40, 4
            ]);
        });
    }

    #[test]
    fn duplicate_explicit_key_is_rejected() {
        let _ = create_root(|| {
            let list = create_list(vec![1]);
            let existing_key = list.keys()[0].clone();
            assert!(list.try_add_with_key(existing_key, 2).is_err());
        });
    }

    #[test]
    fn whole_array_set_preserves_identity_at_overlapping_indices() {
        let _ = create_root(|| {
            let list = create_list(vec![1, 2, 3]);
            let key_reads = create_signal(0);
            create_effect({
                let list = list.clone();
                move || {
                    list.keys();
                    key_reads.set(key_reads.get_untracked() + 1);
                }
            });
            assert_eq!(key_reads.get(), 1);
            let first_key = list.keys()[0].clone();

            list.set(vec![10, 20, 30]);
            assert_eq!(key_reads.get(), 1, "same-length set() must not invalidate keys() readers");
            assert_eq!(list.by_key(&first_key).unwrap().get(), 10);

            list.set(vec![10, 20, 30, 40]);
            assert_eq!(key_reads.get(), 2, "a length change must invalidate keys() readers");
            assert_eq!(list.values(), vec![10, 20, 30, 40]);
        });
    }

    #[test]
    fn update_mutates_a_snapshot_and_writes_it_back() {
        let _ = create_root(|| {
            let list = create_list(vec![1, 2, 3]);
            list.update(|values| values.push(4));
            assert_eq!(list.values(), vec![1, 2, 3, 4]);
        });
    }

    #[test]
    fn remove_disposes_the_item_signal() {
        let _ = create_root(|| {
            let list = create_list(vec![1, 2, 3]);
            let middle_key = list.keys()[1].clone();
            let middle_signal = list.by_key(&middle_key).unwrap();
            list.remove(&middle_key);
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| middle_signal.get()));
            assert!(result.is_err(), "a removed item's signal must be disposed, not merely detached");
        });
    }

    #[test]
    fn splice_disposes_replaced_item_signals() {
        let _ = create_root(|| {
            let list = create_list(vec![1, 2, 3]);
            let removed_signal = list.at(1).unwrap();
            list.splice(1, 1, vec![99]);
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| removed_signal.get()));
            assert!(result.is_err(), "a spliced-out item's signal must be disposed");
        });
    }

    #[test]
    fn values_skips_an_unset_item_but_keeps_its_key() {
        let _ = create_root(|| {
            let list = create_list(vec![1, 2, 3]);
            let middle_key = list.keys()[1].clone();
            list.by_key(&middle_key).unwrap().set_unset();
            assert_eq!(list.values(), vec![1, 3]);
            assert_eq!(list.len(), 3, "the key is still reserved even though its value is skipped");
        });
    }
}
