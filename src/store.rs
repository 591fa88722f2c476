//! `Store`: the reactive record composite (§4.5 "Store").
//!
//! Per the design notes, a composite is not its own node kind — it is a
//! plain Rust struct wrapping a structural source (here, a `Signal<Vec
//! <String>>` holding the field's current key order) plus a side table of
//! per-field `Signal`s. Reading a field's value only links an edge to that
//! field's own node; only `keys()` (or a miss in `field()`) links an edge to
//! the structural source, so renaming/adding/removing a field doesn't
//! invalidate readers that only care about one field's value, and a field's
//! own value changing doesn't invalidate readers enumerating the field set.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::{NodeLabel, ReactiveError};
use crate::ownership::dispose;
use crate::root::Root;
use crate::signal::{create_signal, Signal};

/// Disposes a removed field's underlying node (§4.5 Store `set`:
/// "removals (detach & dispose child signals)").
fn dispose_field<V: 'static>(signal: Signal<V>) {
    dispose(Root::global(), signal.id());
}

/// A handle to a reactive record: named fields, each independently
/// reactive, with a separately-tracked structural key list.
pub struct Store<V> {
    fields: Rc<RefCell<HashMap<String, Signal<V>>>>,
    keys: Signal<Vec<String>>,
    label: NodeLabel,
}

impl<V> Clone for Store<V> {
    fn clone(&self) -> Self {
        Store { fields: self.fields.clone(), keys: self.keys, label: self.label.clone() }
    }
}

/// Creates a `Store` populated with `initial`'s entries, in iteration order
/// (a `Store`'s key order is insertion order, not sorted — see the
/// `DESIGN.md` "Open Question" note on this).
#[track_caller]
pub fn create_store<V: PartialEq + Clone + 'static>(
    initial: impl IntoIterator<Item = (String, V)>,
) -> Store<V> {
    let label = NodeLabel::new("Store");
    let mut fields = HashMap::new();
    let mut keys = Vec::new();
    for (name, value) in initial {
        keys.push(name.clone());
        fields.insert(name, create_signal(value));
    }
    Store { fields: Rc::new(RefCell::new(fields)), keys: create_signal(keys), label }
}

impl<V: PartialEq + Clone + 'static> Store<V> {
    /// Returns the field's signal handle, if it currently exists. A miss
    /// links an edge to the structural key list, so a later `set`/`try_add`
    /// of this name will wake anything that called `field` and got `None`.
    pub fn field(&self, name: &str) -> Option<Signal<V>> {
        let found = self.fields.borrow().get(name).copied();
        if found.is_none() {
            self.keys.track();
        }
        found
    }

    /// The current field names, in insertion order. Links an edge to the
    /// structural source: only adding/removing a field invalidates this.
    pub fn keys(&self) -> Vec<String> {
        self.keys.get()
    }

    /// Writes `value` into an existing field, or creates it. Creating a
    /// field changes the structural key list and so invalidates `keys()`
    /// readers (and any `field()` miss waiting on this name); overwriting an
    /// existing field only invalidates that field's own readers.
    pub fn set(&self, name: impl Into<String>, value: V) {
        let name = name.into();
        let existing = self.fields.borrow().get(&name).copied();
        match existing {
            Some(signal) => signal.set(value),
            None => {
                let signal = create_signal(value);
                self.fields.borrow_mut().insert(name.clone(), signal);
                self.keys.update(|ks| ks.push(name));
            }
        }
    }

    /// Like [`Store::set`], but fails with
    /// [`ReactiveError::DuplicateKey`] if `name` already exists, instead of
    /// overwriting it.
    pub fn try_add(&self, name: impl Into<String>, value: V) -> Result<(), ReactiveError> {
        let name = name.into();
        if self.fields.borrow().contains_key(&name) {
            return Err(ReactiveError::DuplicateKey { node: self.label.clone(), key: name });
        }
        let signal = create_signal(value);
        self.fields.borrow_mut().insert(name.clone(), signal);
        self.keys.update(|ks| ks.push(name));
        Ok(())
    }

    /// Removes a field, disposing its underlying signal. Returns whether it
    /// was present.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.fields.borrow_mut().remove(name);
        let was_present = removed.is_some();
        if let Some(signal) = removed {
            self.keys.update(|ks| ks.retain(|k| k != name));
            dispose_field(signal);
        }
        was_present
    }

    /// `Store` is record-shaped; array-only operations always fail here
    /// (§4.5 "array-only method called on a record-shaped Store").
    pub fn splice(&self, _start: usize, _delete_count: usize) -> Result<(), ReactiveError> {
        Err(ReactiveError::ForbiddenMethod { node: self.label.clone(), method: "splice" })
    }

    /// `Store` is record-shaped; array-only operations always fail here
    /// (§4.5 "array-only method called on a record-shaped Store").
    pub fn derive_collection(&self) -> Result<(), ReactiveError> {
        Err(ReactiveError::ForbiddenMethod { node: self.label.clone(), method: "derive_collection" })
    }

    /// Reconstructs the whole record, in field order, skipping any field
    /// whose signal currently holds `UNSET` (§9 "UNSET in composites").
    /// Tracks the structural key list and every field it reads.
    pub fn value(&self) -> Vec<(String, V)> {
        let keys = self.keys.get();
        let fields = self.fields.borrow();
        keys.into_iter()
            .filter_map(|k| {
                let v = fields.get(&k)?.get_option()?;
                Some((k, v))
            })
            .collect()
    }

    /// Diffs `record` against the current fields (§4.6): overwrites fields
    /// present in both, creates fields only in `record`, removes fields only
    /// in the current set. A field whose value is unchanged keeps its
    /// `Signal` identity and does not invalidate `keys()` readers; `store.
    /// set_value(store.value())` is a no-op.
    pub fn set_value(&self, record: impl IntoIterator<Item = (String, V)>) {
        let incoming: Vec<(String, V)> = record.into_iter().collect();
        let incoming_names: HashSet<String> = incoming.iter().map(|(k, _)| k.clone()).collect();
        let mut structural_changed = false;
        {
            let mut fields = self.fields.borrow_mut();
            for (name, value) in incoming {
                match fields.get(&name) {
                    Some(signal) => signal.set(value),
                    None => {
                        fields.insert(name, create_signal(value));
                        structural_changed = true;
                    }
                }
            }
            let stale: Vec<String> = fields.keys().filter(|k| !incoming_names.contains(*k)).cloned().collect();
            if !stale.is_empty() {
                structural_changed = true;
            }
            for name in &stale {
                if let Some(signal) = fields.remove(name) {
                    dispose_field(signal);
                }
            }
        }
        if structural_changed {
            let keys: Vec<String> = self.fields.borrow().keys().cloned().collect();
            self.keys.set(keys);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn field_value_change_does_not_invalidate_keys_readers() {
        let _ = create_root(|| {
            let store = create_store([("a".to_string(), 1), ("b".to_string(), 2)]);
            let key_reads = create_signal(0);
            create_effect({
                let store = store.clone();
                move || {
                    store.keys();
                    key_reads.set(key_reads.get_untracked() + 1);
                }
            });
            assert_eq!(key_reads.get(), 1);

            store.field("a").unwrap().set(100);
            assert_eq!(key_reads.get(), 1, "writing an existing field must not invalidate keys() readers");

            store.set("c", 3);
            assert_eq!(key_reads.get(), 2, "adding a field must invalidate keys() readers");
        });
    }

    #[test]
    fn field_miss_wakes_on_later_add() {
        let _ = create_root(|| {
            let store: Store<i32> = create_store([]);
            let saw_c = create_signal(false);
            create_effect({
                let store = store.clone();
                move || {
                    saw_c.set(store.field("c").is_some());
                }
            });
            assert!(!saw_c.get());
            store.set("c", 1);
            assert!(saw_c.get());
        });
    }

    #[test]
    fn try_add_rejects_duplicate_key() {
        let _ = create_root(|| {
            let store = create_store([("a".to_string(), 1)]);
            assert!(store.try_add("a", 2).is_err());
            assert_eq!(store.field("a").unwrap().get(), 1);
        });
    }

    #[test]
    fn splice_is_forbidden_on_a_store() {
        let _ = create_root(|| {
            let store: Store<i32> = create_store([]);
            assert!(store.splice(0, 1).is_err());
        });
    }

    #[test]
    fn derive_collection_is_forbidden_on_a_store() {
        let _ = create_root(|| {
            let store: Store<i32> = create_store([]);
            assert!(store.derive_collection().is_err());
        });
    }

    #[test]
    fn whole_record_round_trip_is_a_no_op() {
        let _ = create_root(|| {
            let store = create_store([("a".to_string(), 1), ("b".to_string(), 2)]);
            let key_reads = create_signal(0);
            create_effect({
                let store = store.clone();
                move || {
                    store.keys();
                    key_reads.set(key_reads.get_untracked() + 1);
                }
            });
            assert_eq!(key_reads.get(), 1);

            let snapshot = store.value();
            store.set_value(snapshot);
            assert_eq!(key_reads.get(), 1, "set_value(value()) must not touch the structural key list");
        });
    }

    #[test]
    fn remove_disposes_the_field_signal() {
        let _ = create_root(|| {
            let store = create_store([("a".to_string(), 1)]);
            let a_signal = store.field("a").unwrap();
            assert!(store.remove("a"));
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| a_signal.get()));
            assert!(result.is_err(), "a removed field's signal must be disposed, not merely detached");
        });
    }

    #[test]
    fn set_value_disposes_stale_field_signals() {
        let _ = create_root(|| {
            let store = create_store([("a".to_string(), 1), ("b".to_string(), 2)]);
            let b_signal = store.field("b").unwrap();
            store.set_value([("a".to_string(), 1)]);
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| b_signal.get()));
            assert!(result.is_err(), "a field dropped by set_value must be disposed");
        });
    }

    #[test]
    fn set_value_adds_and_removes_fields() {
        let _ = create_root(|| {
            let store = create_store([("a".to_string(), 1), ("b".to_string(), 2)]);
            store.set_value([("a".to_string(), 1), ("c".to_string(), 3)]);
            assert!(store.field("b").is_none());
            assert_eq!(store.field("c").unwrap().get(), 3);
            assert_eq!(store.field("a").unwrap().get(), 1);
        });
    }
}
