//! The keyed diff engine (§4.6): reconciles an old ordered key list against
//! a new one into a minimal edit script.
//!
//! Grounded on the prefix/suffix-skipping, reverse-index-map algorithm
//! `iter.rs`'s `map_keyed` uses to reconcile a `Vec` by key (itself credited
//! there to the solid.js `reconcileArrays` routine): skip the common
//! prefix and suffix first, build a map of surviving keys to their new
//! position, mark old entries that still exist as `Move`s, whatever's left
//! in `old` becomes `Remove`s, and whatever's left in `new` becomes
//! `Create`s. `List`/`Collection` use this to keep each key's per-item
//! `Signal`/`Memo` alive across a reorder instead of tearing it down and
//! rebuilding it (§8 "List: stable keys over sort").

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// A single reconciliation step. Order matters: `Remove`s are emitted after
/// `Move`s record where survivors went, and `Create`s last, so a consumer
/// can apply the script as "move survivors, drop leftovers, insert new" in
/// one pass without clobbering state still in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiffOp<K> {
    /// `key` survives, moving from index `from` to index `to` (`from != to`).
    Move { key: K, from: usize, to: usize },
    /// `key` is new, belonging at index `at`.
    Create { key: K, at: usize },
    /// `key` is gone; it was previously at index `from`.
    Remove { key: K, from: usize },
}

/// Diffs `old` against `new`. Both must have no duplicate keys (callers are
/// expected to have already rejected duplicates via
/// [`crate::error::ReactiveError::DuplicateKey`]).
pub fn diff_keys<K: Eq + Hash + Clone>(old: &[K], new: &[K]) -> Vec<DiffOp<K>> {
    let mut ops = Vec::new();

    let min_len = old.len().min(new.len());
    let start = old.iter().zip(new.iter()).position(|(a, b)| a != b).unwrap_or(min_len);

    let mut old_end = old.len();
    let mut new_end = new.len();
    while old_end > start && new_end > start && old[old_end - 1] == new[new_end - 1] {
        old_end -= 1;
        new_end -= 1;
    }

    let new_positions: HashMap<&K, usize> =
        new[start..new_end].iter().enumerate().map(|(i, k)| (k, start + i)).collect();

    let mut survived = vec![false; old.len()];
    for (i, key) in old.iter().enumerate().take(old_end).skip(start) {
        if let Some(&j) = new_positions.get(key) {
            survived[i] = true;
            if i != j {
                ops.push(DiffOp::Move { key: key.clone(), from: i, to: j });
            }
        }
    }
    for (i, key) in old.iter().enumerate().take(old_end).skip(start) {
        if !survived[i] {
            ops.push(DiffOp::Remove { key: key.clone(), from: i });
        }
    }

    let old_keys: HashSet<&K> = old.iter().collect();
    for (i, key) in new.iter().enumerate().take(new_end).skip(start) {
        if !old_keys.contains(key) {
            ops.push(DiffOp::Create { key: key.clone(), at: i });
        }
    }

    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moves(ops: &[DiffOp<i32>]) -> Vec<(i32, usize, usize)> {
        ops.iter()
            .filter_map(|op| match op {
                DiffOp::Move { key, from, to } => Some((*key, *from, *to)),
                _ => None,
            })
            .collect()
    }
    fn creates(ops: &[DiffOp<i32>]) -> Vec<(i32, usize)> {
        ops.iter()
            .filter_map(|op| match op {
                DiffOp::Create { key, at } => Some((*key, *at)),
                _ => None,
            })
            .collect()
    }
    fn removes(ops: &[DiffOp<i32>]) -> Vec<(i32, usize)> {
        ops.iter()
            .filter_map(|op| match op {
                DiffOp::Remove { key, from } => Some((*key, *from)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn identical_lists_produce_no_ops() {
        assert_eq!(diff_keys(&[1, 2, 3], &[1, 2, 3]), vec![]);
    }

    #[test]
    fn append_only_produces_creates() {
        let ops = diff_keys(&[1, 2, 3], &[1, 2, 3, 4]);
        assert_eq!(creates(&ops), vec![(4, 3)]);
        assert!(moves(&ops).is_empty());
        assert!(removes(&ops).is_empty());
    }

    #[test]
    fn reorder_produces_moves_only() {
        let ops = diff_keys(&[1, 2, 3], &[3, 1, 2]);
        assert!(creates(&ops).is_empty());
        assert!(removes(&ops).is_empty());
        assert_eq!(moves(&ops).len(), 1, "a rotation needs only the one displaced element to move");
    }

    #[test]
    fn removal_in_the_middle() {
        let ops = diff_keys(&[1, 2, 3, 4], &[1, 3, 4]);
        assert_eq!(removes(&ops), vec![(2, 1)]);
        assert!(creates(&ops).is_empty());
    }

    #[test]
    fn clearing_removes_everything() {
        let ops = diff_keys(&[1, 2, 3], &[]);
        assert_eq!(removes(&ops).len(), 3);
    }
}
