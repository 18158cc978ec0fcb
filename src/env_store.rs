//! Environment & Store: `Env` maps abstract pointers to points-to sets and
//! only ever grows; `Store` maps memory objects to points-to sets and is
//! value-typed, copied at each program point.

use std::collections::BTreeMap;

use crate::pointer::PointerId;
use crate::ptset::PointsToSet;

/// `Env: Pointer -> PointsToSet`. Monotonic: callers only ever call
/// `weak_update`/`strong_update`, never remove a mapping.
#[derive(Debug, Clone, Default)]
pub struct Env {
    map: BTreeMap<PointerId, PointsToSet>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, p: PointerId) -> PointsToSet {
        self.map.get(&p).cloned().unwrap_or_default()
    }

    /// `Env[p] := Env[p] ∪ s`. Returns whether the mapping changed (used by
    /// the worklist to decide whether to re-enqueue dependents).
    pub fn weak_update(&mut self, p: PointerId, s: PointsToSet) -> bool {
        let merged = self.get(p).merge(&s);
        if merged == self.get(p) {
            return false;
        }
        self.map.insert(p, merged);
        true
    }

    /// `Env[p] := s`. Only sound when `p` has a single static definition
    /// (SSA variables); callers are responsible for that precondition.
    /// Monotone only if `s ⊇` the previous value -- callers that
    /// recompute `s` from scratch each time (e.g. `Copy`) must ensure this
    /// themselves by only ever widening their inputs.
    pub fn strong_update(&mut self, p: PointerId, s: PointsToSet) -> bool {
        if self.map.get(&p) == Some(&s) {
            return false;
        }
        self.map.insert(p, s);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PointerId, &PointsToSet)> {
        self.map.iter()
    }
}

/// `Store: MemoryObject -> PointsToSet`, keyed by the object's dense
/// index. Cloned wholesale at call boundaries and merged pointwise by the
/// worklist propagator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Store {
    map: BTreeMap<u32, PointsToSet>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, obj_idx: u32) -> PointsToSet {
        self.map.get(&obj_idx).cloned().unwrap_or_default()
    }

    /// Weak (union) update, used whenever the destination is not a
    /// singleton non-summary object.
    pub fn weak_update(&mut self, obj_idx: u32, s: PointsToSet) -> bool {
        let merged = self.get(obj_idx).merge(&s);
        if merged == self.get(obj_idx) {
            return false;
        }
        self.map.insert(obj_idx, merged);
        true
    }

    /// Strong (replace) update. Sound only when the destination set at the
    /// store instruction was a non-summary singleton; the transfer
    /// function is responsible for that check.
    pub fn strong_update(&mut self, obj_idx: u32, s: PointsToSet) -> bool {
        if self.map.get(&obj_idx) == Some(&s) {
            return false;
        }
        self.map.insert(obj_idx, s);
        true
    }

    /// Object-wise weak merge of `self` and `other`, used by the worklist
    /// propagator to combine a new store with the one memoized at a
    /// program point.
    pub fn merge(&self, other: &Store) -> Store {
        let mut merged = self.clone();
        for (&idx, s) in other.map.iter() {
            merged.weak_update(idx, s.clone());
        }
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &PointsToSet)> {
        self.map.iter().map(|(&k, v)| (k, v))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_weak_update_is_monotone() {
        let mut env = Env::new();
        let p = PointerId(0);
        env.weak_update(p, PointsToSet::from_indices([1]));
        let before = env.get(p);
        env.weak_update(p, PointsToSet::from_indices([2]));
        let after = env.get(p);
        assert!(after.includes(&before));
    }

    #[test]
    fn store_merge_is_pointwise_union() {
        let mut a = Store::new();
        a.weak_update(0, PointsToSet::from_indices([1]));
        let mut b = Store::new();
        b.weak_update(0, PointsToSet::from_indices([2]));
        b.weak_update(1, PointsToSet::from_indices([3]));
        let merged = a.merge(&b);
        assert_eq!(merged.get(0).indices().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(merged.get(1).indices().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn strong_update_replaces() {
        let mut s = Store::new();
        s.weak_update(0, PointsToSet::from_indices([1, 2]));
        s.strong_update(0, PointsToSet::from_indices([9]));
        assert_eq!(s.get(0).indices().collect::<Vec<_>>(), vec![9]);
    }
}
