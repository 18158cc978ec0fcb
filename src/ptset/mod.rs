//! Interned points-to sets: immutable, hash-consed sets of `MemoryObject`
//! indices with O(1) equality, backed by a runtime-selected representation.
//!
//! Backend choice is a tagged variant threaded through a single hash-cons
//! table rather than a trait object per set: every `PointsToSet` is
//! `Arc<SetData>`. Operations build a new underlying container in the
//! active backend's own representation, snapshot it into a canonical
//! sorted index list, then deduplicate against the global table -- a
//! two-step "construct, then dedup" that keeps equality a pointer
//! comparison regardless of which backend is active.

mod sparse;

#[cfg(feature = "bdd-backend")]
mod bdd;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::memory::{MemoryObject, ObjectTable};

pub use sparse::SparseRepr;

#[cfg(feature = "bdd-backend")]
pub use bdd::BddRepr;

/// Runtime-selectable representation. The choice is module-wide and latched
/// on first use: attempting to switch after that fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    SparseBitVector,
    #[cfg(feature = "bdd-backend")]
    Bdd,
}

static BACKEND_LATCH: OnceLock<Backend> = OnceLock::new();

/// Select the backend before any `PointsToSet` operation runs. Returns an
/// error if a different backend was already latched in.
pub fn select_backend(backend: Backend) -> crate::error::Result<()> {
    match BACKEND_LATCH.get() {
        None => {
            let _ = BACKEND_LATCH.set(backend);
            Ok(())
        }
        Some(existing) if *existing == backend => Ok(()),
        Some(_) => Err(crate::error::PtaError::Config(
            "points-to set backend cannot change after first use".to_string(),
        )),
    }
}

fn active_backend() -> Backend {
    *BACKEND_LATCH.get_or_init(|| Backend::SparseBitVector)
}

#[derive(Clone)]
enum Repr {
    Sparse(SparseRepr),
    #[cfg(feature = "bdd-backend")]
    Bdd(BddRepr),
}

impl Repr {
    fn empty() -> Repr {
        match active_backend() {
            Backend::SparseBitVector => Repr::Sparse(SparseRepr::from_indices(&[])),
            #[cfg(feature = "bdd-backend")]
            Backend::Bdd => Repr::Bdd(BddRepr::from_indices(&[])),
        }
    }

    fn from_indices(indices: &[u32]) -> Repr {
        match active_backend() {
            Backend::SparseBitVector => Repr::Sparse(SparseRepr::from_indices(indices)),
            #[cfg(feature = "bdd-backend")]
            Backend::Bdd => Repr::Bdd(BddRepr::from_indices(indices)),
        }
    }

    fn has(&self, idx: u32) -> bool {
        match self {
            Repr::Sparse(s) => s.contains(idx),
            #[cfg(feature = "bdd-backend")]
            Repr::Bdd(b) => b.contains(idx),
        }
    }

    fn union(&self, other: &Repr) -> Repr {
        match (self, other) {
            (Repr::Sparse(a), Repr::Sparse(b)) => Repr::Sparse(a.union(b)),
            #[cfg(feature = "bdd-backend")]
            (Repr::Bdd(a), Repr::Bdd(b)) => Repr::Bdd(a.union(b)),
            #[cfg(feature = "bdd-backend")]
            _ => unreachable!("backend is latched module-wide; variants never mix"),
        }
    }

    fn is_subset_of(&self, other: &Repr) -> bool {
        match (self, other) {
            (Repr::Sparse(a), Repr::Sparse(b)) => a.is_subset_of(b),
            #[cfg(feature = "bdd-backend")]
            (Repr::Bdd(a), Repr::Bdd(b)) => a.is_subset_of(b),
            #[cfg(feature = "bdd-backend")]
            _ => unreachable!("backend is latched module-wide; variants never mix"),
        }
    }

    /// Materialize a sorted, deduplicated snapshot on demand.
    fn snapshot(&self) -> Vec<u32> {
        match self {
            Repr::Sparse(s) => s.iter_sorted(),
            #[cfg(feature = "bdd-backend")]
            Repr::Bdd(b) => b.iter_sorted(),
        }
    }
}

struct SetData {
    key: Vec<u32>,
    repr: Repr,
}

type InternTable = Mutex<HashMap<Vec<u32>, Arc<SetData>>>;
static INTERN: OnceLock<InternTable> = OnceLock::new();

fn intern_table() -> &'static InternTable {
    INTERN.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Dedup a freshly constructed `repr` against the global table, keyed by its
/// canonical content snapshot.
fn dedup(repr: Repr) -> Arc<SetData> {
    let key = repr.snapshot();
    let table = intern_table();
    let mut guard = table.lock().expect("points-to intern table poisoned");
    if let Some(existing) = guard.get(&key) {
        return existing.clone();
    }
    let data = Arc::new(SetData { key: key.clone(), repr });
    guard.insert(key, data.clone());
    data
}

/// An immutable, hash-consed points-to set. `Clone` is an `Arc` bump;
/// `PartialEq`/`Eq` are pointer comparisons of the interned representative.
#[derive(Clone)]
pub struct PointsToSet(Arc<SetData>);

impl PartialEq for PointsToSet {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for PointsToSet {}

impl PointsToSet {
    pub fn empty() -> Self {
        PointsToSet(dedup(Repr::empty()))
    }

    pub fn singleton_index(idx: u32) -> Self {
        PointsToSet(dedup(Repr::from_indices(&[idx])))
    }

    pub fn singleton(obj: MemoryObject, objects: &ObjectTable) -> Self {
        let idx = objects.index_of(&obj).unwrap_or_else(|| unreachable!("object must be registered before use"));
        Self::singleton_index(idx)
    }

    pub fn from_indices(indices: impl IntoIterator<Item = u32>) -> Self {
        let vec: Vec<u32> = indices.into_iter().collect();
        PointsToSet(dedup(Repr::from_indices(&vec)))
    }

    pub fn insert_index(&self, idx: u32) -> Self {
        if self.has_index(idx) {
            return self.clone();
        }
        let added = Repr::from_indices(&[idx]);
        PointsToSet(dedup(self.0.repr.union(&added)))
    }

    pub fn has_index(&self, idx: u32) -> bool {
        self.0.repr.has(idx)
    }

    /// `merge` (union).
    pub fn merge(&self, other: &Self) -> Self {
        if self == other {
            return self.clone();
        }
        PointsToSet(dedup(self.0.repr.union(&other.0.repr)))
    }

    pub fn merge_all<'a>(sets: impl IntoIterator<Item = &'a PointsToSet>) -> Self {
        let mut acc = Repr::empty();
        for s in sets {
            acc = acc.union(&s.0.repr);
        }
        PointsToSet(dedup(acc))
    }

    /// `includes` (self ⊇ other, i.e. other is a subset of self).
    pub fn includes(&self, other: &Self) -> bool {
        if self == other {
            return true;
        }
        other.0.repr.is_subset_of(&self.0.repr)
    }

    pub fn intersects(&self, other: &Self) -> bool {
        let (small, big) = if self.0.key.len() <= other.0.key.len() { (self, other) } else { (other, self) };
        small.0.key.iter().any(|i| big.has_index(*i))
    }

    pub fn size(&self) -> usize {
        self.0.key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.key.is_empty()
    }

    /// Deterministic, sorted iteration over the cached snapshot.
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.key.iter().copied()
    }

    pub fn objects<'a>(&'a self, objects: &'a ObjectTable) -> impl Iterator<Item = MemoryObject> + 'a {
        self.indices().map(move |i| objects.object_at(i))
    }
}

impl Default for PointsToSet {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_empty() {
        let s = PointsToSet::empty();
        assert_eq!(s.size(), 0);
        assert!(s.is_empty());
    }

    #[test]
    fn equal_content_is_same_interned_handle() {
        let a = PointsToSet::from_indices([1, 2, 3]);
        let b = PointsToSet::from_indices([3, 2, 1, 2]);
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn merge_is_union() {
        let a = PointsToSet::from_indices([1, 2]);
        let b = PointsToSet::from_indices([2, 3]);
        let m = a.merge(&b);
        assert_eq!(m.indices().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn includes_is_subset() {
        let a = PointsToSet::from_indices([1, 2, 3]);
        let b = PointsToSet::from_indices([1, 3]);
        assert!(a.includes(&b));
        assert!(!b.includes(&a));
    }

    #[test]
    fn insert_is_monotone() {
        let a = PointsToSet::from_indices([1]);
        let b = a.insert_index(2);
        assert!(b.includes(&a));
        assert!(b.has_index(2));
    }

    #[test]
    fn intersects_detects_overlap() {
        let a = PointsToSet::from_indices([1, 2]);
        let b = PointsToSet::from_indices([2, 3]);
        let c = PointsToSet::from_indices([5]);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }
}
