//! Sparse-bitvector points-to-set backend: a `RoaringBitmap` over `u32`
//! memory-object indices. This is the default backend; its only job is to
//! make `merge`/`has`/`includes` fast for the common case of sparse,
//! clustered index sets.

use roaring::RoaringBitmap;

#[derive(Clone)]
pub struct SparseRepr(RoaringBitmap);

impl SparseRepr {
    pub fn from_indices(indices: &[u32]) -> Self {
        let mut bm = RoaringBitmap::new();
        for &i in indices {
            bm.insert(i);
        }
        SparseRepr(bm)
    }

    pub fn contains(&self, idx: u32) -> bool {
        self.0.contains(idx)
    }

    pub fn union(&self, other: &SparseRepr) -> SparseRepr {
        SparseRepr(&self.0 | &other.0)
    }

    pub fn is_subset_of(&self, other: &SparseRepr) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn len(&self) -> u64 {
        self.0.len()
    }

    pub fn iter_sorted(&self) -> Vec<u32> {
        self.0.iter().collect()
    }
}
