//! BDD points-to-set backend: a fixed-width binary encoding of object
//! indices, unioned into one `Bdd` per set. `OR`/`AND`/`LEQ` realize
//! `union`/`intersection-test`/`containment`.
//!
//! The process-wide `BddVariableSet` is created lazily on first use and
//! never torn down; sharing one variable set across all sets is what makes
//! cross-set operations (union, subset) legal without a re-encoding step.

use std::sync::OnceLock;

use biodivine_lib_bdd::{Bdd, BddVariable, BddVariableSet, BddVariableSetBuilder};

/// Index width: objects with index `>= 2^WIDTH` can't be represented.
/// Chosen generously for whole-module analyses; exceeding it is a resource
/// exhaustion condition at the call site that allocates the object, fatal
/// rather than silently truncated.
const WIDTH: u16 = 24;

static MANAGER: OnceLock<BddManager> = OnceLock::new();

struct BddManager {
    vars: BddVariableSet,
    bits: Vec<BddVariable>,
}

fn manager() -> &'static BddManager {
    MANAGER.get_or_init(|| {
        let mut builder = BddVariableSetBuilder::new();
        let bits = builder.make_variables(WIDTH);
        BddManager { vars: builder.build(), bits }
    })
}

fn point_cube(idx: u32) -> Bdd {
    let mgr = manager();
    let mut cube = mgr.vars.mk_true();
    for (bit, var) in mgr.bits.iter().enumerate() {
        let set = (idx >> bit) & 1 == 1;
        let lit = if set { mgr.vars.mk_var(*var) } else { mgr.vars.mk_not_var(*var) };
        cube = cube.and(&lit);
    }
    cube
}

#[derive(Clone)]
pub struct BddRepr(Bdd);

impl BddRepr {
    pub fn from_indices(indices: &[u32]) -> Self {
        let mgr = manager();
        let mut acc = mgr.vars.mk_false();
        for &idx in indices {
            acc = acc.or(&point_cube(idx));
        }
        BddRepr(acc)
    }

    pub fn contains(&self, idx: u32) -> bool {
        !self.0.and(&point_cube(idx)).is_false()
    }

    pub fn union(&self, other: &BddRepr) -> BddRepr {
        BddRepr(self.0.or(&other.0))
    }

    /// `self ⊆ other`, i.e. `self ∧ ¬other` is unsatisfiable.
    pub fn is_subset_of(&self, other: &BddRepr) -> bool {
        self.0.and(&other.0.not()).is_false()
    }

    /// Repeatedly extract a satisfying witness and subtract its point cube,
    /// materializing the exact index set the `Bdd` encodes. Each stored set
    /// is a union of full-width point cubes, so every witness corresponds to
    /// exactly one index and this terminates after `size()` iterations.
    pub fn iter_sorted(&self) -> Vec<u32> {
        let mgr = manager();
        let mut remaining = self.0.clone();
        let mut out = Vec::new();
        while let Some(witness) = remaining.sat_witness() {
            let mut idx: u32 = 0;
            for (bit, var) in mgr.bits.iter().enumerate() {
                if witness.value(*var) {
                    idx |= 1 << bit;
                }
            }
            out.push(idx);
            remaining = remaining.and(&point_cube(idx).not());
        }
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_small_set() {
        let repr = BddRepr::from_indices(&[1, 5, 9]);
        assert!(repr.contains(5));
        assert!(!repr.contains(6));
        assert_eq!(repr.iter_sorted(), vec![1, 5, 9]);
    }

    #[test]
    fn union_and_subset() {
        let a = BddRepr::from_indices(&[1, 2]);
        let b = BddRepr::from_indices(&[2, 3]);
        let u = a.union(&b);
        assert_eq!(u.iter_sorted(), vec![1, 2, 3]);
        assert!(a.is_subset_of(&u));
        assert!(!u.is_subset_of(&a));
    }
}
