//! Worklist propagator: the two-level outer-FIFO/inner-RPO-priority
//! worklist, plus the `Memo: ProgramPoint -> Store` memoization table.
//!
//! A `VecDeque` of functions iterated to a fixpoint, generalized from a flat
//! single-level block queue to a two-level function/node structure so that
//! nodes within one function drain in RPO order before the worklist moves
//! on to the next function.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::cfg::NodeId;
use crate::env_store::Store;
use crate::program_point::{FunctionContext, ProgramPoint};

/// Outer FIFO over `FunctionContext`, inner priority queue over CFG nodes by
/// RPO. `reverse` selects the comparator used for backward analyses
/// (dequeues the largest RPO first).
pub struct Worklist {
    fn_queue: VecDeque<FunctionContext>,
    fn_queued: BTreeSet<FunctionContext>,
    inner: BTreeMap<FunctionContext, BTreeSet<(u32, NodeId)>>,
    reverse: bool,
}

impl Worklist {
    pub fn new(reverse: bool) -> Self {
        Worklist { fn_queue: VecDeque::new(), fn_queued: BTreeSet::new(), inner: BTreeMap::new(), reverse }
    }

    /// Enqueue `node` (with its cached RPO priority) under `fc`. A node
    /// already pending for the same function is a no-op; a function not
    /// currently queued is appended to the back of the FIFO.
    pub fn enqueue(&mut self, fc: FunctionContext, node: NodeId, rpo: u32) {
        self.inner.entry(fc.clone()).or_default().insert((rpo, node));
        if self.fn_queued.insert(fc.clone()) {
            self.fn_queue.push_back(fc);
        }
    }

    /// Dequeue the pair with the smallest (or, under `reverse`, largest) RPO
    /// within the function at the front of the FIFO; if that function still
    /// has pending nodes, it rotates to the back, otherwise it drops out of
    /// the FIFO until re-enqueued.
    pub fn dequeue(&mut self) -> Option<(FunctionContext, NodeId)> {
        loop {
            let fc = self.fn_queue.pop_front()?;
            let Some(set) = self.inner.get_mut(&fc) else {
                self.fn_queued.remove(&fc);
                continue;
            };
            let Some(&chosen) = (if self.reverse { set.iter().next_back() } else { set.iter().next() }) else {
                self.fn_queued.remove(&fc);
                self.inner.remove(&fc);
                continue;
            };
            set.remove(&chosen);
            if set.is_empty() {
                self.fn_queued.remove(&fc);
                self.inner.remove(&fc);
            } else {
                self.fn_queue.push_back(fc.clone());
            }
            return Some((fc, chosen.1));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fn_queue.is_empty()
    }
}

/// `Memo: ProgramPoint -> Store`, merged object-wise (weak update) on every
/// write.
#[derive(Debug, Clone, Default)]
pub struct Memo {
    map: BTreeMap<ProgramPoint, Store>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pp: &ProgramPoint) -> Store {
        self.map.get(pp).cloned().unwrap_or_default()
    }

    /// `merged := Memo[spp] ∪ newStore`; if `merged ≠ Memo[spp]`, update and
    /// report the change so the caller knows to re-enqueue dependents.
    pub fn merge_update(&mut self, pp: ProgramPoint, new_store: &Store) -> bool {
        let current = self.get(&pp);
        let merged = current.merge(new_store);
        if merged == current {
            return false;
        }
        self.map.insert(pp, merged);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::global_context;
    use crate::ir::FuncId;

    fn fc(n: u32) -> FunctionContext {
        FunctionContext::new(FuncId(n), global_context())
    }

    #[test]
    fn dequeues_smallest_rpo_first_within_a_function() {
        let mut wl = Worklist::new(false);
        wl.enqueue(fc(0), NodeId(3), 5);
        wl.enqueue(fc(0), NodeId(1), 1);
        wl.enqueue(fc(0), NodeId(2), 2);
        assert_eq!(wl.dequeue(), Some((fc(0), NodeId(1))));
        assert_eq!(wl.dequeue(), Some((fc(0), NodeId(2))));
        assert_eq!(wl.dequeue(), Some((fc(0), NodeId(3))));
        assert!(wl.dequeue().is_none());
    }

    #[test]
    fn rotates_functions_fifo() {
        let mut wl = Worklist::new(false);
        wl.enqueue(fc(0), NodeId(1), 1);
        wl.enqueue(fc(1), NodeId(1), 1);
        wl.enqueue(fc(0), NodeId(2), 2);
        assert_eq!(wl.dequeue(), Some((fc(0), NodeId(1))));
        assert_eq!(wl.dequeue(), Some((fc(1), NodeId(1))));
        assert_eq!(wl.dequeue(), Some((fc(0), NodeId(2))));
    }

    #[test]
    fn memo_merge_is_idempotent_once_stable() {
        let mut memo = Memo::new();
        let pp = ProgramPoint::new(fc(0), NodeId(0));
        let mut s = Store::new();
        s.weak_update(0, crate::ptset::PointsToSet::singleton_index(7));
        assert!(memo.merge_update(pp.clone(), &s));
        assert!(!memo.merge_update(pp, &s));
    }
}
