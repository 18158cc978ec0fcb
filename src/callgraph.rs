//! Call graph & store pruning.
//!
//! The call graph is the usual forward/inverse successor-map pair, here
//! keyed on `ProgramPoint`/`FunctionContext` rather than basic blocks, and
//! built up incrementally as calls are resolved rather than ahead of time
//! -- indirect calls may add new edges on every analysis iteration. The
//! inverse map is what lets `Return` evaluation find every caller waiting
//! on a callee's result.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::env_store::Store;
use crate::memory::{MemoryManager, MemoryObject};
use crate::program_point::{FunctionContext, ProgramPoint};

/// `{ (callSite: ProgramPoint) -> { callee: FunctionContext } }` plus its
/// inverse. Updated only during `Call` evaluation.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    forward: BTreeMap<ProgramPoint, BTreeSet<FunctionContext>>,
    inverse: BTreeMap<FunctionContext, BTreeSet<ProgramPoint>>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `call_site` resolves (among possibly others) to
    /// `callee`. Returns `true` if this is a newly discovered edge.
    pub fn add_edge(&mut self, call_site: ProgramPoint, callee: FunctionContext) -> bool {
        let added = self.forward.entry(call_site.clone()).or_default().insert(callee.clone());
        self.inverse.entry(callee).or_default().insert(call_site);
        added
    }

    pub fn callees(&self, call_site: &ProgramPoint) -> impl Iterator<Item = &FunctionContext> {
        self.forward.get(call_site).into_iter().flatten()
    }

    /// Every call site recorded as calling into `callee`, so `Return`
    /// evaluation can merge the returned pointer's points-to set into the
    /// destination at each one.
    pub fn callers(&self, callee: &FunctionContext) -> impl Iterator<Item = &ProgramPoint> {
        self.inverse.get(callee).into_iter().flatten()
    }
}

/// The store pruner: computes the set of memory objects reachable --
/// via both pointer content (`Store` lookups) and field offsets
/// (`getReachablePointerObjects`) -- from the union of the call arguments'
/// points-to sets and every globally-accessible object. Only entries for
/// reachable objects survive into the callee's entry store.
pub fn prune_store(
    arg_object_indices: impl IntoIterator<Item = u32>,
    global_object_indices: impl IntoIterator<Item = u32>,
    caller_store: &Store,
    mem: &MemoryManager,
) -> Store {
    let objects = mem.object_table();
    let mut visited: BTreeSet<u32> = BTreeSet::new();
    let mut queue: VecDeque<u32> = arg_object_indices.into_iter().chain(global_object_indices).collect();

    while let Some(idx) = queue.pop_front() {
        if !visited.insert(idx) {
            continue;
        }
        let obj: MemoryObject = objects.object_at(idx);
        for field_reachable in mem.reachable_pointer_objects(obj) {
            if let Some(ridx) = objects.index_of(&field_reachable) {
                if !visited.contains(&ridx) {
                    queue.push_back(ridx);
                }
            }
        }
        for content_obj in caller_store.get(idx).objects(objects) {
            if let Some(cidx) = objects.index_of(&content_obj) {
                if !visited.contains(&cidx) {
                    queue.push_back(cidx);
                }
            }
        }
    }

    let mut pruned = Store::new();
    for idx in visited {
        pruned.weak_update(idx, caller_store.get(idx));
    }
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::NodeId;
    use crate::context::global_context;
    use crate::ir::FuncId;
    use crate::ptset::PointsToSet;

    fn fc(n: u32) -> FunctionContext {
        FunctionContext::new(FuncId(n), global_context())
    }

    #[test]
    fn records_forward_and_inverse_edges() {
        let mut cg = CallGraph::new();
        let call_site = ProgramPoint::new(fc(0), NodeId(3));
        let callee = fc(1);
        assert!(cg.add_edge(call_site.clone(), callee.clone()));
        assert!(!cg.add_edge(call_site.clone(), callee.clone()), "duplicate edge reported as new");
        assert_eq!(cg.callees(&call_site).collect::<Vec<_>>(), vec![&callee]);
        assert_eq!(cg.callers(&callee).collect::<Vec<_>>(), vec![&call_site]);
    }

    #[test]
    fn prune_keeps_only_reachable_objects() {
        let mut mem = MemoryManager::new();
        let dl = crate::testkit::TestLayout::default();
        let ctx = global_context();
        let reachable = mem.allocate_stack(ctx.clone(), crate::ir::ValueId(1), crate::testkit::TY_PTR, &dl);
        let unreachable = mem.allocate_stack(ctx, crate::ir::ValueId(2), crate::testkit::TY_PTR, &dl);
        let objects = mem.object_table();
        let reachable_idx = objects.index_of(&reachable).unwrap();
        let unreachable_idx = objects.index_of(&unreachable).unwrap();

        let mut store = Store::new();
        store.weak_update(reachable_idx, PointsToSet::empty());
        store.weak_update(unreachable_idx, PointsToSet::empty());

        let pruned = prune_store([reachable_idx], [], &store, &mem);
        assert_eq!(pruned.get(reachable_idx), store.get(reachable_idx));
        assert!(pruned.get(unreachable_idx).is_empty());
    }
}
