//! Fast GVFA engine: a forward bitmask BFS (which sources reach each node,
//! packed into one bitset per node) and a backward visit-count BFS (how
//! many sinks can reach each node, collapsed to a single counter rather
//! than a full per-sink identity set -- the precision this engine trades
//! away for speed against `precise.rs`).

use std::collections::BTreeMap as Map;
use std::collections::{BTreeSet as Set, VecDeque};

use roaring::RoaringBitmap;

use crate::ir::ValueId;
use crate::vfg::Vfg;

use super::{SinkSet, SourceId, SourceSet};

pub struct FastEngine {
    forward: Map<ValueId, RoaringBitmap>,
    backward_count: Map<ValueId, u32>,
}

impl FastEngine {
    /// `true` iff any source whose id is set in `mask` reaches `v` forward
    /// through the VFG.
    pub fn reachable(&self, v: ValueId, mask: &RoaringBitmap) -> bool {
        match self.forward.get(&v) {
            Some(bits) => !(bits & mask).is_empty(),
            None => false,
        }
    }

    /// `true` iff at least one sink is backward-reachable from `v`.
    pub fn backward_reachable(&self, v: ValueId) -> bool {
        self.backward_count.get(&v).copied().unwrap_or(0) > 0
    }

    /// Number of distinct sinks backward-reachable from `v`. Not part of the
    /// exposed query surface, but the only way this engine's trimmed-down
    /// backward pass can be inspected at all (it never stores sink
    /// identity, only the count).
    pub fn backward_sink_count(&self, v: ValueId) -> u32 {
        self.backward_count.get(&v).copied().unwrap_or(0)
    }

    /// Exact per-source backward reachability is unsupported by this
    /// engine -- it never keeps per-source identity on the backward side
    /// and would have to re-derive it at `precise.rs`'s cost. `None`
    /// signals "ask a different engine" rather than a wrong answer.
    pub fn src_reachable(&self, v: ValueId, src: SourceId) -> Option<bool> {
        let _ = (v, src);
        log::warn!("FastEngine::src_reachable is unsupported; use PreciseEngine");
        None
    }
}

fn assign_source_ids(sources: &SourceSet) -> Vec<(ValueId, SourceId)> {
    sources.values.iter().enumerate().map(|(i, &v)| (v, SourceId(i as u32))).collect()
}

/// Builds the Fast engine's forward bitmasks and backward counts over
/// `vfg`, from an already source-extended `sources` set.
pub fn build(vfg: &Vfg, sources: &SourceSet, sinks: &SinkSet) -> FastEngine {
    let ids = assign_source_ids(sources);
    let mut forward: Map<ValueId, RoaringBitmap> = Map::new();
    let mut worklist: VecDeque<ValueId> = VecDeque::new();

    for (v, id) in &ids {
        let bits = forward.entry(*v).or_default();
        if bits.insert(id.0) {
            worklist.push_back(*v);
        }
    }

    while let Some(v) = worklist.pop_front() {
        let bits = forward.get(&v).cloned().unwrap_or_default();
        for succ in vfg.all_successors(v) {
            let entry = forward.entry(succ).or_default();
            let before = entry.len();
            *entry |= &bits;
            if entry.len() != before {
                worklist.push_back(succ);
            }
        }
    }

    let mut backward_count: Map<ValueId, u32> = Map::new();
    for &sink in &sinks.values {
        let mut visited: Set<ValueId> = Set::new();
        let mut queue: VecDeque<ValueId> = VecDeque::new();
        visited.insert(sink);
        queue.push_back(sink);
        while let Some(v) = queue.pop_front() {
            *backward_count.entry(v).or_insert(0) += 1;
            for pred in vfg.all_predecessors(v) {
                if visited.insert(pred) {
                    queue.push_back(pred);
                }
            }
        }
    }

    FastEngine { forward, backward_count }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::Cfg;
    use crate::ir::{FuncId, InstKind};
    use crate::testkit::{FunctionBuilder, TestLayout, TestModule, TY_PTR};
    use std::collections::BTreeMap as Map;

    #[test]
    fn forward_reachability_follows_copy_chain() {
        let mut fb = FunctionBuilder::new(FuncId(0), "f");
        let a = fb.fresh_value();
        fb.push(InstKind::Alloca { result: a, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let b = fb.fresh_value();
        fb.push(InstKind::BitCast { result: b, src: a }, Some(TY_PTR));
        let c = fb.fresh_value();
        fb.push(InstKind::BitCast { result: c, src: b }, Some(TY_PTR));
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FuncId(0), func);
        let mut cfgs = Map::new();
        cfgs.insert(FuncId(0), Cfg::build(module.function(FuncId(0))));
        let vfg = crate::vfg::build(&module, &cfgs, |_, _, _, _| true);

        let sources = SourceSet { values: vec![a] };
        let sinks = SinkSet { values: vec![c] };
        let engine = build(&vfg, &sources, &sinks);

        let mut mask = RoaringBitmap::new();
        mask.insert(0);
        assert!(engine.reachable(c, &mask));
        assert!(engine.backward_reachable(a));
        assert_eq!(engine.backward_sink_count(a), 1);
    }

    #[test]
    fn unreached_node_is_not_reachable() {
        let mut fb = FunctionBuilder::new(FuncId(0), "f");
        let a = fb.fresh_value();
        fb.push(InstKind::Alloca { result: a, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let isolated = fb.fresh_value();
        fb.push(InstKind::Alloca { result: isolated, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FuncId(0), func);
        let mut cfgs = Map::new();
        cfgs.insert(FuncId(0), Cfg::build(module.function(FuncId(0))));
        let vfg = crate::vfg::build(&module, &cfgs, |_, _, _, _| true);

        let sources = SourceSet { values: vec![a] };
        let sinks = SinkSet { values: vec![] };
        let engine = build(&vfg, &sources, &sinks);
        let mut mask = RoaringBitmap::new();
        mask.insert(0);
        assert!(!engine.reachable(isolated, &mask));
    }
}
