//! Generalized value-flow analysis: a shared source/sink model plus four
//! engines of increasing precision and cost, all walking the same `Vfg`.
//! Each engine picks a different point on the precision/cost curve: Fast
//! collapses identity down to bitmasks, Precise keeps full per-source
//! identity, Cfl adds call/return matching, and Witness reconstructs an
//! actual path instead of just a yes/no answer.
//!
//! Every engine reuses the same worklist/visited-set BFS idiom (`VecDeque`
//! + a visited set) as the rest of this crate's fixpoint passes, each as
//! its own submodule.

pub mod cfl;
pub mod fast;
pub mod precise;
pub mod witness;

use std::collections::{BTreeSet as Set, VecDeque};

use crate::ir::ValueId;
use crate::vfg::Vfg;

/// Index of one source value in a particular analysis run -- stable for the
/// lifetime of the `SourceSet` it came from, used as the bit position in
/// the Fast/Precise engines' bitmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SinkId(pub u32);

/// The taint/flow source set an engine is built against, after source
/// extension has widened it.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    pub values: Vec<ValueId>,
}

#[derive(Debug, Clone, Default)]
pub struct SinkSet {
    pub values: Vec<ValueId>,
}

/// Widens `initial` backward along the VFG so that anything flowing into a
/// source is itself treated as one, before any engine runs its main
/// forward pass. A plain backward BFS over `all_predecessors`,
/// deduplicated by a visited set.
pub fn extend_sources(vfg: &Vfg, initial: &[ValueId]) -> SourceSet {
    let mut seen: Set<ValueId> = initial.iter().copied().collect();
    let mut queue: VecDeque<ValueId> = initial.iter().copied().collect();
    while let Some(v) = queue.pop_front() {
        for pred in vfg.all_predecessors(v) {
            if seen.insert(pred) {
                queue.push_back(pred);
            }
        }
    }
    SourceSet { values: seen.into_iter().collect() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::Cfg;
    use crate::ir::{FuncId, InstKind};
    use crate::testkit::{FunctionBuilder, TestLayout, TestModule, TY_PTR};
    use std::collections::BTreeMap as Map;

    #[test]
    fn source_extension_includes_upstream_copies() {
        let mut fb = FunctionBuilder::new(FuncId(0), "f");
        let a = fb.fresh_value();
        fb.push(InstKind::Alloca { result: a, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let b = fb.fresh_value();
        fb.push(InstKind::BitCast { result: b, src: a }, Some(TY_PTR));
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FuncId(0), func);
        let mut cfgs = Map::new();
        cfgs.insert(FuncId(0), Cfg::build(module.function(FuncId(0))));

        let vfg = crate::vfg::build(&module, &cfgs, |_, _, _, _| true);
        let extended = extend_sources(&vfg, &[b]);
        assert!(extended.values.contains(&a));
        assert!(extended.values.contains(&b));
    }
}
