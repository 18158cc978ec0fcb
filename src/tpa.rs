//! The top-level pointer analysis (TPA) engine: wires `Worklist`, `Memo`,
//! `transfer::Engine`, `CallGraph`, and `initializer` into the propagator
//! loop.
//!
//! A two-level function/node worklist drives the fixpoint: functions rotate
//! through an outer FIFO while nodes within a function drain in RPO order,
//! with `Memo` recording the store at each program point so re-entering a
//! function context resumes from what's already known rather than from
//! scratch.

use std::collections::BTreeMap as Map;

use crate::callgraph::CallGraph;
use crate::cfg::Cfg;
use crate::context::{global_context, ContextPolicy};
use crate::env_store::{Env, Store};
use crate::external_table::ExternalTable;
use crate::initializer::{build_cfgs, initialize, run_global_pointer_analysis};
use crate::ir::{FuncId, Module};
use crate::memory::MemoryManager;
use crate::pointer::PointerManager;
use crate::program_point::{FunctionContext, ProgramPoint};
use crate::transfer::Engine;
use crate::worklist::{Memo, Worklist};

/// Final, queryable result of a completed analysis run: the shared `Env`,
/// the per-program-point `Memo`, and the call graph discovered along the
/// way.
pub struct TpaResult {
    pub env: Env,
    pub memo: Memo,
    pub call_graph: CallGraph,
    pub mem: MemoryManager,
    pub pointers: PointerManager,
    pub cfgs: Map<FuncId, Cfg>,
}

impl TpaResult {
    /// Points-to set for `v` evaluated in `fc`, `None` if that pointer was
    /// never interned (dead/unreachable code).
    pub fn points_to(&self, fc: &FunctionContext, v: crate::ir::ValueId, origin: &dyn crate::pointer::ValueOrigin) -> Option<crate::ptset::PointsToSet> {
        let p = self.pointers.get(&fc.ctx, v, origin)?;
        Some(self.env.get(p))
    }
}

/// Run the flow/context-sensitive semi-sparse analysis to a fixpoint over
/// `module`, using `ctx_policy` for context sensitivity and
/// `external_table` for modeling calls into code the module doesn't define.
pub fn run<M: Module>(module: &M, ctx_policy: ContextPolicy, external_table: ExternalTable) -> TpaResult {
    let mut mem = MemoryManager::new();
    let mut pointers = PointerManager::new();
    let mut env = Env::new();
    let mut call_graph = CallGraph::new();
    let mut memo = Memo::new();
    let cfgs = build_cfgs(module);

    let mut global_store = Store::new();
    let global_state = run_global_pointer_analysis(module, &mut mem, &mut global_store);

    let Some(seed) = initialize(module, &mut mem, &mut pointers, &mut env, &global_store) else {
        return TpaResult { env, memo, call_graph, mem, pointers, cfgs };
    };

    let entry_fc = FunctionContext::new(seed.entry_func, global_context());
    let entry_node = cfgs[&seed.entry_func].entry;
    let entry_pp = ProgramPoint::new(entry_fc.clone(), entry_node);
    memo.merge_update(entry_pp.clone(), &seed.initial_store);

    let mut worklist = Worklist::new(false);
    worklist.enqueue(entry_fc, entry_node, cfgs[&seed.entry_func].node(entry_node).rpo);

    while let Some((fc, node)) = worklist.dequeue() {
        if !cfgs.contains_key(&fc.func) {
            continue;
        }
        let pp = ProgramPoint::new(fc.clone(), node);
        let store_in = memo.get(&pp);

        let mut engine = Engine {
            module,
            cfgs: &cfgs,
            mem: &mut mem,
            pointers: &mut pointers,
            call_graph: &mut call_graph,
            ctx_policy: &ctx_policy,
            external_table: &external_table,
            global_objects: &global_state.global_objects,
        };
        let result = engine.eval(&pp, &mut env, &store_in);

        for top_pp in result.top_level_successors {
            if let Some(target_cfg) = cfgs.get(&top_pp.fc.func) {
                worklist.enqueue(top_pp.fc.clone(), top_pp.node, target_cfg.node(top_pp.node).rpo);
            }
        }

        for (spp, new_store) in result.memory_level_successors {
            if memo.merge_update(spp.clone(), &new_store) {
                if let Some(target_cfg) = cfgs.get(&spp.fc.func) {
                    worklist.enqueue(spp.fc.clone(), spp.node, target_cfg.node(spp.node).rpo);
                }
            }
        }
    }

    TpaResult { env, memo, call_graph, mem, pointers, cfgs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::global_context as gctx;
    use crate::external_table::ExternalTable;
    use crate::ir::{FuncId as FId, InstKind};
    use crate::testkit::{FunctionBuilder, TestLayout, TestModule, TY_PTR};

    #[test]
    fn alloc_then_copy_points_to_same_object() {
        let mut fb = FunctionBuilder::new(FId(0), "main");
        let p = fb.fresh_value();
        fb.push(InstKind::Alloca { result: p, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let q = fb.fresh_value();
        fb.push(InstKind::Gep { result: q, base: p, byte_delta: 0, array_like: false }, Some(TY_PTR));
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.entry = Some(FId(0));
        module.functions.insert(FId(0), func);

        let result = run(&module, ContextPolicy::None, ExternalTable::empty());
        let origin = crate::value_origin::FunctionOrigin::build(&module, module.function(FId(0)));
        let fc = FunctionContext::new(FId(0), gctx());
        let p_pts = result.points_to(&fc, p, &origin).expect("p must be interned");
        let q_pts = result.points_to(&fc, q, &origin).expect("q must be interned");
        assert!(!p_pts.is_empty());
        assert_eq!(p_pts, q_pts);
    }
}
