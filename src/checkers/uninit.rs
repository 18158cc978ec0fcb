//! Use-of-uninitialized-variable checker (CWE-457): sources are allocas
//! nobody stores to, explicit `undef` values, and loads from an alloca
//! directly (flow-insensitively -- a load doesn't need to definitely
//! precede any store to count as a source); sinks are values fed to an
//! operation that reads them without a guard (a stored value, a returned
//! value, a call argument).

use std::collections::BTreeMap as Map;

use crate::cfg::{Cfg, CfgNodeKind};
use crate::checkers::{find_reachable, Finding};
use crate::ir::{FuncId, Module, ValueId};
use crate::vfg::Vfg;

const CHECKER: &str = "UseOfUninitializedVariableChecker";
const CWE: &str = "CWE-457";

fn sources<M: Module>(module: &M, cfgs: &Map<FuncId, Cfg>) -> Vec<ValueId> {
    let mut out = Vec::new();
    for cfg in cfgs.values() {
        let stored_ptrs: std::collections::BTreeSet<ValueId> = cfg
            .node_ids()
            .filter_map(|n| match &cfg.node(n).kind {
                CfgNodeKind::Store { ptr, .. } => Some(*ptr),
                _ => None,
            })
            .collect();
        for n in cfg.node_ids() {
            match &cfg.node(n).kind {
                CfgNodeKind::Alloc { dst, .. } if !stored_ptrs.contains(dst) => out.push(*dst),
                CfgNodeKind::Load { dst, src } => {
                    if let Some(def) = cfg.def_site_of(*src) {
                        if matches!(&cfg.node(def).kind, CfgNodeKind::Alloc { .. }) {
                            out.push(*dst);
                        }
                    }
                }
                _ => {}
            }
            for used in cfg.node(n).kind.used_values() {
                if module.is_undef_constant(used) {
                    out.push(used);
                }
            }
        }
    }
    out
}

fn sinks(cfgs: &Map<FuncId, Cfg>) -> Vec<(ValueId, FuncId)> {
    let mut out = Vec::new();
    super::for_each_node(cfgs, |fid, _n, kind| match kind {
        CfgNodeKind::Store { val, .. } => out.push((*val, fid)),
        CfgNodeKind::Ret { val: Some(v) } => out.push((*v, fid)),
        CfgNodeKind::Call { args, .. } => out.extend(args.iter().map(|&a| (a, fid))),
        _ => {}
    });
    out
}

pub fn check<M: Module>(module: &M, cfgs: &Map<FuncId, Cfg>, vfg: &Vfg) -> Vec<Finding> {
    let srcs = sources(module, cfgs);
    let sks = sinks(cfgs);
    find_reachable(
        vfg,
        cfgs,
        CHECKER,
        CWE,
        |_src, _sink| "use of potentially uninitialized value".to_string(),
        75,
        &srcs,
        &sks,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FuncId, InstKind};
    use crate::testkit::{FunctionBuilder, TestLayout, TestModule, TY_PTR};

    #[test]
    fn unstored_alloca_loaded_and_returned_is_flagged() {
        let mut fb = FunctionBuilder::new(FuncId(0), "f");
        let slot = fb.fresh_value();
        fb.push(InstKind::Alloca { result: slot, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let loaded = fb.fresh_value();
        fb.push(InstKind::Load { result: loaded, ptr: slot }, Some(TY_PTR));
        fb.push(InstKind::Return { val: Some(loaded) }, None);
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FuncId(0), func);

        let mut cfgs = Map::new();
        cfgs.insert(FuncId(0), crate::cfg::Cfg::build(module.function(FuncId(0))));
        let vfg = crate::vfg::build(&module, &cfgs, |_, _, _, _| true);

        let findings = check(&module, &cfgs, &vfg);
        assert!(findings.iter().any(|f| f.source == loaded && f.sink == loaded));
    }

    #[test]
    fn alloca_with_initial_store_is_not_a_source() {
        let mut fb = FunctionBuilder::new(FuncId(0), "f");
        let slot = fb.fresh_value();
        fb.push(InstKind::Alloca { result: slot, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let zero = fb.fresh_value();
        fb.push(InstKind::Store { ptr: slot, val: zero }, None);
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FuncId(0), func);
        let mut cfgs = Map::new();
        cfgs.insert(FuncId(0), crate::cfg::Cfg::build(module.function(FuncId(0))));

        assert!(!sources(&module, &cfgs).contains(&slot));
    }
}
