//! Invalid-use-of-stack-address checker (CWE-562): every local allocation
//! outside `main` is a source (stack addresses in `main` are treated as
//! having effectively global lifetime, since the process exits when `main`
//! returns); sinks are anywhere that address could escape its frame -- a
//! return value, a store into a global, or an argument to an external
//! function not on the known-safe list.

use std::collections::BTreeMap as Map;
use std::collections::BTreeSet as Set;

use crate::cfg::{Cfg, CfgNodeKind};
use crate::checkers::{callee_name, find_reachable, is_safe_stack_capture_function, Finding};
use crate::ir::{FuncId, Function, Module, ValueId};
use crate::vfg::Vfg;

const CHECKER: &str = "InvalidUseOfStackAddressChecker";
const CWE: &str = "CWE-562";

fn sources<M: Module>(module: &M, cfgs: &Map<FuncId, Cfg>) -> Vec<ValueId> {
    let mut out = Vec::new();
    for (&fid, cfg) in cfgs {
        if module.function(fid).name() == "main" {
            continue;
        }
        for n in cfg.node_ids() {
            if let CfgNodeKind::Alloc { dst, .. } = &cfg.node(n).kind {
                out.push(*dst);
            }
        }
    }
    out
}

fn sinks<M: Module>(module: &M, cfgs: &Map<FuncId, Cfg>) -> Vec<(ValueId, FuncId)> {
    let globals: Set<ValueId> = module.globals().into_iter().map(|(v, _)| v).collect();
    let mut out = Vec::new();
    super::for_each_node(cfgs, |fid, _n, kind| match kind {
        CfgNodeKind::Ret { val: Some(v) } => out.push((*v, fid)),
        CfgNodeKind::Store { ptr, val } if globals.contains(ptr) => out.push((*val, fid)),
        CfgNodeKind::Call { callee, args, .. } => {
            let Some(name) = callee_name(module, *callee) else { return };
            if is_safe_stack_capture_function(&name) {
                return;
            }
            if callee.map(|f| module.function(f).is_external()).unwrap_or(false) {
                out.extend(args.iter().map(|&a| (a, fid)));
            }
        }
        _ => {}
    });
    out
}

pub fn check<M: Module>(module: &M, cfgs: &Map<FuncId, Cfg>, vfg: &Vfg) -> Vec<Finding> {
    let srcs = sources(module, cfgs);
    let sks = sinks(module, cfgs);
    find_reachable(
        vfg,
        cfgs,
        CHECKER,
        CWE,
        |_src, _sink| "stack address may escape its function's frame".to_string(),
        85,
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
    fn returned_local_address_is_flagged() {
        let mut fb = FunctionBuilder::new(FuncId(0), "helper");
        let local = fb.fresh_value();
        fb.push(InstKind::Alloca { result: local, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        fb.push(InstKind::Return { val: Some(local) }, None);
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FuncId(0), func);
        let mut cfgs = Map::new();
        cfgs.insert(FuncId(0), crate::cfg::Cfg::build(module.function(FuncId(0))));
        let vfg = crate::vfg::build(&module, &cfgs, |_, _, _, _| true);

        let findings = check(&module, &cfgs, &vfg);
        assert!(findings.iter().any(|f| f.source == local && f.sink == local));
    }

    #[test]
    fn main_allocas_are_exempt() {
        let mut fb = FunctionBuilder::new(FuncId(0), "main");
        let local = fb.fresh_value();
        fb.push(InstKind::Alloca { result: local, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        fb.push(InstKind::Return { val: Some(local) }, None);
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FuncId(0), func);
        let mut cfgs = Map::new();
        cfgs.insert(FuncId(0), crate::cfg::Cfg::build(module.function(FuncId(0))));

        assert!(sources(&module, &cfgs).is_empty());
    }
}
