//! Free-of-non-heap-memory checker (CWE-590): every stack allocation and
//! every global variable is a source (neither is heap memory); the first
//! argument of a deallocation call is the sink.

use std::collections::BTreeMap as Map;

use crate::cfg::{Cfg, CfgNodeKind};
use crate::checkers::{callee_name, find_reachable, is_memory_deallocation, Finding};
use crate::ir::{FuncId, Module, ValueId};
use crate::vfg::Vfg;

const CHECKER: &str = "FreeOfNonHeapMemoryChecker";
const CWE: &str = "CWE-590";

fn sources<M: Module>(module: &M, cfgs: &Map<FuncId, Cfg>) -> Vec<ValueId> {
    let mut out = Vec::new();
    super::for_each_node(cfgs, |_fid, _n, kind| {
        if let CfgNodeKind::Alloc { dst, .. } = kind {
            out.push(*dst);
        }
    });
    out.extend(module.globals().into_iter().map(|(v, _)| v));
    out
}

fn sinks<M: Module>(module: &M, cfgs: &Map<FuncId, Cfg>) -> Vec<(ValueId, FuncId)> {
    let mut out = Vec::new();
    super::for_each_node(cfgs, |fid, _n, kind| {
        if let CfgNodeKind::Call { callee, args, .. } = kind {
            if is_memory_deallocation(&callee_name(module, *callee).unwrap_or_default()) {
                if let Some(&ptr) = args.first() {
                    out.push((ptr, fid));
                }
            }
        }
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
        |_src, _sink| "attempt to free memory not allocated on the heap".to_string(),
        90,
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
    fn freeing_a_stack_allocation_is_flagged() {
        let mut fb = FunctionBuilder::new(FuncId(0), "f");
        let local = fb.fresh_value();
        fb.push(InstKind::Alloca { result: local, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let unused = fb.fresh_value();
        fb.push(InstKind::Call { result: Some(unused), callee: Some(FuncId(1)), callee_ptr: None, args: vec![local] }, None);
        let func = fb.finish();

        let free_fb = FunctionBuilder::new(FuncId(1), "free");
        let mut free_func = free_fb.finish();
        free_func.external = true;

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FuncId(0), func);
        module.functions.insert(FuncId(1), free_func);

        let mut cfgs = Map::new();
        cfgs.insert(FuncId(0), crate::cfg::Cfg::build(module.function(FuncId(0))));
        cfgs.insert(FuncId(1), crate::cfg::Cfg::build(module.function(FuncId(1))));
        let vfg = crate::vfg::build(&module, &cfgs, |_, _, _, _| true);

        let findings = check(&module, &cfgs, &vfg);
        assert!(findings.iter().any(|f| f.source == local && f.sink == local));
    }
}
