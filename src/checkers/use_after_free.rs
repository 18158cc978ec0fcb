//! Use-after-free checker (CWE-416): the pointer passed to a deallocation
//! call is a source; any subsequent dereference of that same value is a
//! sink.

use std::collections::BTreeMap as Map;

use crate::cfg::{Cfg, CfgNodeKind};
use crate::checkers::{callee_name, common_dereference_sinks, find_reachable, is_memory_deallocation, Finding};
use crate::ir::{FuncId, Module, ValueId};
use crate::vfg::Vfg;

const CHECKER: &str = "UseAfterFreeChecker";
const CWE: &str = "CWE-416";

fn sources<M: Module>(module: &M, cfgs: &Map<FuncId, Cfg>) -> Vec<ValueId> {
    let mut out = Vec::new();
    super::for_each_node(cfgs, |_fid, _n, kind| {
        if let CfgNodeKind::Call { callee, args, .. } = kind {
            if is_memory_deallocation(&callee_name(module, *callee).unwrap_or_default()) {
                if let Some(&freed) = args.first() {
                    out.push(freed);
                }
            }
        }
    });
    out
}

pub fn check<M: Module>(module: &M, cfgs: &Map<FuncId, Cfg>, vfg: &Vfg) -> Vec<Finding> {
    let srcs = sources(module, cfgs);
    let sinks = common_dereference_sinks(module, cfgs);
    find_reachable(vfg, cfgs, CHECKER, CWE, |_src, _sink| "use of freed memory".to_string(), 75, &srcs, &sinks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FuncId, InstKind};
    use crate::testkit::{FunctionBuilder, TestLayout, TestModule, TY_PTR};

    #[test]
    fn load_after_free_is_flagged() {
        let mut fb = FunctionBuilder::new(FuncId(0), "f");
        let ptr = fb.fresh_value();
        fb.push(InstKind::Alloca { result: ptr, allocated_ty: TY_PTR, is_heap: true }, Some(TY_PTR));
        let freed = fb.fresh_value();
        fb.push(InstKind::Call { result: Some(freed), callee: Some(FuncId(1)), callee_ptr: None, args: vec![ptr] }, None);
        let loaded = fb.fresh_value();
        fb.push(InstKind::Load { result: loaded, ptr }, Some(TY_PTR));
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
        assert!(findings.iter().any(|f| f.source == ptr && f.sink == ptr));
    }
}
