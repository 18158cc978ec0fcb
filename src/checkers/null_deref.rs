//! Null pointer dereference checker (CWE-476, CWE-690): sources are null
//! constants stored to memory and the results of allocation functions
//! (which may return null on failure); sinks are any pointer dereference.

use std::collections::BTreeMap as Map;

use crate::cfg::{Cfg, CfgNodeKind};
use crate::checkers::{callee_name, common_dereference_sinks, find_reachable, is_memory_allocation, Finding};
use crate::ir::{FuncId, Module, ValueId};
use crate::vfg::Vfg;

const CHECKER: &str = "NullPointerChecker";
const CWE: &str = "CWE-476, CWE-690";

fn sources<M: Module>(module: &M, cfgs: &Map<FuncId, Cfg>) -> Vec<ValueId> {
    let mut out = Vec::new();
    super::for_each_node(cfgs, |_fid, _n, kind| match kind {
        CfgNodeKind::Store { val, .. } if module.is_null_constant(*val) => out.push(*val),
        CfgNodeKind::Call { result: Some(result), callee, .. } if is_memory_allocation(&callee_name(module, *callee).unwrap_or_default()) => {
            out.push(*result)
        }
        _ => {}
    });
    out
}

/// Runs the checker over `module`'s CFGs/VFG and returns one [`Finding`] per
/// witnessed null-to-dereference path.
pub fn check<M: Module>(module: &M, cfgs: &Map<FuncId, Cfg>, vfg: &Vfg) -> Vec<Finding> {
    let srcs = sources(module, cfgs);
    let sinks = common_dereference_sinks(module, cfgs);
    find_reachable(
        vfg,
        cfgs,
        CHECKER,
        CWE,
        |_src, _sink| "potential null pointer dereference".to_string(),
        70,
        &srcs,
        &sinks,
    )
}
