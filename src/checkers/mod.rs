//! Bug checkers layered on top of the GVFA engines. Each checker is a pair
//! of source/sink finders plus a reachability query -- no mutable global
//! registry; a checker run just returns the `Vec<Finding>` it found.
//!
//! None of these checkers need a transfer filter to block propagation
//! through a reallocation or a validating call (`malloc` un-tainting a
//! freed pointer, `check()` un-tainting a null one): the VFG (`vfg.rs`)
//! tracks SSA *value* identity, so a post-free/post-check value is a
//! different `ValueId` with no def-use edge back to the pre-free/pre-check
//! one, and the false reachability such a filter would guard against never
//! arises in the first place.

pub mod free_nonheap;
pub mod null_deref;
pub mod stack_escape;
pub mod uninit;
pub mod use_after_free;

use std::collections::BTreeMap as Map;

use crate::cfg::{Cfg, CfgNodeKind, NodeId};
use crate::gvfa::{extend_sources, fast, witness, SinkSet};
use crate::ir::{FuncId, Function, Module, ValueId};
use crate::vfg::Vfg;

/// One detected bug instance.
#[derive(Debug, Clone)]
pub struct Finding {
    pub checker: &'static str,
    pub cwe: &'static str,
    pub message: String,
    pub source: ValueId,
    pub sink: ValueId,
    pub sink_function: FuncId,
    pub confidence: u8,
    pub witness: Vec<witness::PathElem>,
}

/// Calls `f` once per CFG node across every function in `cfgs`, walking
/// the semi-sparse `Cfg` instead of raw basic blocks.
pub fn for_each_node<'a>(cfgs: &'a Map<FuncId, Cfg>, mut f: impl FnMut(FuncId, NodeId, &'a CfgNodeKind)) {
    for (&fid, cfg) in cfgs {
        for n in cfg.node_ids() {
            f(fid, n, &cfg.node(n).kind);
        }
    }
}

pub fn callee_name<M: Module>(module: &M, callee: Option<FuncId>) -> Option<String> {
    callee.map(|f| module.function(f).name().to_string())
}

pub fn is_memory_allocation(name: &str) -> bool {
    matches!(
        name,
        "malloc" | "calloc" | "realloc" | "reallocf" | "_Znwm" | "_Znam" | "_ZnwmRKSt9nothrow_t" | "_ZnamRKSt9nothrow_t"
    )
}

pub fn is_memory_deallocation(name: &str) -> bool {
    matches!(name, "free" | "cfree" | "delete" | "_ZdlPv" | "_ZdaPv" | "kfree")
}

pub fn does_lib_function_dereference_arg(name: &str, arg_idx: usize) -> bool {
    if name == "memcpy" || name.starts_with("__memcpy_chk") || name == "memmove" || name.starts_with("__memmove_chk") {
        return arg_idx == 0 || arg_idx == 1;
    }
    if name == "memset" || name.starts_with("__memset_chk") {
        return arg_idx == 0;
    }
    if name == "strcpy"
        || name.starts_with("__strcpy_chk")
        || name == "strncpy"
        || name.starts_with("__strncpy_chk")
        || name == "strcat"
        || name.starts_with("__strcat_chk")
        || name == "strncat"
        || name.starts_with("__strncat_chk")
    {
        return arg_idx == 0 || arg_idx == 1;
    }
    if name == "strcmp" || name == "strncmp" || name == "strlen" || name == "strnlen" {
        return arg_idx < 2;
    }
    if name == "strchr" || name == "strrchr" || name == "strstr" {
        return arg_idx == 0;
    }
    false
}

pub fn is_initialization_function(name: &str) -> bool {
    name.contains("init") || name.contains("memset") || name.contains("bzero") || name.contains("memcpy")
}

pub fn is_safe_stack_capture_function(name: &str) -> bool {
    name.starts_with("llvm.") || matches!(name, "free" | "printf" | "fprintf" | "sprintf" | "snprintf")
}

/// Sinks every checker in this module shares: the pointer operand of a
/// Load/Store/GEP, and any call argument a known library function
/// dereferences. Most checkers' sink sets are identical past their own
/// checker-specific extra cases, so this is factored out once.
pub fn common_dereference_sinks<M: Module>(module: &M, cfgs: &Map<FuncId, Cfg>) -> Vec<(ValueId, FuncId)> {
    let mut sinks = Vec::new();
    for_each_node(cfgs, |fid, _n, kind| match kind {
        CfgNodeKind::Load { src, .. } => sinks.push((*src, fid)),
        CfgNodeKind::Store { ptr, .. } => sinks.push((*ptr, fid)),
        CfgNodeKind::Offset { src, .. } => sinks.push((*src, fid)),
        CfgNodeKind::Call { callee, args, .. } => {
            if let Some(name) = callee_name(module, *callee) {
                for (i, &arg) in args.iter().enumerate() {
                    if does_lib_function_dereference_arg(&name, i) {
                        sinks.push((arg, fid));
                    }
                }
            }
        }
        _ => {}
    });
    sinks
}

/// A value is "interesting" for a compressed witness if it's defined at a
/// load, a GEP, a call result, or a control-flow merge -- the nodes a
/// reader would want named, as opposed to a run of plain copies/casts in
/// between. Stores and returns never show up as VFG nodes in the first
/// place (`vfg.rs`'s nodes are SSA values, not instructions), so there's
/// nothing to classify for them here.
fn is_interesting_value(cfgs: &Map<FuncId, Cfg>, v: ValueId) -> bool {
    for cfg in cfgs.values() {
        if let Some(n) = cfg.def_site_of(v) {
            return matches!(
                &cfg.node(n).kind,
                CfgNodeKind::Load { .. } | CfgNodeKind::Offset { .. } | CfgNodeKind::Call { .. } | CfgNodeKind::Copy { .. }
            );
        }
    }
    false
}

/// Runs one checker's source set against its sink set through the Fast
/// GVFA engine and emits a [`Finding`] per reachable pair, with a
/// best-effort witness path attached.
pub fn find_reachable(
    vfg: &Vfg,
    cfgs: &Map<FuncId, Cfg>,
    checker: &'static str,
    cwe: &'static str,
    message: impl Fn(ValueId, ValueId) -> String,
    confidence: u8,
    sources: &[ValueId],
    sinks: &[(ValueId, FuncId)],
) -> Vec<Finding> {
    if sources.is_empty() || sinks.is_empty() {
        return Vec::new();
    }
    let extended = extend_sources(vfg, sources);
    let sink_set = SinkSet { values: sinks.iter().map(|(v, _)| *v).collect() };
    let engine = fast::build(vfg, &extended, &sink_set);

    let mut out = Vec::new();
    for &(sink, fid) in sinks {
        if !engine.backward_reachable(sink) {
            continue;
        }
        for &src in sources {
            let Some(path) = witness::shortest_path(vfg, src, sink, 4096) else { continue };
            out.push(Finding {
                checker,
                cwe,
                message: message(src, sink),
                source: src,
                sink,
                sink_function: fid,
                confidence,
                witness: witness::compress(&path, |v| is_interesting_value(cfgs, v), 8),
            });
        }
    }
    out
}
