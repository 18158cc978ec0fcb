//! CFL-reachability GVFA engine: forward and backward reachability that
//! respects matched call/return parentheses -- a path through a call edge
//! `+i` is only valid if it later either stays inside that call (never
//! returns) or returns through the matching `-i`, the same discipline a
//! context-free-language reachability formulation enforces with a pushdown
//! stack. This is what separates it from the flow-insensitive `fast`/
//! `precise` engines: it can reject an infeasible path that threads through
//! one call's callee and pops out as if it had returned from a different
//! call site.
//!
//! Implemented as a worklist/visited-set BFS, the same shape used
//! throughout this crate (`worklist.rs`, `cfg.rs`'s RPO pass), specialized
//! here to carry a small call-string stack as part of each BFS state
//! instead of just a node id.

use std::collections::{BTreeSet as Set, VecDeque};

use crate::ir::ValueId;
use crate::vfg::{CallEdgeId, Vfg};

/// Bounds the call stack depth a path may carry, guaranteeing termination
/// in the presence of recursive call cycles in the VFG. Matches this
/// crate's k-CFA default depth order of magnitude (`context.rs`); deep
/// recursion beyond this is reported as unreachable rather than explored
/// forever.
const MAX_STACK_DEPTH: usize = 64;

type Stack = Vec<CallEdgeId>;

/// `true` iff `to` is reachable from `from` along a VFG path whose
/// call/return edges form a balanced (possibly partially open) parenthesis
/// sequence: every return taken on the path must close the most recently
/// opened call still pending on that path.
pub fn cfl_reachable(vfg: &Vfg, from: ValueId, to: ValueId) -> bool {
    if from == to {
        return true;
    }
    let mut visited: Set<(ValueId, Stack)> = Set::new();
    let mut queue: VecDeque<(ValueId, Stack)> = VecDeque::new();
    let start = (from, Stack::new());
    visited.insert(start.clone());
    queue.push_back(start);

    while let Some((v, stack)) = queue.pop_front() {
        for succ in vfg.unlabeled_successors(v) {
            if succ == to {
                return true;
            }
            push_if_new(&mut visited, &mut queue, succ, stack.clone());
        }
        for (succ, id) in vfg.call_successors(v) {
            if stack.len() >= MAX_STACK_DEPTH {
                continue;
            }
            let mut next = stack.clone();
            next.push(id);
            if succ == to {
                return true;
            }
            push_if_new(&mut visited, &mut queue, succ, next);
        }
        for (succ, id) in vfg.return_successors(v) {
            // A return is only taken if it closes the call most recently
            // opened on this path; an empty stack means no call is open to
            // close, so the return is rejected rather than treated as a
            // free pass.
            let matches_top = stack.last().map(|top| *top == id).unwrap_or(false);
            if !matches_top {
                continue;
            }
            let mut next = stack.clone();
            next.pop();
            if succ == to {
                return true;
            }
            push_if_new(&mut visited, &mut queue, succ, next);
        }
    }

    false
}

/// Backward counterpart to [`cfl_reachable`]: `true` iff `to` is reachable
/// from `from` walking the VFG against edge direction, with call and
/// return roles swapped to match. Walking backward through a forward call
/// edge `+i` is a return in the backward direction, so it must close the
/// most recently opened entry on the backward stack; walking backward
/// through a forward return edge `-i` opens a new backward-stack entry
/// `i`. A path is backward-CFL-reachable exactly when the forward path it
/// retraces would have been CFL-reachable.
pub fn cfl_reachable_backward(vfg: &Vfg, from: ValueId, to: ValueId) -> bool {
    if from == to {
        return true;
    }
    let mut visited: Set<(ValueId, Stack)> = Set::new();
    let mut queue: VecDeque<(ValueId, Stack)> = VecDeque::new();
    let start = (from, Stack::new());
    visited.insert(start.clone());
    queue.push_back(start);

    while let Some((v, stack)) = queue.pop_front() {
        for pred in vfg.unlabeled_predecessors(v) {
            if pred == to {
                return true;
            }
            push_if_new(&mut visited, &mut queue, pred, stack.clone());
        }
        for (pred, id) in vfg.return_predecessors(v) {
            if stack.len() >= MAX_STACK_DEPTH {
                continue;
            }
            let mut next = stack.clone();
            next.push(id);
            if pred == to {
                return true;
            }
            push_if_new(&mut visited, &mut queue, pred, next);
        }
        for (pred, id) in vfg.call_predecessors(v) {
            let matches_top = stack.last().map(|top| *top == id).unwrap_or(false);
            if !matches_top {
                continue;
            }
            let mut next = stack.clone();
            next.pop();
            if pred == to {
                return true;
            }
            push_if_new(&mut visited, &mut queue, pred, next);
        }
    }

    false
}

fn push_if_new(visited: &mut Set<(ValueId, Stack)>, queue: &mut VecDeque<(ValueId, Stack)>, v: ValueId, stack: Stack) {
    let state = (v, stack);
    if visited.insert(state.clone()) {
        queue.push_back(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::Cfg;
    use crate::ir::{FuncId, InstKind};
    use crate::testkit::{FunctionBuilder, TestLayout, TestModule, TY_PTR};
    use std::collections::BTreeMap as Map;

    #[test]
    fn matched_call_and_return_are_reachable() {
        let mut callee_fb = FunctionBuilder::new(FuncId(1), "callee");
        let param = callee_fb.fresh_value();
        callee_fb.push(InstKind::Return { val: Some(param) }, None);
        let mut callee = callee_fb.finish();
        callee.params = vec![param];

        let mut caller_fb = FunctionBuilder::new(FuncId(0), "caller");
        let arg = caller_fb.fresh_value();
        caller_fb.push(InstKind::Alloca { result: arg, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let result = caller_fb.fresh_value();
        caller_fb.push(
            InstKind::Call { result: Some(result), callee: Some(FuncId(1)), callee_ptr: None, args: vec![arg] },
            Some(TY_PTR),
        );
        let caller = caller_fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FuncId(0), caller);
        module.functions.insert(FuncId(1), callee);
        let mut cfgs = Map::new();
        cfgs.insert(FuncId(0), Cfg::build(module.function(FuncId(0))));
        cfgs.insert(FuncId(1), Cfg::build(module.function(FuncId(1))));

        let vfg = crate::vfg::build(&module, &cfgs, |_, _, _, _| true);
        assert!(cfl_reachable(&vfg, arg, result));
        assert!(cfl_reachable_backward(&vfg, result, arg));
    }

    #[test]
    fn unrelated_values_are_unreachable() {
        let mut fb = FunctionBuilder::new(FuncId(0), "f");
        let a = fb.fresh_value();
        fb.push(InstKind::Alloca { result: a, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let b = fb.fresh_value();
        fb.push(InstKind::Alloca { result: b, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FuncId(0), func);
        let mut cfgs = Map::new();
        cfgs.insert(FuncId(0), Cfg::build(module.function(FuncId(0))));
        let vfg = crate::vfg::build(&module, &cfgs, |_, _, _, _| true);

        assert!(!cfl_reachable(&vfg, a, b));
        assert!(!cfl_reachable_backward(&vfg, b, a));
    }

    #[test]
    fn unmatched_return_is_rejected() {
        // A lone return edge with nothing on the call stack must not be
        // treated as a free pass.
        let mut callee_fb = FunctionBuilder::new(FuncId(1), "callee");
        let param = callee_fb.fresh_value();
        callee_fb.push(InstKind::Return { val: Some(param) }, None);
        let mut callee = callee_fb.finish();
        callee.params = vec![param];

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FuncId(1), callee);
        let mut cfgs = Map::new();
        cfgs.insert(FuncId(1), Cfg::build(module.function(FuncId(1))));
        let vfg = crate::vfg::build(&module, &cfgs, |_, _, _, _| true);

        // With no caller present, the callee's return edge has no matching
        // call on the stack; nothing beyond the value itself is reachable
        // through it.
        assert!(!cfl_reachable(&vfg, param, ValueId(u32::MAX)));
    }
}
