//! Witness path extraction: a best-effort, bounded BFS for one concrete
//! path between two values, compressed down to the "story" worth showing
//! a user -- stores, loads, calls, returns, PHIs, GEPs, and the two
//! endpoints -- with everything else collapsed to an ellipsis.
//!
//! The search is a worklist with an iteration cap, the same bounded-search
//! shape used elsewhere in this crate for anything that walks a
//! potentially huge graph and needs a hard stop rather than an unbounded
//! fixpoint.

use std::collections::{BTreeMap as Map, VecDeque};

use crate::ir::ValueId;
use crate::vfg::Vfg;

/// One element of a compressed witness path: either a kept node, or an
/// ellipsis standing in for a run of uninteresting ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathElem {
    Node(ValueId),
    Ellipsis,
}

/// The raw (uncompressed) shortest path from `from` to `to` by
/// unlabeled/call/return edge count, bounded by `iteration_limit`
/// BFS dequeues so a witness search on a huge module can't run forever.
/// `None` if no path is found within the bound -- callers should read that
/// as "no witness found", not "provably unreachable".
pub fn shortest_path(vfg: &Vfg, from: ValueId, to: ValueId, iteration_limit: usize) -> Option<Vec<ValueId>> {
    if from == to {
        return Some(vec![from]);
    }
    let mut prev: Map<ValueId, ValueId> = Map::new();
    let mut visited = std::collections::BTreeSet::new();
    let mut queue: VecDeque<ValueId> = VecDeque::new();
    visited.insert(from);
    queue.push_back(from);
    let mut steps = 0usize;

    while let Some(v) = queue.pop_front() {
        if steps >= iteration_limit {
            break;
        }
        steps += 1;
        for succ in vfg.all_successors(v) {
            if !visited.insert(succ) {
                continue;
            }
            prev.insert(succ, v);
            if succ == to {
                return Some(reconstruct(&prev, from, to));
            }
            queue.push_back(succ);
        }
    }
    None
}

fn reconstruct(prev: &Map<ValueId, ValueId>, from: ValueId, to: ValueId) -> Vec<ValueId> {
    let mut path = vec![to];
    let mut cur = to;
    while cur != from {
        cur = prev[&cur];
        path.push(cur);
    }
    path.reverse();
    path
}

/// Compresses a raw path down to its "interesting" nodes, per a
/// caller-supplied classifier (this module has no CFG access of its
/// own to tell a store from a GEP -- the caller, which does, supplies
/// `is_interesting`). Endpoints are always kept. A run of `cap` or more
/// consecutive uninteresting nodes collapses to one `Ellipsis`; shorter
/// runs are kept as-is, since collapsing two or three hops doesn't help
/// readability.
pub fn compress(path: &[ValueId], is_interesting: impl Fn(ValueId) -> bool, cap: usize) -> Vec<PathElem> {
    if path.is_empty() {
        return vec![];
    }
    let mut out = Vec::new();
    let last = path.len() - 1;
    let mut run_start: Option<usize> = None;

    for (i, &v) in path.iter().enumerate() {
        let keep = i == 0 || i == last || is_interesting(v);
        if keep {
            if let Some(start) = run_start.take() {
                flush_run(&mut out, path, start, i, cap);
            }
            out.push(PathElem::Node(v));
        } else if run_start.is_none() {
            run_start = Some(i);
        }
    }
    if let Some(start) = run_start {
        flush_run(&mut out, path, start, path.len(), cap);
    }
    out
}

fn flush_run(out: &mut Vec<PathElem>, path: &[ValueId], start: usize, end: usize, cap: usize) {
    let len = end - start;
    if len >= cap {
        out.push(PathElem::Ellipsis);
    } else {
        out.extend(path[start..end].iter().map(|&v| PathElem::Node(v)));
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
    fn finds_shortest_path_through_copy_chain() {
        let mut fb = FunctionBuilder::new(FuncId(0), "f");
        let a = fb.fresh_value();
        fb.push(InstKind::Alloca { result: a, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let b = fb.fresh_value();
        fb.push(InstKind::BitCast { result: b, src: a }, Some(TY_PTR));
        let c = fb.fresh_value();
        fb.push(InstKind::BitCast { result: c, src: b }, Some(TY_PTR));
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FuncId(0), func);
        let mut cfgs = Map::new();
        cfgs.insert(FuncId(0), Cfg::build(module.function(FuncId(0))));
        let vfg = crate::vfg::build(&module, &cfgs, |_, _, _, _| true);

        let path = shortest_path(&vfg, a, c, 1000).expect("path must exist");
        assert_eq!(path, vec![a, b, c]);
    }

    #[test]
    fn bounded_search_gives_up_cleanly() {
        let mut fb = FunctionBuilder::new(FuncId(0), "f");
        let a = fb.fresh_value();
        fb.push(InstKind::Alloca { result: a, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let unrelated = fb.fresh_value();
        fb.push(InstKind::Alloca { result: unrelated, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FuncId(0), func);
        let mut cfgs = Map::new();
        cfgs.insert(FuncId(0), Cfg::build(module.function(FuncId(0))));
        let vfg = crate::vfg::build(&module, &cfgs, |_, _, _, _| true);

        assert!(shortest_path(&vfg, a, unrelated, 1000).is_none());
    }

    #[test]
    fn compress_keeps_endpoints_and_collapses_long_runs() {
        let path: Vec<ValueId> = (0..10).map(ValueId).collect();
        let out = compress(&path, |_| false, 3);
        assert_eq!(out.first(), Some(&PathElem::Node(ValueId(0))));
        assert_eq!(out.last(), Some(&PathElem::Node(ValueId(9))));
        assert!(out.iter().any(|e| matches!(e, PathElem::Ellipsis)));
    }

    #[test]
    fn compress_keeps_short_runs_uncollapsed() {
        let path: Vec<ValueId> = (0..3).map(ValueId).collect();
        let out = compress(&path, |_| false, 5);
        assert!(!out.iter().any(|e| matches!(e, PathElem::Ellipsis)));
        assert_eq!(out.len(), 3);
    }
}
