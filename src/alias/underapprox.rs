//! Under-approximate alias backend: a cheap, sound-for-`MustAlias`-only
//! per-function congruence closure over SSA values, no points-to sets at
//! all.
//!
//! A path-compressed union-find with union-on-demand, closing over the
//! atomic rules in one pass per function (identity, no-op casts, zero-index
//! GEP, identical constant-offset GEP, inttoptr/ptrtoint round-trips, and
//! both-Null) and then the inductive PHI/Select rules to a fixpoint.

use std::collections::BTreeMap as Map;
use std::collections::BTreeSet as Set;

use crate::alias::AliasResult;
use crate::ir::{FuncId, InstKind, Module, ValueId};

#[derive(Default)]
struct UnionFind {
    parent: Map<ValueId, ValueId>,
}

impl UnionFind {
    fn find(&mut self, v: ValueId) -> ValueId {
        let p = *self.parent.entry(v).or_insert(v);
        if p == v {
            return v;
        }
        let root = self.find(p);
        self.parent.insert(v, root);
        root
    }

    /// Returns `true` if this actually merged two distinct classes.
    fn union(&mut self, a: ValueId, b: ValueId) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        // Lower-numbered value wins as representative: deterministic and
        // independent of instruction-processing order.
        let (keep, drop) = if ra.0 <= rb.0 { (ra, rb) } else { (rb, ra) };
        self.parent.insert(drop, keep);
        true
    }
}

/// Result of running the under-approximate backend over a module: one
/// union-find per function (values from different functions are never
/// unioned), plus the set of values the module reports as null constants,
/// which alias `MustAlias` across function boundaries too.
pub struct UnderApproxResult {
    per_function: Map<FuncId, UnionFind>,
    null_values: Set<ValueId>,
}

impl UnderApproxResult {
    /// Only ever answers `MustAlias` or the conservative `MayAlias` -- this
    /// backend has no points-to model to derive `NoAlias`/`PartialAlias`
    /// from.
    pub fn query(&self, f1: FuncId, v1: ValueId, f2: FuncId, v2: ValueId) -> AliasResult {
        if self.null_values.contains(&v1) && self.null_values.contains(&v2) {
            return AliasResult::MustAlias;
        }
        if f1 != f2 {
            return AliasResult::MayAlias;
        }
        let Some(uf) = self.per_function.get(&f1) else { return AliasResult::MayAlias };
        // `find` needs `&mut`, but the class roots it observes are
        // per-function and immutable once `run` has returned, so a local
        // clone-then-mutate is just as correct as storing `&mut self`.
        let mut uf = clone_uf(uf);
        if uf.find(v1) == uf.find(v2) {
            AliasResult::MustAlias
        } else {
            AliasResult::MayAlias
        }
    }
}

fn clone_uf(uf: &UnionFind) -> UnionFind {
    UnionFind { parent: uf.parent.clone() }
}

/// Builds the congruence closure. Runs the atomic rules in one pass per
/// function, then the inductive PHI/Select rules to a fixpoint (bounded by
/// the number of PHI/Select instructions in the function, since each pass
/// must merge at least one class to continue).
pub fn run<M: Module>(module: &M) -> UnderApproxResult {
    let mut per_function = Map::new();
    let mut null_values = Set::new();

    for f in module.functions() {
        let mut uf = UnionFind::default();
        let mut gep_sites: Map<(ValueId, i64), ValueId> = Map::new();
        let mut ptrtoint_src: Map<ValueId, ValueId> = Map::new();
        let mut phi_select: Vec<InstKind> = Vec::new();

        for b in f.blocks() {
            for inst in b.instructions() {
                match inst.kind() {
                    InstKind::BitCast { result, src } | InstKind::AddrSpaceCast { result, src } => {
                        uf.union(result, src);
                    }
                    InstKind::Gep { result, base, byte_delta: 0, .. } => {
                        uf.union(result, base);
                    }
                    InstKind::Gep { result, base, byte_delta, .. } => {
                        let base_root = uf.find(base);
                        if let Some(&existing) = gep_sites.get(&(base_root, byte_delta)) {
                            uf.union(result, existing);
                        } else {
                            gep_sites.insert((base_root, byte_delta), result);
                        }
                    }
                    InstKind::PtrToInt { result, src } => {
                        ptrtoint_src.insert(result, src);
                    }
                    InstKind::IntToPtr { result, src } => {
                        if let Some(&orig) = ptrtoint_src.get(&src) {
                            uf.union(result, orig);
                        }
                    }
                    k @ (InstKind::Phi { .. } | InstKind::Select { .. }) => phi_select.push(k),
                    _ => {}
                }
            }
        }

        // Inductive closure over PHI/Select: re-scan until a pass makes no
        // progress.
        loop {
            let mut changed = false;
            for k in &phi_select {
                match k {
                    InstKind::Phi { result, incoming } => {
                        if let Some(first) = incoming.first() {
                            let root = uf.find(*first);
                            if incoming.iter().all(|v| uf.find(*v) == root) && uf.union(*result, *first) {
                                changed = true;
                            }
                        }
                    }
                    InstKind::Select { result, true_val, false_val } => {
                        if uf.find(*true_val) == uf.find(*false_val) && uf.union(*result, *true_val) {
                            changed = true;
                        }
                    }
                    _ => {}
                }
            }
            if !changed {
                break;
            }
        }

        per_function.insert(f.id(), uf);
    }

    for (v, _ty) in module.globals() {
        if module.is_null_constant(v) {
            null_values.insert(v);
        }
    }

    UnderApproxResult { per_function, null_values }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FuncId as FId;
    use crate::testkit::{FunctionBuilder, TestLayout, TestModule, TY_PTR};

    #[test]
    fn noop_cast_chain_is_must_alias() {
        let mut fb = FunctionBuilder::new(FId(0), "f");
        let a = fb.fresh_value();
        fb.push(InstKind::Alloca { result: a, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let b = fb.fresh_value();
        fb.push(InstKind::BitCast { result: b, src: a }, Some(TY_PTR));
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FId(0), func);

        let result = run(&module);
        assert_eq!(result.query(FId(0), a, FId(0), b), AliasResult::MustAlias);
    }

    #[test]
    fn trivial_select_is_must_alias() {
        let mut fb = FunctionBuilder::new(FId(0), "f");
        let a = fb.fresh_value();
        fb.push(InstKind::Alloca { result: a, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let s = fb.fresh_value();
        fb.push(InstKind::Select { result: s, true_val: a, false_val: a }, Some(TY_PTR));
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FId(0), func);

        let result = run(&module);
        assert_eq!(result.query(FId(0), a, FId(0), s), AliasResult::MustAlias);
    }

    #[test]
    fn distinct_functions_are_may_alias() {
        let mut fb0 = FunctionBuilder::new(FId(0), "f");
        let a = fb0.fresh_value();
        fb0.push(InstKind::Alloca { result: a, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let func0 = fb0.finish();
        let mut fb1 = FunctionBuilder::new(FId(1), "g");
        let b = fb1.fresh_value();
        fb1.push(InstKind::Alloca { result: b, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let func1 = fb1.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.functions.insert(FId(0), func0);
        module.functions.insert(FId(1), func1);

        let result = run(&module);
        assert_eq!(result.query(FId(0), a, FId(1), b), AliasResult::MayAlias);
    }
}
