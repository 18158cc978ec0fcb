//! Bridges the IR contract (`ir.rs`) to `pointer::ValueOrigin` so
//! `canonicalize`/`PointerManager` never need to know about instructions
//! directly.

use std::collections::BTreeMap;

use crate::ir::{BasicBlock, Function, InstKind, Instruction, Module, ValueId};
use crate::pointer::ValueOrigin;

/// Per-function index from a defined value to the `InstKind` that defines
/// it, built once per function and reused for every pointer lookup against
/// that function (values not present are parameters or globals).
pub struct FunctionOrigin<'m, M: Module> {
    module: &'m M,
    def_kind: BTreeMap<ValueId, InstKind>,
    global_ids: std::collections::BTreeSet<ValueId>,
}

impl<'m, M: Module> FunctionOrigin<'m, M> {
    pub fn build(module: &'m M, f: &M::Func) -> Self {
        let mut def_kind = BTreeMap::new();
        for block in f.blocks() {
            for inst in block.instructions() {
                let kind = inst.kind();
                if let Some(result) = defined_value(&kind) {
                    def_kind.insert(result, kind);
                }
            }
        }
        let global_ids = module.globals().into_iter().map(|(id, _)| id).collect();
        FunctionOrigin { module, def_kind, global_ids }
    }
}

fn defined_value(kind: &InstKind) -> Option<ValueId> {
    match kind {
        InstKind::Alloca { result, .. }
        | InstKind::Load { result, .. }
        | InstKind::Gep { result, .. }
        | InstKind::BitCast { result, .. }
        | InstKind::AddrSpaceCast { result, .. }
        | InstKind::IntToPtr { result, .. }
        | InstKind::PtrToInt { result, .. }
        | InstKind::Phi { result, .. }
        | InstKind::Select { result, .. }
        | InstKind::ExtractFallback { result }
        | InstKind::InsertValue { result, .. } => Some(*result),
        InstKind::Call { result, .. } => *result,
        InstKind::Store { .. } | InstKind::Return { .. } | InstKind::Unreachable | InstKind::Other => None,
    }
}

impl<'m, M: Module> ValueOrigin for FunctionOrigin<'m, M> {
    fn is_null_const(&self, v: ValueId) -> bool {
        self.module.is_null_constant(v)
    }

    fn is_undef(&self, v: ValueId) -> bool {
        if self.module.is_undef_constant(v) {
            return true;
        }
        matches!(self.def_kind.get(&v), Some(InstKind::IntToPtr { .. }))
    }

    fn is_global(&self, v: ValueId) -> bool {
        self.global_ids.contains(&v)
    }

    fn no_op_cast_source(&self, v: ValueId) -> Option<ValueId> {
        match self.def_kind.get(&v) {
            Some(InstKind::BitCast { src, .. }) | Some(InstKind::AddrSpaceCast { src, .. }) => Some(*src),
            _ => None,
        }
    }

    fn single_incoming_phi_source(&self, v: ValueId) -> Option<ValueId> {
        match self.def_kind.get(&v) {
            Some(InstKind::Phi { incoming, .. }) => {
                let mut distinct = incoming.iter().copied().collect::<std::collections::BTreeSet<_>>().into_iter();
                let first = distinct.next()?;
                if distinct.next().is_none() {
                    Some(first)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn is_inttoptr(&self, v: ValueId) -> bool {
        matches!(self.def_kind.get(&v), Some(InstKind::IntToPtr { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{FunctionBuilder, TestModule, TY_INT, TY_PTR};

    #[test]
    fn strips_noop_cast_chain() {
        let mut fb = FunctionBuilder::new(crate::ir::FuncId(0), "f");
        fb.push(InstKind::Alloca { result: ValueId(0), allocated_ty: TY_INT, is_heap: false }, Some(TY_PTR));
        fb.push(InstKind::BitCast { result: ValueId(1), src: ValueId(0) }, Some(TY_PTR));
        let func = fb.finish();
        let module = TestModule::default();
        let origin = FunctionOrigin::build(&module, &func);
        assert_eq!(crate::pointer::canonicalize(ValueId(1), &origin), ValueId(0));
    }

    #[test]
    fn collapses_single_incoming_phi() {
        let mut fb = FunctionBuilder::new(crate::ir::FuncId(0), "f");
        fb.push(InstKind::Alloca { result: ValueId(0), allocated_ty: TY_INT, is_heap: false }, Some(TY_PTR));
        fb.push(InstKind::Phi { result: ValueId(1), incoming: vec![ValueId(0), ValueId(0)] }, Some(TY_PTR));
        let func = fb.finish();
        let module = TestModule::default();
        let origin = FunctionOrigin::build(&module, &func);
        assert_eq!(crate::pointer::canonicalize(ValueId(1), &origin), ValueId(0));
    }
}
