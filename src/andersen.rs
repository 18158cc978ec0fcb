//! Andersen inclusion-constraint engine: a flow-insensitive alternative to
//! the TPA engine (`tpa.rs`), built over the same
//! `MemoryManager`/`PointerManager`/`ptset` models.
//!
//! Constraint nodes are `Node = Ptr(PointerId) | Obj(u32) | Ret(u32)`, with
//! `pred_edges`/`succ_edges` maps and a `VecDeque` worklist that re-derives
//! copy edges as points-to sets grow. `AddrOf` folds the classic `p = &o`
//! constraint directly into a seed rather than a separate node kind. A
//! `Store` instruction contributes both directions of inclusion -- `*q ⊆ p`
//! (new content flows into every object `q` may point to) and its
//! "assignment may add more possible pointees to the stored-through
//! object" counterpart -- so growth in either `q`'s or `p`'s points-to set
//! during solving re-derives the edge correctly.

use std::collections::{BTreeMap as Map, BTreeSet as Set, VecDeque};

use crate::callgraph::CallGraph;
use crate::context::{global_context, CallSite, ContextPolicy};
use crate::env_store::Store;
use crate::external_table::{Effect, ExternalTable};
use crate::initializer::run_global_pointer_analysis;
use crate::ir::{BasicBlock, FuncId, Function, InstKind, Instruction, Module, ValueId};
use crate::memory::{CalleeCandidates, MemoryManager, UNIVERSAL_OBJECT};
use crate::pointer::PointerManager;
use crate::program_point::FunctionContext;
use crate::ptset::PointsToSet;
use crate::value_origin::FunctionOrigin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Node {
    Ptr(crate::pointer::PointerId),
    Obj(u32),
    /// The aggregate return value of one `FunctionContext`, keyed by a
    /// per-run dense serial local to this solver instance, distinct from
    /// `context::context_serial`'s process-wide one -- each `Engine` run
    /// owns its own numbering rather than reaching into shared global
    /// state.
    Ret(u32),
}

#[derive(Debug, Clone)]
struct IndirectCallSite {
    caller_fc: FunctionContext,
    site: CallSite,
    args: Vec<ValueId>,
    result: Option<ValueId>,
}

/// `alias(v1, v2)` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasResult {
    NoAlias,
    MayAlias,
    MustAlias,
}

pub struct AndersenResult {
    pub mem: MemoryManager,
    pub pointers: PointerManager,
    pts: Map<Node, PointsToSet>,
    pub call_graph: CallGraph,
}

impl AndersenResult {
    /// The points-to set computed for `v` under context `fc.ctx`.
    pub fn points_to(&self, fc: &FunctionContext, v: ValueId, origin: &dyn crate::pointer::ValueOrigin) -> PointsToSet {
        match self.pointers.get(&fc.ctx, v, origin) {
            Some(p) => self.pts.get(&Node::Ptr(p)).cloned().unwrap_or_default(),
            None => PointsToSet::empty(),
        }
    }

    /// `MustAlias` only when both points-to sets are singletons and equal.
    pub fn alias(&self, a: PointsToSet, b: PointsToSet) -> AliasResult {
        if a.is_empty() || b.is_empty() {
            return AliasResult::NoAlias;
        }
        if a.size() == 1 && b.size() == 1 && a == b {
            return AliasResult::MustAlias;
        }
        if a.intersects(&b) {
            AliasResult::MayAlias
        } else {
            AliasResult::NoAlias
        }
    }
}

/// Owns both constraint generation (walking the module) and solving
/// (propagating the worklist); the two interleave because resolving an
/// indirect call can discover a new `FunctionContext` that itself needs
/// constraints generated for it.
struct Engine<'a, M: Module> {
    module: &'a M,
    mem: MemoryManager,
    pointers: PointerManager,
    ctx_policy: &'a ContextPolicy,
    external_table: &'a ExternalTable,
    call_graph: CallGraph,

    pts: Map<Node, PointsToSet>,
    copy_succ: Map<Node, Set<Node>>,
    load_by_src: Map<Node, Vec<Node>>,
    store_by_dst_ptr: Map<Node, Vec<(Node, Node)>>,
    offset_by_src: Map<Node, Vec<(Node, i64)>>,
    indirect_calls: Map<Node, Vec<IndirectCallSite>>,
    worklist: VecDeque<Node>,

    ret_serials: Map<FunctionContext, u32>,
    next_ret_serial: u32,

    visited_fns: Set<FunctionContext>,
    pending_fns: VecDeque<FunctionContext>,
}

impl<'a, M: Module> Engine<'a, M> {
    fn ptr_node(&mut self, fc: &FunctionContext, v: ValueId) -> Node {
        let func = self.module.function(fc.func);
        let origin = FunctionOrigin::build(self.module, func);
        Node::Ptr(self.pointers.get_or_create(&fc.ctx, v, &origin))
    }

    fn ret_node(&mut self, fc: &FunctionContext) -> Node {
        if let Some(&s) = self.ret_serials.get(fc) {
            return Node::Ret(s);
        }
        let s = self.next_ret_serial;
        self.next_ret_serial += 1;
        self.ret_serials.insert(fc.clone(), s);
        Node::Ret(s)
    }

    fn universal_idx(&self) -> u32 {
        self.mem.object_table().index_of(&UNIVERSAL_OBJECT).expect("registered by MemoryManager::new")
    }

    fn null_idx(&self) -> u32 {
        self.mem.object_table().index_of(&crate::memory::NULL_OBJECT).expect("registered by MemoryManager::new")
    }

    fn add(&mut self, node: Node, s: PointsToSet) {
        let cur = self.pts.get(&node).cloned().unwrap_or_default();
        let merged = cur.merge(&s);
        if merged == cur {
            return;
        }
        self.pts.insert(node, merged);
        self.worklist.push_back(node);
    }

    fn add_copy_edge(&mut self, src: Node, dst: Node) {
        if !self.copy_succ.entry(src).or_default().insert(dst) {
            return;
        }
        if let Some(s) = self.pts.get(&src).cloned() {
            self.add(dst, s);
        }
    }

    fn add_load(&mut self, dst: Node, src: Node) {
        self.load_by_src.entry(src).or_default().push(dst);
        if let Some(s) = self.pts.get(&src).cloned() {
            for idx in s.indices() {
                self.add_copy_edge(Node::Obj(idx), dst);
            }
        }
    }

    fn add_store(&mut self, dst_ptr: Node, src: Node) {
        self.store_by_dst_ptr.entry(dst_ptr).or_default().push((dst_ptr, src));
        if let Some(s) = self.pts.get(&dst_ptr).cloned() {
            for idx in s.indices() {
                self.add_copy_edge(src, Node::Obj(idx));
            }
        }
    }

    fn add_offset(&mut self, dst: Node, src: Node, delta: i64) {
        self.offset_by_src.entry(src).or_default().push((dst, delta));
        if let Some(s) = self.pts.get(&src).cloned() {
            self.resolve_offsets(src, &s, dst, delta);
        }
    }

    fn resolve_offsets(&mut self, _src: Node, s: &PointsToSet, dst: Node, delta: i64) {
        let objects: Vec<_> = {
            let table = self.mem.object_table();
            s.objects(table).collect()
        };
        for obj in objects {
            let new_obj = self.mem.offset_memory(obj, delta);
            let idx = self.mem.object_table().index_of(&new_obj).expect("offset_memory registers its result");
            self.add(dst, PointsToSet::singleton_index(idx));
        }
    }

    /// Resolve direct/indirect callee candidates the way `transfer::eval_call`
    /// does, binding args/params and wiring the callee's `Ret` node into
    /// `result`. Fresh callee `FunctionContext`s are queued for constraint
    /// generation rather than recursed into.
    fn bind_call(&mut self, caller_fc: &FunctionContext, site: CallSite, candidates: &[FuncId], args: &[ValueId], result: Option<ValueId>) {
        for &f in candidates {
            let func = self.module.function(f);
            if func.is_external() {
                self.bind_external_call(caller_fc, f, args, result);
                continue;
            }
            let callee_ctx = self.ctx_policy.push(&caller_fc.ctx, site);
            let callee_fc = FunctionContext::new(f, callee_ctx.clone());
            self.call_graph.add_edge(crate::program_point::ProgramPoint::new(caller_fc.clone(), crate::cfg::NodeId(site.index as u32)), callee_fc.clone());
            if self.visited_fns.insert(callee_fc.clone()) {
                self.pending_fns.push_back(callee_fc.clone());
            }

            let callee_origin = FunctionOrigin::build(self.module, func);
            for (i, &param) in func.params().iter().enumerate() {
                if let Some(&actual) = args.get(i) {
                    let ap = self.ptr_node(caller_fc, actual);
                    let fp = Node::Ptr(self.pointers.get_or_create(&callee_ctx, param, &callee_origin));
                    self.add_copy_edge(ap, fp);
                }
            }
            if let Some(r) = result {
                let rp = self.ptr_node(caller_fc, r);
                let ret = self.ret_node(&callee_fc);
                self.add_copy_edge(ret, rp);
            }
        }
    }

    fn bind_external_call(&mut self, fc: &FunctionContext, callee: FuncId, args: &[ValueId], result: Option<ValueId>) {
        let name = self.module.function_name(callee).to_string();
        let Some(effects) = self.external_table.lookup(&name).map(<[Effect]>::to_vec) else {
            if let Some(r) = result {
                let rp = self.ptr_node(fc, r);
                let universal = self.universal_idx();
                self.add(rp, PointsToSet::singleton_index(universal));
            }
            return;
        };
        for effect in effects {
            match effect {
                Effect::Alloc { .. } => {
                    if let Some(r) = result {
                        let obj = self.mem.allocate_heap_opaque(fc.ctx.clone(), r);
                        let idx = self.mem.object_table().index_of(&obj).expect("just registered");
                        let rp = self.ptr_node(fc, r);
                        self.add(rp, PointsToSet::singleton_index(idx));
                    }
                }
                Effect::Exit => {}
                Effect::Copy { src, dst } => self.bind_external_copy(fc, src, dst, args, result),
            }
        }
    }

    fn bind_external_copy(&mut self, fc: &FunctionContext, src: crate::external_table::Operand, dst: crate::external_table::Operand, args: &[ValueId], result: Option<ValueId>) {
        use crate::external_table::Operand;
        let resolve = |ar: crate::external_table::ArgOrRet| -> Option<ValueId> {
            match ar {
                crate::external_table::ArgOrRet::Arg(i) => args.get(i as usize).copied(),
                crate::external_table::ArgOrRet::Ret => result,
            }
        };
        let src_node = match src {
            Operand::Universal => {
                let u = self.universal_idx();
                let synthetic = self.ptr_node(fc, ValueId(u32::MAX - 2));
                self.add(synthetic, PointsToSet::singleton_index(u));
                synthetic
            }
            Operand::Null => {
                let n = self.null_idx();
                let synthetic = self.ptr_node(fc, ValueId(u32::MAX - 3));
                self.add(synthetic, PointsToSet::singleton_index(n));
                synthetic
            }
            Operand::Static => {
                let v = result.or_else(|| args.first().copied()).unwrap_or(ValueId(u32::MAX));
                let obj = self.mem.allocate_heap_opaque(fc.ctx.clone(), v);
                let idx = self.mem.object_table().index_of(&obj).expect("just registered");
                let synthetic = self.ptr_node(fc, v);
                self.add(synthetic, PointsToSet::singleton_index(idx));
                synthetic
            }
            Operand::Value(ar) => match resolve(ar) {
                Some(v) => self.ptr_node(fc, v),
                None => return,
            },
            Operand::Memory(ar) => {
                let Some(v) = resolve(ar) else { return };
                let p = self.ptr_node(fc, v);
                // Materialize the contents via a Load-style dependency into a
                // scratch pointer node so `dst` can later copy from it.
                let scratch = self.ptr_node(fc, ValueId(u32::MAX - 4));
                self.add_load(scratch, p);
                scratch
            }
            Operand::Reachable(argn) => {
                let Some(&v) = args.get(argn as usize) else { return };
                let p = self.ptr_node(fc, v);
                let scratch = self.ptr_node(fc, ValueId(u32::MAX - 5));
                if let Some(s) = self.pts.get(&p).cloned() {
                    let table = self.mem.object_table();
                    let objs: Vec<_> = s.objects(table).collect();
                    for obj in objs {
                        for reach in self.mem.reachable_pointer_objects(obj) {
                            if let Some(idx) = self.mem.object_table().index_of(&reach) {
                                self.add(scratch, PointsToSet::singleton_index(idx));
                            }
                        }
                    }
                }
                scratch
            }
        };
        match dst {
            Operand::Value(ar) => {
                if let Some(v) = resolve(ar) {
                    let dp = self.ptr_node(fc, v);
                    self.add_copy_edge(src_node, dp);
                }
            }
            Operand::Memory(ar) => {
                if let Some(v) = resolve(ar) {
                    let dp = self.ptr_node(fc, v);
                    self.add_store(dp, src_node);
                }
            }
            Operand::Reachable(_) | Operand::Universal | Operand::Null | Operand::Static => {
                log::warn!("external table COPY destination resolved to a source-only operand; ignored");
            }
        }
    }

    /// Generate constraints for every pointer-relevant instruction in `fc`.
    /// This is flow-insensitive, so instruction order inside the function
    /// doesn't matter.
    fn generate_for_function(&mut self, fc: FunctionContext) {
        let func = self.module.function(fc.func);
        let dl = self.module.layout();
        let insts: Vec<(crate::ir::BbId, usize, InstKind)> = func
            .blocks()
            .flat_map(|b| b.instructions().enumerate().map(move |(i, inst)| (b.id(), i, inst.kind())).collect::<Vec<_>>())
            .collect();

        for (block, index, kind) in insts {
            match kind {
                InstKind::Alloca { result, allocated_ty, is_heap } => {
                    let obj = if is_heap {
                        self.mem.allocate_heap(fc.ctx.clone(), result, allocated_ty, dl)
                    } else {
                        self.mem.allocate_stack(fc.ctx.clone(), result, allocated_ty, dl)
                    };
                    let idx = self.mem.object_table().index_of(&obj).expect("just registered");
                    let p = self.ptr_node(&fc, result);
                    self.add(p, PointsToSet::singleton_index(idx));
                }
                InstKind::Load { result, ptr } => {
                    let dst = self.ptr_node(&fc, result);
                    let src = self.ptr_node(&fc, ptr);
                    self.add_load(dst, src);
                }
                InstKind::Store { ptr, val } => {
                    let dst_ptr = self.ptr_node(&fc, ptr);
                    let src = self.ptr_node(&fc, val);
                    self.add_store(dst_ptr, src);
                }
                InstKind::Gep { result, base, byte_delta, .. } => {
                    let dst = self.ptr_node(&fc, result);
                    let src = self.ptr_node(&fc, base);
                    self.add_offset(dst, src, byte_delta);
                }
                InstKind::BitCast { result, src } | InstKind::AddrSpaceCast { result, src } => {
                    let dst = self.ptr_node(&fc, result);
                    let srcn = self.ptr_node(&fc, src);
                    self.add_copy_edge(srcn, dst);
                }
                InstKind::IntToPtr { result, .. } => {
                    let dst = self.ptr_node(&fc, result);
                    let u = self.universal_idx();
                    self.add(dst, PointsToSet::singleton_index(u));
                }
                InstKind::PtrToInt { .. } => {}
                InstKind::Phi { result, incoming } => {
                    let dst = self.ptr_node(&fc, result);
                    for v in incoming {
                        let src = self.ptr_node(&fc, v);
                        self.add_copy_edge(src, dst);
                    }
                }
                InstKind::Select { result, true_val, false_val } => {
                    let dst = self.ptr_node(&fc, result);
                    for v in [true_val, false_val] {
                        let src = self.ptr_node(&fc, v);
                        self.add_copy_edge(src, dst);
                    }
                }
                InstKind::ExtractFallback { result } => {
                    let dst = self.ptr_node(&fc, result);
                    let u = self.universal_idx();
                    self.add(dst, PointsToSet::singleton_index(u));
                }
                InstKind::InsertValue { result, aggregate, inserted } => {
                    let dst = self.ptr_node(&fc, result);
                    for v in [aggregate, inserted] {
                        let src = self.ptr_node(&fc, v);
                        self.add_copy_edge(src, dst);
                    }
                }
                InstKind::Call { result, callee, callee_ptr, args } => {
                    let site = CallSite { caller: fc.func, block, index };
                    match callee {
                        Some(f) => self.bind_call(&fc, site, &[f], &args, result),
                        None => {
                            let cptr = callee_ptr.expect("indirect call must carry a callee pointer");
                            let ptr_n = self.ptr_node(&fc, cptr);
                            let pending = IndirectCallSite { caller_fc: fc.clone(), site, args: args.clone(), result };
                            self.indirect_calls.entry(ptr_n).or_default().push(pending);
                            if let Some(s) = self.pts.get(&ptr_n).cloned() {
                                self.resolve_indirect(ptr_n, &s);
                            }
                        }
                    }
                }
                InstKind::Return { val } => {
                    if let Some(v) = val {
                        let src = self.ptr_node(&fc, v);
                        let ret = self.ret_node(&fc);
                        self.add_copy_edge(src, ret);
                    }
                }
                InstKind::Unreachable | InstKind::Other => {}
            }
        }
    }

    fn resolve_indirect(&mut self, ptr_n: Node, s: &PointsToSet) {
        let candidates = {
            let table = self.mem.object_table();
            self.mem.callee_candidates(s.objects(table))
        };
        let funcs = match candidates {
            CalleeCandidates::Exact(fs) => fs,
            CalleeCandidates::AnyAddressTaken => self.module.address_taken_functions(),
        };
        let pendings = self.indirect_calls.get(&ptr_n).cloned().unwrap_or_default();
        for pending in pendings {
            self.bind_call(&pending.caller_fc, pending.site, &funcs, &pending.args, pending.result);
        }
    }

    fn solve(&mut self) {
        loop {
            while let Some(fc) = self.pending_fns.pop_front() {
                self.generate_for_function(fc);
            }
            let Some(n) = self.worklist.pop_front() else { break };

            let succs: Vec<Node> = self.copy_succ.get(&n).into_iter().flatten().copied().collect();
            let s = self.pts.get(&n).cloned().unwrap_or_default();
            for succ in succs {
                self.add(succ, s.clone());
            }

            if let Some(dsts) = self.load_by_src.get(&n).cloned() {
                for idx in s.indices() {
                    for &dst in &dsts {
                        self.add_copy_edge(Node::Obj(idx), dst);
                    }
                }
            }
            if let Some(pairs) = self.store_by_dst_ptr.get(&n).cloned() {
                for idx in s.indices() {
                    for &(_, src) in &pairs {
                        self.add_copy_edge(src, Node::Obj(idx));
                    }
                }
            }
            if let Some(offsets) = self.offset_by_src.get(&n).cloned() {
                for (dst, delta) in offsets {
                    self.resolve_offsets(n, &s, dst, delta);
                }
            }
            if self.indirect_calls.contains_key(&n) {
                self.resolve_indirect(n, &s);
            }
        }
    }
}

/// Run the Andersen solver to a fixpoint over `module`.
pub fn run<M: Module>(module: &M, ctx_policy: &ContextPolicy, external_table: &ExternalTable) -> AndersenResult {
    let mut mem = MemoryManager::new();
    let mut global_store = Store::new();
    let global_state = run_global_pointer_analysis(module, &mut mem, &mut global_store);

    let mut engine = Engine {
        module,
        mem,
        pointers: PointerManager::new(),
        ctx_policy,
        external_table,
        call_graph: CallGraph::new(),
        pts: Map::new(),
        copy_succ: Map::new(),
        load_by_src: Map::new(),
        store_by_dst_ptr: Map::new(),
        offset_by_src: Map::new(),
        indirect_calls: Map::new(),
        worklist: VecDeque::new(),
        ret_serials: Map::new(),
        next_ret_serial: 0,
        visited_fns: Set::new(),
        pending_fns: VecDeque::new(),
    };

    for obj in &global_state.global_objects {
        if let Some(idx) = engine.mem.object_table().index_of(obj) {
            let s = global_store.get(idx);
            if !s.is_empty() {
                engine.add(Node::Obj(idx), s);
            }
        }
    }

    if let Some(entry) = module.entry_function() {
        let fc = FunctionContext::new(entry, global_context());
        engine.visited_fns.insert(fc.clone());
        engine.pending_fns.push_back(fc);
    }

    engine.solve();

    AndersenResult { mem: engine.mem, pointers: engine.pointers, pts: engine.pts, call_graph: engine.call_graph }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::global_context as gctx;
    use crate::ir::FuncId as FId;
    use crate::testkit::{FunctionBuilder, TestLayout, TestModule, TY_PTR};

    #[test]
    fn select_of_two_heap_objects_unions_both() {
        let mut fb = FunctionBuilder::new(FId(0), "main");
        let m1 = fb.fresh_value();
        fb.push(InstKind::Alloca { result: m1, allocated_ty: TY_PTR, is_heap: true }, Some(TY_PTR));
        let m2 = fb.fresh_value();
        fb.push(InstKind::Alloca { result: m2, allocated_ty: TY_PTR, is_heap: true }, Some(TY_PTR));
        let p = fb.fresh_value();
        fb.push(InstKind::Select { result: p, true_val: m1, false_val: m2 }, Some(TY_PTR));
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.entry = Some(FId(0));
        module.functions.insert(FId(0), func);

        let result = run(&module, &ContextPolicy::None, &ExternalTable::empty());
        let origin = FunctionOrigin::build(&module, module.function(FId(0)));
        let fc = FunctionContext::new(FId(0), gctx());
        let pts_p = result.points_to(&fc, p, &origin);
        let pts_m1 = result.points_to(&fc, m1, &origin);
        let pts_m2 = result.points_to(&fc, m2, &origin);
        assert!(pts_p.includes(&pts_m1));
        assert!(pts_p.includes(&pts_m2));
    }

    #[test]
    fn alias_of_disjoint_singletons_is_no_alias() {
        let mut fb = FunctionBuilder::new(FId(0), "main");
        let a = fb.fresh_value();
        fb.push(InstKind::Alloca { result: a, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let b = fb.fresh_value();
        fb.push(InstKind::Alloca { result: b, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.entry = Some(FId(0));
        module.functions.insert(FId(0), func);

        let result = run(&module, &ContextPolicy::None, &ExternalTable::empty());
        let origin = FunctionOrigin::build(&module, module.function(FId(0)));
        let fc = FunctionContext::new(FId(0), gctx());
        let pa = result.points_to(&fc, a, &origin);
        let pb = result.points_to(&fc, b, &origin);
        assert_eq!(result.alias(pa, pb), AliasResult::NoAlias);
    }
}
