//! Transfer functions: per-node evaluation of the semi-sparse CFG. Each
//! node consumes the current `Env` (shared, mutated in place) and its own
//! `Store` (from `Memo`), and produces an `EvalResult` splitting successors
//! into the sparse, def-use-driven top-level set and the CFG-threaded
//! memory-level set.
//!
//! One match arm per instruction kind, each directly mutating `Env`/`Store`
//! rather than emitting constraints for a separate solver pass.

use std::collections::BTreeMap as Map;

use log::warn;

use crate::callgraph::{prune_store, CallGraph};
use crate::cfg::{Cfg, CfgNodeKind, NodeId};
use crate::context::ContextPolicy;
use crate::env_store::{Env, Store};
use crate::external_table::{ArgOrRet, Effect, ExternalTable, Operand};
use crate::ir::{FuncId, Module, ValueId};
use crate::memory::{CalleeCandidates, MemoryManager, MemoryObject, UNIVERSAL_OBJECT};
use crate::pointer::{PointerId, PointerManager};
use crate::program_point::{FunctionContext, ProgramPoint};
use crate::ptset::PointsToSet;
use crate::value_origin::FunctionOrigin;

pub struct EvalResult {
    pub top_level_successors: Vec<ProgramPoint>,
    pub memory_level_successors: Vec<(ProgramPoint, Store)>,
}

impl EvalResult {
    fn empty() -> Self {
        EvalResult { top_level_successors: vec![], memory_level_successors: vec![] }
    }
}

/// Everything the transfer function needs that lives for the whole analysis
/// run, gathered so `eval`'s signature stays a flat borrow rather than a
/// dozen positional parameters.
pub struct Engine<'a, M: Module> {
    pub module: &'a M,
    pub cfgs: &'a Map<FuncId, Cfg>,
    pub mem: &'a mut MemoryManager,
    pub pointers: &'a mut PointerManager,
    pub call_graph: &'a mut CallGraph,
    pub ctx_policy: &'a ContextPolicy,
    pub external_table: &'a ExternalTable,
    pub global_objects: &'a [MemoryObject],
}

impl<'a, M: Module> Engine<'a, M> {
    fn universal_index(&self) -> u32 {
        self.mem.object_table().index_of(&UNIVERSAL_OBJECT).expect("UNIVERSAL_OBJECT is registered by MemoryManager::new")
    }

    fn null_index(&self) -> u32 {
        self.mem.object_table().index_of(&crate::memory::NULL_OBJECT).expect("NULL_OBJECT is registered by MemoryManager::new")
    }

    fn ptr(&mut self, fc: &FunctionContext, v: ValueId) -> PointerId {
        let func = self.module.function(fc.func);
        let origin = FunctionOrigin::build(self.module, func);
        self.pointers.get_or_create(&fc.ctx, v, &origin)
    }

    /// Run the transfer function for `pp` against its memoized `store_in`,
    /// mutating `env` in place.
    pub fn eval(&mut self, pp: &ProgramPoint, env: &mut Env, store_in: &Store) -> EvalResult {
        let fc = pp.fc.clone();
        let cfg = &self.cfgs[&fc.func];
        let node = cfg.node(pp.node);
        let kind = node.kind.clone();

        let result = match kind {
            CfgNodeKind::Entry => EvalResult::empty(),
            CfgNodeKind::Alloc { dst, ty, is_heap } => self.eval_alloc(&fc, dst, ty, is_heap, env),
            CfgNodeKind::Copy { dst, srcs } => self.eval_copy(&fc, dst, &srcs, env),
            CfgNodeKind::Offset { dst, src, byte_delta, .. } => self.eval_offset(&fc, dst, src, byte_delta, env),
            CfgNodeKind::Load { dst, src } => self.eval_load(&fc, dst, src, env, store_in),
            CfgNodeKind::Store { ptr, val } => {
                let new_store = self.eval_store(&fc, ptr, val, env, store_in);
                return self.with_cfg_successors(&fc, pp.node, EvalResult::empty(), Some(new_store));
            }
            CfgNodeKind::UniversalAssign { dst } => self.eval_universal(&fc, dst, env),
            CfgNodeKind::Call { result, callee, callee_ptr, args } => {
                return self.eval_call(pp, result, callee, callee_ptr, &args, env, store_in);
            }
            CfgNodeKind::Ret { val } => {
                return self.eval_return(&fc, val, env);
            }
        };

        self.with_cfg_successors(&fc, pp.node, result, Some(store_in.clone()))
    }

    /// Def-use (top-level) successors for a value this node just defined,
    /// plus the control-flow (memory-level) successor(s), carrying
    /// `store_out` forward unchanged when the node didn't itself write to
    /// memory.
    fn with_cfg_successors(&self, fc: &FunctionContext, node: NodeId, mut result: EvalResult, store_out: Option<Store>) -> EvalResult {
        let cfg = &self.cfgs[&fc.func];
        if let Some(store) = store_out {
            for succ in cfg.control_successors(node) {
                result.memory_level_successors.push((ProgramPoint::new(fc.clone(), succ), store.clone()));
            }
        }
        result
    }

    fn def_use_successors(&self, fc: &FunctionContext, cfg: &Cfg, dst: ValueId) -> Vec<ProgramPoint> {
        cfg.uses_of(dst).map(|n| ProgramPoint::new(fc.clone(), n)).collect()
    }

    fn eval_alloc(&mut self, fc: &FunctionContext, dst: ValueId, ty: crate::ir::TypeRef, is_heap: bool, env: &mut Env) -> EvalResult {
        let dl = self.module.layout();
        let obj = if is_heap {
            self.mem.allocate_heap(fc.ctx.clone(), dst, ty, dl)
        } else {
            self.mem.allocate_stack(fc.ctx.clone(), dst, ty, dl)
        };
        let idx = self.mem.object_table().index_of(&obj).expect("just registered");
        let p = self.ptr(fc, dst);
        env.weak_update(p, PointsToSet::singleton_index(idx));
        let cfg = &self.cfgs[&fc.func];
        EvalResult { top_level_successors: self.def_use_successors(fc, cfg, dst), memory_level_successors: vec![] }
    }

    fn eval_copy(&mut self, fc: &FunctionContext, dst: ValueId, srcs: &[ValueId], env: &mut Env) -> EvalResult {
        let mut merged = PointsToSet::empty();
        for &s in srcs {
            let sp = self.ptr(fc, s);
            merged = merged.merge(&env.get(sp));
        }
        let dp = self.ptr(fc, dst);
        env.weak_update(dp, merged);
        let cfg = &self.cfgs[&fc.func];
        EvalResult { top_level_successors: self.def_use_successors(fc, cfg, dst), memory_level_successors: vec![] }
    }

    fn eval_offset(&mut self, fc: &FunctionContext, dst: ValueId, src: ValueId, byte_delta: i64, env: &mut Env) -> EvalResult {
        let sp = self.ptr(fc, src);
        let src_pts = env.get(sp);
        let objects = self.mem.object_table();
        let src_objs: Vec<MemoryObject> = src_pts.objects(objects).collect();
        let mut out = PointsToSet::empty();
        for obj in src_objs {
            let new_obj = self.mem.offset_memory(obj, byte_delta);
            let idx = self.mem.object_table().index_of(&new_obj).expect("offset_memory registers its result");
            out = out.insert_index(idx);
        }
        let dp = self.ptr(fc, dst);
        env.weak_update(dp, out);
        let cfg = &self.cfgs[&fc.func];
        EvalResult { top_level_successors: self.def_use_successors(fc, cfg, dst), memory_level_successors: vec![] }
    }

    fn eval_universal(&mut self, fc: &FunctionContext, dst: ValueId, env: &mut Env) -> EvalResult {
        let universal = self.universal_index();
        let dp = self.ptr(fc, dst);
        env.weak_update(dp, PointsToSet::singleton_index(universal));
        let cfg = &self.cfgs[&fc.func];
        EvalResult { top_level_successors: self.def_use_successors(fc, cfg, dst), memory_level_successors: vec![] }
    }

    /// Load through an empty points-to set returns Universal, ensuring
    /// monotone progress rather than a vacuous empty result; loading
    /// through a pointer that may be Universal must also yield Universal,
    /// since Universal stands for "could be anything" and a load off it
    /// can't be narrowed down to whatever happens to be in `Store[Universal]`.
    fn eval_load(&mut self, fc: &FunctionContext, dst: ValueId, src: ValueId, env: &mut Env, store: &Store) -> EvalResult {
        let sp = self.ptr(fc, src);
        let src_pts = env.get(sp);
        let result = if src_pts.is_empty() {
            PointsToSet::singleton_index(self.universal_index())
        } else {
            let objects = self.mem.object_table();
            let mut out = PointsToSet::empty();
            for obj in src_pts.objects(objects) {
                if obj.is_universal() {
                    out = out.merge(&PointsToSet::singleton_index(self.universal_index()));
                    continue;
                }
                let Some(idx) = objects.index_of(&obj) else { continue };
                out = out.merge(&store.get(idx));
            }
            out
        };
        let dp = self.ptr(fc, dst);
        env.weak_update(dp, result);
        let cfg = &self.cfgs[&fc.func];
        EvalResult { top_level_successors: self.def_use_successors(fc, cfg, dst), memory_level_successors: vec![] }
    }

    /// Strong vs. weak store update: strong only when the destination
    /// points-to set is a non-summary singleton that isn't Null or
    /// Universal. A store through a definitely-Null pointer is a no-op (the
    /// dereference itself is the bug, not something to model as a write);
    /// a store through a possibly-Universal pointer is also a no-op, since
    /// writing into `Store[Universal]` would let unrelated pointers that
    /// merely *might* be Universal observe each other's stores.
    fn eval_store(&mut self, fc: &FunctionContext, ptr: ValueId, val: ValueId, env: &mut Env, store: &Store) -> Store {
        let pp = self.ptr(fc, ptr);
        let vp = self.ptr(fc, val);
        let dst_pts = env.get(pp);
        let val_pts = env.get(vp);
        let objects = self.mem.object_table();
        let mut new_store = store.clone();
        if dst_pts.size() == 1 {
            if let Some(obj) = dst_pts.objects(objects).next() {
                if obj.is_null() {
                    warn!("store through a definitely-null pointer; treating as a no-op");
                    return new_store;
                }
                if obj.is_universal() {
                    return new_store;
                }
                if !obj.summary {
                    if let Some(idx) = objects.index_of(&obj) {
                        new_store.strong_update(idx, val_pts);
                        return new_store;
                    }
                }
            }
        }
        for obj in dst_pts.objects(objects) {
            if obj.is_null() || obj.is_universal() {
                continue;
            }
            if let Some(idx) = objects.index_of(&obj) {
                new_store.weak_update(idx, val_pts.clone());
            }
        }
        new_store
    }

    fn eval_call(
        &mut self,
        pp: &ProgramPoint,
        result: Option<ValueId>,
        callee: Option<FuncId>,
        callee_ptr: Option<ValueId>,
        args: &[ValueId],
        env: &mut Env,
        store_in: &Store,
    ) -> EvalResult {
        let fc = pp.fc.clone();
        let site = crate::context::CallSite { caller: fc.func, block: self.cfgs[&fc.func].node(pp.node).block, index: pp.node.0 as usize };

        let candidates: Vec<FuncId> = match callee {
            Some(f) => vec![f],
            None => {
                let cptr = callee_ptr.expect("indirect call must carry a callee pointer");
                let p = self.ptr(&fc, cptr);
                let pts = env.get(p);
                let objects = self.mem.object_table();
                match self.mem.callee_candidates(pts.objects(objects)) {
                    CalleeCandidates::Exact(fs) => fs,
                    CalleeCandidates::AnyAddressTaken => self
                        .module
                        .address_taken_functions()
                        .into_iter()
                        .filter(|f| {
                            let func = self.module.function(*f);
                            func.pointer_param_count() <= args.len()
                        })
                        .collect(),
                }
            }
        };

        if candidates.is_empty() {
            if let Some(r) = result {
                let universal = self.universal_index();
                let rp = self.ptr(&fc, r);
                env.weak_update(rp, PointsToSet::singleton_index(universal));
            }
            let cfg = &self.cfgs[&fc.func];
            let top = result.map(|r| self.def_use_successors(&fc, cfg, r)).unwrap_or_default();
            return self.with_cfg_successors(&fc, pp.node, EvalResult { top_level_successors: top, memory_level_successors: vec![] }, Some(store_in.clone()));
        }

        let mut top_level = Vec::new();
        let mut memory_level = Vec::new();
        // Control still flows to the call-site's own successor regardless
        // of how many callees are dispatched, and that continuation sees
        // the un-pruned store.
        memory_level.extend(self.with_cfg_successors(&fc, pp.node, EvalResult::empty(), Some(store_in.clone())).memory_level_successors);

        for f in candidates {
            let func = self.module.function(f);
            if func.is_external() {
                let (new_store, top) = self.eval_external_call(&fc, f, result, args, env, store_in);
                memory_level.extend(self.with_cfg_successors(&fc, pp.node, EvalResult::empty(), Some(new_store)).memory_level_successors);
                top_level.extend(top);
                continue;
            }

            let callee_ctx = self.ctx_policy.push(&fc.ctx, site);
            let callee_fc = FunctionContext::new(f, callee_ctx.clone());
            self.call_graph.add_edge(pp.clone(), callee_fc.clone());

            let mut arg_indices = Vec::new();
            let callee_origin = FunctionOrigin::build(self.module, func);
            for (i, &param) in func.params().iter().enumerate() {
                if let Some(&actual) = args.get(i) {
                    let ap = self.ptr(&fc, actual);
                    let actual_pts = env.get(ap);
                    let fp = self.pointers.get_or_create(&callee_ctx, param, &callee_origin);
                    env.weak_update(fp, actual_pts.clone());
                    let objects = self.mem.object_table();
                    arg_indices.extend(actual_pts.objects(objects).filter_map(|o| objects.index_of(&o)));
                }
            }
            let global_indices: Vec<u32> = self.global_objects.iter().filter_map(|o| self.mem.object_table().index_of(o)).collect();
            let pruned = prune_store(arg_indices, global_indices, store_in, self.mem);

            let callee_entry = self.cfgs[&f].entry;
            memory_level.push((ProgramPoint::new(callee_fc, callee_entry), pruned));
        }

        EvalResult { top_level_successors: top_level, memory_level_successors: memory_level }
    }

    /// Apply an external function's annotated effects from the external
    /// table. Unannotated externals are a store no-op with a Universal
    /// return, the conservative default for a callee whose behavior is
    /// unknown.
    fn eval_external_call(
        &mut self,
        fc: &FunctionContext,
        callee: FuncId,
        result: Option<ValueId>,
        args: &[ValueId],
        env: &mut Env,
        store_in: &Store,
    ) -> (Store, Vec<ProgramPoint>) {
        let name = self.module.function_name(callee).to_string();
        let mut new_store = store_in.clone();
        let mut touched = Vec::new();

        let Some(effects) = self.external_table.lookup(&name).map(<[Effect]>::to_vec) else {
            if let Some(r) = result {
                let universal = self.universal_index();
                let rp = self.ptr(fc, r);
                env.weak_update(rp, PointsToSet::singleton_index(universal));
                touched.push(r);
            }
            return (new_store, self.touched_successors(fc, &touched));
        };

        for effect in effects {
            match effect {
                Effect::Alloc { .. } => {
                    if let Some(r) = result {
                        let obj = self.mem.allocate_heap_opaque(fc.ctx.clone(), r);
                        let idx = self.mem.object_table().index_of(&obj).expect("just registered");
                        let rp = self.ptr(fc, r);
                        env.weak_update(rp, PointsToSet::singleton_index(idx));
                        touched.push(r);
                    }
                }
                Effect::Exit => {
                    // Process termination: no further store/env effects to propagate.
                }
                Effect::Copy { src, dst } => {
                    let src_pts = self.resolve_source_operand(fc, src, result, args, env, &new_store);
                    self.apply_dst_operand(fc, dst, result, args, env, &mut new_store, &src_pts, &mut touched);
                }
            }
        }

        (new_store, self.touched_successors(fc, &touched))
    }

    fn touched_successors(&self, fc: &FunctionContext, touched: &[ValueId]) -> Vec<ProgramPoint> {
        let cfg = &self.cfgs[&fc.func];
        touched.iter().flat_map(|&v| self.def_use_successors(fc, cfg, v)).collect()
    }

    fn resolve_arg_or_ret(&self, args: &[ValueId], result: Option<ValueId>, ar: ArgOrRet) -> Option<ValueId> {
        match ar {
            ArgOrRet::Arg(i) => args.get(i as usize).copied(),
            ArgOrRet::Ret => result,
        }
    }

    fn resolve_source_operand(
        &mut self,
        fc: &FunctionContext,
        op: Operand,
        result: Option<ValueId>,
        args: &[ValueId],
        env: &mut Env,
        store: &Store,
    ) -> PointsToSet {
        match op {
            Operand::Universal => PointsToSet::singleton_index(self.universal_index()),
            Operand::Null => PointsToSet::singleton_index(self.null_index()),
            Operand::Static => {
                // A fresh, per-call-site static object, not reachable from
                // anywhere else in the module.
                let v = result.or_else(|| args.first().copied()).unwrap_or(ValueId(u32::MAX));
                let obj = self.mem.allocate_heap_opaque(fc.ctx.clone(), v);
                let idx = self.mem.object_table().index_of(&obj).expect("just registered");
                PointsToSet::singleton_index(idx)
            }
            Operand::Value(ar) => match self.resolve_arg_or_ret(args, result, ar) {
                Some(v) => {
                    let p = self.ptr(fc, v);
                    env.get(p)
                }
                None => PointsToSet::empty(),
            },
            Operand::Memory(ar) => match self.resolve_arg_or_ret(args, result, ar) {
                Some(v) => {
                    let p = self.ptr(fc, v);
                    let pts = env.get(p);
                    let objects = self.mem.object_table();
                    let mut out = PointsToSet::empty();
                    for obj in pts.objects(objects) {
                        if let Some(idx) = objects.index_of(&obj) {
                            out = out.merge(&store.get(idx));
                        }
                    }
                    out
                }
                None => PointsToSet::empty(),
            },
            Operand::Reachable(argn) => match args.get(argn as usize).copied() {
                Some(v) => {
                    let p = self.ptr(fc, v);
                    let pts = env.get(p);
                    let objects = self.mem.object_table();
                    let mut out = PointsToSet::empty();
                    for obj in pts.objects(objects) {
                        for reach in self.mem.reachable_pointer_objects(obj) {
                            if let Some(idx) = self.mem.object_table().index_of(&reach) {
                                out = out.merge(&store.get(idx));
                            }
                        }
                    }
                    out
                }
                None => PointsToSet::empty(),
            },
        }
    }

    fn apply_dst_operand(
        &mut self,
        fc: &FunctionContext,
        op: Operand,
        result: Option<ValueId>,
        args: &[ValueId],
        env: &mut Env,
        store: &mut Store,
        src_pts: &PointsToSet,
        touched: &mut Vec<ValueId>,
    ) {
        match op {
            Operand::Value(ar) => {
                if let Some(v) = self.resolve_arg_or_ret(args, result, ar) {
                    let p = self.ptr(fc, v);
                    env.weak_update(p, src_pts.clone());
                    touched.push(v);
                }
            }
            Operand::Memory(ar) => {
                if let Some(v) = self.resolve_arg_or_ret(args, result, ar) {
                    let p = self.ptr(fc, v);
                    let dst_pts = env.get(p);
                    let objects = self.mem.object_table();
                    for obj in dst_pts.objects(objects) {
                        if let Some(idx) = objects.index_of(&obj) {
                            store.weak_update(idx, src_pts.clone());
                        }
                    }
                }
            }
            Operand::Reachable(argn) => {
                if let Some(v) = args.get(argn as usize).copied() {
                    let p = self.ptr(fc, v);
                    let dst_pts = env.get(p);
                    let objects = self.mem.object_table();
                    for obj in dst_pts.objects(objects) {
                        for reach in self.mem.reachable_pointer_objects(obj) {
                            if let Some(idx) = self.mem.object_table().index_of(&reach) {
                                store.weak_update(idx, src_pts.clone());
                            }
                        }
                    }
                }
            }
            Operand::Universal | Operand::Null | Operand::Static => {
                warn!("external table COPY destination resolved to a source-only operand; ignored");
            }
        }
    }

    /// `Return` merges the returned pointer into every recorded caller's
    /// destination slot; void returns assign Null.
    fn eval_return(&mut self, fc: &FunctionContext, val: Option<ValueId>, env: &mut Env) -> EvalResult {
        let returned = val.map(|v| {
            let p = self.ptr(fc, v);
            env.get(p)
        });
        let mut top_level = Vec::new();
        let callers: Vec<ProgramPoint> = self.call_graph.callers(fc).cloned().collect();
        for call_pp in callers {
            let caller_cfg = &self.cfgs[&call_pp.fc.func];
            let CfgNodeKind::Call { result: Some(dst), .. } = caller_cfg.node(call_pp.node).kind.clone() else {
                continue;
            };
            let null_idx = self.null_index();
            let dp = self.ptr(&call_pp.fc, dst);
            let changed = match &returned {
                Some(pts) => env.weak_update(dp, pts.clone()),
                None => env.weak_update(dp, PointsToSet::singleton_index(null_idx)),
            };
            if changed {
                let caller_cfg = &self.cfgs[&call_pp.fc.func];
                top_level.extend(self.def_use_successors(&call_pp.fc, caller_cfg, dst));
            }
        }
        EvalResult { top_level_successors: top_level, memory_level_successors: vec![] }
    }
}
