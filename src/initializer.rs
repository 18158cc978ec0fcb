//! Global pointer analysis & `Initializer`. A one-shot pre-pass over the
//! module that seeds `Env`/`Store` before the worklist starts.

use std::collections::BTreeMap as Map;

use crate::cfg::Cfg;
use crate::context::global_context;
use crate::env_store::{Env, Store};
use crate::ir::{FuncId, GlobalInit, Module, ScalarInit, ValueId};
use crate::memory::{MemoryManager, MemoryObject};
use crate::pointer::{PointerManager, NULL_POINTER, UNIVERSAL_POINTER};
use crate::ptset::PointsToSet;
use crate::value_origin::FunctionOrigin;

/// Output of the global pointer analysis: one memory object per global
/// variable and per function, plus the store entries their initializers
/// imply.
pub struct GlobalState {
    pub global_objects: Vec<MemoryObject>,
    pub global_object_of: Map<ValueId, MemoryObject>,
    pub function_objects: Map<FuncId, MemoryObject>,
}

/// Walk every global's initializer recursively: scalars set `Store[gObj]`,
/// structs recurse field-wise, arrays fold into one summary, externals (no
/// initializer) are conservatively Universal.
pub fn run_global_pointer_analysis<M: Module>(module: &M, mem: &mut MemoryManager, store: &mut Store) -> GlobalState {
    let mut global_objects = Vec::new();
    let mut global_object_of = Map::new();
    let mut function_objects = Map::new();
    let dl = module.layout();

    for (gid, gty) in module.globals() {
        let obj = mem.allocate_global(gid, gty, dl);
        let idx = mem.object_table().index_of(&obj).expect("just registered");
        global_objects.push(obj);
        global_object_of.insert(gid, obj);
        let init = module.global_init(gid);
        let pts = walk_init(&init, mem, module, &global_object_of);
        store.weak_update(idx, pts);
    }

    for f in module.functions() {
        let fid = f.id();
        let fobj = mem.allocate_function(fid);
        function_objects.insert(fid, fobj);
    }

    GlobalState { global_objects, global_object_of, function_objects }
}

fn walk_init<M: Module>(init: &GlobalInit, mem: &mut MemoryManager, module: &M, globals: &Map<ValueId, MemoryObject>) -> PointsToSet {
    match init {
        GlobalInit::External => PointsToSet::singleton_index(universal_idx(mem)),
        GlobalInit::Scalar(None) => PointsToSet::empty(),
        GlobalInit::Scalar(Some(ScalarInit::Null)) => PointsToSet::singleton_index(null_idx(mem)),
        GlobalInit::Scalar(Some(ScalarInit::Ref { target, byte_offset })) => {
            let dl = module.layout();
            let base = if let Some(&g) = globals.get(target) {
                g
            } else if let Some((_, ty)) = module.globals().into_iter().find(|(id, _)| id == target) {
                // Forward reference to a global not walked yet in this pass;
                // `allocate_global` is idempotent per site so later passes
                // see the same object identity.
                mem.allocate_global(*target, ty, dl)
            } else {
                // `target` names a function address -- the IR contract has
                // no `ValueId -> FuncId` lookup, so this can't be resolved
                // to a precise object here.
                return PointsToSet::singleton_index(universal_idx(mem));
            };
            let offset_obj = mem.offset_memory(base, *byte_offset);
            let idx = mem.object_table().index_of(&offset_obj).expect("offset_memory registers its result");
            PointsToSet::singleton_index(idx)
        }
        GlobalInit::Struct(fields) => {
            let mut out = PointsToSet::empty();
            for f in fields {
                out = out.merge(&walk_init(f, mem, module, globals));
            }
            out
        }
        GlobalInit::Array(elem, _count) => walk_init(elem, mem, module, globals),
    }
}

fn universal_idx(mem: &MemoryManager) -> u32 {
    mem.object_table().index_of(&crate::memory::UNIVERSAL_OBJECT).expect("registered by MemoryManager::new")
}

fn null_idx(mem: &MemoryManager) -> u32 {
    mem.object_table().index_of(&crate::memory::NULL_OBJECT).expect("registered by MemoryManager::new")
}

/// Seeds `Env` with the Null/Universal singletons, allocates `argv`/`envp`
/// for the entry function, and returns the program point the worklist
/// should enqueue first together with its initial `Store`.
pub struct EntrySeed {
    pub entry_func: FuncId,
    pub initial_store: Store,
}

pub fn initialize<M: Module>(
    module: &M,
    mem: &mut MemoryManager,
    pointers: &mut PointerManager,
    env: &mut Env,
    global_store: &Store,
) -> Option<EntrySeed> {
    env.weak_update(NULL_POINTER, PointsToSet::singleton_index(null_idx(mem)));
    env.weak_update(UNIVERSAL_POINTER, PointsToSet::singleton_index(universal_idx(mem)));

    let entry_func = module.entry_function()?;
    let entry = module.function(entry_func);
    let mut initial_store = global_store.clone();

    if let Some(&argv_param) = entry.params().first() {
        let argv_obj = mem.allocate_argv();
        let argv_idx = mem.object_table().index_of(&argv_obj).expect("just registered");
        let origin = FunctionOrigin::build(module, entry);
        let p = pointers.get_or_create(&global_context(), argv_param, &origin);
        env.weak_update(p, PointsToSet::singleton_index(argv_idx));
        initial_store.weak_update(argv_idx, PointsToSet::singleton_index(argv_idx));
    }
    if let Some(&envp_param) = entry.params().get(1) {
        let envp_obj = mem.allocate_envp();
        let envp_idx = mem.object_table().index_of(&envp_obj).expect("just registered");
        let origin = FunctionOrigin::build(module, entry);
        let p = pointers.get_or_create(&global_context(), envp_param, &origin);
        env.weak_update(p, PointsToSet::singleton_index(envp_idx));
        initial_store.weak_update(envp_idx, PointsToSet::singleton_index(envp_idx));
    }

    Some(EntrySeed { entry_func, initial_store })
}

/// Build one `Cfg` per function in the module, used by both the TPA engine
/// and the VFG builder.
pub fn build_cfgs<M: Module>(module: &M) -> Map<FuncId, Cfg> {
    module.functions().map(|f| (f.id(), Cfg::build(f))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{TestLayout, TestModule, TY_INT, TY_PTR};

    #[test]
    fn external_global_is_universal() {
        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.globals.insert(ValueId(0), (TY_PTR, GlobalInit::External));
        module.global_names.insert(ValueId(0), "g".to_string());
        let mut mem = MemoryManager::new();
        let mut store = Store::new();
        run_global_pointer_analysis(&module, &mut mem, &mut store);
        let obj = mem.allocate_global(ValueId(0), TY_PTR, &module.layout);
        let idx = mem.object_table().index_of(&obj).unwrap();
        assert_eq!(store.get(idx), PointsToSet::singleton_index(universal_idx(&mem)));
    }

    #[test]
    fn null_scalar_initializer() {
        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.globals.insert(ValueId(0), (TY_PTR, GlobalInit::Scalar(Some(ScalarInit::Null))));
        let mut mem = MemoryManager::new();
        let mut store = Store::new();
        run_global_pointer_analysis(&module, &mut mem, &mut store);
        let obj = mem.allocate_global(ValueId(0), TY_PTR, &module.layout);
        let idx = mem.object_table().index_of(&obj).unwrap();
        assert_eq!(store.get(idx), PointsToSet::singleton_index(null_idx(&mem)));
    }

    #[test]
    fn initializer_seeds_null_and_universal_pointers() {
        let module = TestModule { layout: TestLayout::default(), ..Default::default() };
        let mut mem = MemoryManager::new();
        let mut pointers = PointerManager::new();
        let mut env = Env::new();
        let store = Store::new();
        initialize(&module, &mut mem, &mut pointers, &mut env, &store);
        assert!(!env.get(NULL_POINTER).is_empty());
        assert!(!env.get(UNIVERSAL_POINTER).is_empty());
    }

    #[test]
    fn unused_ty_int_import_guard() {
        let _ = TY_INT;
    }
}
