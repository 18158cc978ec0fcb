//! Pointer & memory model, memory half: abstract allocation sites, memory
//! blocks, field-sensitive memory objects, and the type-layout-driven offset
//! arithmetic.
//!
//! `MemoryBlock` is represented as an arena index (`BlockId`) rather than an
//! owned/cyclic value, since a block can legitimately contain pointers back
//! into itself (a self-referential struct) and an owned representation would
//! have to fight the borrow checker to express that. `MemoryObject` stays a
//! plain `Copy` triple, with the block reference flattened to an index.

use std::collections::{BTreeSet, HashMap};

use log::warn;

use crate::context::Context;
use crate::ir::{DataLayout, FuncId, TypeRef, ValueId};

/// Result of projecting a points-to set onto candidate callees.
#[derive(Debug, Clone)]
pub enum CalleeCandidates {
    /// `pts` contained `Universal`: every address-taken function in the
    /// module is a candidate, pending the caller's signature filter.
    AnyAddressTaken,
    /// The exact set of `Function`-tagged allocation sites found in `pts`.
    Exact(Vec<FuncId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

pub const NULL_BLOCK: BlockId = BlockId(0);
pub const UNIVERSAL_BLOCK: BlockId = BlockId(1);

/// `MemoryObject = (MemoryBlock, offset, summary)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryObject {
    pub block: BlockId,
    pub offset: u64,
    pub summary: bool,
}

pub const NULL_OBJECT: MemoryObject = MemoryObject { block: NULL_BLOCK, offset: 0, summary: false };
/// Fixed point under offset and load; storing to it is a no-op.
pub const UNIVERSAL_OBJECT: MemoryObject = MemoryObject { block: UNIVERSAL_BLOCK, offset: 0, summary: true };

impl MemoryObject {
    pub fn is_null(&self) -> bool {
        self.block == NULL_BLOCK
    }
    pub fn is_universal(&self) -> bool {
        self.block == UNIVERSAL_BLOCK
    }
}

/// `AllocSite = Global(G) | Function(F) | Stack(ctx, v) | Heap(ctx, v)`,
/// plus the two special argv/envp sites for the entry function's arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AllocSite {
    Global(ValueId),
    Function(FuncId),
    Stack(Context, ValueId),
    Heap(Context, ValueId),
    Argv,
    Envp,
}

/// For a block's byte range: which offsets are pointer-typed, and which byte
/// span (if any) is an array region -- offsets inside it normalize modulo
/// the element size and force `summary = true`.
#[derive(Debug, Clone, Default)]
pub struct TypeLayout {
    pub size: u64,
    pub pointer_offsets: BTreeSet<u64>,
    pub array_region: Option<ArrayRegion>,
}

#[derive(Debug, Clone, Copy)]
pub struct ArrayRegion {
    pub start: u64,
    pub element_size: u64,
}

impl TypeLayout {
    /// Walk `ty` via `layout` and collect pointer-typed offsets plus (at
    /// most one, outermost) array region. Structs recurse field-wise;
    /// arrays fold to a single summary region, matching the global
    /// initializer walk in `initializer::walk_init`.
    pub fn of(ty: TypeRef, layout: &dyn DataLayout) -> TypeLayout {
        let mut result = TypeLayout { size: layout.size_of(&ty), pointer_offsets: BTreeSet::new(), array_region: None };
        collect(ty, 0, layout, &mut result);
        return result;

        fn collect(ty: TypeRef, base: u64, layout: &dyn DataLayout, out: &mut TypeLayout) {
            if layout.is_pointer(&ty) {
                out.pointer_offsets.insert(base);
            } else if layout.is_struct(&ty) {
                for field in 0..layout.num_fields(&ty) {
                    if let Some((off, fty)) = layout.field_offset(&ty, field) {
                        collect(fty, base + off, layout, out);
                    }
                }
            } else if layout.is_array(&ty) {
                if let Some((elem_ty, _count)) = layout.array_element(&ty) {
                    let element_size = layout.size_of(&elem_ty).max(1);
                    if out.array_region.is_none() {
                        out.array_region = Some(ArrayRegion { start: base, element_size });
                    }
                    collect(elem_ty, base, layout, out);
                }
            }
        }
    }

    pub fn single_pointer() -> TypeLayout {
        let mut pointer_offsets = BTreeSet::new();
        pointer_offsets.insert(0);
        TypeLayout { size: 8, pointer_offsets, array_region: None }
    }
}

struct BlockData {
    layout: TypeLayout,
    is_heap_or_summary: bool,
    site: Option<AllocSite>,
}

/// Dense `u32` index space over every `MemoryObject` that has ever been
/// registered -- the index the sparse-bitvector and BDD points-to-set
/// backends key on.
#[derive(Default)]
pub struct ObjectTable {
    by_obj: HashMap<MemoryObject, u32>,
    by_idx: Vec<MemoryObject>,
}

impl ObjectTable {
    fn intern(&mut self, obj: MemoryObject) -> u32 {
        if let Some(idx) = self.by_obj.get(&obj) {
            return *idx;
        }
        let idx = self.by_idx.len() as u32;
        self.by_idx.push(obj);
        self.by_obj.insert(obj, idx);
        idx
    }

    pub fn index_of(&self, obj: &MemoryObject) -> Option<u32> {
        self.by_obj.get(obj).copied()
    }

    pub fn object_at(&self, idx: u32) -> MemoryObject {
        self.by_idx[idx as usize]
    }

    pub fn contains(&self, obj: &MemoryObject) -> bool {
        self.by_obj.contains_key(obj)
    }
}

/// Owns every `MemoryBlock` and the interned mapping from allocation site to
/// block, plus the dense index table of every `MemoryObject` that has been
/// registered. Every `MemoryObject` that flows through the analysis must
/// have been registered here first, so its index is always resolvable.
pub struct MemoryManager {
    blocks: Vec<BlockData>,
    alloc_sites: HashMap<AllocSite, BlockId>,
    objects: ObjectTable,
    /// Disables `obj` itself from `get_reachable_pointer_objects`'s result,
    /// used by callers that only want strict descendants.
    pub include_self_in_reachable: bool,
}

impl MemoryManager {
    pub fn new() -> Self {
        let mut mgr = MemoryManager {
            blocks: vec![
                BlockData { layout: TypeLayout::default(), is_heap_or_summary: false, site: None },
                BlockData { layout: TypeLayout::default(), is_heap_or_summary: true, site: None },
            ],
            alloc_sites: HashMap::new(),
            objects: ObjectTable::default(),
            include_self_in_reachable: true,
        };
        mgr.objects.intern(NULL_OBJECT);
        mgr.objects.intern(UNIVERSAL_OBJECT);
        mgr
    }

    fn register(&mut self, obj: MemoryObject) -> MemoryObject {
        self.objects.intern(obj);
        obj
    }

    pub fn object_table(&self) -> &ObjectTable {
        &self.objects
    }

    fn block_of(&mut self, site: AllocSite, layout: TypeLayout, is_summary: bool) -> BlockId {
        if let Some(id) = self.alloc_sites.get(&site) {
            return *id;
        }
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData { layout, is_heap_or_summary: is_summary, site: Some(site.clone()) });
        self.alloc_sites.insert(site, id);
        id
    }

    /// The allocation site `obj`'s block was created for, if it has one
    /// (the two singleton blocks don't).
    pub fn alloc_site_of(&self, obj: MemoryObject) -> Option<&AllocSite> {
        self.blocks[obj.block.0 as usize].site.as_ref()
    }

    /// Candidate callees for an indirect call through `pts`: if `Universal`
    /// is in `pts`, every address-taken function is a candidate (signature
    /// compatibility is checked by the caller, since only it knows the call
    /// site's argument/return shape); otherwise project `pts` onto its
    /// `Function`-tagged allocation sites.
    pub fn callee_candidates(&self, pts: impl IntoIterator<Item = MemoryObject>) -> CalleeCandidates {
        let mut funcs = Vec::new();
        let mut saw_universal = false;
        for obj in pts {
            if obj.is_universal() {
                saw_universal = true;
                continue;
            }
            if let Some(AllocSite::Function(f)) = self.alloc_site_of(obj) {
                funcs.push(*f);
            }
        }
        if saw_universal {
            CalleeCandidates::AnyAddressTaken
        } else {
            CalleeCandidates::Exact(funcs)
        }
    }

    pub fn allocate_global(&mut self, v: ValueId, ty: TypeRef, dl: &dyn DataLayout) -> MemoryObject {
        let layout = TypeLayout::of(ty, dl);
        let block = self.block_of(AllocSite::Global(v), layout, false);
        self.register(MemoryObject { block, offset: 0, summary: false })
    }

    pub fn allocate_function(&mut self, f: FuncId) -> MemoryObject {
        let block = self.block_of(AllocSite::Function(f), TypeLayout::default(), false);
        self.register(MemoryObject { block, offset: 0, summary: false })
    }

    pub fn allocate_stack(&mut self, ctx: Context, v: ValueId, ty: TypeRef, dl: &dyn DataLayout) -> MemoryObject {
        let layout = TypeLayout::of(ty, dl);
        let block = self.block_of(AllocSite::Stack(ctx, v), layout, false);
        self.register(MemoryObject { block, offset: 0, summary: false })
    }

    /// Heap allocations are always summary objects: one block per
    /// allocating call site stands in for every object it ever produces at
    /// runtime.
    pub fn allocate_heap(&mut self, ctx: Context, v: ValueId, ty: TypeRef, dl: &dyn DataLayout) -> MemoryObject {
        let layout = TypeLayout::of(ty, dl);
        let block = self.block_of(AllocSite::Heap(ctx, v), layout, true);
        self.register(MemoryObject { block, offset: 0, summary: true })
    }

    /// A heap object whose layout can't be derived from the IR's type
    /// system -- e.g. external-table `ALLOC`/`static` effects, where the
    /// callee's real return type (commonly `void*`) carries no field
    /// structure of its own. Modeled as a single opaque pointer-typed cell,
    /// matching `allocate_argv`/`allocate_envp`.
    pub fn allocate_heap_opaque(&mut self, ctx: Context, v: ValueId) -> MemoryObject {
        let block = self.block_of(AllocSite::Heap(ctx, v), TypeLayout::single_pointer(), true);
        self.register(MemoryObject { block, offset: 0, summary: true })
    }

    pub fn allocate_argv(&mut self) -> MemoryObject {
        let block = self.block_of(AllocSite::Argv, TypeLayout::single_pointer(), true);
        self.register(MemoryObject { block, offset: 0, summary: true })
    }

    pub fn allocate_envp(&mut self) -> MemoryObject {
        let block = self.block_of(AllocSite::Envp, TypeLayout::single_pointer(), true);
        self.register(MemoryObject { block, offset: 0, summary: true })
    }

    fn layout(&self, block: BlockId) -> &TypeLayout {
        &self.blocks[block.0 as usize].layout
    }

    /// Offset `obj` by `d` bytes: consult the owning block's type layout;
    /// array-region offsets normalize modulo element size and force
    /// `summary = true`; out-of-bounds (including offsetting off `Null`)
    /// conservatively yields `Universal`.
    pub fn offset_memory(&mut self, obj: MemoryObject, d: i64) -> MemoryObject {
        if obj.is_universal() {
            return UNIVERSAL_OBJECT;
        }
        if obj.is_null() {
            warn!("offsetting the Null object; treating result as Universal");
            return UNIVERSAL_OBJECT;
        }
        let layout = self.layout(obj.block).clone();
        let raw = obj.offset as i64 + d;
        if raw < 0 {
            return self.register(UNIVERSAL_OBJECT);
        }
        let raw = raw as u64;

        if let Some(region) = layout.array_region {
            if raw >= region.start {
                let normalized = region.start + (raw - region.start) % region.element_size;
                return self.register(MemoryObject { block: obj.block, offset: normalized, summary: true });
            }
        }

        if raw >= layout.size && layout.size != 0 {
            return self.register(UNIVERSAL_OBJECT);
        }
        self.register(MemoryObject { block: obj.block, offset: raw, summary: obj.summary })
    }

    /// Every pointer-typed sub-object of `obj`'s block at offset
    /// `>= obj.offset`, honoring `include_self_in_reachable`.
    pub fn reachable_pointer_objects(&self, obj: MemoryObject) -> Vec<MemoryObject> {
        if obj.is_universal() {
            return vec![UNIVERSAL_OBJECT];
        }
        if obj.is_null() {
            return vec![];
        }
        let layout = self.layout(obj.block);
        layout
            .pointer_offsets
            .iter()
            .filter(|&&off| off >= obj.offset && (self.include_self_in_reachable || off != obj.offset))
            .map(|&off| MemoryObject { block: obj.block, offset: off, summary: obj.summary })
            .collect()
    }

    pub fn is_registered(&self, obj: &MemoryObject) -> bool {
        self.objects.contains(obj)
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::global_context;
    use crate::testkit::{TestLayout, TY_INT, TY_PTR};

    #[test]
    fn stack_alloc_is_idempotent_per_site() {
        let mut mgr = MemoryManager::new();
        let dl = TestLayout::default();
        let ctx = global_context();
        let a = mgr.allocate_stack(ctx.clone(), ValueId(1), TY_INT, &dl);
        let b = mgr.allocate_stack(ctx, ValueId(1), TY_INT, &dl);
        assert_eq!(a, b);
    }

    #[test]
    fn heap_objects_are_always_summary() {
        let mut mgr = MemoryManager::new();
        let dl = TestLayout::default();
        let obj = mgr.allocate_heap(global_context(), ValueId(2), TY_INT, &dl);
        assert!(obj.summary);
    }

    #[test]
    fn offset_off_null_is_universal() {
        let mut mgr = MemoryManager::new();
        assert_eq!(mgr.offset_memory(NULL_OBJECT, 4), UNIVERSAL_OBJECT);
    }

    #[test]
    fn offset_on_universal_is_fixed_point() {
        let mut mgr = MemoryManager::new();
        assert_eq!(mgr.offset_memory(UNIVERSAL_OBJECT, 100), UNIVERSAL_OBJECT);
    }

    #[test]
    fn out_of_bounds_offset_is_universal() {
        let mut mgr = MemoryManager::new();
        let dl = TestLayout::default();
        let obj = mgr.allocate_stack(global_context(), ValueId(3), TY_PTR, &dl);
        assert_eq!(mgr.offset_memory(obj, 1000), UNIVERSAL_OBJECT);
    }
}
