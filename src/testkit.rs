//! A tiny in-memory IR used to build the small fixtures in this crate's own
//! tests. Not a front end: just enough struct-literal building to exercise
//! the engine without parsing real bitcode.

use std::collections::BTreeMap;

use crate::ir::{
    BasicBlock as BasicBlockTrait, BbId, DataLayout, FuncId, Function as FunctionTrait, GlobalInit,
    InstKind, Instruction as InstructionTrait, Module as ModuleTrait, TypeRef, ValueId,
};

pub const TY_INT: TypeRef = 0;
pub const TY_PTR: TypeRef = 1;

/// A minimal data layout: one scalar type (`TY_INT`, 4 bytes, non-pointer)
/// and one pointer type (`TY_PTR`, 8 bytes, pointee `TY_INT`). Struct/array
/// types are registered dynamically starting at id 2.
#[derive(Default)]
pub struct TestLayout {
    pub struct_fields: BTreeMap<TypeRef, Vec<(u64, TypeRef)>>,
    pub arrays: BTreeMap<TypeRef, (TypeRef, u64)>,
    pub pointee: BTreeMap<TypeRef, TypeRef>,
}

impl DataLayout for TestLayout {
    fn size_of(&self, ty: &TypeRef) -> u64 {
        match *ty {
            TY_INT => 4,
            TY_PTR => 8,
            t => {
                if let Some(fields) = self.struct_fields.get(&t) {
                    fields.last().map(|(o, fty)| o + self.size_of(fty)).unwrap_or(0)
                } else if let Some((elem, n)) = self.arrays.get(&t) {
                    self.size_of(elem) * n
                } else {
                    4
                }
            }
        }
    }

    fn is_pointer(&self, ty: &TypeRef) -> bool {
        *ty == TY_PTR || self.pointee.contains_key(ty)
    }

    fn pointee(&self, ty: &TypeRef) -> Option<TypeRef> {
        if *ty == TY_PTR {
            Some(TY_INT)
        } else {
            self.pointee.get(ty).copied()
        }
    }

    fn field_offset(&self, ty: &TypeRef, field: u32) -> Option<(u64, TypeRef)> {
        self.struct_fields.get(ty)?.get(field as usize).copied()
    }

    fn num_fields(&self, ty: &TypeRef) -> u32 {
        self.struct_fields.get(ty).map(|f| f.len() as u32).unwrap_or(0)
    }

    fn array_element(&self, ty: &TypeRef) -> Option<(TypeRef, u64)> {
        self.arrays.get(ty).copied()
    }

    fn is_struct(&self, ty: &TypeRef) -> bool {
        self.struct_fields.contains_key(ty)
    }

    fn is_array(&self, ty: &TypeRef) -> bool {
        self.arrays.contains_key(ty)
    }
}

#[derive(Debug, Clone)]
pub struct TestInst {
    pub kind: InstKind,
    pub result_ty: Option<TypeRef>,
}

impl InstructionTrait for TestInst {
    fn kind(&self) -> InstKind {
        self.kind.clone()
    }
    fn result_type(&self) -> Option<TypeRef> {
        self.result_ty
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestBlock {
    pub id: BbId,
    pub insts: Vec<TestInst>,
    pub succs: Vec<BbId>,
}

impl BasicBlockTrait for TestBlock {
    type Inst = TestInst;
    fn id(&self) -> BbId {
        self.id
    }
    fn instructions(&self) -> Box<dyn Iterator<Item = &TestInst> + '_> {
        Box::new(self.insts.iter())
    }
    fn successors(&self) -> Vec<BbId> {
        self.succs.clone()
    }
}

#[derive(Debug, Clone)]
pub struct TestFunction {
    pub id: FuncId,
    pub name: String,
    pub entry: BbId,
    pub blocks: BTreeMap<BbId, TestBlock>,
    pub params: Vec<ValueId>,
    pub external: bool,
    pub variadic: bool,
    pub returns_pointer: bool,
}

impl FunctionTrait for TestFunction {
    type Block = TestBlock;
    fn id(&self) -> FuncId {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn entry(&self) -> BbId {
        self.entry
    }
    fn blocks(&self) -> Box<dyn Iterator<Item = &TestBlock> + '_> {
        Box::new(self.blocks.values())
    }
    fn block(&self, id: BbId) -> &TestBlock {
        &self.blocks[&id]
    }
    fn params(&self) -> &[ValueId] {
        &self.params
    }
    fn is_external(&self) -> bool {
        self.external
    }
    fn is_variadic(&self) -> bool {
        self.variadic
    }
    fn returns_pointer(&self) -> bool {
        self.returns_pointer
    }
    fn pointer_param_count(&self) -> usize {
        self.params.len()
    }
}

#[derive(Default)]
pub struct TestModule {
    pub layout: TestLayout,
    pub functions: BTreeMap<FuncId, TestFunction>,
    pub address_taken: Vec<FuncId>,
    pub entry: Option<FuncId>,
    pub globals: BTreeMap<ValueId, (TypeRef, GlobalInit)>,
    pub global_names: BTreeMap<ValueId, String>,
    pub null_consts: std::collections::BTreeSet<ValueId>,
    pub undef_consts: std::collections::BTreeSet<ValueId>,
}

impl ModuleTrait for TestModule {
    type Func = TestFunction;
    fn layout(&self) -> &dyn DataLayout {
        &self.layout
    }
    fn functions(&self) -> Box<dyn Iterator<Item = &TestFunction> + '_> {
        Box::new(self.functions.values())
    }
    fn function(&self, id: FuncId) -> &TestFunction {
        &self.functions[&id]
    }
    fn address_taken_functions(&self) -> Vec<FuncId> {
        self.address_taken.clone()
    }
    fn entry_function(&self) -> Option<FuncId> {
        self.entry
    }
    fn globals(&self) -> Vec<(ValueId, TypeRef)> {
        self.globals.iter().map(|(id, (ty, _))| (*id, *ty)).collect()
    }
    fn global_name(&self, v: ValueId) -> &str {
        self.global_names.get(&v).map(String::as_str).unwrap_or("<global>")
    }
    fn function_name(&self, f: FuncId) -> &str {
        self.functions[&f].name()
    }
    fn global_init(&self, v: ValueId) -> GlobalInit {
        self.globals.get(&v).map(|(_, init)| init.clone()).unwrap_or(GlobalInit::External)
    }
    fn is_null_constant(&self, v: ValueId) -> bool {
        self.null_consts.contains(&v)
    }
    fn is_undef_constant(&self, v: ValueId) -> bool {
        self.undef_consts.contains(&v)
    }
}

/// A small builder so scenario tests can write linear code without spelling
/// out `BTreeMap` literals by hand.
pub struct FunctionBuilder {
    func: TestFunction,
    next_value: u32,
    cur_block: BbId,
}

impl FunctionBuilder {
    pub fn new(id: FuncId, name: &str) -> Self {
        let entry = BbId(0);
        let mut blocks = BTreeMap::new();
        blocks.insert(entry, TestBlock { id: entry, insts: vec![], succs: vec![] });
        FunctionBuilder {
            func: TestFunction {
                id,
                name: name.to_string(),
                entry,
                blocks,
                params: vec![],
                external: false,
                variadic: false,
                returns_pointer: false,
            },
            next_value: 0,
            cur_block: entry,
        }
    }

    pub fn fresh_value(&mut self) -> ValueId {
        let v = ValueId(self.next_value);
        self.next_value += 1;
        v
    }

    pub fn set_next_value_floor(&mut self, floor: u32) {
        if floor > self.next_value {
            self.next_value = floor;
        }
    }

    pub fn push(&mut self, kind: InstKind, result_ty: Option<TypeRef>) {
        self.func.blocks.get_mut(&self.cur_block).unwrap().insts.push(TestInst { kind, result_ty });
    }

    pub fn finish(self) -> TestFunction {
        self.func
    }
}
