//! The read-only IR interface the core consumes. The IR itself is
//! deliberately out of scope here.
//!
//! The core never owns or mutates a module; it only walks it through these
//! traits. A real front end (bitcode/textual-IR loader) implements them over
//! its own value/instruction representation. `testkit` gives a tiny
//! in-memory implementation used by this crate's own tests, building small
//! fixtures in-process rather than parsing real `.ll` files.

use std::fmt;

use derive_more::Display;

/// Opaque identifier for a function within a `Module`. Stable for the
/// lifetime of the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display(fmt = "fn{}", _0)]
pub struct FuncId(pub u32);

/// Opaque identifier for a basic block within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display(fmt = "bb{}", _0)]
pub struct BbId(pub u32);

/// Opaque identifier for an SSA value (instruction result, argument, global,
/// constant). Values are per-module: globals and functions use ids from a
/// shared namespace distinct from per-function locals, which is why
/// `ValueId` alone (no function component) is enough to identify a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display(fmt = "v{}", _0)]
pub struct ValueId(pub u32);

/// `(block, index-in-block)`.
pub type InstId = (BbId, usize);

/// A struct/array type layout, consulted when offsetting a memory object by
/// a field or element index. Implementations are expected to be cheap
/// `Clone`s (an `Rc`/index into a type table).
pub trait DataLayout {
    /// Size in bytes of `ty`.
    fn size_of(&self, ty: &TypeRef) -> u64;
    /// Whether `ty` is a pointer type.
    fn is_pointer(&self, ty: &TypeRef) -> bool;
    /// The pointee type, if `ty` is a pointer.
    fn pointee(&self, ty: &TypeRef) -> Option<TypeRef>;
    /// Byte offset of `field` within a struct type, and the field's type.
    /// `None` if `ty` is not a struct or `field` is out of range.
    fn field_offset(&self, ty: &TypeRef, field: u32) -> Option<(u64, TypeRef)>;
    /// Number of fields in a struct type, 0 for non-structs.
    fn num_fields(&self, ty: &TypeRef) -> u32;
    /// Element type and count for an array type.
    fn array_element(&self, ty: &TypeRef) -> Option<(TypeRef, u64)>;
    fn is_struct(&self, ty: &TypeRef) -> bool;
    fn is_array(&self, ty: &TypeRef) -> bool;
}

/// A type handle. Real front ends hand out a cheap index or interned
/// pointer; the core only ever compares and feeds these back to
/// `DataLayout`.
pub type TypeRef = u32;

/// Classification of an instruction down to the level the analysis needs.
/// Non-pointer-relevant instructions are `Other`; the semi-sparse CFG
/// builder skips those when building nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    Alloca { result: ValueId, allocated_ty: TypeRef, is_heap: bool },
    Load { result: ValueId, ptr: ValueId },
    Store { ptr: ValueId, val: ValueId },
    /// A GEP that the front end has already reduced, if possible, to a
    /// constant byte delta; `array_like` marks a GEP with a non-constant or
    /// array index.
    Gep { result: ValueId, base: ValueId, byte_delta: i64, array_like: bool },
    BitCast { result: ValueId, src: ValueId },
    AddrSpaceCast { result: ValueId, src: ValueId },
    IntToPtr { result: ValueId, src: ValueId },
    PtrToInt { result: ValueId, src: ValueId },
    Phi { result: ValueId, incoming: Vec<ValueId> },
    Select { result: ValueId, true_val: ValueId, false_val: ValueId },
    /// Direct call: `callee` names a `FuncId` known at this call site, or
    /// `None` for an indirect call through `callee_ptr`.
    Call { result: Option<ValueId>, callee: Option<FuncId>, callee_ptr: Option<ValueId>, args: Vec<ValueId> },
    Return { val: Option<ValueId> },
    /// Pointer-typed `extractvalue`/`extractelement`/`shufflevector`: the
    /// core treats these as a Universal-valued copy.
    ExtractFallback { result: ValueId },
    InsertValue { result: ValueId, aggregate: ValueId, inserted: ValueId },
    Unreachable,
    /// Anything else (non-pointer arithmetic, branches, etc); not a CFG
    /// node. `vaarg` also lands here and is reported at CFG build time.
    Other,
}

/// A single instruction in a basic block.
pub trait Instruction {
    fn kind(&self) -> InstKind;
    /// The static type of this instruction's result, if it produces one.
    fn result_type(&self) -> Option<TypeRef>;
}

pub trait BasicBlock {
    type Inst: Instruction;
    fn id(&self) -> BbId;
    fn instructions(&self) -> Box<dyn Iterator<Item = &Self::Inst> + '_>;
    /// Successor blocks, derived from the terminator. Needed by C4 to mirror
    /// control edges even though terminators themselves aren't CFG nodes.
    fn successors(&self) -> Vec<BbId>;
}

pub trait Function {
    type Block: BasicBlock;
    fn id(&self) -> FuncId;
    fn name(&self) -> &str;
    fn entry(&self) -> BbId;
    fn blocks(&self) -> Box<dyn Iterator<Item = &Self::Block> + '_>;
    fn block(&self, id: BbId) -> &Self::Block;
    fn params(&self) -> &[ValueId];
    fn is_external(&self) -> bool;
    fn is_variadic(&self) -> bool;
    /// `true` iff the function returns a pointer-typed value (used by the
    /// indirect-callee signature-compatibility filter).
    fn returns_pointer(&self) -> bool;
    /// Number of pointer-typed formal parameters (ditto).
    fn pointer_param_count(&self) -> usize;
}

/// Shape of a global variable's initializer, walked recursively by the
/// global pointer analysis.
#[derive(Debug, Clone)]
pub enum GlobalInit {
    /// No initializer (external global): conservatively Universal.
    External,
    /// A scalar pointer initializer: `Null`, a constant-offset reference to
    /// another global/function, or a non-pointer scalar (`None`).
    Scalar(Option<ScalarInit>),
    Struct(Vec<GlobalInit>),
    /// Array initializers fold into one summary element.
    Array(Box<GlobalInit>, u64),
}

#[derive(Debug, Clone)]
pub enum ScalarInit {
    Null,
    /// Reference to another global or function, with a constant byte
    /// offset already resolved via the data layout.
    Ref { target: ValueId, byte_offset: i64 },
}

pub trait Module {
    type Func: Function;
    fn layout(&self) -> &dyn DataLayout;
    fn functions(&self) -> Box<dyn Iterator<Item = &Self::Func> + '_>;
    fn function(&self, id: FuncId) -> &Self::Func;
    /// Functions whose address is taken somewhere in the module -- the
    /// candidate set for indirect-call resolution when `Universal` reaches a
    /// call site.
    fn address_taken_functions(&self) -> Vec<FuncId>;
    fn entry_function(&self) -> Option<FuncId>;
    /// Global variables: id, type, and mangled/demangled name (used for
    /// external-table lookups on functions, and reported here for parity).
    fn globals(&self) -> Vec<(ValueId, TypeRef)>;
    fn global_name(&self, v: ValueId) -> &str;
    fn function_name(&self, f: FuncId) -> &str;
    fn global_init(&self, v: ValueId) -> GlobalInit;
    /// `true` iff `v` denotes the module's null-pointer constant (LLVM-style
    /// IRs model this as a distinguished `Value`, not an instruction, hence
    /// it lives here rather than in `InstKind`).
    fn is_null_constant(&self, v: ValueId) -> bool;
    /// `true` iff `v` denotes an `undef` constant.
    fn is_undef_constant(&self, v: ValueId) -> bool;
}

impl fmt::Debug for dyn DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<DataLayout>")
    }
}
