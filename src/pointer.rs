//! Pointer & memory model, pointer half: abstract pointers, their
//! canonicalization, and the interning table that gives them O(1) identity.

use std::collections::HashMap;

use crate::context::{global_context, Context};
use crate::ir::ValueId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PointerId(pub u32);

pub const NULL_POINTER: PointerId = PointerId(0);
pub const UNIVERSAL_POINTER: PointerId = PointerId(1);

/// `Pointer = (Context, SSAValue)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pointer {
    pub ctx: Context2,
    pub value: ValueId,
}

/// `Context` (a `hashconsing::HConsed`) doesn't implement `Ord`, but we need
/// `Pointer` orderable for deterministic containers downstream. We key on
/// the context's cached call-string length plus a stable per-context serial
/// assigned at first use -- cheap and total, without requiring `Context` to
/// expose its internal representative index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Context2(pub u32);

/// Lets `PointerManager` look into how a value was defined without owning a
/// concrete IR type -- the CFG builder (which does walk real instructions)
/// supplies the answers.
pub trait ValueOrigin {
    fn is_null_const(&self, v: ValueId) -> bool;
    fn is_undef(&self, v: ValueId) -> bool;
    fn is_global(&self, v: ValueId) -> bool;
    /// `Some(src)` if `v` is a no-op bitcast/addrspacecast of `src`.
    fn no_op_cast_source(&self, v: ValueId) -> Option<ValueId>;
    /// `Some(src)` if `v` is a PHI with exactly one distinct incoming value.
    fn single_incoming_phi_source(&self, v: ValueId) -> Option<ValueId>;
    /// `Some(())` if `v` is the result of an `inttoptr` (normalized to
    /// Undef unconditionally, since an integer-derived pointer's provenance
    /// can't be tracked).
    fn is_inttoptr(&self, v: ValueId) -> bool;
}

/// Strip no-op bitcasts, collapse single-incoming PHIs, normalize `inttoptr`
/// to Undef. Idempotent: `canonicalize(canonicalize(v)) == canonicalize(v)`.
pub fn canonicalize(v: ValueId, origin: &dyn ValueOrigin) -> ValueId {
    let mut cur = v;
    loop {
        if origin.is_inttoptr(cur) {
            // Represented by the caller's designated Undef value id, which
            // by construction is already a fixed point for these rules.
            return cur;
        }
        if let Some(src) = origin.no_op_cast_source(cur) {
            cur = src;
            continue;
        }
        if let Some(src) = origin.single_incoming_phi_source(cur) {
            cur = src;
            continue;
        }
        return cur;
    }
}

struct PointerData {
    ctx_serial: u32,
    value: ValueId,
}

/// Interns `(Context, canonicalize(v))` pairs into a dense `PointerId`
/// space. `Null`/`Undef` collapse onto the two process-wide singletons;
/// `GlobalValue`s always live in the global context.
pub struct PointerManager {
    pointers: Vec<PointerData>,
    index: HashMap<(u32, ValueId), PointerId>,
    ctx_serials: HashMap<Context, u32>,
    next_ctx_serial: u32,
}

impl PointerManager {
    pub fn new() -> Self {
        let mut mgr = PointerManager {
            pointers: vec![
                PointerData { ctx_serial: 0, value: ValueId(u32::MAX) },
                PointerData { ctx_serial: 0, value: ValueId(u32::MAX - 1) },
            ],
            index: HashMap::new(),
            ctx_serials: HashMap::new(),
            next_ctx_serial: 1,
        };
        mgr.ctx_serials.insert(global_context(), 0);
        mgr
    }

    fn serial_of(&mut self, ctx: &Context) -> u32 {
        if let Some(s) = self.ctx_serials.get(ctx) {
            return *s;
        }
        let s = self.next_ctx_serial;
        self.next_ctx_serial += 1;
        self.ctx_serials.insert(ctx.clone(), s);
        s
    }

    /// Intern `v` under `ctx`, canonicalizing first and creating a fresh id
    /// on first sight.
    pub fn get_or_create(&mut self, ctx: &Context, v: ValueId, origin: &dyn ValueOrigin) -> PointerId {
        if origin.is_null_const(v) {
            return NULL_POINTER;
        }
        if origin.is_undef(v) {
            return UNIVERSAL_POINTER;
        }
        let canon = canonicalize(v, origin);
        let effective_ctx = if origin.is_global(canon) { global_context() } else { ctx.clone() };
        let serial = self.serial_of(&effective_ctx);
        let key = (serial, canon);
        if let Some(id) = self.index.get(&key) {
            return *id;
        }
        let id = PointerId(self.pointers.len() as u32);
        self.pointers.push(PointerData { ctx_serial: serial, value: canon });
        self.index.insert(key, id);
        id
    }

    /// Read-only lookup: returns `None` if the pointer hasn't been interned
    /// yet, used by transfer functions that must not force creation of
    /// pointers for values not yet defined.
    pub fn get(&self, ctx: &Context, v: ValueId, origin: &dyn ValueOrigin) -> Option<PointerId> {
        if origin.is_null_const(v) {
            return Some(NULL_POINTER);
        }
        if origin.is_undef(v) {
            return Some(UNIVERSAL_POINTER);
        }
        let canon = canonicalize(v, origin);
        let effective_ctx = if origin.is_global(canon) { global_context() } else { ctx.clone() };
        let serial = self.ctx_serials.get(&effective_ctx)?;
        self.index.get(&(*serial, canon)).copied()
    }

    pub fn value_of(&self, p: PointerId) -> ValueId {
        self.pointers[p.0 as usize].value
    }

    pub fn ctx_serial_of(&self, p: PointerId) -> u32 {
        self.pointers[p.0 as usize].ctx_serial
    }
}

impl Default for PointerManager {
    fn default() -> Self {
        Self::new()
    }
}
