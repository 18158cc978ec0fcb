//! Context model: immutable, interned call-strings and the policies that
//! decide how they grow at a call site.
//!
//! Backed by `hashconsing` so two contexts with the same call-string content
//! are always the same handle, giving `Eq`/`Hash`/`Clone` O(1) cost instead
//! of a deep structural comparison on every lookup.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, OnceLock};

use hashconsing::{consign, HConsed, HashConsign};

use crate::ir::{BbId, FuncId};

/// A call site: the instruction that performed the call, identified by its
/// caller function and its position within that function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallSite {
    pub caller: FuncId,
    pub block: BbId,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextNode {
    Empty,
    Cons { site: CallSite, parent: Context, len: u32 },
}

consign! {
    /// Process-wide context interner, shared across every module analyzed
    /// in the same run.
    let CONTEXT_FACTORY = consign(1024) for ContextNode;
}

/// An interned call-string. Two contexts with equal content are the same
/// handle: `Eq`/`Hash`/`Clone` are all O(1).
pub type Context = HConsed<ContextNode>;

/// The global (empty) context -- the starting point for every analysis run.
pub fn global_context() -> Context {
    CONTEXT_FACTORY.mk(ContextNode::Empty)
}

/// Number of call sites recorded in `ctx`. O(1): cached in the interned node
/// at construction time.
pub fn context_len(ctx: &Context) -> u32 {
    match ctx.get() {
        ContextNode::Empty => 0,
        ContextNode::Cons { len, .. } => *len,
    }
}

fn cons(site: CallSite, parent: &Context) -> Context {
    let len = context_len(parent) + 1;
    CONTEXT_FACTORY.mk(ContextNode::Cons { site, parent: parent.clone(), len })
}

static CTX_SERIALS: OnceLock<Mutex<HashMap<Context, u32>>> = OnceLock::new();

/// A stable, process-wide, total-ordered serial for a `Context`. `HConsed`
/// gives pointer-speed `Eq`/`Hash` but no `Ord`; this gives the `BTreeMap`-
/// keyed structures downstream (the call graph, the memoization table) a
/// deterministic iteration order without re-deriving one per module.
pub fn context_serial(ctx: &Context) -> u32 {
    let table = CTX_SERIALS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = table.lock().expect("context serial table poisoned");
    if let Some(&s) = guard.get(ctx) {
        return s;
    }
    let s = guard.len() as u32;
    guard.insert(ctx.clone(), s);
    s
}

/// Pop the most recent call site off `ctx`, returning `ctx` unchanged if
/// already global.
pub fn pop(ctx: &Context) -> Context {
    match ctx.get() {
        ContextNode::Empty => ctx.clone(),
        ContextNode::Cons { parent, .. } => parent.clone(),
    }
}

/// The strategy controlling how `push` behaves at each call. Injected into
/// the engine once per analysis run.
#[derive(Debug, Clone)]
pub enum ContextPolicy {
    /// Context-insensitive: every call collapses back to the global context.
    None,
    /// k-CFA: push while the call-string is shorter than `k`, otherwise keep
    /// the current context (call-string truncation, not a sliding window).
    KCallSite(u32),
    /// Push only at call sites in the tracked set; used for
    /// precision-directed (demand-driven) context sensitivity.
    Adaptive(BTreeSet<CallSite>),
}

impl ContextPolicy {
    /// Advances `ctx` across a call at `site` according to this policy.
    pub fn push(&self, ctx: &Context, site: CallSite) -> Context {
        match self {
            ContextPolicy::None => global_context(),
            ContextPolicy::KCallSite(k) => {
                if context_len(ctx) < *k {
                    cons(site, ctx)
                } else {
                    ctx.clone()
                }
            }
            ContextPolicy::Adaptive(tracked) => {
                if tracked.contains(&site) {
                    cons(site, ctx)
                } else {
                    ctx.clone()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(n: u32) -> CallSite {
        CallSite { caller: FuncId(0), block: BbId(0), index: n as usize }
    }

    #[test]
    fn global_context_is_empty_and_interned() {
        let a = global_context();
        let b = global_context();
        assert_eq!(context_len(&a), 0);
        assert!(a == b, "two global contexts must be the same interned handle");
    }

    #[test]
    fn k_call_site_never_exceeds_k() {
        let policy = ContextPolicy::KCallSite(2);
        let mut ctx = global_context();
        for n in 0..10 {
            ctx = policy.push(&ctx, site(n));
            assert!(context_len(&ctx) <= 2);
        }
    }

    #[test]
    fn none_policy_always_global() {
        let policy = ContextPolicy::None;
        let ctx = policy.push(&global_context(), site(0));
        assert_eq!(ctx, global_context());
    }

    #[test]
    fn equal_content_is_equal_handle() {
        let base = global_context();
        let a = cons(site(1), &base);
        let b = cons(site(1), &base);
        assert_eq!(a, b);
    }

    #[test]
    fn pop_reverses_push_under_none_saturation() {
        let base = global_context();
        let a = cons(site(1), &base);
        assert_eq!(pop(&a), base);
        assert_eq!(pop(&base), base);
    }
}
