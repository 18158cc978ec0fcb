//! Alias query façade: one `AliasWrapper` type in front of whichever engine
//! `AAConfig` selects, so callers never have to know whether they're talking
//! to the TPA engine, the Andersen solver, the under-approximate backend, or
//! a façade-only adapter shell.
//!
//! Separates "run the analysis" from "answer a query against its result",
//! so a query issued before `analyze` has ever run still answers
//! conservatively instead of panicking.

pub mod adapters;
pub mod combined;
pub mod config;
pub mod underapprox;

pub use config::{AAConfig, AdapterKind, ImplKind};

use crate::andersen::{self, AndersenResult};
use crate::context::ContextPolicy;
use crate::external_table::ExternalTable;
use crate::ir::{Module, ValueId};
use crate::memory::NULL_OBJECT;
use crate::pointer::ValueOrigin;
use crate::program_point::FunctionContext;
use crate::ptset::PointsToSet;
use crate::tpa::{self, TpaResult};

/// An alias query's result. `PartialAlias` (regions overlap but aren't
/// provably identical) is only ever produced by `combined`'s merge law when
/// a CFL-style adapter would report it; the built-in backends never emit it
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasResult {
    NoAlias,
    MayAlias,
    PartialAlias,
    MustAlias,
}

/// `(FunctionContext, SSA value)`: what every query in this façade is
/// keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub fc: FunctionContext,
    pub value: ValueId,
}

impl Location {
    pub fn new(fc: FunctionContext, value: ValueId) -> Self {
        Location { fc, value }
    }
}

enum Backend {
    Tpa(TpaResult),
    Andersen(AndersenResult),
    UnderApprox(underapprox::UnderApproxResult),
    Adapter(adapters::AdapterShell),
    Combined(Vec<Backend>),
}

impl Backend {
    fn points_to(&self, loc: &Location, origin: &dyn ValueOrigin) -> Option<PointsToSet> {
        match self {
            Backend::Tpa(r) => r.points_to(&loc.fc, loc.value, origin),
            Backend::Andersen(r) => Some(r.points_to(&loc.fc, loc.value, origin)),
            Backend::UnderApprox(_) | Backend::Adapter(_) => None,
            Backend::Combined(backends) => {
                let mut out: Option<PointsToSet> = None;
                for b in backends {
                    if let Some(s) = b.points_to(loc, origin) {
                        out = Some(match out {
                            Some(acc) => acc.merge(&s),
                            None => s,
                        });
                    }
                }
                out
            }
        }
    }

    fn query(&self, loc1: &Location, origin1: &dyn ValueOrigin, loc2: &Location, origin2: &dyn ValueOrigin) -> AliasResult {
        match self {
            Backend::Tpa(_) => match (self.points_to(loc1, origin1), self.points_to(loc2, origin2)) {
                (Some(a), Some(b)) => pointsto_alias(&a, &b),
                _ => AliasResult::MayAlias,
            },
            Backend::Andersen(r) => {
                let a = r.points_to(&loc1.fc, loc1.value, origin1);
                let b = r.points_to(&loc2.fc, loc2.value, origin2);
                match r.alias(a, b) {
                    andersen::AliasResult::NoAlias => AliasResult::NoAlias,
                    andersen::AliasResult::MayAlias => AliasResult::MayAlias,
                    andersen::AliasResult::MustAlias => AliasResult::MustAlias,
                }
            }
            Backend::UnderApprox(r) => match r.query(loc1.fc.func, loc1.value, loc2.fc.func, loc2.value) {
                AliasResult::MustAlias => AliasResult::MustAlias,
                _ => AliasResult::MayAlias,
            },
            Backend::Adapter(a) => a.query(),
            Backend::Combined(backends) => {
                let verdicts: Vec<AliasResult> = backends.iter().map(|b| b.query(loc1, origin1, loc2, origin2)).collect();
                combined::merge_law(&verdicts)
            }
        }
    }
}

fn pointsto_alias(a: &PointsToSet, b: &PointsToSet) -> AliasResult {
    if a.is_empty() || b.is_empty() {
        return AliasResult::NoAlias;
    }
    if a.size() == 1 && b.size() == 1 && a == b {
        return AliasResult::MustAlias;
    }
    if a.intersects(b) {
        AliasResult::MayAlias
    } else {
        AliasResult::NoAlias
    }
}

/// The façade exposes `query`/`may_alias`/`must_alias`/`may_null`/
/// `get_points_to_set`/`get_alias_set`, backed by whatever `AAConfig`
/// selects. Before `analyze` has run, every query answers conservatively
/// with `MayAlias` rather than panicking or returning a stale result.
pub struct AliasWrapper {
    config: AAConfig,
    backend: Option<Backend>,
}

impl AliasWrapper {
    pub fn new(config: AAConfig) -> Self {
        AliasWrapper { config, backend: None }
    }

    /// Runs the configured backend(s) to completion. `combined` runs the
    /// TPA and Andersen engines and merges their verdicts per query;
    /// everything else runs exactly one engine.
    pub fn analyze<M: Module>(&mut self, module: &M, external_table: &ExternalTable) {
        let ctx_policy = self.config.context_policy();
        self.backend = Some(Self::build_backend(self.config.impl_kind, module, &ctx_policy, external_table));
    }

    fn build_backend<M: Module>(kind: ImplKind, module: &M, ctx_policy: &ContextPolicy, external_table: &ExternalTable) -> Backend {
        match kind {
            ImplKind::Tpa => Backend::Tpa(tpa::run(module, ctx_policy.clone(), external_table.clone())),
            ImplKind::Andersen => Backend::Andersen(andersen::run(module, ctx_policy, external_table)),
            ImplKind::UnderApprox => Backend::UnderApprox(underapprox::run(module)),
            ImplKind::Adapter(a) => Backend::Adapter(adapters::AdapterShell::new(a)),
            ImplKind::Combined => Backend::Combined(vec![
                Self::build_backend(ImplKind::Tpa, module, ctx_policy, external_table),
                Self::build_backend(ImplKind::Andersen, module, ctx_policy, external_table),
            ]),
        }
    }

    /// Queries the alias relationship between two locations.
    pub fn query(&self, loc1: &Location, origin1: &dyn ValueOrigin, loc2: &Location, origin2: &dyn ValueOrigin) -> AliasResult {
        match &self.backend {
            Some(b) => b.query(loc1, origin1, loc2, origin2),
            None => AliasResult::MayAlias,
        }
    }

    pub fn may_alias(&self, loc1: &Location, origin1: &dyn ValueOrigin, loc2: &Location, origin2: &dyn ValueOrigin) -> bool {
        self.query(loc1, origin1, loc2, origin2) != AliasResult::NoAlias
    }

    pub fn must_alias(&self, loc1: &Location, origin1: &dyn ValueOrigin, loc2: &Location, origin2: &dyn ValueOrigin) -> bool {
        self.query(loc1, origin1, loc2, origin2) == AliasResult::MustAlias
    }

    /// Conservatively `true` whenever the backend can't prove otherwise
    /// (uninitialized, lookup miss, or no points-to model at all).
    pub fn may_null(&self, loc: &Location, origin: &dyn ValueOrigin, mem: &crate::memory::MemoryManager) -> bool {
        let Some(backend) = &self.backend else { return true };
        let Some(set) = backend.points_to(loc, origin) else { return true };
        let Some(null_idx) = mem.object_table().index_of(&NULL_OBJECT) else { return true };
        set.is_empty() || set.has_index(null_idx)
    }

    /// The backend's points-to set for `loc`, if any.
    pub fn get_points_to_set(&self, loc: &Location, origin: &dyn ValueOrigin) -> Option<PointsToSet> {
        self.backend.as_ref()?.points_to(loc, origin)
    }

    /// This façade has no registry of "every live value" to scan on its
    /// own, so the caller supplies the
    /// candidate set (e.g. every pointer-typed value live at `loc`'s program
    /// point) and gets back the ones that `mayAlias` `loc`.
    pub fn get_alias_set(&self, loc: &Location, origin: &dyn ValueOrigin, candidates: &[(Location, &dyn ValueOrigin)]) -> Vec<Location> {
        candidates
            .iter()
            .filter(|(cloc, corigin)| self.may_alias(loc, origin, cloc, *corigin))
            .map(|(cloc, _)| cloc.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::global_context;
    use crate::external_table::ExternalTable;
    use crate::ir::{FuncId as FId, InstKind};
    use crate::testkit::{FunctionBuilder, TestLayout, TestModule, TY_PTR};
    use crate::value_origin::FunctionOrigin;

    #[test]
    fn uninitialized_wrapper_is_conservative() {
        let wrapper = AliasWrapper::new(AAConfig::parse("tpa").unwrap());
        let fc = FunctionContext::new(FId(0), global_context());
        let loc = Location::new(fc.clone(), ValueId(0));
        struct DummyOrigin;
        impl ValueOrigin for DummyOrigin {
            fn is_null_const(&self, _v: ValueId) -> bool {
                false
            }
            fn is_undef(&self, _v: ValueId) -> bool {
                false
            }
            fn is_global(&self, _v: ValueId) -> bool {
                false
            }
            fn no_op_cast_source(&self, _v: ValueId) -> Option<ValueId> {
                None
            }
            fn single_incoming_phi_source(&self, _v: ValueId) -> Option<ValueId> {
                None
            }
            fn is_inttoptr(&self, _v: ValueId) -> bool {
                false
            }
        }
        let origin = DummyOrigin;
        assert_eq!(wrapper.query(&loc, &origin, &loc, &origin), AliasResult::MayAlias);
        assert!(!wrapper.must_alias(&loc, &origin, &loc, &origin));
    }

    #[test]
    fn disjoint_allocas_are_no_alias_under_tpa() {
        let mut fb = FunctionBuilder::new(FId(0), "main");
        let a = fb.fresh_value();
        fb.push(InstKind::Alloca { result: a, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let b = fb.fresh_value();
        fb.push(InstKind::Alloca { result: b, allocated_ty: TY_PTR, is_heap: false }, Some(TY_PTR));
        let func = fb.finish();

        let mut module = TestModule { layout: TestLayout::default(), ..Default::default() };
        module.entry = Some(FId(0));
        module.functions.insert(FId(0), func);

        let mut wrapper = AliasWrapper::new(AAConfig::parse("tpa").unwrap());
        wrapper.analyze(&module, &ExternalTable::empty());

        let origin = FunctionOrigin::build(&module, module.function(FId(0)));
        let fc = FunctionContext::new(FId(0), global_context());
        let loc_a = Location::new(fc.clone(), a);
        let loc_b = Location::new(fc, b);
        assert_eq!(wrapper.query(&loc_a, &origin, &loc_b, &origin), AliasResult::NoAlias);
    }
}
