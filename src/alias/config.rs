//! `AAConfig`: parses the CLI-surface alias-analysis selector strings into a
//! structured configuration. Accepts the same shape via `serde_json` for a
//! config sidecar as well as flat command-line flags.

use serde::{Deserialize, Serialize};

use crate::context::ContextPolicy;
use crate::error::PtaError;

/// Which underlying engine a `query`-facing `AliasWrapper` is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImplKind {
    /// Flow/context-sensitive semi-sparse engine (`tpa.rs`), the "sparrow-aa"
    /// name the original CLI used for it.
    Tpa,
    /// Flow-insensitive Andersen engine (`andersen.rs`).
    Andersen,
    /// Per-function union-find/congruence-closure backend (`underapprox.rs`).
    UnderApprox,
    /// Façade-only adapter: accepts the selector, returns conservative
    /// `MayAlias` for every query.
    Adapter(AdapterKind),
    /// Merge of several backends via the combined-mode law (`combined.rs`).
    Combined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterKind {
    Dyck,
    CflAnders,
    CflSteens,
    SeaDsa,
    AllocHeuristic,
}

/// `ctxSens`/`kLimit` collapsed into the one enum the core's `ContextPolicy`
/// already uses, since this façade has nothing to add on top of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CtxSensKind {
    Insensitive,
    KCallSite(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AAConfig {
    #[serde(rename = "impl")]
    pub impl_kind: ImplKind,
    pub ctx_sens: CtxSensKind,
    pub field_sensitive: bool,
}

impl AAConfig {
    pub fn context_policy(&self) -> ContextPolicy {
        match self.ctx_sens {
            CtxSensKind::Insensitive => ContextPolicy::None,
            CtxSensKind::KCallSite(k) => ContextPolicy::KCallSite(k),
        }
    }

    /// Parses one of the CLI-surface selector strings:
    /// `sparrow-aa-<k>cfa`, `tpa-<k>cfa`, `tpa` (context-insensitive),
    /// `andersen`, `dyck`, `cfl-anders`, `cfl-steens`, `sea-dsa`,
    /// `alloc-heuristic`, `combined`, `underapprox`. Matching is
    /// case-insensitive. Field sensitivity isn't expressed in the selector
    /// string and defaults on, matching every field-tracking module already
    /// in this crate (`memory.rs`'s `TypeLayout`).
    pub fn parse(selector: &str) -> Result<AAConfig, PtaError> {
        let lower = selector.to_ascii_lowercase();

        if let Some(rest) = lower.strip_prefix("sparrow-aa-").or_else(|| lower.strip_prefix("tpa-")) {
            let k = parse_cfa_suffix(rest)?;
            return Ok(AAConfig { impl_kind: ImplKind::Tpa, ctx_sens: CtxSensKind::KCallSite(k), field_sensitive: true });
        }
        if lower == "tpa" || lower == "sparrow-aa" {
            return Ok(AAConfig { impl_kind: ImplKind::Tpa, ctx_sens: CtxSensKind::Insensitive, field_sensitive: true });
        }
        if let Some(rest) = lower.strip_prefix("andersen-") {
            let k = parse_cfa_suffix(rest)?;
            return Ok(AAConfig { impl_kind: ImplKind::Andersen, ctx_sens: CtxSensKind::KCallSite(k), field_sensitive: true });
        }
        if lower == "andersen" {
            return Ok(AAConfig { impl_kind: ImplKind::Andersen, ctx_sens: CtxSensKind::Insensitive, field_sensitive: true });
        }
        if lower == "underapprox" {
            return Ok(AAConfig { impl_kind: ImplKind::UnderApprox, ctx_sens: CtxSensKind::Insensitive, field_sensitive: true });
        }
        if lower == "combined" {
            return Ok(AAConfig { impl_kind: ImplKind::Combined, ctx_sens: CtxSensKind::Insensitive, field_sensitive: true });
        }
        let adapter = match lower.as_str() {
            "dyck" => Some(AdapterKind::Dyck),
            "cfl-anders" => Some(AdapterKind::CflAnders),
            "cfl-steens" => Some(AdapterKind::CflSteens),
            "sea-dsa" => Some(AdapterKind::SeaDsa),
            "alloc-heuristic" => Some(AdapterKind::AllocHeuristic),
            _ => None,
        };
        if let Some(a) = adapter {
            return Ok(AAConfig { impl_kind: ImplKind::Adapter(a), ctx_sens: CtxSensKind::Insensitive, field_sensitive: true });
        }

        Err(PtaError::Config(format!("unrecognized alias-analysis selector: {selector:?}")))
    }
}

fn parse_cfa_suffix(rest: &str) -> Result<u32, PtaError> {
    let digits = rest.strip_suffix("cfa").ok_or_else(|| PtaError::Config(format!("expected a '<k>cfa' suffix, got {rest:?}")))?;
    digits.parse::<u32>().map_err(|_| PtaError::Config(format!("invalid context-sensitivity depth: {digits:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sparrow_aa_1cfa() {
        let cfg = AAConfig::parse("sparrow-aa-1cfa").unwrap();
        assert_eq!(cfg.impl_kind, ImplKind::Tpa);
        matches!(cfg.ctx_sens, CtxSensKind::KCallSite(1));
    }

    #[test]
    fn parses_tpa_2cfa_case_insensitively() {
        let cfg = AAConfig::parse("TPA-2CFA").unwrap();
        assert_eq!(cfg.impl_kind, ImplKind::Tpa);
        matches!(cfg.ctx_sens, CtxSensKind::KCallSite(2));
    }

    #[test]
    fn parses_dyck_adapter() {
        let cfg = AAConfig::parse("dyck").unwrap();
        assert_eq!(cfg.impl_kind, ImplKind::Adapter(AdapterKind::Dyck));
    }

    #[test]
    fn rejects_unknown_selector() {
        assert!(AAConfig::parse("not-a-real-backend").is_err());
    }

    #[test]
    fn rejects_malformed_cfa_suffix() {
        assert!(AAConfig::parse("tpa-xcfa").is_err());
    }
}
