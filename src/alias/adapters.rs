//! Adapter shells for alias backends whose algorithms are out of scope here:
//! Steensgaard/Andersen-style CFL reachability, the Dyck-CFL formulation,
//! Sea-DSA, and an allocation-site heuristic. Each shell accepts the
//! selector and always answers the conservative `MayAlias`, since only the
//! façade contract (accept the selector, answer queries) is implemented for
//! these, not the underlying algorithm.

use crate::alias::AliasResult;
use crate::alias::config::AdapterKind;

/// A shell backend: every query is conservatively `MayAlias`, every
/// points-to/alias-set query is conservatively "unknown". Exists so
/// `AAConfig::parse`'s `dyck`/`cfl-anders`/`cfl-steens`/`sea-dsa`/
/// `alloc-heuristic` selectors have somewhere to land instead of erroring.
#[derive(Debug, Clone, Copy)]
pub struct AdapterShell {
    pub kind: AdapterKind,
}

impl AdapterShell {
    pub fn new(kind: AdapterKind) -> Self {
        AdapterShell { kind }
    }

    pub fn query(&self) -> AliasResult {
        AliasResult::MayAlias
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_is_always_conservative() {
        for kind in [
            AdapterKind::Dyck,
            AdapterKind::CflAnders,
            AdapterKind::CflSteens,
            AdapterKind::SeaDsa,
            AdapterKind::AllocHeuristic,
        ] {
            assert_eq!(AdapterShell::new(kind).query(), AliasResult::MayAlias);
        }
    }
}
