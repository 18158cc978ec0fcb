//! Precise GVFA engine: full per-value source and sink identity sets,
//! computed the same way as `fast.rs`'s forward pass but applied to both
//! directions -- the cost this engine pays for answering
//! `backward_reachable_all_sinks` with exact sink identities instead of a
//! count.

use std::collections::{BTreeMap as Map, VecDeque};

use roaring::RoaringBitmap;

use crate::ir::ValueId;
use crate::vfg::Vfg;

use super::{SinkId, SinkSet, SourceId, SourceSet};

pub struct PreciseEngine {
    all_forward: Map<ValueId, RoaringBitmap>,
    all_backward: Map<ValueId, RoaringBitmap>,
}

impl PreciseEngine {
    /// `reachable(v, mask)`-equivalent exact check: is `src` specifically
    /// among the sources that reach `v`.
    pub fn reachable_from(&self, v: ValueId, src: SourceId) -> bool {
        self.all_forward.get(&v).map(|b| b.contains(src.0)).unwrap_or(false)
    }

    pub fn all_forward_sources(&self, v: ValueId) -> Vec<SourceId> {
        self.all_forward.get(&v).map(|b| b.iter().map(SourceId).collect()).unwrap_or_default()
    }

    /// Every sink this value can reach, by identity.
    pub fn backward_reachable_all_sinks(&self, v: ValueId) -> Vec<SinkId> {
        self.all_backward.get(&v).map(|b| b.iter().map(SinkId).collect()).unwrap_or_default()
    }
}

fn bitmask_bfs(vfg: &Vfg, seeds: &[(ValueId, u32)], successors: impl Fn(&Vfg, ValueId) -> Vec<ValueId>) -> Map<ValueId, RoaringBitmap> {
    let mut sets: Map<ValueId, RoaringBitmap> = Map::new();
    let mut worklist: VecDeque<ValueId> = VecDeque::new();

    for &(v, id) in seeds {
        let bits = sets.entry(v).or_default();
        if bits.insert(id) {
            worklist.push_back(v);
        }
    }

    while let Some(v) = worklist.pop_front() {
        let bits = sets.get(&v).cloned().unwrap_or_default();
        for succ in successors(vfg, v) {
            let entry = sets.entry(succ).or_default();
            let before = entry.len();
            *entry |= &bits;
            if entry.len() != before {
                worklist.push_back(succ);
            }
        }
    }

    sets
}

/// Builds both full-identity passes over `vfg` from source-extended
/// `sources` and `sinks`.
pub fn build(vfg: &Vfg, sources: &SourceSet, sinks: &SinkSet) -> PreciseEngine {
    let src_seeds: Vec<(ValueId, u32)> = sources.values.iter().enumerate().map(|(i, &v)| (v, i as u32)).collect();
    let sink_seeds: Vec<(ValueId, u32)> = sinks.values.iter().enumerate().map(|(i, &v)| (v, i as u32)).collect();

    let all_forward = bitmask_bfs(vfg, &src_seeds, |g, v| g.all_successors(v));
    let all_backward = bitmask_bfs(vfg, &sink_seeds, |g, v| g.all_predecessors(v));

    PreciseEngine { all_forward, all_backward }
}
