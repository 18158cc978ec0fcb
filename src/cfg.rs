//! Semi-sparse CFG: one node per pointer-relevant instruction, with
//! control, def-use and RPO-priority edges.
//!
//! Successor/predecessor edge maps are built by walking basic blocks, one
//! node per pointer-relevant instruction rather than per instruction, with
//! control edges bridged across blocks that contain no pointer-relevant
//! instruction at all.

use std::collections::{BTreeMap as Map, BTreeSet as Set, VecDeque};

use crate::ir::{BasicBlock, BbId, Function, InstKind, Instruction, ValueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone)]
pub enum CfgNodeKind {
    Entry,
    Alloc { dst: ValueId, ty: crate::ir::TypeRef, is_heap: bool },
    Copy { dst: ValueId, srcs: Vec<ValueId> },
    Offset { dst: ValueId, src: ValueId, byte_delta: i64, array_like: bool },
    Load { dst: ValueId, src: ValueId },
    Store { ptr: ValueId, val: ValueId },
    Call { result: Option<ValueId>, callee: Option<crate::ir::FuncId>, callee_ptr: Option<ValueId>, args: Vec<ValueId> },
    Ret { val: Option<ValueId> },
    /// Pointer-typed fallback for instructions the core can't model
    /// precisely (`landingpad`/`extractvalue`/`extractelement`/
    /// `shufflevector`, or any other unsupported instruction in a
    /// pointer-producing context): unconditionally assigns Universal.
    UniversalAssign { dst: ValueId },
}

impl CfgNodeKind {
    pub fn defined_value(&self) -> Option<ValueId> {
        match self {
            CfgNodeKind::Entry | CfgNodeKind::Store { .. } | CfgNodeKind::Ret { .. } => None,
            CfgNodeKind::Alloc { dst, .. }
            | CfgNodeKind::Copy { dst, .. }
            | CfgNodeKind::Offset { dst, .. }
            | CfgNodeKind::Load { dst, .. }
            | CfgNodeKind::UniversalAssign { dst } => Some(*dst),
            CfgNodeKind::Call { result, .. } => *result,
        }
    }

    pub fn used_values(&self) -> Vec<ValueId> {
        match self {
            CfgNodeKind::Entry | CfgNodeKind::Alloc { .. } | CfgNodeKind::UniversalAssign { .. } => vec![],
            CfgNodeKind::Copy { srcs, .. } => srcs.clone(),
            CfgNodeKind::Offset { src, .. } => vec![*src],
            CfgNodeKind::Load { src, .. } => vec![*src],
            CfgNodeKind::Store { ptr, val } => vec![*ptr, *val],
            CfgNodeKind::Call { callee_ptr, args, .. } => {
                let mut v = args.clone();
                if let Some(p) = callee_ptr {
                    v.push(*p);
                }
                v
            }
            CfgNodeKind::Ret { val } => val.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CfgNode {
    pub kind: CfgNodeKind,
    pub block: BbId,
    pub index_in_block: usize,
    pub rpo: u32,
}

/// A per-function directed graph of pointer-relevant nodes.
pub struct Cfg {
    pub entry: NodeId,
    nodes: Vec<CfgNode>,
    control_succ: Map<NodeId, Set<NodeId>>,
    control_pred: Map<NodeId, Set<NodeId>>,
    def_use_succ: Map<ValueId, Set<NodeId>>,
    def_site: Map<ValueId, NodeId>,
}

impl Cfg {
    pub fn node(&self, id: NodeId) -> &CfgNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn control_successors(&self, n: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.control_succ.get(&n).into_iter().flatten().copied()
    }

    pub fn control_predecessors(&self, n: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.control_pred.get(&n).into_iter().flatten().copied()
    }

    /// Nodes that use `v`, for intra-procedural def-use successor
    /// propagation.
    pub fn uses_of(&self, v: ValueId) -> impl Iterator<Item = NodeId> + '_ {
        self.def_use_succ.get(&v).into_iter().flatten().copied()
    }

    pub fn def_site_of(&self, v: ValueId) -> Option<NodeId> {
        self.def_site.get(&v).copied()
    }

    /// Build the semi-sparse CFG for `f`. Constant-offset GEPs have already
    /// been reduced to `Offset { array_like: false }` by the front end;
    /// non-reducible ones arrive as `array_like: true`.
    pub fn build<F: Function>(f: &F) -> Cfg {
        let mut nodes = Vec::new();
        let mut def_site = Map::new();

        nodes.push(CfgNode { kind: CfgNodeKind::Entry, block: f.entry(), index_in_block: 0, rpo: 0 });
        let entry_id = NodeId(0);

        // block -> node ids in that block, in instruction order (Entry's
        // block also receives its function's entry-block instructions).
        let mut nodes_in_block: Map<BbId, Vec<NodeId>> = Map::new();
        nodes_in_block.entry(f.entry()).or_default().push(entry_id);

        for block in f.blocks() {
            for (idx, inst) in block.instructions().enumerate() {
                if let Some(kind) = translate(inst) {
                    if let Some(dst) = kind.defined_value() {
                        def_site.insert(dst, NodeId(nodes.len() as u32));
                    }
                    let id = NodeId(nodes.len() as u32);
                    nodes.push(CfgNode { kind, block: block.id(), index_in_block: idx, rpo: 0 });
                    nodes_in_block.entry(block.id()).or_default().push(id);
                }
            }
            nodes_in_block.entry(block.id()).or_default();
        }

        // Intra-block control chain.
        let mut control_succ: Map<NodeId, Set<NodeId>> = Map::new();
        let mut control_pred: Map<NodeId, Set<NodeId>> = Map::new();
        for ids in nodes_in_block.values() {
            for pair in ids.windows(2) {
                add_edge(&mut control_succ, &mut control_pred, pair[0], pair[1]);
            }
        }

        // Bridge inter-block control edges across blocks with no
        // pointer-relevant instructions.
        let block_succs: Map<BbId, Vec<BbId>> = f.blocks().map(|b| (b.id(), b.successors())).collect();
        let first_relevant_reachable = |start_blocks: &[BbId]| -> Set<NodeId> {
            let mut found = Set::new();
            let mut visited: Set<BbId> = Set::new();
            let mut queue: VecDeque<BbId> = start_blocks.iter().copied().collect();
            while let Some(b) = queue.pop_front() {
                if !visited.insert(b) {
                    continue;
                }
                match nodes_in_block.get(&b) {
                    Some(ids) if !ids.is_empty() => {
                        found.insert(ids[0]);
                    }
                    _ => {
                        for succ in block_succs.get(&b).into_iter().flatten() {
                            queue.push_back(*succ);
                        }
                    }
                }
            }
            found
        };

        for (block, ids) in &nodes_in_block {
            let Some(&last) = ids.last() else { continue };
            let succs = block_succs.get(block).cloned().unwrap_or_default();
            for target in first_relevant_reachable(&succs) {
                add_edge(&mut control_succ, &mut control_pred, last, target);
            }
        }

        // Def-use edges.
        let mut def_use_succ: Map<ValueId, Set<NodeId>> = Map::new();
        for (i, node) in nodes.iter().enumerate() {
            for used in node.kind.used_values() {
                def_use_succ.entry(used).or_default().insert(NodeId(i as u32));
            }
        }

        let mut cfg = Cfg { entry: entry_id, nodes, control_succ, control_pred, def_use_succ, def_site };
        cfg.assign_rpo();
        cfg
    }

    fn assign_rpo(&mut self) {
        let mut visited = Set::new();
        let mut postorder = Vec::new();
        let mut stack = vec![(self.entry, false)];
        while let Some((n, expanded)) = stack.pop() {
            if expanded {
                postorder.push(n);
                continue;
            }
            if !visited.insert(n) {
                continue;
            }
            stack.push((n, true));
            for succ in self.control_successors(n).collect::<Vec<_>>() {
                if !visited.contains(&succ) {
                    stack.push((succ, false));
                }
            }
        }
        for (priority, &n) in postorder.iter().rev().enumerate() {
            self.nodes[n.0 as usize].rpo = priority as u32;
        }
        // Unreachable nodes (dead code in the source function) still need a
        // priority; give them one past the reachable range so the worklist
        // processes them last, deterministically.
        let base = postorder.len() as u32;
        for (i, node) in self.nodes.iter_mut().enumerate() {
            if !postorder.contains(&NodeId(i as u32)) {
                node.rpo = base + i as u32;
            }
        }
    }
}

fn add_edge(succ: &mut Map<NodeId, Set<NodeId>>, pred: &mut Map<NodeId, Set<NodeId>>, from: NodeId, to: NodeId) {
    succ.entry(from).or_default().insert(to);
    pred.entry(to).or_default().insert(from);
}

fn translate<I: Instruction>(inst: &I) -> Option<CfgNodeKind> {
    match inst.kind() {
        InstKind::Alloca { result, allocated_ty, is_heap } => {
            Some(CfgNodeKind::Alloc { dst: result, ty: allocated_ty, is_heap })
        }
        InstKind::Load { result, ptr } => Some(CfgNodeKind::Load { dst: result, src: ptr }),
        InstKind::Store { ptr, val } => Some(CfgNodeKind::Store { ptr, val }),
        InstKind::Gep { result, base, byte_delta, array_like } => {
            Some(CfgNodeKind::Offset { dst: result, src: base, byte_delta, array_like })
        }
        InstKind::BitCast { result, src } | InstKind::AddrSpaceCast { result, src } => {
            Some(CfgNodeKind::Copy { dst: result, srcs: vec![src] })
        }
        InstKind::IntToPtr { result, .. } => {
            // Normalized to Undef at the pointer-identity level; at the CFG
            // level this is simply a Universal-valued def.
            Some(CfgNodeKind::UniversalAssign { dst: result })
        }
        InstKind::PtrToInt { .. } => None,
        InstKind::Phi { result, incoming } => Some(CfgNodeKind::Copy { dst: result, srcs: incoming }),
        InstKind::Select { result, true_val, false_val } => {
            Some(CfgNodeKind::Copy { dst: result, srcs: vec![true_val, false_val] })
        }
        InstKind::Call { result, callee, callee_ptr, args } => {
            Some(CfgNodeKind::Call { result, callee, callee_ptr, args })
        }
        InstKind::Return { val } => Some(CfgNodeKind::Ret { val }),
        InstKind::ExtractFallback { result } => Some(CfgNodeKind::UniversalAssign { dst: result }),
        InstKind::InsertValue { result, aggregate, inserted } => {
            Some(CfgNodeKind::Copy { dst: result, srcs: vec![aggregate, inserted] })
        }
        InstKind::Unreachable => None,
        InstKind::Other => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::InstKind;
    use crate::testkit::{FunctionBuilder, TY_INT, TY_PTR};

    #[test]
    fn bridges_control_edges_across_empty_blocks() {
        // entry(alloc) -> empty -> load
        let mut fb = FunctionBuilder::new(crate::ir::FuncId(0), "f");
        fb.push(
            InstKind::Alloca { result: ValueId(0), allocated_ty: TY_INT, is_heap: false },
            Some(TY_PTR),
        );
        let func = fb.finish();
        let cfg = Cfg::build(&func);
        // single block, single alloc node after Entry.
        assert_eq!(cfg.node_count(), 2);
        let alloc_node = NodeId(1);
        assert!(cfg.control_successors(cfg.entry).any(|n| n == alloc_node));
    }

    #[test]
    fn rpo_orders_entry_first() {
        let mut fb = FunctionBuilder::new(crate::ir::FuncId(0), "f");
        fb.push(InstKind::Alloca { result: ValueId(0), allocated_ty: TY_INT, is_heap: false }, Some(TY_PTR));
        fb.push(InstKind::Load { result: ValueId(1), ptr: ValueId(0) }, Some(TY_INT));
        let func = fb.finish();
        let cfg = Cfg::build(&func);
        assert_eq!(cfg.node(cfg.entry).rpo, 0);
        for id in cfg.node_ids() {
            if id != cfg.entry {
                assert!(cfg.node(id).rpo >= cfg.node(cfg.entry).rpo);
            }
        }
    }
}
