//! `FunctionContext` and `ProgramPoint`: the keys the worklist propagator,
//! call graph, and memoization table are all built around.

use std::cmp::Ordering;

use crate::cfg::NodeId;
use crate::context::{context_serial, Context};
use crate::ir::FuncId;

/// `(Function, Context)`: identifies one analysis instance of a function
/// body under k-CFA. The worklist's outer FIFO is ordered over these.
#[derive(Debug, Clone, Hash)]
pub struct FunctionContext {
    pub func: FuncId,
    pub ctx: Context,
}

impl FunctionContext {
    pub fn new(func: FuncId, ctx: Context) -> Self {
        FunctionContext { func, ctx }
    }
}

impl PartialEq for FunctionContext {
    fn eq(&self, other: &Self) -> bool {
        self.func == other.func && self.ctx == other.ctx
    }
}
impl Eq for FunctionContext {}

impl PartialOrd for FunctionContext {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for FunctionContext {
    fn cmp(&self, other: &Self) -> Ordering {
        self.func.cmp(&other.func).then_with(|| context_serial(&self.ctx).cmp(&context_serial(&other.ctx)))
    }
}

/// `(FunctionContext, CfgNode)`: a single dequeue-able unit of work, and
/// the key type for `Memo`.
#[derive(Debug, Clone, Hash)]
pub struct ProgramPoint {
    pub fc: FunctionContext,
    pub node: NodeId,
}

impl ProgramPoint {
    pub fn new(fc: FunctionContext, node: NodeId) -> Self {
        ProgramPoint { fc, node }
    }
}

impl PartialEq for ProgramPoint {
    fn eq(&self, other: &Self) -> bool {
        self.fc == other.fc && self.node == other.node
    }
}
impl Eq for ProgramPoint {}

impl PartialOrd for ProgramPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ProgramPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fc.cmp(&other.fc).then_with(|| self.node.cmp(&other.node))
    }
}
