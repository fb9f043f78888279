//! Control-flow graph data model: blocks, typed edges, and the
//! program-wide collection of per-function graphs.

use std::fmt;

use fbc_ast::{Expr, Stmt};
use rustc_hash::FxHashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Fallthrough,
    ConditionalTrue,
    ConditionalFalse,
    Jump,
    Call,
    Return,
    Exception,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub target: BlockId,
    pub kind: EdgeKind,
}

/// An ON-GOTO dispatch block's selector and ordered target list.
#[derive(Debug, Clone)]
pub struct OnGotoDispatch {
    pub selector: Expr,
    pub targets: Vec<BlockId>,
}

/// Carried on a FOR loop's header block. `end`/`step` are the source
/// expressions, kept only so `step`'s sign can be inspected (direction
/// of the continuation test) and so a `--trace-cfg` dump shows the
/// original bounds — the continuation test itself compares the loop
/// variable against a stack slot captured once at loop entry (see
/// `for_limit_name`/`for_step_name`), not these expressions re-evaluated
/// per iteration.
#[derive(Debug, Clone)]
pub struct ForLoopInfo {
    pub var: String,
    pub end: Expr,
    pub step: Option<Expr>,
}

/// Name of the prologue-hoisted slot holding a FOR loop's limit, captured
/// once from `end` at loop entry instead of being re-read every pass
/// through the header.
pub(crate) fn for_limit_name(var: &str) -> String {
    format!("__for_limit_{var}")
}

/// Name of the prologue-hoisted slot holding a FOR loop's step, captured
/// once at loop entry (defaulting to `1` when the source has no `STEP`).
pub(crate) fn for_step_name(var: &str) -> String {
    format!("__for_step_{var}")
}

/// Name of the prologue-hoisted bounds buffer backing a `DIM`'d array —
/// one word per dimension, populated at the `DIM` site and consulted by
/// both array allocation (`array_new_custom`) and bounds-checked element
/// access.
pub(crate) fn array_bounds_buffer_name(array: &str) -> String {
    format!("__bounds_{array}")
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub label: String,
    /// Statements owned by this block, in source order. Control-flow
    /// "shape" statements (IF/WHILE/FOR/GOSUB/RETURN/ON GOTO/TRY) are
    /// consumed by the builder and never appear here — only the
    /// straight-line statements between them do.
    pub statements: Vec<Stmt>,
    pub is_loop_header: bool,
    pub is_unreachable: bool,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<Edge>,
    /// The condition guarding a conditional block (IF test, loop
    /// continuation test). Looked up at terminator-emission time
    /// instead of being baked in during construction, per §4.I.
    pub condition: Option<Expr>,
    /// Present only on blocks whose terminator is an ON-GOTO dispatch.
    pub on_goto: Option<OnGotoDispatch>,
    /// Present only on FOR loop header blocks.
    pub for_loop: Option<ForLoopInfo>,
}

impl Block {
    fn new(id: BlockId, label: String) -> Self {
        Block {
            id,
            label,
            statements: Vec::new(),
            is_loop_header: false,
            is_unreachable: false,
            predecessors: Vec::new(),
            successors: Vec::new(),
            condition: None,
            on_goto: None,
            for_loop: None,
        }
    }

    pub fn has_edge_kind(&self, kind: EdgeKind) -> bool {
        self.successors.iter().any(|e| e.kind == kind)
    }

    pub fn edge_of_kind(&self, kind: EdgeKind) -> Option<&Edge> {
        self.successors.iter().find(|e| e.kind == kind)
    }
}

#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub blocks: Vec<Block>,
    pub entry: BlockId,
    /// Return-point blocks synthesized by GOSUB sites; consulted by the
    /// CFG Emitter when lowering a RETURN edge to sparse dispatch.
    pub gosub_return_blocks: FxHashSet<BlockId>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        let mut cfg = ControlFlowGraph { blocks: Vec::new(), entry: BlockId(0), gosub_return_blocks: FxHashSet::default() };
        let entry = cfg.new_block("entry");
        cfg.entry = entry;
        cfg
    }

    pub fn new_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(id, label.into()));
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    /// Wire an edge immediately — both the successor list of `from` and
    /// the predecessor list of `to` are updated in the same call, per
    /// §4.G's "immediate edge wiring" requirement (no deferred pass).
    pub fn add_edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) {
        self.block_mut(from).successors.push(Edge { target: to, kind });
        self.block_mut(to).predecessors.push(from);
    }

    /// Every reachable block (anything but the entry) must have at
    /// least one predecessor; conditional blocks must carry exactly one
    /// TRUE and one FALSE edge. Unreachable blocks (GOSUB landing pads
    /// reachable only via dispatch) are allowed and must not be pruned.
    pub fn validate(&self) -> bool {
        for block in &self.blocks {
            if block.id != self.entry && block.predecessors.is_empty() && !block.is_unreachable {
                return false;
            }
            let trues = block.successors.iter().filter(|e| e.kind == EdgeKind::ConditionalTrue).count();
            let falses = block.successors.iter().filter(|e| e.kind == EdgeKind::ConditionalFalse).count();
            if trues + falses > 0 && (trues != 1 || falses != 1) {
                return false;
            }
        }
        true
    }
}

impl Default for ControlFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// The main CFG plus one CFG per FUNCTION/SUB/DEF FN definition.
#[derive(Debug, Clone, Default)]
pub struct ProgramCfg {
    pub main: ControlFlowGraph,
    pub functions: rustc_hash::FxHashMap<String, ControlFlowGraph>,
}

impl ProgramCfg {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_wiring_updates_both_sides_immediately() {
        let mut cfg = ControlFlowGraph::new();
        let b1 = cfg.new_block("b1");
        cfg.add_edge(cfg.entry, b1, EdgeKind::Fallthrough);
        assert_eq!(cfg.block(cfg.entry).successors.len(), 1);
        assert_eq!(cfg.block(b1).predecessors, vec![cfg.entry]);
    }

    #[test]
    fn validate_rejects_missing_predecessor_on_reachable_block() {
        let mut cfg = ControlFlowGraph::new();
        cfg.new_block("orphan");
        assert!(!cfg.validate());
    }

    #[test]
    fn validate_allows_unreachable_gosub_landing_pad() {
        let mut cfg = ControlFlowGraph::new();
        let pad = cfg.new_block("landing_pad");
        cfg.block_mut(pad).is_unreachable = true;
        assert!(cfg.validate());
    }

    #[test]
    fn validate_requires_exactly_one_true_and_false_edge() {
        let mut cfg = ControlFlowGraph::new();
        let t = cfg.new_block("then");
        let f = cfg.new_block("else");
        cfg.add_edge(cfg.entry, t, EdgeKind::ConditionalTrue);
        cfg.add_edge(cfg.entry, f, EdgeKind::ConditionalFalse);
        assert!(cfg.validate());
    }
}
