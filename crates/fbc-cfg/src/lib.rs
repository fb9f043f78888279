//! Control-flow graph construction, AST-to-IL lowering, CFG emission,
//! and whole-program codegen orchestration.
//!
//! `builder` turns a statement list into a [`cfg::ControlFlowGraph`] in
//! one pass (§4.G). `ast_emitter` lowers expressions and straight-line
//! statements to IL (§4.H). `cfg_emitter` walks a built CFG and
//! synthesizes terminators from its typed edges (§4.I). `codegen` ties
//! all three together for a whole [`fbc_ast::Program`] (§4.J).

pub mod ast_emitter;
pub mod builder;
pub mod cfg;
pub mod cfg_emitter;
pub mod codegen;
pub mod error;

pub use ast_emitter::AstEmitter;
pub use builder::{build_cfg, build_program_cfg};
pub use cfg::{Block, BlockId, ControlFlowGraph, Edge, EdgeKind, ForLoopInfo, OnGotoDispatch, ProgramCfg};
pub use cfg_emitter::{CfgEmitter, GOSUB_SP_LABEL, GOSUB_STACK_CAPACITY, GOSUB_STACK_LABEL};
pub use codegen::generate;
pub use error::{CfgError, CfgResult};
