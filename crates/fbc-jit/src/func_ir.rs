//! `FuncIr`: the trait boundary standing in for the embedded IL backend's
//! post-register-allocation function representation — blocks already in
//! reverse-postorder, instructions already assigned physical registers,
//! terminators already resolved to block targets. The collector in
//! [`crate::collector`] walks this the way the original collector walks
//! QBE's `Fn*` after regalloc and instruction selection.
//!
//! Register numbers here use the same convention the emitted [`crate::inst::JitInst`]
//! records do (0..30 GP, negative sentinels for SP/FP/LR/scratch, vector
//! registers below [`crate::inst::VREG_BASE`]) — this boundary is downstream of
//! register allocation, so there is no separate numbering to translate.

use crate::inst::{JitCls, JitCond};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncBlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    And,
    Orr,
    Eor,
    Lsl,
    Lsr,
    Asr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertOp {
    /// `is_float`: the *other* operand (not the destination) is 64-bit.
    FloatToInt { signed: bool, is_float: bool },
    IntToFloat { signed: bool, is_float: bool },
    FloatWiden,
    FloatNarrow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOp {
    SignByte,
    ZeroByte,
    SignHalf,
    ZeroHalf,
    SignWord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadWidth {
    Word,
    SignedByte,
    ZeroByte,
    SignedHalf,
    ZeroHalf,
    SignedWord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreWidth {
    Word,
    Byte,
    Half,
}

/// One instruction in a post-regalloc basic block, already lowered to the
/// AArch64 operation it represents — unlike [`crate::inst::JitInst`] this has no
/// pseudo-instruction cases and no fused forms; fusion is the collector's job.
#[derive(Debug, Clone)]
pub enum FuncInst {
    AluRrr { op: AluOp, cls: JitCls, rd: i32, rn: i32, rm: i32 },
    AluRri { op: AluOp, cls: JitCls, rd: i32, rn: i32, imm: i64 },
    Neg { cls: JitCls, rd: i32, rn: i32 },
    Mov { cls: JitCls, rd: i32, rn: i32 },
    /// A constant load whose encoding (single MOVZ, MOVZ+MOVK chain, or a
    /// logical-immediate ALU op) is decided by the collector.
    MovImm { cls: JitCls, rd: i32, value: i64 },
    FAluRrr { op: AluOp, cls: JitCls, rd: i32, rn: i32, rm: i32 },
    FNeg { cls: JitCls, rd: i32, rn: i32 },
    FMov { cls: JitCls, rd: i32, rn: i32 },
    Convert { op: ConvertOp, dest_cls: JitCls, rd: i32, rn: i32 },
    Extend { op: ExtendOp, rd: i32, rn: i32 },
    Load { width: LoadWidth, cls: JitCls, rd: i32, base: i32, offset: i64 },
    Store { width: StoreWidth, cls: JitCls, rt: i32, base: i32, offset: i64 },
    Cmp { cls: JitCls, rn: i32, rm: i32 },
    CmpImm { cls: JitCls, rn: i32, imm: i64 },
    FCmp { rn: i32, rm: i32 },
    Cset { cls: JitCls, rd: i32, cond: JitCond },
    Csel { cls: JitCls, rd: i32, rn: i32, rm: i32, cond: JitCond },
    CallExt { symbol: String, dest: Option<i32> },
    LoadAddr { rd: i32, symbol: String },
    Comment(String),
}

/// How a block ends. `CondBranch` always immediately follows a `Cmp`/`CmpImm`
/// in the block's instruction list — the collector peeks at that preceding
/// compare to decide whether CBZ/CBNZ fusion applies.
#[derive(Debug, Clone)]
pub enum FuncTerm {
    Jump(FuncBlockId),
    CondBranch { cond: JitCond, true_block: FuncBlockId, false_block: FuncBlockId },
    Return(Option<i32>),
    Unreachable,
}

#[derive(Debug, Clone)]
pub struct FuncBlock {
    pub id: FuncBlockId,
    pub insts: Vec<FuncInst>,
    pub term: FuncTerm,
}

/// The function-level facts the collector needs for `FUNC_BEGIN`/prologue
/// emission, plus its blocks already ordered for emission.
pub trait FuncIr {
    fn name(&self) -> &str;
    fn frame_size(&self) -> u64;
    /// Callee-saved GP registers this function's body clobbers, in the order
    /// they should be stacked (paired two-at-a-time for `STP`/`LDP`).
    fn callee_saved(&self) -> &[i32];
    /// Blocks in reverse-postorder — the order the assembly emitter would
    /// walk them in, which is what makes peephole fusion across adjacent
    /// instructions meaningful.
    fn blocks_rpo(&self) -> &[FuncBlock];
}

/// A plain in-memory `FuncIr`, built by a caller (or a test) rather than
/// derived from anything else — this crate has no embedded backend of its
/// own, only the trait boundary one would implement against.
#[derive(Debug, Clone)]
pub struct SimpleFunc {
    pub name: String,
    pub frame_size: u64,
    pub callee_saved: Vec<i32>,
    pub blocks: Vec<FuncBlock>,
}

impl FuncIr for SimpleFunc {
    fn name(&self) -> &str {
        &self.name
    }

    fn frame_size(&self) -> u64 {
        self.frame_size
    }

    fn callee_saved(&self) -> &[i32] {
        &self.callee_saved
    }

    fn blocks_rpo(&self) -> &[FuncBlock] {
        &self.blocks
    }
}
