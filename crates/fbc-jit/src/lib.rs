//! Flat [`JitInst`] record collector and peephole fusion for the AArch64
//! JIT backend (§4.K, §6). Takes a post-register-allocation function
//! ([`FuncIr`]) and produces a linear sequence of [`JitInst`] records ready
//! for a downstream encoder — this crate stops at the record, it does not
//! emit machine bytes.

pub mod collector;
pub mod error;
pub mod func_ir;
pub mod inst;

pub use collector::{JitCollector, JitHistogram};
pub use error::{JitError, JitResult};
pub use func_ir::{
    AluOp, ConvertOp, ExtendOp, FuncBlock, FuncBlockId, FuncInst, FuncIr, FuncTerm, LoadWidth, SimpleFunc, StoreWidth,
};
pub use inst::{
    vreg, JitCls, JitCond, JitInst, JitInstKind, JitShift, JitSymType, REG_FP, REG_IP0, REG_IP1, REG_LR, REG_NONE, REG_SP,
    SYM_MAX, VREG_BASE,
};
