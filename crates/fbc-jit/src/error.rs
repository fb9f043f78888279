use thiserror::Error;

pub type JitResult<T> = Result<T, JitError>;

#[derive(Debug, Error)]
pub enum JitError {
    #[error("jit_collect: instruction buffer growth failed after {0} instructions")]
    BufferGrowthFailed(usize),

    #[error("symbol name '{0}' exceeds the {1}-byte sym_name field")]
    SymbolTooLong(String, usize),

    #[error("branch target block {0} does not exist in this function")]
    UnknownBlock(u32),
}
