use thiserror::Error;

pub type CfgResult<T> = Result<T, CfgError>;

#[derive(Debug, Error)]
pub enum CfgError {
    #[error("GOSUB target label '{0}' is never defined")]
    UndefinedLabel(String),

    #[error("block {0} referenced but does not exist in this CFG")]
    UnknownBlock(u32),

    #[error("no function named '{0}' in this program")]
    UnknownFunction(String),

    #[error("array-element address cache miss resolving '{0}'")]
    CacheMiss(String),

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("unknown field '{1}' on '{0}'")]
    UnknownField(String, String),

    #[error(transparent)]
    Types(#[from] fbc_types::UdtError),
}
