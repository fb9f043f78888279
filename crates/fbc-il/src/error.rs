use thiserror::Error;

pub type IlResult<T> = Result<T, IlError>;

#[derive(Debug, Error)]
pub enum IlError {
    #[error("no UDT or function found: {0}")]
    UndefinedSymbol(String),

    #[error("symbol mapper has no active function scope to exit")]
    NoActiveFunctionScope,

    #[error("name '{0}' collides with an IL reserved word after mangling")]
    ReservedWordCollision(String),
}
