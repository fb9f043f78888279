//! Top-level program shape: main statement list, function/sub/DEF FN
//! definitions, UDT declarations, and DATA values.

use fbc_types::BaseType;

use crate::stmt::Stmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FunctionKind {
    Function,
    Sub,
    DefFn,
    Method,
    Constructor,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: BaseType,
    /// SHARED parameters are promoted to the caller's frame for
    /// reference semantics (§4.E).
    pub shared: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub kind: FunctionKind,
    /// Set for `Method`/`Constructor` kinds.
    pub owning_class: Option<String>,
    pub params: Vec<Param>,
    /// `None` for `Sub`.
    pub return_type: Option<BaseType>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum DataValue {
    Int(i64),
    Double(f64),
    Str(String),
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Program {
    pub main: Vec<Stmt>,
    pub functions: Vec<FunctionDef>,
    pub udts: Vec<(String, Vec<(String, BaseType)>)>,
    pub data_values: Vec<DataValue>,
    /// Names resolved against the plugin registry rather than as
    /// user-defined functions. Case-insensitive at the call site.
    pub plugin_functions: Vec<String>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }
}
