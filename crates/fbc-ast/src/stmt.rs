//! Statement shapes, including the eight `LET` assignment-target cases
//! from §4.H.

use fbc_types::BaseType;

use crate::expr::Expr;

/// The eight assignment-target shapes the AST Emitter dispatches on.
/// Cases 2/3 (class vs. UDT member chain) and 6/8 (UDT-to-UDT vs. plain
/// scalar) share one AST shape each — the distinction is the resolved
/// type of the base/value expression, a fact the external semantic
/// analyzer already owns.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AssignTarget {
    /// Case 1: `ME.Field = v` inside a method or constructor.
    MeField(String),
    /// Cases 2/3: `base.field1.field2... = v`, base is a class instance
    /// or a UDT.
    MemberChain { base: Expr, chain: Vec<String> },
    /// Case 4: `arr(i, j, ...).Field = v` on a UDT-element array.
    ArrayElementField { array: String, indices: Vec<Expr>, field: String },
    /// Case 5: `obj(key) = v` where `obj` is a subscriptable runtime
    /// object (registered "set" function).
    SubscriptKey { object: Expr, key: Expr },
    /// Cases 6/8: a plain variable target — either a UDT-to-UDT copy or
    /// a scalar store, depending on the value's resolved type.
    Variable(String),
    /// Case 7: `arr(i, j, ...) = v` where the element type is a UDT.
    ArrayElement { array: String, indices: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Assignment {
    pub target: AssignTarget,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PrintSeparator {
    Comma,
    Semicolon,
    None,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PrintItem {
    pub expr: Expr,
    pub separator: PrintSeparator,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PrintStmt {
    pub items: Vec<PrintItem>,
    /// False when the statement ends in `;` (suppresses the final
    /// newline).
    pub trailing_newline: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputTarget {
    pub variable: String,
    pub ty: BaseType,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum DimKind {
    Array { element_ty: BaseType, bounds: Vec<Expr> },
    ClassInstance { class_name: String, initializer: Option<Expr> },
    Scalar { ty: BaseType, initializer: Option<Expr> },
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DimDecl {
    pub name: String,
    pub kind: DimKind,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Stmt {
    Let(Assignment),
    Print(PrintStmt),
    Input(Vec<InputTarget>),
    End,
    Dim(DimDecl),
    Redim { array: String, new_bounds: Vec<Expr> },
    Erase { array: String },
    /// `RETURN expr` from a FUNCTION/METHOD, or `RETURN` (bare) from a
    /// GOSUB — distinguished by context at CFG-build time, not here.
    Return(Option<Expr>),
    Call { name: String, args: Vec<Expr> },
    If { cond: Expr, then_body: Vec<Stmt>, else_body: Option<Vec<Stmt>> },
    While { cond: Expr, body: Vec<Stmt> },
    For { var: String, start: Expr, end: Expr, step: Option<Expr>, body: Vec<Stmt> },
    Gosub { label: String },
    OnGoto { selector: Expr, labels: Vec<String> },
    Try { body: Vec<Stmt>, catch: Option<Vec<Stmt>>, finally: Option<Vec<Stmt>> },
    /// A line-number or named label marking a GOTO/GOSUB target.
    Label(String),
    Goto(String),
}
