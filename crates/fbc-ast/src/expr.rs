//! Expression shapes. This is not a parser's output type in the usual
//! sense — it's the tagged-sum shape the CFG Builder and AST Emitter
//! consume, standing in for an external semantic analyzer.

use fbc_types::BaseType;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    FloatMod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
    Eqv,
    Imp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    Plus,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Expr {
    Literal(Literal),
    /// Implicit `ME` reference inside a method/constructor body.
    Me,
    /// A plain variable reference by BASIC-level name.
    Variable(String),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    ArrayAccess {
        array: String,
        indices: Vec<Expr>,
    },
    /// `base.field`. `base` is itself an expression so member chains
    /// (`a.b.c`) nest naturally; whether `field`'s owner is a UDT or a
    /// class instance is a fact the external semantic analyzer already
    /// resolved and is not re-derived here.
    MemberAccess {
        base: Box<Expr>,
        field: String,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    New {
        class_name: String,
        args: Vec<Expr>,
    },
    /// `obj IS ClassName`, or `obj IS NOTHING` when `class_name` is `None`.
    Is {
        object: Box<Expr>,
        class_name: Option<String>,
    },
    Super {
        method: String,
        args: Vec<Expr>,
    },
    Iif {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// BASIC-level function call, resolved (by the emitter) against
    /// intrinsics, the plugin registry, then user-defined functions.
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn int(v: i64) -> Self {
        Expr::Literal(Literal::Int(v))
    }

    pub fn float(v: f64) -> Self {
        Expr::Literal(Literal::Float(v))
    }

    pub fn str(v: impl Into<String>) -> Self {
        Expr::Literal(Literal::Str(v.into()))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Variable(name.into())
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }
}

/// Recorded alongside a literal when the caller already knows what base
/// type it should be emitted as (see §4.H "numeric literal" contract:
/// literals are widened to the *expected* type, not a type intrinsic to
/// the literal itself).
#[derive(Debug, Clone, PartialEq)]
pub struct TypedLiteral {
    pub literal: Literal,
    pub expected_type: BaseType,
}
