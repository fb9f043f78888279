//! The internal BASIC AST facade consumed by the CFG Builder and AST
//! Emitter. Not a parser — this is the tagged-sum data shape an
//! external semantic analyzer is assumed to have already produced
//! (name resolution, type resolution, UDT/class layout are all done by
//! the time a [`program::Program`] exists).

pub mod expr;
pub mod program;
pub mod stmt;

pub use expr::{BinOp, Expr, Literal, TypedLiteral, UnaryOp};
pub use program::{DataValue, FunctionDef, FunctionKind, Param, Program};
pub use stmt::{Assignment, AssignTarget, DimDecl, DimKind, InputTarget, PrintItem, PrintSeparator, PrintStmt, Stmt};

#[cfg(test)]
mod tests {
    use super::*;
    use fbc_types::BaseType;

    #[test]
    fn point_udt_dim_and_field_assignment_shape() {
        let mut program = Program::new();
        program.udts.push((
            "POINT".to_string(),
            vec![
                ("X".to_string(), BaseType::Int { signed: true }),
                ("Y".to_string(), BaseType::Int { signed: true }),
            ],
        ));
        program.main.push(Stmt::Dim(DimDecl {
            name: "P".to_string(),
            kind: DimKind::Scalar { ty: BaseType::UserDefined("POINT".to_string()), initializer: None },
        }));
        program.main.push(Stmt::Let(Assignment {
            target: AssignTarget::MemberChain { base: Expr::var("P"), chain: vec!["X".to_string()] },
            value: Expr::int(10),
        }));
        program.main.push(Stmt::Print(PrintStmt {
            items: vec![PrintItem {
                expr: Expr::binary(
                    BinOp::Add,
                    Expr::Unary { op: UnaryOp::Plus, operand: Box::new(Expr::var("dummy")) },
                    Expr::int(20),
                ),
                separator: PrintSeparator::None,
            }],
            trailing_newline: true,
        }));
        assert_eq!(program.udts.len(), 1);
        assert_eq!(program.main.len(), 3);
    }
}
