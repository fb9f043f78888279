//! Top-level codegen orchestration (§4.J): turns a whole [`Program`] into
//! one IL text blob — string pool, GOSUB return stack, DATA segment,
//! `main`, and every `FUNCTION`/`SUB`/`DEF FN`/`METHOD`/`CONSTRUCTOR`.
//!
//! Variable scope is entirely per-function here: nothing in [`Program`]
//! distinguishes a module-level global from a function's own locals, so
//! (aside from explicit `SHARED` parameters, tracked by the Symbol
//! Mapper but not yet backed by separate storage — no worked program
//! needs cross-function state) every local lives in its own function's
//! stack frame. `DATA`/`READ`/`RESTORE` is emitted as a flat pool with no
//! consumer, since this grammar has no `Stmt::Read`/`Stmt::Restore`.

use fbc_ast::{DataValue, Expr, Literal, Program, Stmt};
use fbc_il::IlBuilder;
use fbc_types::TypeManager;

use crate::ast_emitter::AstEmitter;
use crate::builder::build_program_cfg;
use crate::cfg::ControlFlowGraph;
use crate::cfg_emitter::{CfgEmitter, GOSUB_SP_LABEL, GOSUB_STACK_CAPACITY, GOSUB_STACK_LABEL};
use crate::error::CfgResult;

/// Compile a whole program to IL text.
pub fn generate(program: &Program) -> CfgResult<String> {
    let program_cfg = build_program_cfg(program)?;

    let mut types = TypeManager::new();
    for (name, fields) in &program.udts {
        types.define_udt(name.clone(), fields.clone());
    }

    let mut ast = AstEmitter::new(types);
    ast.set_plugin_registry(&program.plugin_functions);
    let mut b = IlBuilder::new();
    let mut emitter = CfgEmitter::new();

    b.emit_comment("compiled BASIC program");

    for value in &program.data_values {
        if let DataValue::Str(s) = value {
            b.register_string(s);
        }
    }
    collect_cfg_strings(&program_cfg.main, &mut b);
    for cfg in program_cfg.functions.values() {
        collect_cfg_strings(cfg, &mut b);
    }
    b.emit_string_pool();

    b.emit_global_data(GOSUB_STACK_LABEL, &format!("z {}", GOSUB_STACK_CAPACITY * 4));
    b.emit_global_data(GOSUB_SP_LABEL, "w 0");
    emit_data_segment(&mut b, &program.data_values);

    emitter.emit_function(&mut ast, &mut b, &program_cfg.main, None)?;

    for function in &program.functions {
        let cfg = program_cfg
            .functions
            .get(&function.name)
            .expect("build_program_cfg populates a CFG for every FunctionDef");
        ast.reset_locals();
        emitter.emit_function(&mut ast, &mut b, cfg, Some(function))?;
    }

    Ok(b.finish())
}

/// `w 0` for Int, `w 1` for Double, `w 2` for Str (pointer to its
/// already-registered string-pool label) — a type tag ahead of each
/// value so a future `READ` could dispatch on it.
fn emit_data_segment(b: &mut IlBuilder, values: &[DataValue]) {
    if values.is_empty() {
        return;
    }
    let mut parts = Vec::with_capacity(values.len() * 2);
    for value in values {
        match value {
            DataValue::Int(n) => {
                parts.push("w 0".to_string());
                parts.push(format!("w {n}"));
            }
            DataValue::Double(d) => {
                parts.push("w 1".to_string());
                parts.push(format!("d {d}"));
            }
            DataValue::Str(s) => {
                let label = b.register_string(s);
                parts.push("w 2".to_string());
                parts.push(format!("l ${label}"));
            }
        }
    }
    b.emit_global_data("data_values", &parts.join(", "));
}

fn collect_cfg_strings(cfg: &ControlFlowGraph, b: &mut IlBuilder) {
    for block in &cfg.blocks {
        for stmt in &block.statements {
            collect_stmt_strings(stmt, b);
        }
        if let Some(cond) = &block.condition {
            collect_expr_strings(cond, b);
        }
        if let Some(info) = &block.for_loop {
            collect_expr_strings(&info.end, b);
            if let Some(step) = &info.step {
                collect_expr_strings(step, b);
            }
        }
        if let Some(dispatch) = &block.on_goto {
            collect_expr_strings(&dispatch.selector, b);
        }
    }
}

/// Only the statement shapes that survive CFG flattening into
/// `Block::statements` (control-flow "shape" statements are consumed by
/// the builder and never appear there) — see `builder.rs`'s catch-all arm.
fn collect_stmt_strings(stmt: &Stmt, b: &mut IlBuilder) {
    match stmt {
        Stmt::Let(assignment) => {
            collect_assign_target_strings(&assignment.target, b);
            collect_expr_strings(&assignment.value, b);
        }
        Stmt::Print(print_stmt) => {
            for item in &print_stmt.items {
                collect_expr_strings(&item.expr, b);
            }
        }
        Stmt::Dim(decl) => match &decl.kind {
            fbc_ast::DimKind::Array { bounds, .. } => {
                for e in bounds {
                    collect_expr_strings(e, b);
                }
            }
            fbc_ast::DimKind::ClassInstance { initializer, .. } => {
                if let Some(e) = initializer {
                    collect_expr_strings(e, b);
                }
            }
            fbc_ast::DimKind::Scalar { initializer, .. } => {
                if let Some(e) = initializer {
                    collect_expr_strings(e, b);
                }
            }
        },
        Stmt::Redim { new_bounds, .. } => {
            for e in new_bounds {
                collect_expr_strings(e, b);
            }
        }
        Stmt::Return(Some(e)) => collect_expr_strings(e, b),
        Stmt::Call { args, .. } => {
            for e in args {
                collect_expr_strings(e, b);
            }
        }
        _ => {}
    }
}

fn collect_assign_target_strings(target: &fbc_ast::AssignTarget, b: &mut IlBuilder) {
    use fbc_ast::AssignTarget;
    match target {
        AssignTarget::MemberChain { base, .. } => collect_expr_strings(base, b),
        AssignTarget::ArrayElementField { indices, .. } | AssignTarget::ArrayElement { array: _, indices } => {
            for e in indices {
                collect_expr_strings(e, b);
            }
        }
        AssignTarget::SubscriptKey { object, key } => {
            collect_expr_strings(object, b);
            collect_expr_strings(key, b);
        }
        AssignTarget::MeField(_) | AssignTarget::Variable(_) => {}
    }
}

fn collect_expr_strings(expr: &Expr, b: &mut IlBuilder) {
    match expr {
        Expr::Literal(Literal::Str(s)) => {
            b.register_string(s);
        }
        Expr::Literal(_) | Expr::Me | Expr::Variable(_) => {}
        Expr::Binary { lhs, rhs, .. } => {
            collect_expr_strings(lhs, b);
            collect_expr_strings(rhs, b);
        }
        Expr::Unary { operand, .. } => collect_expr_strings(operand, b),
        Expr::ArrayAccess { indices, .. } => {
            for e in indices {
                collect_expr_strings(e, b);
            }
        }
        Expr::MemberAccess { base, .. } => collect_expr_strings(base, b),
        Expr::MethodCall { receiver, args, .. } => {
            collect_expr_strings(receiver, b);
            for e in args {
                collect_expr_strings(e, b);
            }
        }
        Expr::New { args, .. } | Expr::Super { args, .. } | Expr::Call { args, .. } => {
            for e in args {
                collect_expr_strings(e, b);
            }
        }
        Expr::Is { object, .. } => collect_expr_strings(object, b),
        Expr::Iif { cond, then_expr, else_expr } => {
            collect_expr_strings(cond, b);
            collect_expr_strings(then_expr, b);
            collect_expr_strings(else_expr, b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbc_ast::{
        Assignment, AssignTarget, FunctionDef, FunctionKind, Param, PrintItem, PrintSeparator, PrintStmt,
    };
    use fbc_types::BaseType;

    #[test]
    fn simple_assignment_print_program_compiles_to_text() {
        let mut program = Program::new();
        program.main = vec![
            Stmt::Let(Assignment { target: AssignTarget::Variable("X".into()), value: Expr::int(5) }),
            Stmt::Print(PrintStmt {
                items: vec![PrintItem { expr: Expr::var("X"), separator: PrintSeparator::None }],
                trailing_newline: true,
            }),
        ];
        let text = generate(&program).expect("generates");
        assert!(text.contains("export function w $main()"));
        assert!(text.contains("call $print_int"));
        assert!(text.contains(&format!("export data ${GOSUB_STACK_LABEL}")));
    }

    #[test]
    fn string_literals_are_pooled_once_across_main_and_functions() {
        let mut program = Program::new();
        program.main = vec![Stmt::Print(PrintStmt {
            items: vec![PrintItem { expr: Expr::str("hi"), separator: PrintSeparator::None }],
            trailing_newline: true,
        })];
        program.functions.push(FunctionDef {
            name: "Greet".into(),
            kind: FunctionKind::Sub,
            owning_class: None,
            params: vec![Param { name: "N".into(), ty: BaseType::Int { signed: true }, shared: false }],
            return_type: None,
            body: vec![Stmt::Print(PrintStmt {
                items: vec![PrintItem { expr: Expr::str("hi"), separator: PrintSeparator::None }],
                trailing_newline: true,
            })],
        });
        let text = generate(&program).expect("generates");
        assert!(text.contains("export data $str_0"));
        assert!(!text.contains("$str_1"));
        assert_eq!(text.matches("$str_0").count(), 3); // data decl + two loads
        assert!(text.contains("export function  $sub_Greet"));
    }

    #[test]
    fn data_values_emit_tagged_segment() {
        let mut program = Program::new();
        program.data_values = vec![DataValue::Int(42), DataValue::Str("a".into())];
        program.main = vec![Stmt::End];
        let text = generate(&program).expect("generates");
        assert!(text.contains("export data $data_values"));
        assert!(text.contains("w 0, w 42"));
    }
}
