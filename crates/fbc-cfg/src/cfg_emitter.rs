//! Lowers a single function's [`ControlFlowGraph`] to IL text: entry-block
//! hoisting, per-block statement emission via the AST Emitter, and
//! terminator synthesis from each block's typed out-edges.
//!
//! Block order is ascending `BlockId`, which is also construction order
//! (unreachable blocks are emitted in place, never pruned or reordered).

use rustc_hash::FxHashSet;

use fbc_ast::{AssignTarget, Assignment, BinOp, DimKind, Expr, FunctionDef, FunctionKind, Literal, Stmt};
use fbc_il::{IlBuilder, Param as IlParam, RuntimeLibrary, SymbolMapper};
use fbc_types::BaseType;

use crate::ast_emitter::AstEmitter;
use crate::cfg::{array_bounds_buffer_name, for_limit_name, for_step_name, Block, BlockId, ControlFlowGraph, Edge, EdgeKind, ForLoopInfo};
use crate::error::{CfgError, CfgResult};

/// Global GOSUB/RETURN-stack layout, shared between this module's call/
/// return sites and the top-level codegen that lays out the backing
/// storage. A fixed-depth ring would overflow silently; this caps depth
/// instead, matching the original's bounded GOSUB nesting limit.
pub const GOSUB_STACK_LABEL: &str = "gosub_stack";
pub const GOSUB_SP_LABEL: &str = "gosub_sp";
pub const GOSUB_STACK_CAPACITY: usize = 256;

#[derive(Debug, Default)]
pub struct CfgEmitter {
    runtime: RuntimeLibrary,
}

impl CfgEmitter {
    pub fn new() -> Self {
        CfgEmitter::default()
    }

    /// Emit `main` (when `func` is `None`) or a FUNCTION/SUB/DEF FN/
    /// METHOD/CONSTRUCTOR body (when `Some`). `ast` and `b` are reset by
    /// the caller between functions; this only appends.
    pub fn emit_function(
        &mut self,
        ast: &mut AstEmitter,
        b: &mut IlBuilder,
        cfg: &ControlFlowGraph,
        func: Option<&FunctionDef>,
    ) -> CfgResult<()> {
        let is_main = func.is_none();

        let mangled_name = match func {
            None => "main".to_string(),
            Some(f) => match (&f.kind, &f.owning_class) {
                (FunctionKind::Sub, _) => ast.symbols.mangle_sub(&f.name),
                (FunctionKind::DefFn, _) => ast.symbols.mangle_deffn(&f.name),
                (FunctionKind::Function, _) => ast.symbols.mangle_function(&f.name),
                (FunctionKind::Method, Some(class)) | (FunctionKind::Constructor, Some(class)) => {
                    ast.symbols.mangle_function(&format!("{class}_{}", f.name))
                }
                (FunctionKind::Method, None) | (FunctionKind::Constructor, None) => {
                    ast.symbols.mangle_function(&f.name)
                }
            },
        };

        let ret_code = match func {
            None => "w",
            Some(f) => f.return_type.as_ref().map(|t| t.il_code()).unwrap_or(""),
        };

        let mut il_params = Vec::new();
        let mut param_specs: Vec<(String, String, BaseType)> = Vec::new();
        if let Some(f) = func {
            if let Some(class) = &f.owning_class {
                let il_name = "%me".to_string();
                il_params.push(IlParam { name: il_name.clone(), ty: "l" });
                param_specs.push(("ME".to_string(), il_name, BaseType::ClassInstance(class.clone())));
            }
            for p in &f.params {
                let il_name = ast.symbols.mangle_variable(&p.name, p.shared);
                il_params.push(IlParam { name: il_name.clone(), ty: p.ty.il_code() });
                param_specs.push((p.name.clone(), il_name, p.ty.clone()));
            }
            let param_names: Vec<String> = f.params.iter().map(|p| p.name.clone()).collect();
            ast.symbols.enter_function_scope(&f.name, &param_names);
        }

        b.emit_function_start(&mangled_name, ret_code, &il_params);

        for (index, block) in cfg.blocks.iter().enumerate() {
            b.emit_label(&SymbolMapper::block_label(block.id.0));
            if index == 0 {
                self.emit_prologue(ast, b, cfg, func, is_main, &param_specs)?;
            }
            for stmt in &block.statements {
                ast.emit_stmt(b, stmt)?;
            }
            self.emit_terminator(ast, b, cfg, block, is_main)?;
        }

        b.emit_function_end();
        if func.is_some() {
            let _ = ast.symbols.exit_function_scope();
        }
        Ok(())
    }

    fn emit_prologue(
        &mut self,
        ast: &mut AstEmitter,
        b: &mut IlBuilder,
        cfg: &ControlFlowGraph,
        func: Option<&FunctionDef>,
        is_main: bool,
        param_specs: &[(String, String, BaseType)],
    ) -> CfgResult<()> {
        if is_main {
            self.runtime.emit_samm_init(b);
        }
        self.runtime.emit_samm_enter_scope(b);

        for (basic_name, il_name, ty) in param_specs {
            let slot = b.emit_alloc(alloc_align(ty), alloc_size(ty));
            typed_store(b, il_name, &slot, ty);
            ast.register_local(basic_name.clone(), slot, ty.clone());
        }

        if let Some(f) = func {
            if let Some(ret_ty) = &f.return_type {
                let slot = b.emit_alloc(alloc_align(ret_ty), alloc_size(ret_ty));
                if *ret_ty == BaseType::Str {
                    b.emit_store("storel", "0", &slot);
                }
                ast.register_local("__return", slot, ret_ty.clone());
            }
        }

        // Every scalar/class-instance DIM in the function, hoisted here
        // with its declared type so no `alloc` is ever emitted outside
        // this block — the DIM statement itself only stores an
        // initializer into the slot allocated here.
        for (name, ty, is_class_instance) in scan_dim_locals(cfg) {
            if ast.has_local(&name) {
                continue;
            }
            let slot = b.emit_alloc(alloc_align(&ty), alloc_size(&ty));
            if is_class_instance || ty == BaseType::Str {
                typed_store(b, "0", &slot, &ty);
            }
            ast.register_local(name, slot, ty);
        }

        // One bounds buffer per DIM'd array — one word per dimension,
        // populated at the DIM site and consulted again by bounds-checked
        // element access.
        for (name, dims) in scan_array_dims(cfg) {
            let buf_name = array_bounds_buffer_name(&name);
            if ast.has_local(&buf_name) {
                continue;
            }
            let slot = b.emit_alloc(4, (dims as u64) * 4);
            ast.register_local(buf_name, slot, BaseType::Int { signed: true });
        }

        // Every local the function touches, determined by scanning its
        // own CFG rather than a separate semantic symbol table (this
        // crate is never handed one as input). Variables that are DIMed
        // are excluded here since they were already hoisted above with
        // their declared type.
        for name in scan_implicit_locals(cfg) {
            if ast.has_local(&name) {
                continue;
            }
            let ty = infer_suffix_type(&name);
            let slot = b.emit_alloc(alloc_align(&ty), alloc_size(&ty));
            if ty == BaseType::Str {
                b.emit_store("storel", "0", &slot);
            }
            ast.register_local(name, slot, ty);
        }

        // FOR-loop limit/step storage, allocated up front for every loop
        // in the function rather than inside the loop itself — the loop
        // variable's own slot (hoisted above) decides their type.
        for var in scan_for_loop_vars(cfg) {
            let ty = ast.local_ty(&var).unwrap_or(BaseType::Int { signed: true });
            let limit_name = for_limit_name(&var);
            if !ast.has_local(&limit_name) {
                let slot = b.emit_alloc(alloc_align(&ty), alloc_size(&ty));
                ast.register_local(limit_name, slot, ty.clone());
            }
            let step_name = for_step_name(&var);
            if !ast.has_local(&step_name) {
                let slot = b.emit_alloc(alloc_align(&ty), alloc_size(&ty));
                ast.register_local(step_name, slot, ty);
            }
        }

        Ok(())
    }

    fn emit_terminator(
        &mut self,
        ast: &mut AstEmitter,
        b: &mut IlBuilder,
        cfg: &ControlFlowGraph,
        block: &Block,
        is_main: bool,
    ) -> CfgResult<()> {
        if block.successors.is_empty() {
            return self.emit_exit(ast, b, is_main);
        }
        if let Some(call_edge) = block.edge_of_kind(EdgeKind::Call).copied() {
            return self.emit_gosub_call(b, block, call_edge);
        }
        if block.has_edge_kind(EdgeKind::Return) {
            return self.emit_gosub_return(ast, b, cfg);
        }
        if let Some(dispatch) = &block.on_goto {
            return self.emit_on_goto(ast, b, dispatch);
        }
        let true_edge = block.edge_of_kind(EdgeKind::ConditionalTrue).copied();
        let false_edge = block.edge_of_kind(EdgeKind::ConditionalFalse).copied();
        if let (Some(t), Some(f)) = (true_edge, false_edge) {
            return self.emit_conditional(ast, b, block, t.target, f.target);
        }
        if let Some(edge) = block.successors.first() {
            b.emit_jump(&SymbolMapper::block_label(edge.target.0));
        }
        Ok(())
    }

    fn emit_exit(&mut self, ast: &mut AstEmitter, b: &mut IlBuilder, is_main: bool) -> CfgResult<()> {
        if is_main {
            self.runtime.emit_samm_exit_scope(b);
            self.runtime.emit_samm_shutdown(b);
            b.emit_return(Some("0"));
            return Ok(());
        }

        let loaded = ast.load_return_slot(b);
        if let Some((val, ty)) = &loaded {
            if matches!(ty, BaseType::Str | BaseType::ClassInstance(_)) {
                self.runtime.emit_samm_retain_parent(b, val);
            }
        }
        self.runtime.emit_samm_exit_scope(b);
        match loaded {
            Some((val, _)) => b.emit_return(Some(&val)),
            None => b.emit_return(None),
        }
        Ok(())
    }

    /// GOSUB site: push the block following this one (the return point)
    /// onto the global return stack, then jump to the subroutine's entry.
    fn emit_gosub_call(&mut self, b: &mut IlBuilder, block: &Block, call_edge: Edge) -> CfgResult<()> {
        let return_edge = block
            .edge_of_kind(EdgeKind::Fallthrough)
            .or_else(|| block.edge_of_kind(EdgeKind::Jump))
            .ok_or_else(|| {
                CfgError::CacheMiss(format!("GOSUB block {} has a CALL edge but no return-point edge", block.id))
            })?;
        let target_id = return_edge.target.0;

        let sp = b.emit_load("w", "loadw", &format!("${GOSUB_SP_LABEL}"));
        let addr = gosub_slot_address(b, &sp);
        b.emit_store("storew", &target_id.to_string(), &addr);
        let new_sp = b.emit_binary("w", "add", &sp, "1");
        b.emit_store("storew", &new_sp, &format!("${GOSUB_SP_LABEL}"));

        b.emit_jump(&SymbolMapper::block_label(call_edge.target.0));
        Ok(())
    }

    /// Bare RETURN: pop the global stack and dispatch to whichever GOSUB
    /// site's return point it names. A popped id matching none of this
    /// program's known return points means the stack is corrupt (stray
    /// RETURN with no matching GOSUB) — report and halt.
    fn emit_gosub_return(&mut self, ast: &mut AstEmitter, b: &mut IlBuilder, cfg: &ControlFlowGraph) -> CfgResult<()> {
        let sp = b.emit_load("w", "loadw", &format!("${GOSUB_SP_LABEL}"));
        let sp_dec = b.emit_binary("w", "sub", &sp, "1");
        b.emit_store("storew", &sp_dec, &format!("${GOSUB_SP_LABEL}"));
        let addr = gosub_slot_address(b, &sp_dec);
        let popped = b.emit_load("w", "loadw", &addr);

        let mut return_blocks: Vec<BlockId> = cfg.gosub_return_blocks.iter().copied().collect();
        return_blocks.sort();
        for rb in return_blocks {
            let cmp = b.emit_compare("w", "ceq", &popped, &rb.0.to_string());
            let next = ast.symbols.mint_case_label("gosub_dispatch_next");
            b.emit_branch(&cmp, &SymbolMapper::block_label(rb.0), &next);
            b.emit_label(&next);
        }
        self.runtime.emit_runtime_error(b, 2, "gosub_stack_corrupt_msg");
        b.emit_halt();
        Ok(())
    }

    fn emit_conditional(
        &mut self,
        ast: &mut AstEmitter,
        b: &mut IlBuilder,
        block: &Block,
        true_target: BlockId,
        false_target: BlockId,
    ) -> CfgResult<()> {
        let cond_expr = if let Some(info) = &block.for_loop {
            for_condition(info)
        } else {
            block
                .condition
                .clone()
                .ok_or_else(|| CfgError::CacheMiss(format!("block {} has conditional edges but no condition", block.id)))?
        };
        let (cond_val, _) = ast.emit_expr_typed(b, &cond_expr, &BaseType::Int { signed: true })?;
        b.emit_branch(&cond_val, &SymbolMapper::block_label(true_target.0), &SymbolMapper::block_label(false_target.0));
        Ok(())
    }

    /// ON GOTO/GOSUB: a 1-based compare chain against the selector. A
    /// selector out of range falls through to a runtime diagnostic —
    /// the CFG never wires an edge for that case (see builder.rs), so
    /// there is no "next statement" block to jump to here.
    fn emit_on_goto(&mut self, ast: &mut AstEmitter, b: &mut IlBuilder, dispatch: &crate::cfg::OnGotoDispatch) -> CfgResult<()> {
        let (sel_val, _) = ast.emit_expr_typed(b, &dispatch.selector, &BaseType::Int { signed: true })?;
        for (i, target) in dispatch.targets.iter().enumerate() {
            let case_val = (i + 1).to_string();
            let cmp = b.emit_compare("w", "ceq", &sel_val, &case_val);
            let next = ast.symbols.mint_case_label("on_goto_next");
            b.emit_branch(&cmp, &SymbolMapper::block_label(target.0), &next);
            b.emit_label(&next);
        }
        self.runtime.emit_runtime_error(b, 3, "on_goto_out_of_range_msg");
        b.emit_halt();
        Ok(())
    }
}

fn gosub_slot_address(b: &mut IlBuilder, index: &str) -> String {
    let index_l = b.emit_extend("l", "extsw", index);
    let offset = b.emit_binary("l", "mul", &index_l, "4");
    b.emit_binary("l", "add", &format!("${GOSUB_STACK_LABEL}"), &offset)
}

/// The FOR header's continuation test: `var <= limit` ascending, `var >=
/// limit` descending, against the limit slot captured once at loop entry
/// rather than `info.end` re-evaluated per iteration. Direction is only
/// known here for a literal step; a non-literal step expression is
/// treated as ascending, a simplification worth revisiting if a worked
/// program needs a computed negative step.
fn for_condition(info: &ForLoopInfo) -> Expr {
    let descending = matches!(&info.step, Some(Expr::Literal(Literal::Int(n))) if *n < 0)
        || matches!(&info.step, Some(Expr::Literal(Literal::Float(f))) if *f < 0.0);
    let op = if descending { BinOp::Ge } else { BinOp::Le };
    Expr::binary(op, Expr::var(info.var.clone()), Expr::var(for_limit_name(&info.var)))
}

fn alloc_align(ty: &BaseType) -> u32 {
    match ty.intrinsic_align() {
        1 | 2 | 4 => 4,
        16 => 16,
        _ => 8,
    }
}

fn alloc_size(ty: &BaseType) -> u64 {
    ty.intrinsic_size().max(1) as u64
}

fn typed_store(b: &mut IlBuilder, value: &str, addr: &str, ty: &BaseType) {
    let op = match ty.il_code() {
        "w" => "storew",
        "l" => "storel",
        "s" => "stores",
        "d" => "stored",
        _ => "storel",
    };
    b.emit_store(op, value, addr);
}

fn infer_suffix_type(name: &str) -> BaseType {
    match name.chars().last() {
        Some('$') => BaseType::Str,
        Some('%') => BaseType::Int { signed: true },
        Some('&') => BaseType::Long { signed: true },
        Some('!') => BaseType::Single,
        Some('#') => BaseType::Double,
        _ => BaseType::Int { signed: true },
    }
}

/// Every variable this function's straight-line code assigns to or reads
/// via INPUT, minus anything it DIMs itself (those get a correctly-typed
/// slot from `scan_dim_locals` instead). FOR loop control variables are
/// included since the init block's injected `LET var = start` assumes
/// the variable already has a slot.
fn scan_implicit_locals(cfg: &ControlFlowGraph) -> Vec<String> {
    let mut implicit = Vec::new();
    let mut seen = FxHashSet::default();
    let mut dimmed = FxHashSet::default();
    // The synthetic `__for_limit_*`/`__for_step_*` assignments builder.rs
    // injects into a FOR loop's init block look like ordinary `Stmt::Let`
    // targets to this scan; excluded here so they're hoisted only by
    // `scan_for_loop_vars`, which types them off the loop variable's own
    // slot instead of guessing from the synthetic name's suffix.
    let mut synthetic = FxHashSet::default();

    for block in &cfg.blocks {
        if let Some(info) = &block.for_loop {
            if seen.insert(info.var.clone()) {
                implicit.push(info.var.clone());
            }
            synthetic.insert(for_limit_name(&info.var));
            synthetic.insert(for_step_name(&info.var));
        }
        for stmt in &block.statements {
            match stmt {
                Stmt::Dim(decl) => {
                    dimmed.insert(decl.name.clone());
                }
                Stmt::Let(Assignment { target: AssignTarget::Variable(name), .. }) => {
                    if seen.insert(name.clone()) {
                        implicit.push(name.clone());
                    }
                }
                Stmt::Input(targets) => {
                    for t in targets {
                        if seen.insert(t.variable.clone()) {
                            implicit.push(t.variable.clone());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    implicit.retain(|n| !dimmed.contains(n) && !synthetic.contains(n));
    implicit
}

/// Every scalar/class-instance DIM in the function, in first-sighting
/// order, with the flag marking class instances (which always need a
/// zeroed initial store, independent of their type's own zero-value
/// rule). Array DIMs are excluded — they go through `scan_array_dims`.
fn scan_dim_locals(cfg: &ControlFlowGraph) -> Vec<(String, BaseType, bool)> {
    let mut out = Vec::new();
    let mut seen = FxHashSet::default();
    for block in &cfg.blocks {
        for stmt in &block.statements {
            if let Stmt::Dim(decl) = stmt {
                match &decl.kind {
                    DimKind::Scalar { ty, .. } => {
                        if seen.insert(decl.name.clone()) {
                            out.push((decl.name.clone(), ty.clone(), false));
                        }
                    }
                    DimKind::ClassInstance { class_name, .. } => {
                        if seen.insert(decl.name.clone()) {
                            out.push((decl.name.clone(), BaseType::ClassInstance(class_name.clone()), true));
                        }
                    }
                    DimKind::Array { .. } => {}
                }
            }
        }
    }
    out
}

/// Every array DIM in the function, paired with its dimension count —
/// enough to size the bounds buffer hoisted for it in the prologue.
fn scan_array_dims(cfg: &ControlFlowGraph) -> Vec<(String, usize)> {
    let mut out = Vec::new();
    let mut seen = FxHashSet::default();
    for block in &cfg.blocks {
        for stmt in &block.statements {
            if let Stmt::Dim(decl) = stmt {
                if let DimKind::Array { bounds, .. } = &decl.kind {
                    if seen.insert(decl.name.clone()) {
                        out.push((decl.name.clone(), bounds.len().max(1)));
                    }
                }
            }
        }
    }
    out
}

/// Every FOR loop's control variable, in first-sighting order, so the
/// prologue can hoist one limit/step slot pair per loop ahead of time.
fn scan_for_loop_vars(cfg: &ControlFlowGraph) -> Vec<String> {
    let mut vars = Vec::new();
    let mut seen = FxHashSet::default();
    for block in &cfg.blocks {
        if let Some(info) = &block.for_loop {
            if seen.insert(info.var.clone()) {
                vars.push(info.var.clone());
            }
        }
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_cfg;
    use fbc_ast::{Expr, FunctionDef, FunctionKind, Param};
    use fbc_types::TypeManager;

    fn emit_main(main: Vec<Stmt>) -> String {
        let cfg = crate::builder::build_cfg(&main).expect("cfg builds");
        let mut ast = AstEmitter::new(TypeManager::new());
        let mut b = IlBuilder::new();
        let mut emitter = CfgEmitter::new();
        emitter.emit_function(&mut ast, &mut b, &cfg, None).expect("emits");
        b.finish()
    }

    #[test]
    fn bare_assignment_without_dim_gets_hoisted_slot() {
        let text = emit_main(vec![
            Stmt::Let(Assignment { target: AssignTarget::Variable("X".into()), value: Expr::int(5) }),
            Stmt::Print(fbc_ast::PrintStmt {
                items: vec![fbc_ast::PrintItem { expr: Expr::var("X"), separator: fbc_ast::PrintSeparator::None }],
                trailing_newline: true,
            }),
        ]);
        assert!(text.contains("alloc4 4") || text.contains("alloc8 4"));
        assert!(text.contains("export function w $main()"));
        assert!(text.contains("ret 0"));
    }

    #[test]
    fn main_exit_calls_samm_init_and_shutdown() {
        let text = emit_main(vec![Stmt::End]);
        assert!(text.contains("call $samm_init"));
        assert!(text.contains("call $samm_enter_scope"));
        assert!(text.contains("call $samm_exit_scope"));
        assert!(text.contains("call $samm_shutdown"));
    }

    #[test]
    fn function_without_owning_class_returns_loaded_value() {
        let func = FunctionDef {
            name: "Double".into(),
            kind: FunctionKind::Function,
            owning_class: None,
            params: vec![Param { name: "N".into(), ty: BaseType::Int { signed: true }, shared: false }],
            return_type: Some(BaseType::Int { signed: true }),
            body: vec![Stmt::Return(Some(Expr::binary(BinOp::Mul, Expr::var("N"), Expr::int(2))))],
        };
        let cfg = build_cfg(&func.body).expect("cfg builds");
        let mut ast = AstEmitter::new(TypeManager::new());
        let mut b = IlBuilder::new();
        let mut emitter = CfgEmitter::new();
        emitter.emit_function(&mut ast, &mut b, &cfg, Some(&func)).expect("emits");
        let text = b.finish();
        assert!(text.contains("export function w $func_Double"));
        assert!(!text.contains("ret 0"));
        assert!(text.contains("ret %t"));
    }

    #[test]
    fn gosub_site_pushes_return_point_and_jumps() {
        let text = emit_main(vec![
            Stmt::Gosub { label: "SUB1".into() },
            Stmt::Print(fbc_ast::PrintStmt { items: vec![], trailing_newline: true }),
            Stmt::Label("SUB1".into()),
            Stmt::Return(None),
        ]);
        assert!(text.contains(&format!("${GOSUB_SP_LABEL}")));
        assert!(text.contains(&format!("${GOSUB_STACK_LABEL}")));
        assert!(text.contains("call $basic_runtime_error"));
    }
}
