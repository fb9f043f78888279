//! Single-pass CFG construction with immediate edge wiring (§4.G).
//!
//! A label pre-pass reserves a [`BlockId`] for every `Stmt::Label`
//! occurrence (including inside nested `IF`/`WHILE`/`FOR`/`TRY` bodies)
//! before the main recursive build starts, so GOSUB/GOTO/ON-GOTO targets
//! resolve without a second edge-building pass — the legacy two-pass
//! approach this replaces is out of scope here by design.

use fbc_ast::{Assignment, AssignTarget, BinOp, Expr, FunctionDef, Program, Stmt};
use rustc_hash::FxHashMap;

use crate::cfg::{for_limit_name, for_step_name, BlockId, ControlFlowGraph, EdgeKind, ForLoopInfo, OnGotoDispatch, ProgramCfg};
use crate::error::{CfgError, CfgResult};

fn reserve_labels(stmts: &[Stmt], cfg: &mut ControlFlowGraph, labels: &mut FxHashMap<String, BlockId>) {
    for stmt in stmts {
        match stmt {
            Stmt::Label(name) => {
                let id = cfg.new_block(format!("label_{name}"));
                labels.insert(name.clone(), id);
            }
            Stmt::If { then_body, else_body, .. } => {
                reserve_labels(then_body, cfg, labels);
                if let Some(else_body) = else_body {
                    reserve_labels(else_body, cfg, labels);
                }
            }
            Stmt::While { body, .. } => reserve_labels(body, cfg, labels),
            Stmt::For { body, .. } => reserve_labels(body, cfg, labels),
            Stmt::Try { body, catch, finally } => {
                reserve_labels(body, cfg, labels);
                if let Some(catch) = catch {
                    reserve_labels(catch, cfg, labels);
                }
                if let Some(finally) = finally {
                    reserve_labels(finally, cfg, labels);
                }
            }
            _ => {}
        }
    }
}

struct CfgBuilder {
    cfg: ControlFlowGraph,
    labels: FxHashMap<String, BlockId>,
}

impl CfgBuilder {
    fn resolve_label(&self, name: &str) -> CfgResult<BlockId> {
        self.labels.get(name).copied().ok_or_else(|| CfgError::UndefinedLabel(name.to_string()))
    }

    fn build_stmts(&mut self, mut current: BlockId, stmts: &[Stmt]) -> CfgResult<BlockId> {
        for stmt in stmts {
            current = self.build_stmt(current, stmt)?;
        }
        Ok(current)
    }

    fn build_stmt(&mut self, current: BlockId, stmt: &Stmt) -> CfgResult<BlockId> {
        match stmt {
            Stmt::Label(name) => {
                let target = self.resolve_label(name)?;
                if target != current {
                    self.cfg.add_edge(current, target, EdgeKind::Fallthrough);
                }
                Ok(target)
            }

            Stmt::Goto(name) => {
                let target = self.resolve_label(name)?;
                self.cfg.add_edge(current, target, EdgeKind::Jump);
                Ok(self.dead_block(&format!("after_goto_{}", current.0)))
            }

            Stmt::Gosub { label } => {
                let entry = self.resolve_label(label)?;
                let return_point = self.cfg.new_block(format!("gosub_return_{}", current.0));
                self.cfg.add_edge(current, entry, EdgeKind::Call);
                self.cfg.add_edge(current, return_point, EdgeKind::Fallthrough);
                self.cfg.gosub_return_blocks.insert(return_point);
                Ok(return_point)
            }

            // Bare RETURN (from GOSUB). The real dispatch target is
            // resolved from `gosub_return_blocks` at CFG-Emitter time
            // (§4.I); a self-loop sentinel keeps this edge well formed
            // without pretending to know that target now.
            Stmt::Return(None) => {
                self.cfg.add_edge(current, current, EdgeKind::Return);
                Ok(self.dead_block(&format!("after_return_{}", current.0)))
            }

            Stmt::Return(Some(_)) => {
                self.cfg.block_mut(current).statements.push(stmt.clone());
                Ok(current)
            }

            Stmt::If { cond, then_body, else_body } => {
                let then_block = self.cfg.new_block(format!("if_then_{}", current.0));
                let join = self.cfg.new_block(format!("if_join_{}", current.0));
                self.cfg.block_mut(current).condition = Some(cond.clone());
                self.cfg.add_edge(current, then_block, EdgeKind::ConditionalTrue);

                match else_body {
                    Some(else_body) => {
                        let else_block = self.cfg.new_block(format!("if_else_{}", current.0));
                        self.cfg.add_edge(current, else_block, EdgeKind::ConditionalFalse);
                        let else_exit = self.build_stmts(else_block, else_body)?;
                        self.cfg.add_edge(else_exit, join, EdgeKind::Fallthrough);
                    }
                    None => {
                        self.cfg.add_edge(current, join, EdgeKind::ConditionalFalse);
                    }
                }

                let then_exit = self.build_stmts(then_block, then_body)?;
                self.cfg.add_edge(then_exit, join, EdgeKind::Fallthrough);
                Ok(join)
            }

            Stmt::While { cond, body } => {
                let header = self.cfg.new_block(format!("while_header_{}", current.0));
                let body_block = self.cfg.new_block(format!("while_body_{}", current.0));
                let exit_block = self.cfg.new_block(format!("while_exit_{}", current.0));
                self.cfg.add_edge(current, header, EdgeKind::Fallthrough);
                self.cfg.block_mut(header).is_loop_header = true;
                self.cfg.block_mut(header).condition = Some(cond.clone());
                self.cfg.add_edge(header, body_block, EdgeKind::ConditionalTrue);
                self.cfg.add_edge(header, exit_block, EdgeKind::ConditionalFalse);
                let body_exit = self.build_stmts(body_block, body)?;
                self.cfg.add_edge(body_exit, header, EdgeKind::Fallthrough);
                Ok(exit_block)
            }

            Stmt::For { var, start, end, step, body } => {
                self.cfg.block_mut(current).statements.push(Stmt::Let(Assignment {
                    target: AssignTarget::Variable(var.clone()),
                    value: start.clone(),
                }));
                // Limit and step are captured once here, into their own
                // prologue-hoisted slots, rather than re-read from `end`/
                // `step` on every pass through the header below.
                self.cfg.block_mut(current).statements.push(Stmt::Let(Assignment {
                    target: AssignTarget::Variable(for_limit_name(var)),
                    value: end.clone(),
                }));
                self.cfg.block_mut(current).statements.push(Stmt::Let(Assignment {
                    target: AssignTarget::Variable(for_step_name(var)),
                    value: step.clone().unwrap_or_else(|| Expr::int(1)),
                }));

                let header = self.cfg.new_block(format!("for_header_{}", current.0));
                let body_block = self.cfg.new_block(format!("for_body_{}", current.0));
                let increment = self.cfg.new_block(format!("for_increment_{}", current.0));
                let exit_block = self.cfg.new_block(format!("for_exit_{}", current.0));

                self.cfg.add_edge(current, header, EdgeKind::Fallthrough);
                self.cfg.block_mut(header).is_loop_header = true;
                self.cfg.block_mut(header).for_loop =
                    Some(ForLoopInfo { var: var.clone(), end: end.clone(), step: step.clone() });
                self.cfg.add_edge(header, body_block, EdgeKind::ConditionalTrue);
                self.cfg.add_edge(header, exit_block, EdgeKind::ConditionalFalse);

                let body_exit = self.build_stmts(body_block, body)?;
                self.cfg.add_edge(body_exit, increment, EdgeKind::Fallthrough);
                self.cfg.block_mut(increment).statements.push(Stmt::Let(Assignment {
                    target: AssignTarget::Variable(var.clone()),
                    value: Expr::binary(BinOp::Add, Expr::var(var.clone()), Expr::var(for_step_name(var))),
                }));
                self.cfg.add_edge(increment, header, EdgeKind::Fallthrough);
                Ok(exit_block)
            }

            Stmt::OnGoto { selector, labels } => {
                let mut targets = Vec::with_capacity(labels.len());
                for label in labels {
                    let target = self.resolve_label(label)?;
                    self.cfg.add_edge(current, target, EdgeKind::Jump);
                    targets.push(target);
                }
                self.cfg.block_mut(current).on_goto = Some(OnGotoDispatch { selector: selector.clone(), targets });
                Ok(self.dead_block(&format!("after_on_goto_{}", current.0)))
            }

            Stmt::Try { body, catch, finally } => {
                let try_block = self.cfg.new_block(format!("try_body_{}", current.0));
                let join = self.cfg.new_block(format!("try_join_{}", current.0));
                self.cfg.add_edge(current, try_block, EdgeKind::Fallthrough);
                let try_exit = self.build_stmts(try_block, body)?;
                self.cfg.add_edge(try_exit, join, EdgeKind::Fallthrough);

                if let Some(catch_body) = catch {
                    let catch_block = self.cfg.new_block(format!("catch_{}", current.0));
                    self.cfg.add_edge(try_block, catch_block, EdgeKind::Exception);
                    let catch_exit = self.build_stmts(catch_block, catch_body)?;
                    self.cfg.add_edge(catch_exit, join, EdgeKind::Fallthrough);
                }

                match finally {
                    Some(finally_body) => self.build_stmts(join, finally_body),
                    None => Ok(join),
                }
            }

            straight_line => {
                self.cfg.block_mut(current).statements.push(straight_line.clone());
                Ok(current)
            }
        }
    }

    /// A block with no predecessor, used as the building-continuation
    /// point after an unconditional-exit statement (GOTO, bare RETURN,
    /// ON GOTO) so later statements still have somewhere to attach —
    /// and are then correctly flagged unreachable.
    fn dead_block(&mut self, label: &str) -> BlockId {
        let id = self.cfg.new_block(label.to_string());
        self.cfg.block_mut(id).is_unreachable = true;
        id
    }
}

/// Build a CFG from a single function/sub/top-level statement list.
pub fn build_cfg(body: &[Stmt]) -> CfgResult<ControlFlowGraph> {
    let mut cfg = ControlFlowGraph::new();
    let mut labels = FxHashMap::default();
    reserve_labels(body, &mut cfg, &mut labels);
    let mut builder = CfgBuilder { cfg, labels };
    let entry = builder.cfg.entry;
    builder.build_stmts(entry, body)?;
    Ok(builder.cfg)
}

/// Build the main CFG plus one CFG per `FUNCTION`/`SUB`/`DEF FN`.
pub fn build_program_cfg(program: &Program) -> CfgResult<ProgramCfg> {
    let mut program_cfg = ProgramCfg::new();
    program_cfg.main = build_cfg(&program.main)?;
    for function in &program.functions {
        let cfg = build_function_cfg(function)?;
        program_cfg.functions.insert(function.name.clone(), cfg);
    }
    Ok(program_cfg)
}

fn build_function_cfg(function: &FunctionDef) -> CfgResult<ControlFlowGraph> {
    build_cfg(&function.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::EdgeKind;
    use fbc_ast::{PrintItem, PrintSeparator, PrintStmt};

    #[test]
    fn straight_line_statements_share_one_block() {
        let body = vec![
            Stmt::Let(Assignment { target: AssignTarget::Variable("X".into()), value: Expr::int(1) }),
            Stmt::Let(Assignment { target: AssignTarget::Variable("Y".into()), value: Expr::int(2) }),
        ];
        let cfg = build_cfg(&body).unwrap();
        assert_eq!(cfg.blocks.len(), 1);
        assert_eq!(cfg.block(cfg.entry).statements.len(), 2);
    }

    #[test]
    fn if_without_else_wires_false_edge_to_join() {
        let body = vec![Stmt::If {
            cond: Expr::int(1),
            then_body: vec![Stmt::End],
            else_body: None,
        }];
        let cfg = build_cfg(&body).unwrap();
        let entry = cfg.block(cfg.entry);
        assert!(entry.has_edge_kind(EdgeKind::ConditionalTrue));
        assert!(entry.has_edge_kind(EdgeKind::ConditionalFalse));
        assert!(cfg.validate());
    }

    #[test]
    fn gosub_creates_call_and_fallthrough_with_tracked_return_point() {
        let body = vec![
            Stmt::Gosub { label: "SUB1".into() },
            Stmt::Label("SUB1".into()),
            Stmt::Return(None),
        ];
        let cfg = build_cfg(&body).unwrap();
        let entry = cfg.block(cfg.entry);
        assert!(entry.has_edge_kind(EdgeKind::Call));
        let return_point = entry.edge_of_kind(EdgeKind::Fallthrough).unwrap().target;
        assert!(cfg.gosub_return_blocks.contains(&return_point));
    }

    #[test]
    fn for_loop_produces_five_blocks_with_header_marked() {
        let body = vec![Stmt::For {
            var: "I".into(),
            start: Expr::int(1),
            end: Expr::int(3),
            step: None,
            body: vec![Stmt::Print(PrintStmt {
                items: vec![PrintItem { expr: Expr::var("I"), separator: PrintSeparator::None }],
                trailing_newline: true,
            })],
        }];
        let cfg = build_cfg(&body).unwrap();
        // entry (init) + header + body + increment + exit = 5
        assert_eq!(cfg.blocks.len(), 5);
        let header = cfg.blocks.iter().find(|b| b.is_loop_header).unwrap();
        assert!(header.for_loop.is_some());
    }

    #[test]
    fn undefined_gosub_label_is_an_error() {
        let body = vec![Stmt::Gosub { label: "MISSING".into() }];
        assert!(build_cfg(&body).is_err());
    }
}
