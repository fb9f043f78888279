//! Built-in fixture programs, one per end-to-end scenario. Stand in for
//! the external front end this workspace has no parser for: `--demo`
//! hands the driver a ready-made `fbc_ast::Program` (or, for the JIT
//! scenario, a ready-made `fbc_jit::SimpleFunc`) instead of reading one
//! from disk.

use fbc_ast::{Assignment, AssignTarget, BinOp, DimDecl, DimKind, Expr, PrintItem, PrintSeparator, PrintStmt, Program, Stmt};
use fbc_jit::{AluOp, FuncBlock, FuncBlockId, FuncInst, FuncTerm, JitCls, SimpleFunc};
use fbc_types::BaseType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demo {
    SimpleAssignPrint,
    StringRefcountAssignment,
    GosubTwoOutEdge,
    ForLoopFiveBlock,
    TypePointUdt,
    MaddFusionJit,
}

impl Demo {
    pub fn names() -> &'static [&'static str] {
        &["simple-assign-print", "string-refcount", "gosub", "for-loop", "type-point", "madd-fusion"]
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "simple-assign-print" => Some(Demo::SimpleAssignPrint),
            "string-refcount" => Some(Demo::StringRefcountAssignment),
            "gosub" => Some(Demo::GosubTwoOutEdge),
            "for-loop" => Some(Demo::ForLoopFiveBlock),
            "type-point" => Some(Demo::TypePointUdt),
            "madd-fusion" => Some(Demo::MaddFusionJit),
            _ => None,
        }
    }

    /// `None` for `MaddFusionJit`, which produces a [`SimpleFunc`] instead
    /// since it exercises the JIT collector directly rather than codegen.
    pub fn program(self) -> Option<Program> {
        match self {
            Demo::SimpleAssignPrint => Some(simple_assign_print()),
            Demo::StringRefcountAssignment => Some(string_refcount_assignment()),
            Demo::GosubTwoOutEdge => Some(gosub_two_out_edge()),
            Demo::ForLoopFiveBlock => Some(for_loop_five_block()),
            Demo::TypePointUdt => Some(type_point_udt()),
            Demo::MaddFusionJit => None,
        }
    }

    pub fn func(self) -> Option<SimpleFunc> {
        match self {
            Demo::MaddFusionJit => Some(madd_fusion_func()),
            _ => None,
        }
    }
}

/// `X = 5 : Y = X + 3 : PRINT Y`
fn simple_assign_print() -> Program {
    let mut p = Program::new();
    p.main.push(Stmt::Let(Assignment { target: AssignTarget::Variable("X".into()), value: Expr::int(5) }));
    p.main.push(Stmt::Let(Assignment {
        target: AssignTarget::Variable("Y".into()),
        value: Expr::binary(BinOp::Add, Expr::var("X"), Expr::int(3)),
    }));
    p.main.push(Stmt::Print(PrintStmt {
        items: vec![PrintItem { expr: Expr::var("Y"), separator: PrintSeparator::None }],
        trailing_newline: true,
    }));
    p
}

/// `S$ = "hi" : T$ = S$ : T$ = T$ + " there" : PRINT T$`
fn string_refcount_assignment() -> Program {
    let mut p = Program::new();
    p.main.push(Stmt::Let(Assignment { target: AssignTarget::Variable("S$".into()), value: Expr::str("hi") }));
    p.main.push(Stmt::Let(Assignment { target: AssignTarget::Variable("T$".into()), value: Expr::var("S$") }));
    p.main.push(Stmt::Let(Assignment {
        target: AssignTarget::Variable("T$".into()),
        value: Expr::binary(BinOp::Concat, Expr::var("T$"), Expr::str(" there")),
    }));
    p.main.push(Stmt::Print(PrintStmt {
        items: vec![PrintItem { expr: Expr::var("T$"), separator: PrintSeparator::None }],
        trailing_newline: true,
    }));
    p
}

/// ```text
/// 10 GOSUB 100
/// 20 PRINT "after"
/// 30 END
/// 100 PRINT "sub"
/// 110 RETURN
/// ```
fn gosub_two_out_edge() -> Program {
    let mut p = Program::new();
    p.main.push(Stmt::Gosub { label: "100".into() });
    p.main.push(Stmt::Print(PrintStmt {
        items: vec![PrintItem { expr: Expr::str("after"), separator: PrintSeparator::None }],
        trailing_newline: true,
    }));
    p.main.push(Stmt::End);
    p.main.push(Stmt::Label("100".into()));
    p.main.push(Stmt::Print(PrintStmt {
        items: vec![PrintItem { expr: Expr::str("sub"), separator: PrintSeparator::None }],
        trailing_newline: true,
    }));
    p.main.push(Stmt::Return(None));
    p
}

/// `FOR I = 1 TO 3 : PRINT I : NEXT I`
fn for_loop_five_block() -> Program {
    let mut p = Program::new();
    p.main.push(Stmt::For {
        var: "I".into(),
        start: Expr::int(1),
        end: Expr::int(3),
        step: None,
        body: vec![Stmt::Print(PrintStmt {
            items: vec![PrintItem { expr: Expr::var("I"), separator: PrintSeparator::None }],
            trailing_newline: true,
        })],
    });
    p
}

/// `TYPE POINT : X AS INTEGER : Y AS INTEGER : END TYPE` then
/// `DIM P AS POINT : P.X = 10 : P.Y = 20 : PRINT P.X + P.Y`
fn type_point_udt() -> Program {
    let mut p = Program::new();
    p.udts.push((
        "POINT".into(),
        vec![("X".into(), BaseType::Int { signed: true }), ("Y".into(), BaseType::Int { signed: true })],
    ));
    p.main.push(Stmt::Dim(DimDecl {
        name: "P".into(),
        kind: DimKind::Scalar { ty: BaseType::UserDefined("POINT".into()), initializer: None },
    }));
    p.main.push(Stmt::Let(Assignment {
        target: AssignTarget::MemberChain { base: Expr::var("P"), chain: vec!["X".into()] },
        value: Expr::int(10),
    }));
    p.main.push(Stmt::Let(Assignment {
        target: AssignTarget::MemberChain { base: Expr::var("P"), chain: vec!["Y".into()] },
        value: Expr::int(20),
    }));
    p.main.push(Stmt::Print(PrintStmt {
        items: vec![PrintItem {
            expr: Expr::binary(
                BinOp::Add,
                Expr::MemberAccess { base: Box::new(Expr::var("P")), field: "X".into() },
                Expr::MemberAccess { base: Box::new(Expr::var("P")), field: "Y".into() },
            ),
            separator: PrintSeparator::None,
        }],
        trailing_newline: true,
    }));
    p
}

/// `%t1 =w mul %a, %b ; %t2 =w add %t1, %c` — exercises the MADD fusion
/// directly at the `FuncIr` level, since there's no embedded IL backend
/// in this workspace to lower a compiled function down to it.
fn madd_fusion_func() -> SimpleFunc {
    let block = FuncBlock {
        id: FuncBlockId(0),
        insts: vec![
            FuncInst::AluRrr { op: AluOp::Mul, cls: JitCls::W, rd: 3, rn: 0, rm: 1 },
            FuncInst::AluRrr { op: AluOp::Add, cls: JitCls::W, rd: 4, rn: 3, rm: 2 },
        ],
        term: FuncTerm::Return(Some(4)),
    };
    SimpleFunc { name: "madd_demo".into(), frame_size: 16, callee_saved: vec![], blocks: vec![block] }
}
