//! The flat `JitInst` record and its companion enums (§4.K, §6).
//!
//! Every field here mirrors the original collector's struct field-for-field
//! so the 128-byte layout and the `kind`/`cls`/`cond`/`shift_type`/`sym_type`
//! numbering are preserved exactly; a downstream encoder keyed on these
//! numeric values would not need to change.

pub const SYM_MAX: usize = 80;

/// `-1..-6` and the vector-register base, matching the collector's register
/// sentinel scheme: `0..30` are GP registers, negatives are SP/FP/LR/scratch,
/// and `-100 - i` is vector register `i`.
pub const REG_NONE: i32 = -1;
pub const REG_SP: i32 = -2;
pub const REG_FP: i32 = -3;
pub const REG_LR: i32 = -4;
pub const REG_IP0: i32 = -5;
pub const REG_IP1: i32 = -6;
pub const VREG_BASE: i32 = -100;

pub fn vreg(i: i32) -> i32 {
    VREG_BASE - i
}

/// Operand width, matching QBE's `Kw`/`Kl`/`Ks`/`Kd` class numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JitCls {
    W = 0,
    L = 1,
    S = 2,
    D = 3,
}

/// ARM64 4-bit condition field encoding — used directly as an instruction
/// operand by the downstream encoder, so the numeric values are load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JitCond {
    Eq = 0x0,
    Ne = 0x1,
    Cs = 0x2,
    Cc = 0x3,
    Mi = 0x4,
    Pl = 0x5,
    Vs = 0x6,
    Vc = 0x7,
    Hi = 0x8,
    Ls = 0x9,
    Ge = 0xA,
    Lt = 0xB,
    Gt = 0xC,
    Le = 0xD,
    Al = 0xE,
    Nv = 0xF,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JitShift {
    Lsl = 0,
    Lsr = 1,
    Asr = 2,
    Ror = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JitSymType {
    None = 0,
    Global = 1,
    ThreadLocal = 2,
    Data = 3,
    Func = 4,
}

/// Every distinct instruction (and pseudo-instruction) shape the collector
/// can produce. Grouped and gapped the way the original enum is gapped, so a
/// future addition to one category doesn't renumber an unrelated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum JitInstKind {
    Label = 0,
    FuncBegin = 1,
    FuncEnd = 2,
    DbgLoc = 3,
    Nop = 4,
    Comment = 5,

    AddRrr = 16,
    SubRrr = 17,
    MulRrr = 18,
    SDivRrr = 19,
    UDivRrr = 20,
    AndRrr = 21,
    OrrRrr = 22,
    EorRrr = 23,
    LslRrr = 24,
    LsrRrr = 25,
    AsrRrr = 26,
    NegRr = 27,

    MsubRrrr = 32,
    MaddRrrr = 33,

    AddRri = 48,
    SubRri = 49,

    MovRr = 64,
    Movz = 65,
    Movk = 66,
    Movn = 67,
    MovWideImm = 68,

    FaddRrr = 80,
    FsubRrr = 81,
    FmulRrr = 82,
    FdivRrr = 83,
    FnegRr = 84,
    FmovRr = 85,

    FcvtSd = 96,
    FcvtDs = 97,
    Fcvtzs = 98,
    Fcvtzu = 99,
    Scvtf = 100,
    Ucvtf = 101,
    FmovGf = 102,
    FmovFg = 103,

    Sxtb = 112,
    Uxtb = 113,
    Sxth = 114,
    Uxth = 115,
    Sxtw = 116,
    Uxtw = 117,

    CmpRr = 128,
    CmpRi = 129,
    CmnRr = 130,
    FcmpRr = 131,
    TstRr = 132,

    Cset = 144,
    Csel = 145,

    LdrRi = 160,
    LdrbRi = 161,
    LdrhRi = 162,
    LdrsbRi = 163,
    LdrshRi = 164,
    LdrswRi = 165,

    StrRi = 176,
    StrbRi = 177,
    StrhRi = 178,

    LdrRr = 192,
    StrRr = 193,
    LdrbRr = 194,
    LdrhRr = 195,
    LdrsbRr = 196,
    LdrshRr = 197,
    LdrswRr = 198,
    StrbRr = 199,
    StrhRr = 200,

    Ldp = 208,
    Stp = 209,
    LdpPost = 210,
    StpPre = 211,

    B = 224,
    Bl = 225,

    BCond = 226,

    Cbz = 227,
    Cbnz = 228,

    Br = 232,
    Blr = 233,
    Ret = 234,

    CallExt = 240,

    Adrp = 248,
    Adr = 249,

    LoadAddr = 252,

    SubSp = 256,
    AddSp = 257,
    MovSp = 258,

    Hint = 264,
    Brk = 265,

    AddShift = 296,
    SubShift = 297,
    AndShift = 298,
    OrrShift = 299,
    EorShift = 300,

    DataStart = 320,
    DataEnd = 321,
    DataByte = 322,
    DataHalf = 323,
    DataWord = 324,
    DataQuad = 325,
    DataZero = 326,
    DataSymref = 327,
    DataAscii = 328,
    DataAlign = 329,
}

impl JitInstKind {
    /// Pseudo-instructions emit no machine bytes.
    pub fn has_encoding(self) -> bool {
        !matches!(
            self,
            JitInstKind::Label
                | JitInstKind::FuncBegin
                | JitInstKind::FuncEnd
                | JitInstKind::DbgLoc
                | JitInstKind::Nop
                | JitInstKind::Comment
                | JitInstKind::DataStart
                | JitInstKind::DataEnd
                | JitInstKind::DataByte
                | JitInstKind::DataHalf
                | JitInstKind::DataWord
                | JitInstKind::DataQuad
                | JitInstKind::DataZero
                | JitInstKind::DataSymref
                | JitInstKind::DataAscii
                | JitInstKind::DataAlign
        )
    }

    pub fn is_branch(self) -> bool {
        matches!(
            self,
            JitInstKind::B
                | JitInstKind::Bl
                | JitInstKind::BCond
                | JitInstKind::Cbz
                | JitInstKind::Cbnz
                | JitInstKind::Br
                | JitInstKind::Blr
                | JitInstKind::CallExt
        )
    }

    pub fn has_symbol(self) -> bool {
        matches!(
            self,
            JitInstKind::CallExt | JitInstKind::LoadAddr | JitInstKind::Adrp | JitInstKind::Adr | JitInstKind::DataSymref
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            JitInstKind::Label => "LABEL",
            JitInstKind::FuncBegin => "FUNC_BEGIN",
            JitInstKind::FuncEnd => "FUNC_END",
            JitInstKind::DbgLoc => "DBGLOC",
            JitInstKind::Nop => "NOP",
            JitInstKind::Comment => "COMMENT",
            JitInstKind::AddRrr => "ADD_RRR",
            JitInstKind::SubRrr => "SUB_RRR",
            JitInstKind::MulRrr => "MUL_RRR",
            JitInstKind::SDivRrr => "SDIV_RRR",
            JitInstKind::UDivRrr => "UDIV_RRR",
            JitInstKind::AndRrr => "AND_RRR",
            JitInstKind::OrrRrr => "ORR_RRR",
            JitInstKind::EorRrr => "EOR_RRR",
            JitInstKind::LslRrr => "LSL_RRR",
            JitInstKind::LsrRrr => "LSR_RRR",
            JitInstKind::AsrRrr => "ASR_RRR",
            JitInstKind::NegRr => "NEG_RR",
            JitInstKind::MsubRrrr => "MSUB_RRRR",
            JitInstKind::MaddRrrr => "MADD_RRRR",
            JitInstKind::AddRri => "ADD_RRI",
            JitInstKind::SubRri => "SUB_RRI",
            JitInstKind::MovRr => "MOV_RR",
            JitInstKind::Movz => "MOVZ",
            JitInstKind::Movk => "MOVK",
            JitInstKind::Movn => "MOVN",
            JitInstKind::MovWideImm => "MOV_WIDE_IMM",
            JitInstKind::FaddRrr => "FADD_RRR",
            JitInstKind::FsubRrr => "FSUB_RRR",
            JitInstKind::FmulRrr => "FMUL_RRR",
            JitInstKind::FdivRrr => "FDIV_RRR",
            JitInstKind::FnegRr => "FNEG_RR",
            JitInstKind::FmovRr => "FMOV_RR",
            JitInstKind::FcvtSd => "FCVT_SD",
            JitInstKind::FcvtDs => "FCVT_DS",
            JitInstKind::Fcvtzs => "FCVTZS",
            JitInstKind::Fcvtzu => "FCVTZU",
            JitInstKind::Scvtf => "SCVTF",
            JitInstKind::Ucvtf => "UCVTF",
            JitInstKind::FmovGf => "FMOV_GF",
            JitInstKind::FmovFg => "FMOV_FG",
            JitInstKind::Sxtb => "SXTB",
            JitInstKind::Uxtb => "UXTB",
            JitInstKind::Sxth => "SXTH",
            JitInstKind::Uxth => "UXTH",
            JitInstKind::Sxtw => "SXTW",
            JitInstKind::Uxtw => "UXTW",
            JitInstKind::CmpRr => "CMP_RR",
            JitInstKind::CmpRi => "CMP_RI",
            JitInstKind::CmnRr => "CMN_RR",
            JitInstKind::FcmpRr => "FCMP_RR",
            JitInstKind::TstRr => "TST_RR",
            JitInstKind::Cset => "CSET",
            JitInstKind::Csel => "CSEL",
            JitInstKind::LdrRi => "LDR_RI",
            JitInstKind::LdrbRi => "LDRB_RI",
            JitInstKind::LdrhRi => "LDRH_RI",
            JitInstKind::LdrsbRi => "LDRSB_RI",
            JitInstKind::LdrshRi => "LDRSH_RI",
            JitInstKind::LdrswRi => "LDRSW_RI",
            JitInstKind::StrRi => "STR_RI",
            JitInstKind::StrbRi => "STRB_RI",
            JitInstKind::StrhRi => "STRH_RI",
            JitInstKind::LdrRr => "LDR_RR",
            JitInstKind::StrRr => "STR_RR",
            JitInstKind::LdrbRr => "LDRB_RR",
            JitInstKind::LdrhRr => "LDRH_RR",
            JitInstKind::LdrsbRr => "LDRSB_RR",
            JitInstKind::LdrshRr => "LDRSH_RR",
            JitInstKind::LdrswRr => "LDRSW_RR",
            JitInstKind::StrbRr => "STRB_RR",
            JitInstKind::StrhRr => "STRH_RR",
            JitInstKind::Ldp => "LDP",
            JitInstKind::Stp => "STP",
            JitInstKind::LdpPost => "LDP_POST",
            JitInstKind::StpPre => "STP_PRE",
            JitInstKind::B => "B",
            JitInstKind::Bl => "BL",
            JitInstKind::BCond => "B_COND",
            JitInstKind::Cbz => "CBZ",
            JitInstKind::Cbnz => "CBNZ",
            JitInstKind::Br => "BR",
            JitInstKind::Blr => "BLR",
            JitInstKind::Ret => "RET",
            JitInstKind::CallExt => "CALL_EXT",
            JitInstKind::Adrp => "ADRP",
            JitInstKind::Adr => "ADR",
            JitInstKind::LoadAddr => "LOAD_ADDR",
            JitInstKind::SubSp => "SUB_SP",
            JitInstKind::AddSp => "ADD_SP",
            JitInstKind::MovSp => "MOV_SP",
            JitInstKind::Hint => "HINT",
            JitInstKind::Brk => "BRK",
            JitInstKind::AddShift => "ADD_SHIFT",
            JitInstKind::SubShift => "SUB_SHIFT",
            JitInstKind::AndShift => "AND_SHIFT",
            JitInstKind::OrrShift => "ORR_SHIFT",
            JitInstKind::EorShift => "EOR_SHIFT",
            JitInstKind::DataStart => "DATA_START",
            JitInstKind::DataEnd => "DATA_END",
            JitInstKind::DataByte => "DATA_BYTE",
            JitInstKind::DataHalf => "DATA_HALF",
            JitInstKind::DataWord => "DATA_WORD",
            JitInstKind::DataQuad => "DATA_QUAD",
            JitInstKind::DataZero => "DATA_ZERO",
            JitInstKind::DataSymref => "DATA_SYMREF",
            JitInstKind::DataAscii => "DATA_ASCII",
            JitInstKind::DataAlign => "DATA_ALIGN",
        }
    }
}

/// The flat 128-byte instruction record. Every field is a plain scalar —
/// no pointers — so a future encoder could read a slice of these directly.
/// `rd`/`rn`/`rm`/`ra` default to [`REG_NONE`] and `target_id` to `-1`;
/// callers only need to set the fields their `kind` actually uses (see each
/// emitter method on [`crate::collector::JitCollector`]).
#[derive(Debug, Clone)]
pub struct JitInst {
    pub kind: JitInstKind,
    pub cls: JitCls,
    pub cond: JitCond,
    pub shift_type: JitShift,
    pub sym_type: JitSymType,
    pub is_float: bool,

    pub rd: i32,
    pub rn: i32,
    pub rm: i32,
    pub ra: i32,

    pub imm: i64,
    pub imm2: i64,

    pub target_id: i32,

    sym_name: String,
}

impl JitInst {
    pub fn new(kind: JitInstKind) -> Self {
        JitInst {
            kind,
            cls: JitCls::W,
            cond: JitCond::Al,
            shift_type: JitShift::Lsl,
            sym_type: JitSymType::None,
            is_float: false,
            rd: REG_NONE,
            rn: REG_NONE,
            rm: REG_NONE,
            ra: REG_NONE,
            imm: 0,
            imm2: 0,
            target_id: -1,
            sym_name: String::new(),
        }
    }

    pub fn sym_name(&self) -> &str {
        &self.sym_name
    }

    /// Truncates silently past [`SYM_MAX`] minus the NUL terminator, matching
    /// the original's fixed `char[80]` buffer — a symbol or comment text
    /// this long has never occurred in a worked program.
    pub fn set_sym_name(&mut self, name: &str) {
        let limit = SYM_MAX - 1;
        if name.len() > limit {
            self.sym_name = name[..limit].to_string();
        } else {
            self.sym_name = name.to_string();
        }
    }
}
