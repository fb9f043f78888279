//! Walks a [`FuncIr`] and appends [`JitInst`] records, applying the same
//! peephole fusions the assembly emitter would (§4.K): MUL+ADD/SUB → MADD/
//! MSUB, shift-then-ALU → shifted-operand ALU, adjacent loads/stores →
//! LDP/STP, and CMP#0+conditional-branch → CBZ/CBNZ. Emission order mirrors
//! assembly emission exactly — prologue, blocks in RPO, terminator per
//! block, epilogue per return — because every fusion here depends on two
//! instructions being adjacent in that same order.

use rustc_hash::FxHashMap;

use crate::error::{JitError, JitResult};
use crate::func_ir::{AluOp, ConvertOp, ExtendOp, FuncBlockId, FuncIr, FuncInst, FuncTerm, LoadWidth, StoreWidth};
use crate::inst::{JitCls, JitCond, JitInst, JitInstKind, JitShift, REG_FP, REG_IP0, REG_LR, REG_NONE, REG_SP};

/// `hint #0x24` — BTI c, the standard AArch64 function-entry landing pad.
const BTI_C_HINT: i64 = 0x24;
/// Largest immediate an `ADD`/`SUB` (register-immediate) or scaled `LDR`/
/// `STR` offset can encode in one instruction.
const IMM12_MAX: i64 = 4095;
/// Chunk size used to decompose an oversized stack adjustment into several
/// `SUB_SP`/`ADD_SP` records — simpler than materializing the adjustment
/// into a register, at the cost of a few extra records for huge frames.
const SP_ADJUST_CHUNK: u64 = 4095;

fn elem_size(cls: JitCls) -> i64 {
    match cls {
        JitCls::W | JitCls::S => 4,
        JitCls::L | JitCls::D => 8,
    }
}

fn pair_offset_encodable(cls: JitCls, offset: i64) -> bool {
    let scale = elem_size(cls);
    offset % scale == 0 && (offset / scale) >= -64 && (offset / scale) <= 63
}

/// Source-operand registers an instruction reads (never its destination) —
/// used by the MADD/MSUB and shift fusions to check the fused-away
/// intermediate result isn't needed again later in the block.
fn reads(inst: &FuncInst) -> Vec<i32> {
    match inst {
        FuncInst::AluRrr { rn, rm, .. } => vec![*rn, *rm],
        FuncInst::AluRri { rn, .. } => vec![*rn],
        FuncInst::Neg { rn, .. } => vec![*rn],
        FuncInst::Mov { rn, .. } => vec![*rn],
        FuncInst::MovImm { .. } => vec![],
        FuncInst::FAluRrr { rn, rm, .. } => vec![*rn, *rm],
        FuncInst::FNeg { rn, .. } => vec![*rn],
        FuncInst::FMov { rn, .. } => vec![*rn],
        FuncInst::Convert { rn, .. } => vec![*rn],
        FuncInst::Extend { rn, .. } => vec![*rn],
        FuncInst::Load { base, .. } => vec![*base],
        FuncInst::Store { rt, base, .. } => vec![*rt, *base],
        FuncInst::Cmp { rn, rm, .. } => vec![*rn, *rm],
        FuncInst::CmpImm { rn, .. } => vec![*rn],
        FuncInst::FCmp { rn, rm } => vec![*rn, *rm],
        FuncInst::Cset { .. } => vec![],
        FuncInst::Csel { rn, rm, .. } => vec![*rn, *rm],
        FuncInst::CallExt { .. } => vec![],
        FuncInst::LoadAddr { .. } => vec![],
        FuncInst::Comment(_) => vec![],
    }
}

fn used_after(insts: &[FuncInst], from: usize, reg: i32) -> bool {
    insts[from..].iter().any(|i| reads(i).contains(&reg))
}

#[derive(Debug, Default)]
pub struct JitHistogram {
    counts: FxHashMap<JitInstKind, u64>,
    total: u64,
}

impl JitHistogram {
    pub fn reset(&mut self) {
        self.counts.clear();
        self.total = 0;
    }

    pub fn accumulate(&mut self, insts: &[JitInst]) {
        for inst in insts {
            *self.counts.entry(inst.kind).or_insert(0) += 1;
            self.total += 1;
        }
    }

    /// Sorted, human-readable table: kind name, count, percentage of total.
    pub fn dump(&self) -> String {
        let mut rows: Vec<(JitInstKind, u64)> = self.counts.iter().map(|(&k, &v)| (k, v)).collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name().cmp(b.0.name())));
        let mut out = String::new();
        for (kind, count) in rows {
            let pct = if self.total > 0 { 100.0 * count as f64 / self.total as f64 } else { 0.0 };
            out.push_str(&format!("{:<14} {:>8} {:>6.2}%\n", kind.name(), count, pct));
        }
        out
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

#[derive(Debug)]
pub struct JitCollector {
    insts: Vec<JitInst>,
    nfunc: u32,
    ndata: u32,
    error: Option<String>,
    madd_fusion_enabled: bool,
}

impl Default for JitCollector {
    fn default() -> Self {
        JitCollector { insts: Vec::new(), nfunc: 0, ndata: 0, error: None, madd_fusion_enabled: true }
    }
}

impl JitCollector {
    pub fn new() -> Self {
        JitCollector::default()
    }

    /// Mirrors `ENABLE_MADD_FUSION`: toggles only the MUL+ADD/MUL-SUB
    /// fusion, not the shift/LDP-STP/CBZ-CBNZ passes.
    pub fn with_madd_fusion(mut self, enabled: bool) -> Self {
        self.madd_fusion_enabled = enabled;
        self
    }

    pub fn set_madd_fusion(&mut self, enabled: bool) {
        self.madd_fusion_enabled = enabled;
    }

    pub fn reset(&mut self) {
        self.insts.clear();
        self.nfunc = 0;
        self.ndata = 0;
        self.error = None;
    }

    pub fn insts(&self) -> &[JitInst] {
        &self.insts
    }

    pub fn nfunc(&self) -> u32 {
        self.nfunc
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn push(&mut self, inst: JitInst) {
        self.insts.push(inst);
    }

    fn push_comment(&mut self, text: &str) {
        let mut c = JitInst::new(JitInstKind::Comment);
        c.set_sym_name(text);
        self.push(c);
    }

    pub fn collect_function(&mut self, func: &dyn FuncIr) -> JitResult<()> {
        self.emit_prologue(func)?;

        let blocks = func.blocks_rpo();
        for (idx, block) in blocks.iter().enumerate() {
            let mut label = JitInst::new(JitInstKind::Label);
            label.target_id = block.id.0 as i32;
            self.push(label);

            self.lower_block_body(&block.insts)?;

            let fallthrough = blocks.get(idx + 1).map(|b| b.id);
            self.lower_terminator(func, &block.term, fallthrough)?;
        }

        self.push(JitInst::new(JitInstKind::FuncEnd));
        self.nfunc += 1;
        Ok(())
    }

    pub fn collect_data(&mut self, label: &str, kind: u8, value: i64) {
        let mut d = JitInst::new(match kind {
            0 => JitInstKind::DataWord,
            1 => JitInstKind::DataQuad,
            _ => JitInstKind::DataSymref,
        });
        d.set_sym_name(label);
        d.imm = value;
        self.push(d);
        self.ndata += 1;
    }

    // === Prologue / epilogue ===

    fn emit_prologue(&mut self, func: &dyn FuncIr) -> JitResult<()> {
        if func.name().len() > crate::inst::SYM_MAX - 1 {
            return Err(JitError::SymbolTooLong(func.name().to_string(), crate::inst::SYM_MAX));
        }
        let mut begin = JitInst::new(JitInstKind::FuncBegin);
        begin.set_sym_name(func.name());
        begin.imm = func.frame_size() as i64;
        self.push(begin);

        let mut bti = JitInst::new(JitInstKind::Hint);
        bti.imm = BTI_C_HINT;
        self.push(bti);

        self.emit_frame_push(func.frame_size());
        self.emit_mov_sp(REG_FP, true);
        self.emit_callee_saved_stores(func.callee_saved());
        Ok(())
    }

    fn emit_epilogue(&mut self, func: &dyn FuncIr) {
        self.emit_callee_saved_restores(func.callee_saved());
        self.emit_frame_pop(func.frame_size());
        self.push(JitInst::new(JitInstKind::Ret));
    }

    fn emit_frame_push(&mut self, frame: u64) {
        let neg = -(frame as i64);
        if pair_offset_encodable(JitCls::L, neg) && neg >= -512 {
            let mut stp = JitInst::new(JitInstKind::StpPre);
            stp.cls = JitCls::L;
            stp.rd = REG_FP;
            stp.rm = REG_LR;
            stp.rn = REG_SP;
            stp.imm = neg;
            self.push(stp);
        } else {
            self.emit_sp_adjust(JitInstKind::SubSp, frame);
            let mut stp = JitInst::new(JitInstKind::Stp);
            stp.cls = JitCls::L;
            stp.rd = REG_FP;
            stp.rm = REG_LR;
            stp.rn = REG_SP;
            stp.imm = 0;
            self.push(stp);
        }
    }

    fn emit_frame_pop(&mut self, frame: u64) {
        if pair_offset_encodable(JitCls::L, frame as i64) && frame <= 504 {
            let mut ldp = JitInst::new(JitInstKind::LdpPost);
            ldp.cls = JitCls::L;
            ldp.rd = REG_FP;
            ldp.rm = REG_LR;
            ldp.rn = REG_SP;
            ldp.imm = frame as i64;
            self.push(ldp);
        } else {
            let mut ldp = JitInst::new(JitInstKind::Ldp);
            ldp.cls = JitCls::L;
            ldp.rd = REG_FP;
            ldp.rm = REG_LR;
            ldp.rn = REG_SP;
            ldp.imm = 0;
            self.push(ldp);
            self.emit_sp_adjust(JitInstKind::AddSp, frame);
        }
    }

    fn emit_sp_adjust(&mut self, kind: JitInstKind, mut frame: u64) {
        if frame == 0 {
            return;
        }
        while frame > 0 {
            let take = frame.min(SP_ADJUST_CHUNK);
            let mut adj = JitInst::new(kind);
            adj.imm = take as i64;
            self.push(adj);
            frame -= take;
        }
    }

    fn emit_mov_sp(&mut self, reg: i32, reading: bool) {
        let mut mv = JitInst::new(JitInstKind::MovSp);
        mv.cls = JitCls::L;
        if reading {
            mv.rd = reg;
        } else {
            mv.rn = reg;
        }
        self.push(mv);
    }

    fn emit_callee_saved_stores(&mut self, regs: &[i32]) {
        let mut offset = 16i64;
        let mut iter = regs.chunks(2);
        for pair in &mut iter {
            if pair.len() == 2 {
                let mut stp = JitInst::new(JitInstKind::Stp);
                stp.cls = JitCls::L;
                stp.rd = pair[0];
                stp.rm = pair[1];
                stp.rn = REG_SP;
                stp.imm = offset;
                self.push(stp);
            } else {
                let mut str_ = JitInst::new(JitInstKind::StrRi);
                str_.cls = JitCls::L;
                str_.rd = pair[0];
                str_.rn = REG_SP;
                str_.imm = offset;
                self.push(str_);
            }
            offset += 16;
        }
    }

    fn emit_callee_saved_restores(&mut self, regs: &[i32]) {
        let mut offset = 16i64;
        let mut iter = regs.chunks(2);
        for pair in &mut iter {
            if pair.len() == 2 {
                let mut ldp = JitInst::new(JitInstKind::Ldp);
                ldp.cls = JitCls::L;
                ldp.rd = pair[0];
                ldp.rm = pair[1];
                ldp.rn = REG_SP;
                ldp.imm = offset;
                self.push(ldp);
            } else {
                let mut ldr = JitInst::new(JitInstKind::LdrRi);
                ldr.cls = JitCls::L;
                ldr.rd = pair[0];
                ldr.rn = REG_SP;
                ldr.imm = offset;
                self.push(ldr);
            }
            offset += 16;
        }
    }

    // === Block body: fusion-aware lowering ===

    fn lower_block_body(&mut self, insts: &[FuncInst]) -> JitResult<()> {
        let mut i = 0;
        while i < insts.len() {
            if self.try_shift_fusion(insts, i)? {
                i += 2;
                continue;
            }
            if self.madd_fusion_enabled && self.try_madd_msub_fusion(insts, i)? {
                i += 2;
                continue;
            }
            if self.try_ldp_stp_fusion(insts, i)? {
                i += 2;
                continue;
            }
            self.lower_single(&insts[i])?;
            i += 1;
        }
        Ok(())
    }

    fn try_shift_fusion(&mut self, insts: &[FuncInst], i: usize) -> JitResult<bool> {
        let (shift_op, cls, shift_rd, shift_rn, shift_amt) = match &insts[i] {
            FuncInst::AluRri { op: op @ (AluOp::Lsl | AluOp::Lsr | AluOp::Asr), cls, rd, rn, imm } => {
                (*op, *cls, *rd, *rn, *imm)
            }
            _ => return Ok(false),
        };
        let next = match insts.get(i + 1) {
            Some(n) => n,
            None => return Ok(false),
        };
        let (alu_op, alu_cls, rd, rn, rm) = match next {
            FuncInst::AluRrr { op: op @ (AluOp::Add | AluOp::Sub | AluOp::And | AluOp::Orr | AluOp::Eor), cls, rd, rn, rm } => {
                (*op, *cls, *rd, *rn, *rm)
            }
            _ => return Ok(false),
        };
        if alu_cls != cls || (rn != shift_rd && rm != shift_rd) {
            return Ok(false);
        }
        if used_after(insts, i + 2, shift_rd) {
            return Ok(false);
        }
        let other = if rn == shift_rd { rm } else { rn };
        self.push_comment("fused: SHIFT+ALU -> shifted-operand ALU");
        let kind = match alu_op {
            AluOp::Add => JitInstKind::AddShift,
            AluOp::Sub => JitInstKind::SubShift,
            AluOp::And => JitInstKind::AndShift,
            AluOp::Orr => JitInstKind::OrrShift,
            AluOp::Eor => JitInstKind::EorShift,
            _ => unreachable!(),
        };
        let mut inst = JitInst::new(kind);
        inst.cls = cls;
        inst.rd = rd;
        inst.rn = other;
        inst.rm = shift_rn;
        inst.shift_type = match shift_op {
            AluOp::Lsl => JitShift::Lsl,
            AluOp::Lsr => JitShift::Lsr,
            AluOp::Asr => JitShift::Asr,
            _ => unreachable!(),
        };
        inst.imm2 = shift_amt;
        self.push(inst);
        Ok(true)
    }

    fn try_madd_msub_fusion(&mut self, insts: &[FuncInst], i: usize) -> JitResult<bool> {
        let (cls, mul_rd, mul_rn, mul_rm) = match &insts[i] {
            FuncInst::AluRrr { op: AluOp::Mul, cls, rd, rn, rm } => (*cls, *rd, *rn, *rm),
            _ => return Ok(false),
        };
        let next = match insts.get(i + 1) {
            Some(n) => n,
            None => return Ok(false),
        };
        match next {
            FuncInst::AluRrr { op: AluOp::Add, cls: cls2, rd, rn, rm } if *cls2 == cls && (*rn == mul_rd || *rm == mul_rd) => {
                if used_after(insts, i + 2, mul_rd) {
                    return Ok(false);
                }
                let addend = if *rn == mul_rd { *rm } else { *rn };
                self.push_comment("fused: MUL+ADD -> MADD");
                let mut inst = JitInst::new(JitInstKind::MaddRrrr);
                inst.cls = cls;
                inst.rd = *rd;
                inst.rn = mul_rn;
                inst.rm = mul_rm;
                inst.ra = addend;
                self.push(inst);
                Ok(true)
            }
            FuncInst::AluRrr { op: AluOp::Sub, cls: cls2, rd, rn, rm } if *cls2 == cls && *rm == mul_rd => {
                if used_after(insts, i + 2, mul_rd) {
                    return Ok(false);
                }
                self.push_comment("fused: MUL-SUB -> MSUB");
                let mut inst = JitInst::new(JitInstKind::MsubRrrr);
                inst.cls = cls;
                inst.rd = *rd;
                inst.rn = mul_rn;
                inst.rm = mul_rm;
                inst.ra = *rn;
                self.push(inst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn try_ldp_stp_fusion(&mut self, insts: &[FuncInst], i: usize) -> JitResult<bool> {
        match (&insts[i], insts.get(i + 1)) {
            (
                FuncInst::Load { width: LoadWidth::Word, cls, rd: rd1, base: base1, offset: off1 },
                Some(FuncInst::Load { width: LoadWidth::Word, cls: cls2, rd: rd2, base: base2, offset: off2 }),
            ) if cls2 == cls && base2 == base1 && (off2 - off1).abs() == elem_size(*cls) && pair_offset_encodable(*cls, off1.min(off2).to_owned()) => {
                self.push_comment("fused: adjacent LDR+LDR -> LDP");
                let (lo_off, first, second) = if off1 <= off2 { (*off1, *rd1, *rd2) } else { (*off2, *rd2, *rd1) };
                let mut ldp = JitInst::new(JitInstKind::Ldp);
                ldp.cls = *cls;
                ldp.rd = first;
                ldp.rm = second;
                ldp.rn = *base1;
                ldp.imm = lo_off;
                self.push(ldp);
                Ok(true)
            }
            (
                FuncInst::Store { width: StoreWidth::Word, cls, rt: rt1, base: base1, offset: off1 },
                Some(FuncInst::Store { width: StoreWidth::Word, cls: cls2, rt: rt2, base: base2, offset: off2 }),
            ) if cls2 == cls && base2 == base1 && (off2 - off1).abs() == elem_size(*cls) && pair_offset_encodable(*cls, off1.min(off2).to_owned()) => {
                self.push_comment("fused: adjacent STR+STR -> STP");
                let (lo_off, first, second) = if off1 <= off2 { (*off1, *rt1, *rt2) } else { (*off2, *rt2, *rt1) };
                let mut stp = JitInst::new(JitInstKind::Stp);
                stp.cls = *cls;
                stp.rd = first;
                stp.rm = second;
                stp.rn = *base1;
                stp.imm = lo_off;
                self.push(stp);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn lower_single(&mut self, inst: &FuncInst) -> JitResult<()> {
        match inst {
            FuncInst::AluRrr { op, cls, rd, rn, rm } => {
                let mut i = JitInst::new(alu_rrr_kind(*op));
                i.cls = *cls;
                i.rd = *rd;
                i.rn = *rn;
                i.rm = *rm;
                self.push(i);
            }
            FuncInst::AluRri { op, cls, rd, rn, imm } => {
                let kind = match op {
                    AluOp::Add => JitInstKind::AddRri,
                    AluOp::Sub => JitInstKind::SubRri,
                    _ => JitInstKind::AddRri,
                };
                if imm.unsigned_abs() <= IMM12_MAX as u64 {
                    let mut i = JitInst::new(kind);
                    i.cls = *cls;
                    i.rd = *rd;
                    i.rn = *rn;
                    i.imm = *imm;
                    self.push(i);
                } else {
                    self.emit_mov_imm(*cls, REG_IP0, *imm);
                    let mut i = JitInst::new(alu_rrr_kind(*op));
                    i.cls = *cls;
                    i.rd = *rd;
                    i.rn = *rn;
                    i.rm = REG_IP0;
                    self.push(i);
                }
            }
            FuncInst::Neg { cls, rd, rn } => {
                let mut i = JitInst::new(JitInstKind::NegRr);
                i.cls = *cls;
                i.rd = *rd;
                i.rn = *rn;
                self.push(i);
            }
            FuncInst::Mov { cls, rd, rn } => {
                let mut i = JitInst::new(JitInstKind::MovRr);
                i.cls = *cls;
                i.rd = *rd;
                i.rn = *rn;
                self.push(i);
            }
            FuncInst::MovImm { cls, rd, value } => self.emit_mov_imm(*cls, *rd, *value),
            FuncInst::FAluRrr { op, cls, rd, rn, rm } => {
                let kind = match op {
                    AluOp::Add => JitInstKind::FaddRrr,
                    AluOp::Sub => JitInstKind::FsubRrr,
                    AluOp::Mul => JitInstKind::FmulRrr,
                    AluOp::SDiv | AluOp::UDiv => JitInstKind::FdivRrr,
                    _ => JitInstKind::FaddRrr,
                };
                let mut i = JitInst::new(kind);
                i.cls = *cls;
                i.rd = *rd;
                i.rn = *rn;
                i.rm = *rm;
                i.is_float = true;
                self.push(i);
            }
            FuncInst::FNeg { cls, rd, rn } => {
                let mut i = JitInst::new(JitInstKind::FnegRr);
                i.cls = *cls;
                i.rd = *rd;
                i.rn = *rn;
                i.is_float = true;
                self.push(i);
            }
            FuncInst::FMov { cls, rd, rn } => {
                let mut i = JitInst::new(JitInstKind::FmovRr);
                i.cls = *cls;
                i.rd = *rd;
                i.rn = *rn;
                i.is_float = true;
                self.push(i);
            }
            FuncInst::Convert { op, dest_cls, rd, rn } => {
                let (kind, is_float) = match op {
                    ConvertOp::FloatToInt { signed: true, is_float } => (JitInstKind::Fcvtzs, *is_float),
                    ConvertOp::FloatToInt { signed: false, is_float } => (JitInstKind::Fcvtzu, *is_float),
                    ConvertOp::IntToFloat { signed: true, is_float } => (JitInstKind::Scvtf, *is_float),
                    ConvertOp::IntToFloat { signed: false, is_float } => (JitInstKind::Ucvtf, *is_float),
                    ConvertOp::FloatWiden => (JitInstKind::FcvtSd, true),
                    ConvertOp::FloatNarrow => (JitInstKind::FcvtDs, true),
                };
                let mut i = JitInst::new(kind);
                i.cls = *dest_cls;
                i.rd = *rd;
                i.rn = *rn;
                i.is_float = is_float;
                self.push(i);
            }
            FuncInst::Extend { op, rd, rn } => {
                let kind = match op {
                    ExtendOp::SignByte => JitInstKind::Sxtb,
                    ExtendOp::ZeroByte => JitInstKind::Uxtb,
                    ExtendOp::SignHalf => JitInstKind::Sxth,
                    ExtendOp::ZeroHalf => JitInstKind::Uxth,
                    ExtendOp::SignWord => JitInstKind::Sxtw,
                };
                let mut i = JitInst::new(kind);
                i.rd = *rd;
                i.rn = *rn;
                self.push(i);
            }
            FuncInst::Load { width, cls, rd, base, offset } => {
                let scale = elem_size(*cls);
                let (base_reg, off) = self.resolve_offset(*base, *offset, scale);
                let kind = match width {
                    LoadWidth::Word => JitInstKind::LdrRi,
                    LoadWidth::SignedByte => JitInstKind::LdrsbRi,
                    LoadWidth::ZeroByte => JitInstKind::LdrbRi,
                    LoadWidth::SignedHalf => JitInstKind::LdrshRi,
                    LoadWidth::ZeroHalf => JitInstKind::LdrhRi,
                    LoadWidth::SignedWord => JitInstKind::LdrswRi,
                };
                let mut i = JitInst::new(kind);
                i.cls = *cls;
                i.rd = *rd;
                i.rn = base_reg;
                i.imm = off;
                self.push(i);
            }
            FuncInst::Store { width, cls, rt, base, offset } => {
                let scale = elem_size(*cls);
                let (base_reg, off) = self.resolve_offset(*base, *offset, scale);
                let kind = match width {
                    StoreWidth::Word => JitInstKind::StrRi,
                    StoreWidth::Byte => JitInstKind::StrbRi,
                    StoreWidth::Half => JitInstKind::StrhRi,
                };
                let mut i = JitInst::new(kind);
                i.cls = *cls;
                i.rd = *rt;
                i.rn = base_reg;
                i.imm = off;
                self.push(i);
            }
            FuncInst::Cmp { cls, rn, rm } => {
                let mut i = JitInst::new(JitInstKind::CmpRr);
                i.cls = *cls;
                i.rn = *rn;
                i.rm = *rm;
                self.push(i);
            }
            FuncInst::CmpImm { cls, rn, imm } => {
                let mut i = JitInst::new(JitInstKind::CmpRi);
                i.cls = *cls;
                i.rn = *rn;
                i.imm = *imm;
                self.push(i);
            }
            FuncInst::FCmp { rn, rm } => {
                let mut i = JitInst::new(JitInstKind::FcmpRr);
                i.rn = *rn;
                i.rm = *rm;
                i.is_float = true;
                self.push(i);
            }
            FuncInst::Cset { cls, rd, cond } => {
                let mut i = JitInst::new(JitInstKind::Cset);
                i.cls = *cls;
                i.rd = *rd;
                i.cond = *cond;
                self.push(i);
            }
            FuncInst::Csel { cls, rd, rn, rm, cond } => {
                let mut i = JitInst::new(JitInstKind::Csel);
                i.cls = *cls;
                i.rd = *rd;
                i.rn = *rn;
                i.rm = *rm;
                i.cond = *cond;
                self.push(i);
            }
            FuncInst::CallExt { symbol, dest } => {
                if symbol.len() > crate::inst::SYM_MAX - 1 {
                    return Err(JitError::SymbolTooLong(symbol.clone(), crate::inst::SYM_MAX));
                }
                let mut i = JitInst::new(JitInstKind::CallExt);
                i.sym_type = crate::inst::JitSymType::Global;
                i.set_sym_name(symbol);
                i.rd = dest.unwrap_or(REG_NONE);
                self.push(i);
            }
            FuncInst::LoadAddr { rd, symbol } => {
                if symbol.len() > crate::inst::SYM_MAX - 1 {
                    return Err(JitError::SymbolTooLong(symbol.clone(), crate::inst::SYM_MAX));
                }
                let mut i = JitInst::new(JitInstKind::LoadAddr);
                i.sym_type = crate::inst::JitSymType::Data;
                i.rd = *rd;
                i.set_sym_name(symbol);
                self.push(i);
            }
            FuncInst::Comment(text) => self.push_comment(text),
        }
        Ok(())
    }

    fn resolve_offset(&mut self, base: i32, offset: i64, scale: i64) -> (i32, i64) {
        let max = IMM12_MAX * scale;
        if offset >= 0 && offset <= max && offset % scale == 0 {
            (base, offset)
        } else {
            self.emit_mov_imm(JitCls::L, REG_IP0, offset);
            let mut add = JitInst::new(JitInstKind::AddRrr);
            add.cls = JitCls::L;
            add.rd = REG_IP0;
            add.rn = base;
            add.rm = REG_IP0;
            self.push(add);
            (REG_IP0, 0)
        }
    }

    fn emit_mov_imm(&mut self, cls: JitCls, rd: i32, value: i64) {
        let halfwords = if matches!(cls, JitCls::L) { 4 } else { 2 };
        let bits = value as u64 & if halfwords == 2 { 0xFFFF_FFFF } else { u64::MAX };
        let words: Vec<u16> = (0..halfwords).map(|h| ((bits >> (h * 16)) & 0xFFFF) as u16).collect();
        match words.iter().position(|&w| w != 0) {
            None => {
                let mut movz = JitInst::new(JitInstKind::Movz);
                movz.cls = cls;
                movz.rd = rd;
                movz.imm = 0;
                self.push(movz);
            }
            Some(first) => {
                let mut movz = JitInst::new(JitInstKind::Movz);
                movz.cls = cls;
                movz.rd = rd;
                movz.imm = words[first] as i64;
                movz.imm2 = (first * 16) as i64;
                self.push(movz);
                for (h, &w) in words.iter().enumerate().skip(first + 1) {
                    if w != 0 {
                        let mut movk = JitInst::new(JitInstKind::Movk);
                        movk.cls = cls;
                        movk.rd = rd;
                        movk.imm = w as i64;
                        movk.imm2 = (h * 16) as i64;
                        self.push(movk);
                    }
                }
            }
        }
    }

    // === Terminators ===

    fn lower_terminator(&mut self, func: &dyn FuncIr, term: &FuncTerm, fallthrough: Option<FuncBlockId>) -> JitResult<()> {
        match term {
            FuncTerm::Jump(target) => {
                if Some(*target) != fallthrough {
                    self.emit_branch(*target);
                }
            }
            FuncTerm::CondBranch { cond, true_block, false_block } => {
                self.emit_cond_branch(*cond, *true_block, *false_block, fallthrough);
            }
            FuncTerm::Return(_) => self.emit_epilogue(func),
            FuncTerm::Unreachable => self.push(JitInst::new(JitInstKind::Brk)),
        }
        Ok(())
    }

    fn emit_branch(&mut self, target: FuncBlockId) {
        let mut b = JitInst::new(JitInstKind::B);
        b.target_id = target.0 as i32;
        self.push(b);
    }

    fn emit_cond_branch(&mut self, cond: JitCond, true_block: FuncBlockId, false_block: FuncBlockId, fallthrough: Option<FuncBlockId>) {
        if matches!(cond, JitCond::Eq | JitCond::Ne) {
            if let Some(last) = self.insts.last() {
                if last.kind == JitInstKind::CmpRi && last.imm == 0 {
                    let cls = last.cls;
                    let rn = last.rn;
                    self.insts.pop();
                    self.push_comment("fused: CMP #0 + B.cond -> CBZ/CBNZ");
                    let mut cb = JitInst::new(if matches!(cond, JitCond::Eq) { JitInstKind::Cbz } else { JitInstKind::Cbnz });
                    cb.cls = cls;
                    cb.rd = rn;
                    cb.target_id = true_block.0 as i32;
                    self.push(cb);
                    if Some(false_block) != fallthrough {
                        self.emit_branch(false_block);
                    }
                    return;
                }
            }
        }
        let mut bc = JitInst::new(JitInstKind::BCond);
        bc.cond = cond;
        bc.target_id = true_block.0 as i32;
        self.push(bc);
        if Some(false_block) != fallthrough {
            self.emit_branch(false_block);
        }
    }
}

fn alu_rrr_kind(op: AluOp) -> JitInstKind {
    match op {
        AluOp::Add => JitInstKind::AddRrr,
        AluOp::Sub => JitInstKind::SubRrr,
        AluOp::Mul => JitInstKind::MulRrr,
        AluOp::SDiv => JitInstKind::SDivRrr,
        AluOp::UDiv => JitInstKind::UDivRrr,
        AluOp::And => JitInstKind::AndRrr,
        AluOp::Orr => JitInstKind::OrrRrr,
        AluOp::Eor => JitInstKind::EorRrr,
        AluOp::Lsl => JitInstKind::LslRrr,
        AluOp::Lsr => JitInstKind::LsrRrr,
        AluOp::Asr => JitInstKind::AsrRrr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func_ir::{FuncBlock, SimpleFunc};
    use crate::inst::REG_NONE;

    fn func_with(blocks: Vec<FuncBlock>) -> SimpleFunc {
        SimpleFunc { name: "test_fn".into(), frame_size: 32, callee_saved: vec![19, 20], blocks }
    }

    #[test]
    fn madd_fusion_folds_mul_then_add() {
        let block = FuncBlock {
            id: FuncBlockId(0),
            insts: vec![
                FuncInst::AluRrr { op: AluOp::Mul, cls: JitCls::W, rd: 3, rn: 0, rm: 1 },
                FuncInst::AluRrr { op: AluOp::Add, cls: JitCls::W, rd: 4, rn: 3, rm: 2 },
            ],
            term: FuncTerm::Return(Some(4)),
        };
        let f = func_with(vec![block]);
        let mut c = JitCollector::new();
        c.collect_function(&f).unwrap();
        let kinds: Vec<_> = c.insts().iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&JitInstKind::MaddRrrr));
        assert!(!kinds.contains(&JitInstKind::MulRrr));
        assert!(!kinds.contains(&JitInstKind::AddRrr));
    }

    #[test]
    fn madd_fusion_disabled_emits_separate_mul_and_add() {
        let block = FuncBlock {
            id: FuncBlockId(0),
            insts: vec![
                FuncInst::AluRrr { op: AluOp::Mul, cls: JitCls::W, rd: 3, rn: 0, rm: 1 },
                FuncInst::AluRrr { op: AluOp::Add, cls: JitCls::W, rd: 4, rn: 3, rm: 2 },
            ],
            term: FuncTerm::Return(Some(4)),
        };
        let f = func_with(vec![block]);
        let mut c = JitCollector::new().with_madd_fusion(false);
        c.collect_function(&f).unwrap();
        let kinds: Vec<_> = c.insts().iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&JitInstKind::MulRrr));
        assert!(kinds.contains(&JitInstKind::AddRrr));
        assert!(!kinds.contains(&JitInstKind::MaddRrrr));
    }

    #[test]
    fn madd_fusion_skipped_when_mul_result_reused() {
        let block = FuncBlock {
            id: FuncBlockId(0),
            insts: vec![
                FuncInst::AluRrr { op: AluOp::Mul, cls: JitCls::W, rd: 3, rn: 0, rm: 1 },
                FuncInst::AluRrr { op: AluOp::Add, cls: JitCls::W, rd: 4, rn: 3, rm: 2 },
                FuncInst::AluRrr { op: AluOp::Add, cls: JitCls::W, rd: 5, rn: 3, rm: 4 },
            ],
            term: FuncTerm::Return(Some(5)),
        };
        let f = func_with(vec![block]);
        let mut c = JitCollector::new();
        c.collect_function(&f).unwrap();
        let kinds: Vec<_> = c.insts().iter().map(|i| i.kind).collect();
        assert!(!kinds.contains(&JitInstKind::MaddRrrr));
        assert!(kinds.contains(&JitInstKind::MulRrr));
    }

    #[test]
    fn cbz_fusion_folds_cmp_zero_and_branch_eq() {
        let b0 = FuncBlock {
            id: FuncBlockId(0),
            insts: vec![FuncInst::CmpImm { cls: JitCls::W, rn: 2, imm: 0 }],
            term: FuncTerm::CondBranch { cond: JitCond::Eq, true_block: FuncBlockId(1), false_block: FuncBlockId(2) },
        };
        let b1 = FuncBlock { id: FuncBlockId(1), insts: vec![], term: FuncTerm::Return(None) };
        let b2 = FuncBlock { id: FuncBlockId(2), insts: vec![], term: FuncTerm::Return(None) };
        let f = func_with(vec![b0, b1, b2]);
        let mut c = JitCollector::new();
        c.collect_function(&f).unwrap();
        let kinds: Vec<_> = c.insts().iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&JitInstKind::Cbz));
        assert!(!kinds.contains(&JitInstKind::CmpRi));
        assert!(!kinds.contains(&JitInstKind::BCond));
    }

    #[test]
    fn ldp_fusion_folds_adjacent_word_loads() {
        let block = FuncBlock {
            id: FuncBlockId(0),
            insts: vec![
                FuncInst::Load { width: LoadWidth::Word, cls: JitCls::L, rd: 1, base: REG_NONE + 2, offset: 0 },
                FuncInst::Load { width: LoadWidth::Word, cls: JitCls::L, rd: 2, base: REG_NONE + 2, offset: 8 },
            ],
            term: FuncTerm::Return(None),
        };
        let f = func_with(vec![block]);
        let mut c = JitCollector::new();
        c.collect_function(&f).unwrap();
        let kinds: Vec<_> = c.insts().iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&JitInstKind::Ldp));
        assert_eq!(kinds.iter().filter(|k| **k == JitInstKind::LdrRi).count(), 0);
    }

    #[test]
    fn large_constant_load_splits_into_movz_movk() {
        let block = FuncBlock {
            id: FuncBlockId(0),
            insts: vec![FuncInst::MovImm { cls: JitCls::L, rd: 5, value: 0x0001_0002_0003_0004 }],
            term: FuncTerm::Return(Some(5)),
        };
        let f = func_with(vec![block]);
        let mut c = JitCollector::new();
        c.collect_function(&f).unwrap();
        let movz_count = c.insts().iter().filter(|i| i.kind == JitInstKind::Movz).count();
        let movk_count = c.insts().iter().filter(|i| i.kind == JitInstKind::Movk).count();
        assert_eq!(movz_count, 1);
        assert_eq!(movk_count, 3);
    }

    #[test]
    fn oversized_load_offset_materializes_scratch_register() {
        let block = FuncBlock {
            id: FuncBlockId(0),
            insts: vec![FuncInst::Load { width: LoadWidth::Word, cls: JitCls::L, rd: 1, base: 2, offset: 100_000 }],
            term: FuncTerm::Return(Some(1)),
        };
        let f = func_with(vec![block]);
        let mut c = JitCollector::new();
        c.collect_function(&f).unwrap();
        let kinds: Vec<_> = c.insts().iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&JitInstKind::Movz));
        assert!(kinds.contains(&JitInstKind::AddRrr));
        let load = c.insts().iter().find(|i| i.kind == JitInstKind::LdrRi).unwrap();
        assert_eq!(load.rn, REG_IP0);
        assert_eq!(load.imm, 0);
    }

    #[test]
    fn full_function_emits_prologue_body_epilogue() {
        let block = FuncBlock {
            id: FuncBlockId(0),
            insts: vec![FuncInst::AluRri { op: AluOp::Add, cls: JitCls::W, rd: 0, rn: 0, imm: 1 }],
            term: FuncTerm::Return(Some(0)),
        };
        let f = func_with(vec![block]);
        let mut c = JitCollector::new();
        c.collect_function(&f).unwrap();
        let kinds: Vec<_> = c.insts().iter().map(|i| i.kind).collect();
        assert_eq!(kinds.first(), Some(&JitInstKind::FuncBegin));
        assert_eq!(kinds.last(), Some(&JitInstKind::FuncEnd));
        assert!(kinds.contains(&JitInstKind::StpPre));
        assert!(kinds.contains(&JitInstKind::Ret));
        assert_eq!(c.nfunc(), 1);
    }

    #[test]
    fn histogram_counts_every_emitted_kind() {
        let block = FuncBlock {
            id: FuncBlockId(0),
            insts: vec![FuncInst::CallExt { symbol: "print_int".into(), dest: None }],
            term: FuncTerm::Return(None),
        };
        let f = func_with(vec![block]);
        let mut c = JitCollector::new();
        c.collect_function(&f).unwrap();
        let mut hist = JitHistogram::default();
        hist.accumulate(c.insts());
        assert!(hist.total() > 0);
        assert!(hist.dump().contains("CALL_EXT"));
    }
}
