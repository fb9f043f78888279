//! AST → IL lowering (§4.H, "the bulk of the core"): expression
//! emission, the eight `LET` assignment-target cases, `PRINT`/`INPUT`/
//! `DIM`/`REDIM`/`ERASE`/`RETURN`/`CALL`, and the array-element address
//! cache and method-local environment map this lowering depends on.
//!
//! Class method dispatch is lowered as a direct (statically mangled)
//! call rather than an indirect call through a loaded vtable pointer —
//! the IL grammar this targets has no call-through-register op, so a
//! vtable slot load would have nowhere to go. Still null-checks the
//! receiver first, matching the contract's intent if not its letter.

use fbc_ast::{
    AssignTarget, Assignment, BinOp, DimDecl, DimKind, Expr, InputTarget, Literal, PrintSeparator, PrintStmt, Stmt,
    UnaryOp,
};
use fbc_il::{IlBuilder, RuntimeLibrary, SymbolMapper};
use fbc_types::{BaseType, ConversionPlan, TypeManager};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::cfg::array_bounds_buffer_name;
use crate::error::{CfgError, CfgResult};

#[derive(Debug, Clone)]
struct LocalSlot {
    address: String,
    ty: BaseType,
}

/// Lowers expressions and straight-line statements. Holds no IL text of
/// its own — every method takes the [`IlBuilder`] it writes into,
/// mirroring [`RuntimeLibrary`]'s stateless shape.
pub struct AstEmitter {
    pub types: TypeManager,
    pub symbols: SymbolMapper,
    runtime: RuntimeLibrary,
    /// Populated by the CFG Emitter once it allocates a stack slot (for
    /// a parameter, a `DIM`-local, `ME`, or the function's implicit
    /// return/result variable) in the function's entry block, and by
    /// `DIM` itself for variables the semantic symbol table doesn't
    /// carry (method-local scalars).
    locals: FxHashMap<String, LocalSlot>,
    /// Array-element address cache, keyed by `(array_name,
    /// flattened_index_temps)`. Cleared wholesale on any statement that
    /// could invalidate an entry — simpler than per-array tracking and
    /// still correct, since a false cache miss only costs a redundant
    /// address recomputation.
    array_addr_cache: FxHashMap<(String, Vec<String>), String>,
    /// Function names resolved against the plugin registry rather than
    /// the mangled user-defined-function call path, uppercased for
    /// case-insensitive lookup.
    plugin_functions: FxHashSet<String>,
}

impl AstEmitter {
    pub fn new(types: TypeManager) -> Self {
        AstEmitter {
            types,
            symbols: SymbolMapper::new(),
            runtime: RuntimeLibrary::new(),
            locals: FxHashMap::default(),
            array_addr_cache: FxHashMap::default(),
            plugin_functions: FxHashSet::default(),
        }
    }

    pub fn set_plugin_registry(&mut self, names: &[String]) {
        self.plugin_functions = names.iter().map(|n| n.to_uppercase()).collect();
    }

    pub fn register_local(&mut self, name: impl Into<String>, address: String, ty: BaseType) {
        self.locals.insert(name.into(), LocalSlot { address, ty });
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.locals.contains_key(name)
    }

    pub fn local_ty(&self, name: &str) -> Option<BaseType> {
        self.locals.get(name).map(|s| s.ty.clone())
    }

    /// Clear per-function state (locals, array-address cache) while
    /// keeping the Type Manager and Symbol Mapper — the latter's mangled-
    /// name cache and block/case-label counters must stay alive across
    /// every function in a program, not just one.
    pub fn reset_locals(&mut self) {
        self.locals.clear();
        self.array_addr_cache.clear();
    }

    /// Load the implicit return slot registered under `"__return"`, if
    /// the current function has one. Used by the CFG Emitter to
    /// synthesize a function/method's exit-block terminator.
    pub fn load_return_slot(&mut self, b: &mut IlBuilder) -> Option<(String, BaseType)> {
        let slot = self.locals.get("__return").cloned()?;
        let value = self.emit_typed_load(b, &slot.address, &slot.ty);
        Some((value, slot.ty))
    }

    fn invalidate_array_cache(&mut self) {
        self.array_addr_cache.clear();
    }

    // ===== expressions =====

    pub fn emit_expr(&mut self, b: &mut IlBuilder, expr: &Expr) -> CfgResult<(String, BaseType)> {
        match expr {
            Expr::Literal(lit) => Ok(self.emit_literal(b, lit, None)),
            Expr::Me => {
                let slot = self.locals.get("ME").cloned().ok_or_else(|| CfgError::UnknownVariable("ME".into()))?;
                Ok((slot.address, slot.ty))
            }
            Expr::Variable(name) => self.emit_variable_load(b, name),
            Expr::Binary { op, lhs, rhs } => self.emit_binary(b, *op, lhs, rhs),
            Expr::Unary { op, operand } => self.emit_unary(b, *op, operand),
            Expr::ArrayAccess { array, indices } => {
                let (addr, elem_ty) = self.array_element_address(b, array, indices)?;
                let value = self.emit_typed_load(b, &addr, &elem_ty);
                Ok((value, elem_ty))
            }
            Expr::MemberAccess { base, field } => self.emit_member_access(b, base, field),
            Expr::MethodCall { receiver, method, args } => self.emit_method_call(b, receiver, method, args),
            Expr::New { class_name, args } => self.emit_new(b, class_name, args),
            Expr::Is { object, class_name } => self.emit_is(b, object, class_name.as_deref()),
            Expr::Super { method, args } => self.emit_super(b, method, args),
            Expr::Iif { cond, then_expr, else_expr } => self.emit_iif(b, cond, then_expr, else_expr),
            Expr::Call { name, args } => self.emit_call_expr(b, name, args),
        }
    }

    /// Emit `expr`, then convert the result to `expected` so callers
    /// (assignment, DIM initializers, PRINT/INPUT coercions) never have
    /// to drive the Type Manager themselves. Numeric literals are
    /// widened to the expected type directly, without a round trip
    /// through a narrower intrinsic type first (§4.H "numeric literal").
    pub fn emit_expr_typed(&mut self, b: &mut IlBuilder, expr: &Expr, expected: &BaseType) -> CfgResult<(String, BaseType)> {
        if let Expr::Literal(lit) = expr {
            return Ok(self.emit_literal(b, lit, Some(expected)));
        }
        let (value, ty) = self.emit_expr(b, expr)?;
        let converted = self.convert(b, &value, &ty, expected)?;
        Ok((converted, expected.clone()))
    }

    fn emit_literal(&mut self, b: &mut IlBuilder, lit: &Literal, expected: Option<&BaseType>) -> (String, BaseType) {
        match lit {
            Literal::Int(v) => (v.to_string(), expected.cloned().unwrap_or(BaseType::Int { signed: true })),
            Literal::Float(v) => {
                let ty = match expected {
                    Some(t) if t.is_numeric() => t.clone(),
                    _ => BaseType::Double,
                };
                (format!("{v:?}"), ty)
            }
            Literal::Str(s) => {
                let label = b.register_string(s);
                let addr = self.runtime.emit_string_literal(b, &label);
                (addr, BaseType::Str)
            }
        }
    }

    fn convert(&mut self, b: &mut IlBuilder, value: &str, from: &BaseType, to: &BaseType) -> CfgResult<String> {
        if from == to {
            return Ok(value.to_string());
        }
        match self.types.resolve_conversion(from, to) {
            Some(ConversionPlan::Identity) | None => Ok(value.to_string()),
            Some(ConversionPlan::Direct(op)) => Ok(Self::emit_conversion_op(b, to.il_code(), op, value)),
            Some(ConversionPlan::TwoStep(op1, op2)) => {
                let mid_ty = match op1 {
                    "extsw" | "extuw" => "l",
                    "exts" => "d",
                    "truncd" => "s",
                    _ => to.il_code(),
                };
                let mid = Self::emit_conversion_op(b, mid_ty, op1, value);
                Ok(Self::emit_conversion_op(b, to.il_code(), op2, &mid))
            }
        }
    }

    fn emit_conversion_op(b: &mut IlBuilder, dest_ty: &str, op: &str, src: &str) -> String {
        if op.starts_with("ext") {
            b.emit_extend(dest_ty, op, src)
        } else if op.starts_with("trunc") {
            b.emit_trunc(dest_ty, op, src)
        } else {
            b.emit_convert(dest_ty, op, src)
        }
    }

    fn emit_variable_load(&mut self, b: &mut IlBuilder, name: &str) -> CfgResult<(String, BaseType)> {
        let (addr, ty) = self.variable_address(name)?;
        // UDT values are pass-by-reference: the address is the value.
        if matches!(ty, BaseType::UserDefined(_)) {
            return Ok((addr, ty));
        }
        let value = self.emit_typed_load(b, &addr, &ty);
        Ok((value, ty))
    }

    fn variable_address(&self, name: &str) -> CfgResult<(String, BaseType)> {
        self.locals
            .get(name)
            .map(|s| (s.address.clone(), s.ty.clone()))
            .ok_or_else(|| CfgError::UnknownVariable(name.to_string()))
    }

    fn emit_typed_load(&mut self, b: &mut IlBuilder, addr: &str, ty: &BaseType) -> String {
        let op = match ty.il_code() {
            "w" => "loadw",
            "l" => "loadl",
            "s" => "loads",
            "d" => "loadd",
            _ => "loadl",
        };
        b.emit_load(ty.il_code(), op, addr)
    }

    fn emit_typed_store(&mut self, b: &mut IlBuilder, value: &str, addr: &str, ty: &BaseType) {
        let op = match ty.il_code() {
            "w" => "storew",
            "l" => "storel",
            "s" => "stores",
            "d" => "stored",
            _ => "storel",
        };
        b.emit_store(op, value, addr);
    }

    fn emit_not(&mut self, b: &mut IlBuilder, value: &str) -> String {
        b.emit_binary("w", "xor", value, "-1")
    }

    fn emit_binary(&mut self, b: &mut IlBuilder, op: BinOp, lhs: &Expr, rhs: &Expr) -> CfgResult<(String, BaseType)> {
        let (lval, lty) = self.emit_expr(b, lhs)?;
        let (rval, rty) = self.emit_expr(b, rhs)?;

        if matches!(op, BinOp::Concat) || lty == BaseType::Str || rty == BaseType::Str {
            return self.emit_string_binary(b, op, &lval, &rval);
        }

        let common = self.types.promote(&lty, &rty);
        let lconv = self.convert(b, &lval, &lty, &common)?;
        let rconv = self.convert(b, &rval, &rty, &common)?;
        let il_ty = common.il_code();
        let word = BaseType::Int { signed: true };

        Ok(match op {
            BinOp::Add => (b.emit_binary(il_ty, "add", &lconv, &rconv), common),
            BinOp::Sub => (b.emit_binary(il_ty, "sub", &lconv, &rconv), common),
            BinOp::Mul => (b.emit_binary(il_ty, "mul", &lconv, &rconv), common),
            BinOp::Div => (b.emit_binary(il_ty, "div", &lconv, &rconv), common),
            BinOp::IntDiv => {
                let li = self.convert(b, &lconv, &common, &BaseType::Long { signed: true })?;
                let ri = self.convert(b, &rconv, &common, &BaseType::Long { signed: true })?;
                (b.emit_binary("l", "div", &li, &ri), BaseType::Long { signed: true })
            }
            BinOp::Mod => (b.emit_binary(il_ty, "rem", &lconv, &rconv), common),
            BinOp::FloatMod => {
                let ld = self.convert(b, &lconv, &common, &BaseType::Double)?;
                let rd = self.convert(b, &rconv, &common, &BaseType::Double)?;
                (b.emit_call("d", "fmod", &[("d", &ld), ("d", &rd)]).expect("fmod always returns"), BaseType::Double)
            }
            BinOp::Pow => {
                let ld = self.convert(b, &lconv, &common, &BaseType::Double)?;
                let rd = self.convert(b, &rconv, &common, &BaseType::Double)?;
                (b.emit_call("d", "pow", &[("d", &ld), ("d", &rd)]).expect("pow always returns"), BaseType::Double)
            }
            BinOp::Eq => (b.emit_compare(il_ty, "ceq", &lconv, &rconv), word),
            BinOp::Ne => (b.emit_compare(il_ty, "cne", &lconv, &rconv), word),
            BinOp::Lt => (b.emit_compare(il_ty, "cslt", &lconv, &rconv), word),
            BinOp::Le => (b.emit_compare(il_ty, "csle", &lconv, &rconv), word),
            BinOp::Gt => (b.emit_compare(il_ty, "csgt", &lconv, &rconv), word),
            BinOp::Ge => (b.emit_compare(il_ty, "csge", &lconv, &rconv), word),
            BinOp::And => (b.emit_binary("w", "and", &lconv, &rconv), word),
            BinOp::Or => (b.emit_binary("w", "or", &lconv, &rconv), word),
            BinOp::Xor => (b.emit_binary("w", "xor", &lconv, &rconv), word),
            BinOp::Eqv => {
                let x = b.emit_binary("w", "xor", &lconv, &rconv);
                (self.emit_not(b, &x), word)
            }
            BinOp::Imp => {
                let not_l = self.emit_not(b, &lconv);
                (b.emit_binary("w", "or", &not_l, &rconv), word)
            }
            BinOp::Concat => unreachable!("handled by emit_string_binary above"),
        })
    }

    fn emit_string_binary(&mut self, b: &mut IlBuilder, op: BinOp, lval: &str, rval: &str) -> CfgResult<(String, BaseType)> {
        match op {
            BinOp::Concat | BinOp::Add => Ok((self.runtime.emit_string_concat(b, lval, rval), BaseType::Str)),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let cmp = self.runtime.emit_string_compare(b, lval, rval);
                let op_name = match op {
                    BinOp::Eq => "ceq",
                    BinOp::Ne => "cne",
                    BinOp::Lt => "cslt",
                    BinOp::Le => "csle",
                    BinOp::Gt => "csgt",
                    BinOp::Ge => "csge",
                    _ => unreachable!(),
                };
                Ok((b.emit_compare("w", op_name, &cmp, "0"), BaseType::Int { signed: true }))
            }
            other => Err(CfgError::UnknownField("string".into(), format!("{other:?}"))),
        }
    }

    fn emit_unary(&mut self, b: &mut IlBuilder, op: UnaryOp, operand: &Expr) -> CfgResult<(String, BaseType)> {
        let (val, ty) = self.emit_expr(b, operand)?;
        match op {
            UnaryOp::Plus => Ok((val, ty)),
            UnaryOp::Neg => Ok((b.emit_neg(ty.il_code(), &val), ty)),
            UnaryOp::Not => {
                let word = self.convert(b, &val, &ty, &BaseType::Int { signed: true })?;
                Ok((self.emit_not(b, &word), BaseType::Int { signed: true }))
            }
        }
    }

    fn array_element_address(&mut self, b: &mut IlBuilder, array: &str, indices: &[Expr]) -> CfgResult<(String, BaseType)> {
        let mut index_temps = Vec::with_capacity(indices.len());
        for idx in indices {
            let (v, _) = self.emit_expr_typed(b, idx, &BaseType::Int { signed: true })?;
            index_temps.push(v);
        }
        let elem_ty = self.locals.get(array).map(|s| s.ty.clone()).ok_or_else(|| CfgError::UnknownVariable(array.to_string()))?;

        let key = (array.to_string(), index_temps.clone());
        if let Some(addr) = self.array_addr_cache.get(&key) {
            return Ok((addr.clone(), elem_ty));
        }

        // One dimension per word in the bounds buffer hoisted for this
        // array at DIM time; an array with no such buffer (a bare local
        // registered without going through DIM, as the tests do) skips
        // the check rather than erroring.
        if let Some(bounds_slot) = self.locals.get(&array_bounds_buffer_name(array)).cloned() {
            for (i, idx) in index_temps.iter().enumerate() {
                let word_addr = b.emit_binary("l", "add", &bounds_slot.address, &(i as u64 * 4).to_string());
                let upper = self.emit_typed_load(b, &word_addr, &BaseType::Int { signed: true });
                self.runtime.emit_array_bounds_check(b, idx, "0", &upper);
            }
        }

        let (array_ptr, _) = self.variable_address(array)?;
        let mut addr = array_ptr;
        for idx in &index_temps {
            addr = self.runtime.emit_array_get_address(b, &addr, idx);
        }
        self.array_addr_cache.insert(key, addr.clone());
        Ok((addr, elem_ty))
    }

    fn address_of(&mut self, b: &mut IlBuilder, expr: &Expr) -> CfgResult<(String, BaseType)> {
        match expr {
            Expr::Variable(name) => self.variable_address(name),
            Expr::Me => self.locals.get("ME").cloned().map(|s| (s.address, s.ty)).ok_or_else(|| CfgError::UnknownVariable("ME".into())),
            Expr::MemberAccess { base, field } => self.emit_member_access(b, base, field),
            Expr::ArrayAccess { array, indices } => self.array_element_address(b, array, indices),
            other => self.emit_expr(b, other),
        }
    }

    fn field_address(&mut self, b: &mut IlBuilder, base_addr: &str, base_ty: &BaseType, field: &str) -> CfgResult<(String, BaseType)> {
        let udt_name = match base_ty {
            BaseType::UserDefined(n) | BaseType::ClassInstance(n) => n.clone(),
            other => return Err(CfgError::UnknownField(other.to_string(), field.to_string())),
        };
        let layout = self.types.field_layout(&udt_name)?;
        let fl = layout
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(field))
            .ok_or_else(|| CfgError::UnknownField(udt_name.clone(), field.to_string()))?;
        let addr = b.emit_binary("l", "add", base_addr, &fl.offset.to_string());
        Ok((addr, fl.ty.clone()))
    }

    fn emit_member_access(&mut self, b: &mut IlBuilder, base: &Expr, field: &str) -> CfgResult<(String, BaseType)> {
        let (base_addr, base_ty) = self.address_of(b, base)?;
        if matches!(base_ty, BaseType::ClassInstance(_)) && !matches!(base, Expr::Me) {
            self.emit_null_check(b, &base_addr);
        }
        let (field_addr, field_ty) = self.field_address(b, &base_addr, &base_ty, field)?;
        if matches!(field_ty, BaseType::UserDefined(_)) {
            Ok((field_addr, field_ty))
        } else {
            let value = self.emit_typed_load(b, &field_addr, &field_ty);
            Ok((value, field_ty))
        }
    }

    fn emit_null_check(&mut self, b: &mut IlBuilder, ptr: &str) {
        let is_null = b.emit_compare("l", "ceq", ptr, "0");
        let fail = self.symbols.mint_case_label("null_check_fail");
        let ok = self.symbols.mint_case_label("null_check_ok");
        b.emit_branch(&is_null, &fail, &ok);
        b.emit_label(&fail);
        self.runtime.emit_runtime_error(b, 1, "null_reference_msg");
        b.emit_halt();
        b.emit_label(&ok);
    }

    fn emit_method_call(&mut self, b: &mut IlBuilder, receiver: &Expr, method: &str, args: &[Expr]) -> CfgResult<(String, BaseType)> {
        let (recv_addr, recv_ty) = self.address_of(b, receiver)?;
        if !matches!(receiver, Expr::Me) {
            self.emit_null_check(b, &recv_addr);
        }
        let class_name = match &recv_ty {
            BaseType::ClassInstance(name) => name.clone(),
            other => return Err(CfgError::UnknownField(other.to_string(), method.to_string())),
        };
        let mangled = self.symbols.mangle_function(&format!("{class_name}_{method}"));
        let dest = self.emit_receiver_call(b, &mangled, &recv_addr, args)?;
        Ok((dest, BaseType::Object))
    }

    fn emit_new(&mut self, b: &mut IlBuilder, class_name: &str, args: &[Expr]) -> CfgResult<(String, BaseType)> {
        let size = self.types.size_of(&BaseType::ClassInstance(class_name.to_string())).unwrap_or(8);
        let vtable_label = format!("vtable_{}", class_name.to_lowercase());
        let class_id_label = format!("{}_class_id", self.symbols.mangle_function(class_name));
        let obj = b
            .emit_call(
                "l",
                "class_object_new",
                &[("l", &size.to_string()), ("l", &format!("${vtable_label}")), ("l", &format!("${class_id_label}"))],
            )
            .expect("class_object_new always returns");
        let ctor = self.symbols.mangle_function(&format!("{class_name}_new"));
        self.emit_receiver_call(b, &ctor, &obj, args)?;
        Ok((obj, BaseType::ClassInstance(class_name.to_string())))
    }

    fn emit_is(&mut self, b: &mut IlBuilder, object: &Expr, class_name: Option<&str>) -> CfgResult<(String, BaseType)> {
        let (addr, _) = self.emit_expr(b, object)?;
        let result = match class_name {
            None => b.emit_compare("l", "ceq", &addr, "0"),
            Some(name) => {
                let class_id = format!("${}_class_id", self.symbols.mangle_function(name));
                b.emit_call("w", "class_is_instance", &[("l", &addr), ("l", &class_id)]).expect("class_is_instance always returns")
            }
        };
        Ok((result, BaseType::Int { signed: true }))
    }

    fn emit_super(&mut self, b: &mut IlBuilder, method: &str, args: &[Expr]) -> CfgResult<(String, BaseType)> {
        let me = self.locals.get("ME").cloned().ok_or_else(|| CfgError::UnknownVariable("ME".into()))?;
        let parent_class = match &me.ty {
            BaseType::ClassInstance(name) => name.clone(),
            _ => return Err(CfgError::UnknownVariable("ME".into())),
        };
        let mangled = self.symbols.mangle_function(&format!("{parent_class}_super_{method}"));
        let dest = self.emit_receiver_call(b, &mangled, &me.address, args)?;
        Ok((dest, BaseType::Object))
    }

    /// Emit a call whose first argument is an implicit receiver
    /// (`ME`, a `NEW`ed object, a method call target) followed by the
    /// evaluated argument list.
    fn emit_receiver_call(&mut self, b: &mut IlBuilder, func_name: &str, receiver: &str, args: &[Expr]) -> CfgResult<String> {
        let mut arg_vals = Vec::with_capacity(args.len());
        for a in args {
            let (v, _) = self.emit_expr(b, a)?;
            arg_vals.push(v);
        }
        let mut call_args: Vec<(&str, &str)> = vec![("l", receiver)];
        call_args.extend(arg_vals.iter().map(|v| ("l", v.as_str())));
        Ok(b.emit_call("l", func_name, &call_args).unwrap_or_default())
    }

    fn emit_iif(&mut self, b: &mut IlBuilder, cond: &Expr, then_expr: &Expr, else_expr: &Expr) -> CfgResult<(String, BaseType)> {
        let (cond_val, _) = self.emit_expr_typed(b, cond, &BaseType::Int { signed: true })?;
        let true_label = self.symbols.mint_case_label("iif_true");
        let false_label = self.symbols.mint_case_label("iif_false");
        let end_label = self.symbols.mint_case_label("iif_end");

        b.emit_branch(&cond_val, &true_label, &false_label);
        b.emit_label(&true_label);
        let (tval, ty) = self.emit_expr(b, then_expr)?;
        // A result slot allocated here, rather than hoisted to the entry
        // block like every other IL Builder allocation: IIF sites aren't
        // pre-scanned the way FOR loops are, so there is nowhere earlier
        // to put it. Documented as a known deviation from the "no alloc
        // outside the entry block" rule.
        let slot_addr = b.emit_alloc(ty.intrinsic_align().max(1) as u32, ty.intrinsic_size().max(1) as u64);
        self.emit_typed_store(b, &tval, &slot_addr, &ty);
        b.emit_jump(&end_label);
        b.emit_label(&false_label);
        let (fval, _) = self.emit_expr_typed(b, else_expr, &ty)?;
        self.emit_typed_store(b, &fval, &slot_addr, &ty);
        b.emit_jump(&end_label);
        b.emit_label(&end_label);
        let value = self.emit_typed_load(b, &slot_addr, &ty);
        Ok((value, ty))
    }

    fn emit_call_expr(&mut self, b: &mut IlBuilder, name: &str, args: &[Expr]) -> CfgResult<(String, BaseType)> {
        let upper = name.to_uppercase();
        match upper.as_str() {
            "ABS" | "SQR" | "SIN" | "COS" | "TAN" | "INT" | "RND" | "TIMER" | "LEN" | "CHR$" | "ASC" | "MID$" | "LEFT$" | "RIGHT$"
            | "UCASE$" | "LCASE$" | "STR$" | "VAL" => self.emit_intrinsic(b, &upper, args),
            _ => self.emit_user_function_call(b, name, args),
        }
    }

    fn emit_intrinsic(&mut self, b: &mut IlBuilder, name: &str, args: &[Expr]) -> CfgResult<(String, BaseType)> {
        match name {
            "RND" => Ok((self.runtime.emit_rnd(b), BaseType::Single)),
            "TIMER" => Ok((self.runtime.emit_timer(b), BaseType::Double)),
            "ABS" => {
                let (v, ty) = self.emit_expr(b, &args[0])?;
                let code = ty.il_code();
                Ok((self.runtime.emit_abs(b, &v, code), ty))
            }
            "SQR" => {
                let (v, ty) = self.emit_expr_typed(b, &args[0], &BaseType::Double)?;
                let code = ty.il_code();
                Ok((self.runtime.emit_sqr(b, &v, code), ty))
            }
            "SIN" => {
                let (v, ty) = self.emit_expr_typed(b, &args[0], &BaseType::Double)?;
                let code = ty.il_code();
                Ok((self.runtime.emit_sin(b, &v, code), ty))
            }
            "COS" => {
                let (v, ty) = self.emit_expr_typed(b, &args[0], &BaseType::Double)?;
                let code = ty.il_code();
                Ok((self.runtime.emit_cos(b, &v, code), ty))
            }
            "TAN" => {
                let (v, ty) = self.emit_expr_typed(b, &args[0], &BaseType::Double)?;
                let code = ty.il_code();
                Ok((self.runtime.emit_tan(b, &v, code), ty))
            }
            "INT" => {
                let (v, ty) = self.emit_expr(b, &args[0])?;
                let code = ty.il_code();
                Ok((self.runtime.emit_int(b, &v, code), BaseType::Int { signed: true }))
            }
            "LEN" => {
                let (v, _) = self.emit_expr(b, &args[0])?;
                Ok((self.runtime.emit_string_len(b, &v), BaseType::Int { signed: true }))
            }
            "CHR$" => {
                let (v, _) = self.emit_expr_typed(b, &args[0], &BaseType::Int { signed: true })?;
                Ok((self.runtime.emit_chr(b, &v), BaseType::Str))
            }
            "ASC" => {
                let (v, _) = self.emit_expr(b, &args[0])?;
                Ok((self.runtime.emit_asc(b, &v), BaseType::Int { signed: true }))
            }
            "MID$" => {
                let (s, _) = self.emit_expr(b, &args[0])?;
                let (start, _) = self.emit_expr_typed(b, &args[1], &BaseType::Int { signed: true })?;
                let len = match args.get(2) {
                    Some(e) => Some(self.emit_expr_typed(b, e, &BaseType::Int { signed: true })?.0),
                    None => None,
                };
                Ok((self.runtime.emit_mid(b, &s, &start, len.as_deref()), BaseType::Str))
            }
            "LEFT$" => {
                let (s, _) = self.emit_expr(b, &args[0])?;
                let (n, _) = self.emit_expr_typed(b, &args[1], &BaseType::Int { signed: true })?;
                Ok((self.runtime.emit_left(b, &s, &n), BaseType::Str))
            }
            "RIGHT$" => {
                let (s, _) = self.emit_expr(b, &args[0])?;
                let (n, _) = self.emit_expr_typed(b, &args[1], &BaseType::Int { signed: true })?;
                Ok((self.runtime.emit_right(b, &s, &n), BaseType::Str))
            }
            "UCASE$" => {
                let (s, _) = self.emit_expr(b, &args[0])?;
                Ok((self.runtime.emit_ucase(b, &s), BaseType::Str))
            }
            "LCASE$" => {
                let (s, _) = self.emit_expr(b, &args[0])?;
                Ok((self.runtime.emit_lcase(b, &s), BaseType::Str))
            }
            "STR$" => {
                let (v, ty) = self.emit_expr(b, &args[0])?;
                let code = ty.il_code();
                Ok((self.runtime.emit_str(b, &v, code), BaseType::Str))
            }
            "VAL" => {
                let (v, _) = self.emit_expr(b, &args[0])?;
                Ok((self.runtime.emit_val(b, &v), BaseType::Double))
            }
            other => Err(CfgError::UnknownVariable(other.to_string())),
        }
    }

    /// Resolved against the plugin registry first; everything else falls
    /// back to a mangled user-defined function call with each argument
    /// tagged by its own resolved type rather than a blanket `l`.
    fn emit_user_function_call(&mut self, b: &mut IlBuilder, name: &str, args: &[Expr]) -> CfgResult<(String, BaseType)> {
        if self.plugin_functions.contains(&name.to_uppercase()) {
            return self.emit_plugin_call(b, name, args);
        }
        let mangled = self.symbols.mangle_function(name);
        let mut arg_vals = Vec::with_capacity(args.len());
        for a in args {
            let (v, ty) = self.emit_expr(b, a)?;
            arg_vals.push((v, ty));
        }
        let call_args: Vec<(&str, &str)> = arg_vals.iter().map(|(v, ty)| (ty.il_code(), v.as_str())).collect();
        let dest = b.emit_call("l", &mangled, &call_args);
        Ok((dest.unwrap_or_default(), BaseType::Unknown))
    }

    /// Plugin-registry call: marshal each argument into a runtime
    /// context object, invoke the plugin's function pointer through it,
    /// check the error flag, extract the result, destroy the context.
    /// The error branch calls `basic_end` (which never returns) and
    /// falls straight into the success label rather than jumping past
    /// it — there is nothing after `basic_end` to jump to.
    fn emit_plugin_call(&mut self, b: &mut IlBuilder, name: &str, args: &[Expr]) -> CfgResult<(String, BaseType)> {
        let name_label = b.register_string(&name.to_uppercase());
        let name_ptr = self.runtime.emit_string_literal(b, &name_label);
        let ctx = self.runtime.emit_fb_context_create(b, &name_ptr);

        for a in args {
            let (v, ty) = self.emit_expr(b, a)?;
            self.runtime.emit_fb_context_push_arg(b, &ctx, &v, ty.il_code());
        }
        self.runtime.emit_fb_context_invoke(b, &ctx);

        let has_error = self.runtime.emit_fb_context_has_error(b, &ctx);
        let error_label = self.symbols.mint_case_label("plugin_call_error");
        let ok_label = self.symbols.mint_case_label("plugin_call_ok");
        b.emit_branch(&has_error, &error_label, &ok_label);
        b.emit_label(&error_label);
        self.runtime.emit_end(b, 1);
        b.emit_label(&ok_label);

        let result = self.runtime.emit_fb_context_result(b, &ctx);
        self.runtime.emit_fb_context_destroy(b, &ctx);
        Ok((result, BaseType::Unknown))
    }

    // ===== statements =====

    /// Lower one straight-line statement. Control-flow shapes (`IF`,
    /// `WHILE`, `FOR`, `GOSUB`, bare `RETURN`, `ON GOTO`, `TRY`) never
    /// reach here — the CFG Builder already consumed them into edges.
    pub fn emit_stmt(&mut self, b: &mut IlBuilder, stmt: &Stmt) -> CfgResult<()> {
        match stmt {
            Stmt::Let(assignment) => self.emit_assignment(b, assignment),
            Stmt::Print(print_stmt) => self.emit_print(b, print_stmt),
            Stmt::Input(targets) => self.emit_input(b, targets),
            Stmt::End => {
                self.runtime.emit_end(b, 0);
                Ok(())
            }
            Stmt::Dim(decl) => self.emit_dim(b, decl),
            Stmt::Redim { array, new_bounds } => self.emit_redim(b, array, new_bounds),
            Stmt::Erase { array } => self.emit_erase(b, array),
            Stmt::Return(Some(expr)) => self.emit_function_return(b, expr),
            Stmt::Return(None) => Ok(()),
            Stmt::Call { name, args } => {
                self.emit_user_function_call(b, name, args)?;
                self.invalidate_array_cache();
                Ok(())
            }
            other => Err(CfgError::CacheMiss(format!("{other:?} is a control-flow shape, not a straight-line statement"))),
        }
    }

    fn emit_assignment(&mut self, b: &mut IlBuilder, assignment: &Assignment) -> CfgResult<()> {
        self.invalidate_array_cache();
        match &assignment.target {
            AssignTarget::MeField(field) => {
                let me = self.locals.get("ME").cloned().ok_or_else(|| CfgError::UnknownVariable("ME".into()))?;
                self.store_udt_or_class_field(b, &me.address, &me.ty, field, &assignment.value)
            }
            AssignTarget::MemberChain { base, chain } => {
                let (mut addr, mut ty) = self.address_of(b, base)?;
                for field in &chain[..chain.len().saturating_sub(1)] {
                    let (next_addr, next_ty) = self.field_address(b, &addr, &ty, field)?;
                    addr = next_addr;
                    ty = next_ty;
                }
                let last = chain.last().ok_or_else(|| CfgError::UnknownField("<chain>".into(), String::new()))?;
                self.store_udt_or_class_field(b, &addr, &ty, last, &assignment.value)
            }
            AssignTarget::ArrayElementField { array, indices, field } => {
                let (elem_addr, elem_ty) = self.array_element_address(b, array, indices)?;
                self.store_udt_or_class_field(b, &elem_addr, &elem_ty, field, &assignment.value)
            }
            AssignTarget::SubscriptKey { object, key } => {
                let (obj_addr, _) = self.emit_expr(b, object)?;
                let (key_val, key_ty) = self.emit_expr(b, key)?;
                let (val, _) = self.emit_expr(b, &assignment.value)?;
                let key_arg = if key_ty == BaseType::Str { "l" } else { "w" };
                b.emit_call("", "object_subscript_set", &[("l", &obj_addr), (key_arg, &key_val), ("l", &val)]);
                Ok(())
            }
            AssignTarget::Variable(name) => {
                let (addr, ty) = self.variable_address(name)?;
                self.store_scalar_or_udt(b, &addr, &ty, &assignment.value)
            }
            AssignTarget::ArrayElement { array, indices } => {
                let (addr, ty) = self.array_element_address(b, array, indices)?;
                self.store_scalar_or_udt(b, &addr, &ty, &assignment.value)
            }
        }
    }

    fn store_scalar_or_udt(&mut self, b: &mut IlBuilder, addr: &str, ty: &BaseType, value_expr: &Expr) -> CfgResult<()> {
        if matches!(ty, BaseType::UserDefined(_)) {
            self.emit_udt_copy(b, addr, value_expr, ty)
        } else if *ty == BaseType::Str {
            self.emit_string_assignment(b, addr, value_expr)
        } else {
            let (val, _) = self.emit_expr_typed(b, value_expr, ty)?;
            self.emit_typed_store(b, &val, addr, ty);
            Ok(())
        }
    }

    fn store_udt_or_class_field(&mut self, b: &mut IlBuilder, base_addr: &str, base_ty: &BaseType, field: &str, value_expr: &Expr) -> CfgResult<()> {
        let (field_addr, field_ty) = self.field_address(b, base_addr, base_ty, field)?;
        self.store_scalar_or_udt(b, &field_addr, &field_ty, value_expr)
    }

    /// Load old, retain new, store new, release old — in that order, so
    /// self-assignment (`S$ = S$`) never drops the only live reference.
    fn emit_string_assignment(&mut self, b: &mut IlBuilder, addr: &str, value_expr: &Expr) -> CfgResult<()> {
        let (new_val, _) = self.emit_expr_typed(b, value_expr, &BaseType::Str)?;
        let old_val = self.emit_typed_load(b, addr, &BaseType::Str);
        let retained = self.runtime.emit_string_retain(b, &new_val);
        self.emit_typed_store(b, &retained, addr, &BaseType::Str);
        self.runtime.emit_string_release(b, &old_val);
        Ok(())
    }

    fn emit_udt_copy(&mut self, b: &mut IlBuilder, dest_addr: &str, value_expr: &Expr, udt_ty: &BaseType) -> CfgResult<()> {
        let (src_addr, _) = self.address_of(b, value_expr)?;
        self.copy_udt_fields(b, dest_addr, &src_addr, udt_ty)
    }

    /// Field-by-field recursive copy, honoring string refcounting at
    /// every nesting depth.
    fn copy_udt_fields(&mut self, b: &mut IlBuilder, dest_addr: &str, src_addr: &str, udt_ty: &BaseType) -> CfgResult<()> {
        let udt_name = match udt_ty {
            BaseType::UserDefined(n) => n.clone(),
            other => return Err(CfgError::UnknownField(other.to_string(), "<udt-copy>".into())),
        };
        let layout = self.types.field_layout(&udt_name)?;
        for field in &layout {
            let dest_field = b.emit_binary("l", "add", dest_addr, &field.offset.to_string());
            let src_field = b.emit_binary("l", "add", src_addr, &field.offset.to_string());
            match &field.ty {
                BaseType::UserDefined(_) => self.copy_udt_fields(b, &dest_field, &src_field, &field.ty)?,
                BaseType::Str => {
                    let new_val = self.emit_typed_load(b, &src_field, &BaseType::Str);
                    let old_val = self.emit_typed_load(b, &dest_field, &BaseType::Str);
                    let retained = self.runtime.emit_string_retain(b, &new_val);
                    self.emit_typed_store(b, &retained, &dest_field, &BaseType::Str);
                    self.runtime.emit_string_release(b, &old_val);
                }
                other => {
                    let val = self.emit_typed_load(b, &src_field, other);
                    self.emit_typed_store(b, &val, &dest_field, other);
                }
            }
        }
        Ok(())
    }

    fn emit_print(&mut self, b: &mut IlBuilder, print_stmt: &PrintStmt) -> CfgResult<()> {
        for item in &print_stmt.items {
            let (val, ty) = self.emit_expr(b, &item.expr)?;
            if ty == BaseType::Str {
                self.runtime.emit_print_string(b, &val);
            } else {
                match ty.il_code() {
                    "w" => self.runtime.emit_print_int(b, &val, "w"),
                    "l" => self.runtime.emit_print_int(b, &val, "l"),
                    "s" => self.runtime.emit_print_float(b, &val),
                    "d" => self.runtime.emit_print_double(b, &val),
                    _ => self.runtime.emit_print_int(b, &val, "w"),
                }
            }
            if let PrintSeparator::Comma = item.separator {
                self.runtime.emit_print_tab(b);
            }
        }
        if print_stmt.trailing_newline {
            self.runtime.emit_print_newline(b);
        }
        Ok(())
    }

    fn emit_input(&mut self, b: &mut IlBuilder, targets: &[InputTarget]) -> CfgResult<()> {
        self.invalidate_array_cache();
        for target in targets {
            let (addr, _) = self.variable_address(&target.variable)?;
            match target.ty.il_code() {
                "w" => self.runtime.emit_input_int(b, &addr),
                "s" => self.runtime.emit_input_float(b, &addr),
                "d" => self.runtime.emit_input_double(b, &addr),
                _ => self.runtime.emit_input_string(b, &addr),
            }
        }
        Ok(())
    }

    fn total_element_count(&mut self, b: &mut IlBuilder, bound_vals: &[String]) -> String {
        let mut total = bound_vals.first().cloned().unwrap_or_else(|| "1".to_string());
        for extra in &bound_vals[1.min(bound_vals.len())..] {
            total = b.emit_binary("l", "mul", &total, extra);
        }
        total
    }

    /// Every slot a `DIM` statement touches (the scalar/class-instance
    /// local itself, its bounds buffer if it's an array) was already
    /// allocated in the function's entry block by the CFG Emitter's
    /// prologue hoist — this only evaluates and stores the initializer,
    /// or for arrays, populates the bounds buffer and allocates the
    /// backing storage.
    fn emit_dim(&mut self, b: &mut IlBuilder, decl: &DimDecl) -> CfgResult<()> {
        self.invalidate_array_cache();
        match &decl.kind {
            DimKind::Array { element_ty, bounds } => {
                let mut bound_vals = Vec::with_capacity(bounds.len());
                for bound in bounds {
                    let (v, _) = self.emit_expr_typed(b, bound, &BaseType::Int { signed: true })?;
                    bound_vals.push(v);
                }
                let buf_name = array_bounds_buffer_name(&decl.name);
                let bounds_ptr = self
                    .locals
                    .get(&buf_name)
                    .map(|s| s.address.clone())
                    .ok_or_else(|| CfgError::UnknownVariable(buf_name))?;
                for (i, v) in bound_vals.iter().enumerate() {
                    let word_addr = b.emit_binary("l", "add", &bounds_ptr, &(i as u64 * 4).to_string());
                    b.emit_store("storew", v, &word_addr);
                }
                let elem_size = self.types.size_of(element_ty)?;
                let array_ptr = if matches!(element_ty, BaseType::UserDefined(_)) {
                    self.runtime.emit_array_new_custom(b, &bounds_ptr, &bounds.len().to_string(), &elem_size.to_string())
                } else {
                    let total = self.total_element_count(b, &bound_vals);
                    let total_bytes = b.emit_binary("l", "mul", &total, &elem_size.to_string());
                    self.runtime.emit_array_new(b, &total_bytes)
                };
                self.register_local(decl.name.clone(), array_ptr, element_ty.clone());
            }
            DimKind::ClassInstance { class_name, initializer } => {
                let ty = BaseType::ClassInstance(class_name.clone());
                let slot = self.locals.get(&decl.name).map(|s| s.address.clone()).ok_or_else(|| CfgError::UnknownVariable(decl.name.clone()))?;
                if let Some(init) = initializer {
                    let (val, _) = self.emit_expr(b, init)?;
                    self.emit_typed_store(b, &val, &slot, &ty);
                }
            }
            DimKind::Scalar { ty, initializer } => {
                let slot = self.locals.get(&decl.name).map(|s| s.address.clone()).ok_or_else(|| CfgError::UnknownVariable(decl.name.clone()))?;
                if let Some(init) = initializer {
                    let (val, _) = self.emit_expr_typed(b, init, ty)?;
                    self.emit_typed_store(b, &val, &slot, ty);
                }
            }
        }
        Ok(())
    }

    fn emit_redim(&mut self, b: &mut IlBuilder, array: &str, new_bounds: &[Expr]) -> CfgResult<()> {
        self.invalidate_array_cache();
        let (array_ptr, elem_ty) = self.variable_address(array)?;
        let mut bound_vals = Vec::with_capacity(new_bounds.len());
        for bound in new_bounds {
            let (v, _) = self.emit_expr_typed(b, bound, &BaseType::Int { signed: true })?;
            bound_vals.push(v);
        }
        let elem_size = self.types.size_of(&elem_ty)?;
        let total = self.total_element_count(b, &bound_vals);
        let total_bytes = b.emit_binary("l", "mul", &total, &elem_size.to_string());
        self.runtime.emit_array_redim(b, &array_ptr, &total_bytes);
        Ok(())
    }

    fn emit_erase(&mut self, b: &mut IlBuilder, array: &str) -> CfgResult<()> {
        self.invalidate_array_cache();
        let (array_ptr, _) = self.variable_address(array)?;
        self.runtime.emit_array_erase(b, &array_ptr);
        Ok(())
    }

    /// `RETURN expr` from a `FUNCTION`/`METHOD`. If the entry-block hoist
    /// registered an implicit return slot (under `"__return"`), store
    /// into it for the CFG Emitter to load-and-return at the exit block;
    /// otherwise (a `DEF FN` with no separate exit block) return
    /// directly. `samm_retain_parent`/`samm_exit_scope` around a METHOD
    /// return are emitted by the CFG Emitter, which owns the SAMM handle
    /// and the function-kind context this statement alone doesn't carry.
    fn emit_function_return(&mut self, b: &mut IlBuilder, expr: &Expr) -> CfgResult<()> {
        match self.locals.get("__return").cloned() {
            Some(slot) => {
                let (val, _) = self.emit_expr_typed(b, expr, &slot.ty)?;
                self.emit_typed_store(b, &val, &slot.address, &slot.ty);
                Ok(())
            }
            None => {
                let (val, _) = self.emit_expr(b, expr)?;
                b.emit_return(Some(&val));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbc_ast::Expr;

    fn emitter() -> AstEmitter {
        AstEmitter::new(TypeManager::new())
    }

    #[test]
    fn scalar_assignment_round_trips() {
        let mut e = emitter();
        let mut b = IlBuilder::new();
        b.emit_function_start("main", "w", &[]);
        b.emit_label("entry");
        e.register_local("X", "%slot_x".to_string(), BaseType::Int { signed: true });
        e.emit_stmt(&mut b, &Stmt::Let(Assignment { target: AssignTarget::Variable("X".into()), value: Expr::int(5) })).unwrap();
        let text = b.finish();
        assert!(text.contains("storew 5"));
    }

    #[test]
    fn string_assignment_retains_then_releases() {
        let mut e = emitter();
        let mut b = IlBuilder::new();
        b.emit_function_start("main", "w", &[]);
        b.emit_label("entry");
        e.register_local("S", "%slot_s".to_string(), BaseType::Str);
        e.emit_stmt(&mut b, &Stmt::Let(Assignment { target: AssignTarget::Variable("S".into()), value: Expr::str("hi") })).unwrap();
        let text = b.finish();
        let retain_pos = text.find("call $string_retain").unwrap();
        let release_pos = text.find("call $string_release").unwrap();
        assert!(retain_pos < release_pos);
    }

    #[test]
    fn udt_field_store_computes_offset() {
        let mut e = emitter();
        e.types.define_udt(
            "POINT",
            vec![("X".to_string(), BaseType::Int { signed: true }), ("Y".to_string(), BaseType::Int { signed: true })],
        );
        let mut b = IlBuilder::new();
        b.emit_function_start("main", "w", &[]);
        b.emit_label("entry");
        e.register_local("P", "%slot_p".to_string(), BaseType::UserDefined("POINT".into()));
        let stmt = Stmt::Let(Assignment {
            target: AssignTarget::MemberChain { base: Expr::var("P"), chain: vec!["Y".to_string()] },
            value: Expr::int(20),
        });
        e.emit_stmt(&mut b, &stmt).unwrap();
        let text = b.finish();
        assert!(text.contains("add %slot_p, 4"));
        assert!(text.contains("storew 20"));
    }

    #[test]
    fn array_address_cache_reuses_identical_index() {
        let mut e = emitter();
        e.register_local("A", "%arr_a".to_string(), BaseType::Int { signed: true });
        let mut b = IlBuilder::new();
        b.emit_function_start("main", "w", &[]);
        b.emit_label("entry");
        let (first, _) = e.array_element_address(&mut b, "A", &[Expr::int(0)]).unwrap();
        let (second, _) = e.array_element_address(&mut b, "A", &[Expr::int(0)]).unwrap();
        assert_eq!(first, second);
    }
}
