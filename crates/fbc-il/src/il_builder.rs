//! Low-level IL text emission.
//!
//! Produces the textual IL consumed by the embedded backend:
//!
//! ```text
//! export function <rettype-or-empty> $<name>(<params>) {
//! @<label>
//!     <temp> =<type> <op> <operand>, <operand>
//!     <terminator>
//! }
//! ```
//!
//! The builder only knows how to append well-formed instruction lines;
//! it has no opinion about control flow shape or naming policy (that's
//! the CFG Emitter's and Symbol Mapper's job respectively).

use rustc_hash::FxHashMap;

/// A function parameter as it appears in an `export function` header.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: &'static str,
}

#[derive(Debug, Default)]
pub struct IlBuilder {
    out: String,
    temp_counter: u32,
    label_counter: u32,
    in_function: bool,
    /// True until the second `emit_label` call within the current
    /// function; allocation-like instructions must land while this is
    /// still true (§4.C: "must appear in the function's *first* labeled
    /// block").
    labels_in_function: u32,
    string_labels: FxHashMap<String, String>,
    string_order: Vec<String>,
    string_counter: u32,
}

impl IlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_temp(&mut self) -> String {
        let t = format!("%t.{}", self.temp_counter);
        self.temp_counter += 1;
        t
    }

    /// Mint a unique label of the form `prefix_N`, independent of any
    /// function's block labels. Used for synthesized control flow that
    /// doesn't come from the Symbol Mapper's `block_<id>` scheme (e.g.
    /// case fall-through targets within a single statement's lowering).
    pub fn new_label(&mut self, prefix: &str) -> String {
        let l = format!("{prefix}_{}", self.label_counter);
        self.label_counter += 1;
        l
    }

    pub fn in_first_block(&self) -> bool {
        self.labels_in_function <= 1
    }

    pub fn is_in_function(&self) -> bool {
        self.in_function
    }

    pub fn emit_function_start(&mut self, name: &str, ret_type: &str, params: &[Param]) {
        if self.in_function {
            eprintln!("fbc-il: emit_function_start('{name}') called while another function is still open");
        }
        self.temp_counter = 0;
        self.labels_in_function = 0;
        self.in_function = true;

        let params_text = params
            .iter()
            .map(|p| format!("{} {}", p.ty, p.name))
            .collect::<Vec<_>>()
            .join(", ");
        self.out.push_str(&format!("export function {ret_type} ${name}({params_text}) {{\n"));
    }

    pub fn emit_function_end(&mut self) {
        if !self.in_function {
            eprintln!("fbc-il: emit_function_end called with no open function");
            return;
        }
        self.out.push_str("}\n");
        self.in_function = false;
    }

    pub fn emit_label(&mut self, name: &str) {
        self.labels_in_function += 1;
        self.out.push_str(&format!("@{name}\n"));
    }

    pub fn emit_binary(&mut self, ty: &str, op: &str, a: &str, b: &str) -> String {
        let dest = self.new_temp();
        self.out.push_str(&format!("    {dest} ={ty} {op} {a}, {b}\n"));
        dest
    }

    pub fn emit_compare(&mut self, ty: &str, op: &str, a: &str, b: &str) -> String {
        let dest = self.new_temp();
        self.out.push_str(&format!("    {dest} =w {op}{ty} {a}, {b}\n"));
        dest
    }

    pub fn emit_neg(&mut self, ty: &str, a: &str) -> String {
        let dest = self.new_temp();
        self.out.push_str(&format!("    {dest} ={ty} neg {a}\n"));
        dest
    }

    pub fn emit_load(&mut self, ty: &str, op: &str, addr: &str) -> String {
        let dest = self.new_temp();
        self.out.push_str(&format!("    {dest} ={ty} {op} {addr}\n"));
        dest
    }

    pub fn emit_store(&mut self, op: &str, value: &str, addr: &str) {
        self.out.push_str(&format!("    {op} {value}, {addr}\n"));
    }

    /// Reserve `size` bytes aligned to `align` (4, 8, or 16), returning
    /// the temp holding its address. Must only be called while
    /// [`IlBuilder::in_first_block`] is true.
    pub fn emit_alloc(&mut self, align: u32, size: u64) -> String {
        let mnemonic = match align {
            4 => "alloc4",
            8 => "alloc8",
            16 => "alloc16",
            other => {
                eprintln!("fbc-il: emit_alloc requested non-standard alignment {other}, using alloc8");
                "alloc8"
            }
        };
        let dest = self.new_temp();
        self.out.push_str(&format!("    {dest} =l {mnemonic} {size}\n"));
        dest
    }

    pub fn emit_jump(&mut self, label: &str) {
        self.out.push_str(&format!("    jmp @{label}\n"));
    }

    pub fn emit_branch(&mut self, cond: &str, true_label: &str, false_label: &str) {
        self.out.push_str(&format!("    jnz {cond}, @{true_label}, @{false_label}\n"));
    }

    pub fn emit_return(&mut self, value: Option<&str>) {
        match value {
            Some(v) => self.out.push_str(&format!("    ret {v}\n")),
            None => self.out.push_str("    ret\n"),
        }
    }

    pub fn emit_halt(&mut self) {
        self.out.push_str("    hlt\n");
    }

    /// Emit a call. `dest` is `None` for void calls. `args` is a list of
    /// `(il_type, operand)` pairs.
    pub fn emit_call(&mut self, ret_type: &str, func_name: &str, args: &[(&str, &str)]) -> Option<String> {
        let args_text = args
            .iter()
            .map(|(ty, operand)| format!("{ty} {operand}"))
            .collect::<Vec<_>>()
            .join(", ");
        if ret_type.is_empty() {
            self.out.push_str(&format!("    call ${func_name}({args_text})\n"));
            None
        } else {
            let dest = self.new_temp();
            self.out.push_str(&format!("    {dest} ={ret_type} call ${func_name}({args_text})\n"));
            Some(dest)
        }
    }

    pub fn emit_extend(&mut self, dest_type: &str, op: &str, src: &str) -> String {
        let dest = self.new_temp();
        self.out.push_str(&format!("    {dest} ={dest_type} {op} {src}\n"));
        dest
    }

    pub fn emit_convert(&mut self, dest_type: &str, op: &str, src: &str) -> String {
        let dest = self.new_temp();
        self.out.push_str(&format!("    {dest} ={dest_type} {op} {src}\n"));
        dest
    }

    pub fn emit_trunc(&mut self, dest_type: &str, op: &str, src: &str) -> String {
        let dest = self.new_temp();
        self.out.push_str(&format!("    {dest} ={dest_type} {op} {src}\n"));
        dest
    }

    /// Emit a raw comment line (used for diagnostics on non-fatal
    /// emission issues, per SPEC_FULL.md's error-handling policy).
    pub fn emit_comment(&mut self, text: &str) {
        self.out.push_str(&format!("    # {text}\n"));
    }

    pub fn emit_global_data(&mut self, name: &str, initializer: &str) {
        self.out.push_str(&format!("export data ${name} = {{ {initializer} }}\n"));
    }

    /// Intern a string literal, returning its stable pool label
    /// (`$str_N`). Repeated registration of the same value returns the
    /// same label.
    pub fn register_string(&mut self, value: &str) -> String {
        if let Some(label) = self.string_labels.get(value) {
            return label.clone();
        }
        let label = format!("str_{}", self.string_counter);
        self.string_counter += 1;
        self.string_labels.insert(value.to_string(), label.clone());
        self.string_order.push(value.to_string());
        label
    }

    /// Emit every interned string as `export data` with a trailing NUL,
    /// in registration order.
    pub fn emit_string_pool(&mut self) {
        for value in self.string_order.clone() {
            let label = self.string_labels.get(&value).expect("interned value must have a label").clone();
            let escaped = escape_il_string(&value);
            self.out.push_str(&format!("export data ${label} = {{ b \"{escaped}\", b 0 }}\n"));
        }
    }

    pub fn reset(&mut self) {
        *self = IlBuilder::new();
    }

    pub fn finish(self) -> String {
        self.out
    }

    pub fn text(&self) -> &str {
        &self.out
    }
}

fn escape_il_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temps_are_monotonic_and_reset_per_function() {
        let mut b = IlBuilder::new();
        b.emit_function_start("foo", "w", &[]);
        assert_eq!(b.new_temp(), "%t.0");
        assert_eq!(b.new_temp(), "%t.1");
        b.emit_function_end();
        b.emit_function_start("bar", "w", &[]);
        assert_eq!(b.new_temp(), "%t.0");
    }

    #[test]
    fn first_block_tracking() {
        let mut b = IlBuilder::new();
        b.emit_function_start("foo", "w", &[]);
        assert!(b.in_first_block());
        b.emit_label("entry");
        assert!(b.in_first_block());
        b.emit_label("next");
        assert!(!b.in_first_block());
    }

    #[test]
    fn string_pool_dedupes_by_value() {
        let mut b = IlBuilder::new();
        let a = b.register_string("hello");
        let c = b.register_string("hello");
        let d = b.register_string("world");
        assert_eq!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn reset_clears_string_pool_and_counters() {
        let mut b = IlBuilder::new();
        b.emit_function_start("foo", "w", &[]);
        b.new_temp();
        b.register_string("x");
        b.reset();
        assert!(!b.is_in_function());
        b.emit_function_start("bar", "w", &[]);
        assert_eq!(b.new_temp(), "%t.0");
        assert_eq!(b.register_string("x"), "str_0");
    }

    #[test]
    fn emitted_text_matches_expected_shape() {
        let mut b = IlBuilder::new();
        b.emit_function_start("main", "w", &[]);
        b.emit_label("start");
        let t = b.emit_binary("w", "add", "1", "2");
        b.emit_return(Some(&t));
        b.emit_function_end();
        let text = b.finish();
        assert!(text.starts_with("export function w $main() {\n"));
        assert!(text.contains("@start\n"));
        assert!(text.contains("=w add 1, 2"));
        assert!(text.trim_end().ends_with('}'));
    }
}
