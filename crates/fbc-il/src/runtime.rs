//! Thin IL-level wrappers for runtime calls: print, string ops, array
//! ops, math, input, and the handful of control-flow helpers (END,
//! runtime error reporting). Does not interpret runtime behavior —
//! only contracts the call's name, argument types, and return type.
//!
//! Canonical runtime function names follow the original's
//! `runtime_library.h` naming scheme (`string_*`, `array_*`, `basic_*`).

use crate::il_builder::IlBuilder;

#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeLibrary;

impl RuntimeLibrary {
    pub fn new() -> Self {
        RuntimeLibrary
    }

    fn call_void(&self, b: &mut IlBuilder, func: &str, args: &[(&str, &str)]) {
        b.emit_call("", func, args);
    }

    fn call(&self, b: &mut IlBuilder, ret_ty: &str, func: &str, args: &[(&str, &str)]) -> String {
        b.emit_call(ret_ty, func, args).expect("call with non-empty ret_ty always returns a temp")
    }

    // === Print/Output ===

    pub fn emit_print_int(&self, b: &mut IlBuilder, value: &str, value_ty: &str) -> () {
        let widened;
        let arg = if value_ty == "w" {
            widened = b.emit_extend("l", "extsw", value);
            widened.as_str()
        } else {
            value
        };
        self.call_void(b, "print_int", &[("l", arg)]);
    }

    pub fn emit_print_float(&self, b: &mut IlBuilder, value: &str) {
        self.call_void(b, "print_float", &[("s", value)]);
    }

    pub fn emit_print_double(&self, b: &mut IlBuilder, value: &str) {
        self.call_void(b, "print_double", &[("d", value)]);
    }

    pub fn emit_print_string(&self, b: &mut IlBuilder, string_ptr: &str) {
        self.call_void(b, "print_string", &[("l", string_ptr)]);
    }

    pub fn emit_print_newline(&self, b: &mut IlBuilder) {
        self.call_void(b, "print_newline", &[]);
    }

    pub fn emit_print_tab(&self, b: &mut IlBuilder) {
        self.call_void(b, "print_tab", &[]);
    }

    // === String Operations ===

    pub fn emit_string_concat(&self, b: &mut IlBuilder, left: &str, right: &str) -> String {
        self.call(b, "l", "string_concat", &[("l", left), ("l", right)])
    }

    pub fn emit_string_len(&self, b: &mut IlBuilder, string_ptr: &str) -> String {
        self.call(b, "w", "string_len", &[("l", string_ptr)])
    }

    pub fn emit_chr(&self, b: &mut IlBuilder, char_code: &str) -> String {
        self.call(b, "l", "string_chr", &[("w", char_code)])
    }

    pub fn emit_asc(&self, b: &mut IlBuilder, string_ptr: &str) -> String {
        self.call(b, "w", "string_asc", &[("l", string_ptr)])
    }

    pub fn emit_mid(&self, b: &mut IlBuilder, string_ptr: &str, start: &str, length: Option<&str>) -> String {
        let len_arg = length.unwrap_or("-1");
        self.call(b, "l", "string_mid", &[("l", string_ptr), ("w", start), ("w", len_arg)])
    }

    pub fn emit_left(&self, b: &mut IlBuilder, string_ptr: &str, count: &str) -> String {
        self.call(b, "l", "string_left", &[("l", string_ptr), ("w", count)])
    }

    pub fn emit_right(&self, b: &mut IlBuilder, string_ptr: &str, count: &str) -> String {
        self.call(b, "l", "string_right", &[("l", string_ptr), ("w", count)])
    }

    pub fn emit_ucase(&self, b: &mut IlBuilder, string_ptr: &str) -> String {
        self.call(b, "l", "string_ucase", &[("l", string_ptr)])
    }

    pub fn emit_lcase(&self, b: &mut IlBuilder, string_ptr: &str) -> String {
        self.call(b, "l", "string_lcase", &[("l", string_ptr)])
    }

    pub fn emit_string_compare(&self, b: &mut IlBuilder, left: &str, right: &str) -> String {
        self.call(b, "w", "string_compare", &[("l", left), ("l", right)])
    }

    pub fn emit_string_assign(&self, b: &mut IlBuilder, dest: &str, src: &str) {
        self.call_void(b, "string_assign", &[("l", dest), ("l", src)]);
    }

    /// Load the address of an already-registered string pool entry.
    pub fn emit_string_literal(&self, b: &mut IlBuilder, pool_label: &str) -> String {
        b.emit_load("l", "loadl", &format!("${pool_label}"))
    }

    // === String Lifecycle ===

    pub fn emit_string_clone(&self, b: &mut IlBuilder, string_ptr: &str) -> String {
        self.call(b, "l", "string_clone", &[("l", string_ptr)])
    }

    pub fn emit_string_retain(&self, b: &mut IlBuilder, string_ptr: &str) -> String {
        self.call(b, "l", "string_retain", &[("l", string_ptr)])
    }

    pub fn emit_string_release(&self, b: &mut IlBuilder, string_ptr: &str) {
        self.call_void(b, "string_release", &[("l", string_ptr)]);
    }

    // === Array Operations ===

    pub fn emit_array_new(&self, b: &mut IlBuilder, total_size: &str) -> String {
        self.call(b, "l", "array_new", &[("l", total_size)])
    }

    /// Allocate a UDT-element array from a populated bounds buffer
    /// rather than a single flattened element count — `array_new` has no
    /// way to tell the runtime how many dimensions back the pointer it
    /// hands out, which UDT array element access needs for its own
    /// bounds checks.
    pub fn emit_array_new_custom(&self, b: &mut IlBuilder, bounds_ptr: &str, dims: &str, elem_size: &str) -> String {
        self.call(b, "l", "array_new_custom", &[("l", bounds_ptr), ("w", dims), ("l", elem_size)])
    }

    pub fn emit_array_get_address(&self, b: &mut IlBuilder, array_ptr: &str, index: &str) -> String {
        self.call(b, "l", "array_get_address", &[("l", array_ptr), ("w", index)])
    }

    pub fn emit_array_bounds_check(&self, b: &mut IlBuilder, index: &str, lower: &str, upper: &str) {
        self.call_void(b, "array_bounds_check", &[("w", index), ("w", lower), ("w", upper)]);
    }

    pub fn emit_array_redim(&self, b: &mut IlBuilder, array_ptr: &str, new_size: &str) {
        self.call_void(b, "array_redim", &[("l", array_ptr), ("l", new_size)]);
    }

    pub fn emit_array_erase(&self, b: &mut IlBuilder, array_ptr: &str) {
        self.call_void(b, "array_erase", &[("l", array_ptr)]);
    }

    // === Math Functions ===

    pub fn emit_abs(&self, b: &mut IlBuilder, value: &str, value_ty: &str) -> String {
        let func = match value_ty {
            "w" => "basic_abs_i",
            "l" => "basic_abs_l",
            "s" => "basic_abs_f",
            _ => "basic_abs_d",
        };
        self.call(b, value_ty, func, &[(value_ty, value)])
    }

    pub fn emit_sqr(&self, b: &mut IlBuilder, value: &str, value_ty: &str) -> String {
        self.call(b, value_ty, "basic_sqrt", &[(value_ty, value)])
    }

    pub fn emit_sin(&self, b: &mut IlBuilder, value: &str, value_ty: &str) -> String {
        self.call(b, value_ty, "basic_sin", &[(value_ty, value)])
    }

    pub fn emit_cos(&self, b: &mut IlBuilder, value: &str, value_ty: &str) -> String {
        self.call(b, value_ty, "basic_cos", &[(value_ty, value)])
    }

    pub fn emit_tan(&self, b: &mut IlBuilder, value: &str, value_ty: &str) -> String {
        self.call(b, value_ty, "basic_tan", &[(value_ty, value)])
    }

    pub fn emit_int(&self, b: &mut IlBuilder, value: &str, value_ty: &str) -> String {
        self.call(b, "w", "basic_int", &[(value_ty, value)])
    }

    pub fn emit_rnd(&self, b: &mut IlBuilder) -> String {
        self.call(b, "s", "basic_rnd", &[])
    }

    pub fn emit_timer(&self, b: &mut IlBuilder) -> String {
        self.call(b, "d", "basic_timer", &[])
    }

    // === Input ===

    pub fn emit_input_int(&self, b: &mut IlBuilder, dest: &str) {
        self.call_void(b, "input_int", &[("l", dest)]);
    }

    pub fn emit_input_float(&self, b: &mut IlBuilder, dest: &str) {
        self.call_void(b, "input_float", &[("l", dest)]);
    }

    pub fn emit_input_double(&self, b: &mut IlBuilder, dest: &str) {
        self.call_void(b, "input_double", &[("l", dest)]);
    }

    pub fn emit_input_string(&self, b: &mut IlBuilder, dest: &str) {
        self.call_void(b, "input_string", &[("l", dest)]);
    }

    // === Memory/Conversion ===

    pub fn emit_str(&self, b: &mut IlBuilder, value: &str, value_ty: &str) -> String {
        self.call(b, "l", "basic_str", &[(value_ty, value)])
    }

    pub fn emit_val(&self, b: &mut IlBuilder, string_ptr: &str) -> String {
        self.call(b, "d", "basic_val", &[("l", string_ptr)])
    }

    // === Control Flow Helpers ===

    pub fn emit_end(&self, b: &mut IlBuilder, exit_code: i32) {
        self.call_void(b, "basic_end", &[("w", &exit_code.to_string())]);
    }

    pub fn emit_runtime_error(&self, b: &mut IlBuilder, error_code: i32, message_pool_label: &str) {
        let code = error_code.to_string();
        self.call_void(b, "basic_runtime_error", &[("w", &code), ("l", &format!("${message_pool_label}"))]);
    }

    // === Scope-Aware Memory Manager (SAMM) ===

    pub fn emit_samm_init(&self, b: &mut IlBuilder) {
        self.call_void(b, "samm_init", &[]);
    }

    pub fn emit_samm_shutdown(&self, b: &mut IlBuilder) {
        self.call_void(b, "samm_shutdown", &[]);
    }

    pub fn emit_samm_enter_scope(&self, b: &mut IlBuilder) {
        self.call_void(b, "samm_enter_scope", &[]);
    }

    pub fn emit_samm_exit_scope(&self, b: &mut IlBuilder) {
        self.call_void(b, "samm_exit_scope", &[]);
    }

    /// Move a string/object result into the caller's scope so it survives
    /// this function's own `samm_exit_scope`.
    pub fn emit_samm_retain_parent(&self, b: &mut IlBuilder, ptr: &str) {
        self.call_void(b, "samm_retain_parent", &[("l", ptr)]);
    }

    // === Plugin Context (fb_context) ===
    //
    // A plugin-registry call marshals its arguments into one of these
    // context objects, invokes the plugin's function pointer indirectly
    // through it, checks the error flag, extracts the result, and tears
    // the context down — the runtime owns the marshaling format, this
    // wrapper only contracts the call sequence.

    pub fn emit_fb_context_create(&self, b: &mut IlBuilder, name_ptr: &str) -> String {
        self.call(b, "l", "fb_context_create", &[("l", name_ptr)])
    }

    pub fn emit_fb_context_push_arg(&self, b: &mut IlBuilder, ctx: &str, value: &str, value_ty: &str) {
        self.call_void(b, "fb_context_push_arg", &[("l", ctx), (value_ty, value)]);
    }

    pub fn emit_fb_context_invoke(&self, b: &mut IlBuilder, ctx: &str) {
        self.call_void(b, "fb_context_invoke", &[("l", ctx)]);
    }

    pub fn emit_fb_context_has_error(&self, b: &mut IlBuilder, ctx: &str) -> String {
        self.call(b, "w", "fb_context_has_error", &[("l", ctx)])
    }

    pub fn emit_fb_context_result(&self, b: &mut IlBuilder, ctx: &str) -> String {
        self.call(b, "l", "fb_context_result", &[("l", ctx)])
    }

    pub fn emit_fb_context_destroy(&self, b: &mut IlBuilder, ctx: &str) {
        self.call_void(b, "fb_context_destroy", &[("l", ctx)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_int_widens_word_to_long() {
        let mut b = IlBuilder::new();
        b.emit_function_start("main", "", &[]);
        b.emit_label("entry");
        let rt = RuntimeLibrary::new();
        rt.emit_print_int(&mut b, "%t.0", "w");
        let text = b.finish();
        assert!(text.contains("extsw"));
        assert!(text.contains("call $print_int"));
    }

    #[test]
    fn string_concat_returns_pointer_typed_call() {
        let mut b = IlBuilder::new();
        b.emit_function_start("main", "", &[]);
        b.emit_label("entry");
        let rt = RuntimeLibrary::new();
        let dest = rt.emit_string_concat(&mut b, "%a", "%b");
        let text = b.finish();
        assert!(text.contains(&format!("{dest} =l call $string_concat(l %a, l %b)")));
    }

    #[test]
    fn array_erase_is_void_call() {
        let mut b = IlBuilder::new();
        b.emit_function_start("main", "", &[]);
        b.emit_label("entry");
        let rt = RuntimeLibrary::new();
        rt.emit_array_erase(&mut b, "%arr");
        let text = b.finish();
        assert!(text.contains("call $array_erase(l %arr)"));
        assert!(!text.contains("=l call $array_erase"));
    }

    #[test]
    fn samm_retain_parent_is_void_call() {
        let mut b = IlBuilder::new();
        b.emit_function_start("main", "", &[]);
        b.emit_label("entry");
        let rt = RuntimeLibrary::new();
        rt.emit_samm_retain_parent(&mut b, "%s");
        let text = b.finish();
        assert!(text.contains("call $samm_retain_parent(l %s)"));
    }
}
