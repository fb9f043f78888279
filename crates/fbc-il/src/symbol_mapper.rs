//! Name mangling and per-function symbol scope tracking.
//!
//! Mangling strips a BASIC type-suffix character (`%` integer, `&`
//! long, `!` single, `#` double, `$` string) or a previously applied
//! text suffix, sanitizes what remains, prefixes it (`$` global, `%`
//! local), re-appends a normalized suffix, and escapes collisions with
//! IL reserved words. Results are cached per `(is_global, basic_name)`.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{IlError, IlResult};

const RESERVED_WORDS: &[&str] = &[
    "function", "data", "export", "call", "ret", "jmp", "jnz", "hlt", "alloc4", "alloc8",
    "alloc16", "w", "l", "s", "d", "b", "h", "loadw", "loadl", "loads", "loadd", "storew",
    "storel", "stores", "stored",
];

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Strip a trailing BASIC type-suffix character, returning the bare
/// name and the normalized text suffix that should be re-appended.
fn strip_suffix(name: &str) -> (&str, Option<&'static str>) {
    match name.chars().last() {
        Some('%') => (&name[..name.len() - 1], Some("_i")),
        Some('&') => (&name[..name.len() - 1], Some("_l")),
        Some('!') => (&name[..name.len() - 1], Some("_f")),
        Some('#') => (&name[..name.len() - 1], Some("_d")),
        Some('$') => (&name[..name.len() - 1], Some("_s")),
        _ => (name, None),
    }
}

fn escape_if_reserved(core: String) -> String {
    if RESERVED_WORDS.contains(&core.as_str()) {
        format!("{core}_esc")
    } else {
        core
    }
}

fn mangle_with_prefix(prefix: char, basic_name: &str) -> String {
    let (stripped, suffix) = strip_suffix(basic_name);
    let mut core = sanitize(stripped);
    if let Some(s) = suffix {
        core.push_str(s);
    }
    let core = escape_if_reserved(core);
    format!("{prefix}{core}")
}

struct FunctionScope {
    name: String,
    #[allow(dead_code)]
    params: Vec<String>,
    shared: FxHashSet<String>,
}

#[derive(Default)]
pub struct SymbolMapper {
    cache: FxHashMap<(bool, String), String>,
    scopes: Vec<FunctionScope>,
    case_label_counter: u32,
    emitted_labels: FxHashSet<String>,
}

impl SymbolMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mangle a plain variable name, caching by `(is_global, basic_name)`.
    pub fn mangle_variable(&mut self, basic_name: &str, is_global: bool) -> String {
        let key = (is_global, basic_name.to_string());
        if let Some(m) = self.cache.get(&key) {
            return m.clone();
        }
        let prefix = if is_global { '$' } else { '%' };
        let mangled = mangle_with_prefix(prefix, basic_name);
        self.cache.insert(key, mangled.clone());
        mangled
    }

    /// Mangle an array name (distinct from the scalar prefix so array
    /// data and a same-named scalar never collide).
    pub fn mangle_array(&mut self, basic_name: &str, is_global: bool) -> String {
        let (stripped, suffix) = strip_suffix(basic_name);
        let mut core = format!("arr_{}", sanitize(stripped));
        if let Some(s) = suffix {
            core.push_str(s);
        }
        let core = escape_if_reserved(core);
        let prefix = if is_global { '$' } else { '%' };
        format!("{prefix}{core}")
    }

    /// Mangle an array's descriptor slot (bounds/rank metadata), again
    /// distinct from both the scalar and the array-data prefixes.
    pub fn mangle_array_descriptor(&mut self, basic_name: &str, is_global: bool) -> String {
        let (stripped, _) = strip_suffix(basic_name);
        let core = escape_if_reserved(format!("arrdesc_{}", sanitize(stripped)));
        let prefix = if is_global { '$' } else { '%' };
        format!("{prefix}{core}")
    }

    pub fn mangle_function(&self, name: &str) -> String {
        format!("func_{}", sanitize(name))
    }

    pub fn mangle_sub(&self, name: &str) -> String {
        format!("sub_{}", sanitize(name))
    }

    pub fn mangle_deffn(&self, name: &str) -> String {
        format!("deffn_{}", sanitize(name))
    }

    pub fn enter_function_scope(&mut self, name: &str, params: &[String]) {
        self.scopes.push(FunctionScope {
            name: name.to_string(),
            params: params.to_vec(),
            shared: FxHashSet::default(),
        });
    }

    pub fn exit_function_scope(&mut self) -> IlResult<()> {
        self.scopes.pop().map(|_| ()).ok_or(IlError::NoActiveFunctionScope)
    }

    /// Empty at module scope, per §4.E.
    pub fn current_function_name(&self) -> &str {
        self.scopes.last().map(|s| s.name.as_str()).unwrap_or("")
    }

    pub fn mark_shared(&mut self, basic_name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.shared.insert(basic_name.to_string());
        }
    }

    pub fn is_shared(&self, basic_name: &str) -> bool {
        self.scopes.last().map(|s| s.shared.contains(basic_name)).unwrap_or(false)
    }

    pub fn block_label(id: u32) -> String {
        format!("block_{id}")
    }

    /// Mint a unique label for synthesized control flow (CASE
    /// fall-through targets, IIF branches) distinct from the CFG's
    /// `block_<id>` labels.
    pub fn mint_case_label(&mut self, prefix: &str) -> String {
        let label = format!("{prefix}_{}", self.case_label_counter);
        self.case_label_counter += 1;
        self.emitted_labels.insert(label.clone());
        label
    }

    pub fn has_emitted_label(&self, label: &str) -> bool {
        self.emitted_labels.contains(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_and_reappends_type_suffix() {
        let mut m = SymbolMapper::new();
        assert_eq!(m.mangle_variable("COUNT%", true), "$count_i");
        assert_eq!(m.mangle_variable("NAME$", false), "%name_s");
    }

    #[test]
    fn sanitizes_non_alphanumerics() {
        let mut m = SymbolMapper::new();
        assert_eq!(m.mangle_variable("MY.VAR", true), "$my_var");
    }

    #[test]
    fn caches_by_global_flag_and_name() {
        let mut m = SymbolMapper::new();
        let g = m.mangle_variable("X", true);
        let l = m.mangle_variable("X", false);
        assert_ne!(g, l);
        assert_eq!(m.mangle_variable("X", true), g);
    }

    #[test]
    fn escapes_reserved_word_collision() {
        let mut m = SymbolMapper::new();
        assert_eq!(m.mangle_variable("W", true), "$w_esc");
    }

    #[test]
    fn array_and_descriptor_prefixes_are_distinct_from_scalar() {
        let mut m = SymbolMapper::new();
        let scalar = m.mangle_variable("A", true);
        let array = m.mangle_array("A", true);
        let desc = m.mangle_array_descriptor("A", true);
        assert_ne!(scalar, array);
        assert_ne!(array, desc);
    }

    #[test]
    fn function_scope_is_lifo_and_tracks_shared_vars() {
        let mut m = SymbolMapper::new();
        m.enter_function_scope("DoThing", &["X".to_string()]);
        assert_eq!(m.current_function_name(), "DoThing");
        m.mark_shared("Y");
        assert!(m.is_shared("Y"));
        m.exit_function_scope().unwrap();
        assert_eq!(m.current_function_name(), "");
        assert!(m.exit_function_scope().is_err());
    }

    #[test]
    fn distinct_prefixes_for_func_sub_deffn() {
        let m = SymbolMapper::new();
        assert_eq!(m.mangle_function("Foo"), "func_Foo");
        assert_eq!(m.mangle_sub("Foo"), "sub_Foo");
        assert_eq!(m.mangle_deffn("Foo"), "deffn_Foo");
    }
}
