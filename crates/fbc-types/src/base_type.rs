//! Source-level base types and their IL-facing properties.

use std::fmt;

/// A source base type. Integer and string/object variants carry no
/// payload of their own; [`BaseType::UserDefined`] and
/// [`BaseType::ClassInstance`] carry the name used to look their layout
/// up in a [`crate::udt::UdtTable`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BaseType {
    Byte { signed: bool },
    Short { signed: bool },
    Int { signed: bool },
    Long { signed: bool },
    Single,
    Double,
    Str,
    Unicode,
    Void,
    Object,
    UserDefined(String),
    ClassInstance(String),
    Unknown,
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseType::Byte { signed: true } => write!(f, "byte"),
            BaseType::Byte { signed: false } => write!(f, "ubyte"),
            BaseType::Short { signed: true } => write!(f, "short"),
            BaseType::Short { signed: false } => write!(f, "ushort"),
            BaseType::Int { signed: true } => write!(f, "int"),
            BaseType::Int { signed: false } => write!(f, "uint"),
            BaseType::Long { signed: true } => write!(f, "long"),
            BaseType::Long { signed: false } => write!(f, "ulong"),
            BaseType::Single => write!(f, "single"),
            BaseType::Double => write!(f, "double"),
            BaseType::Str => write!(f, "string"),
            BaseType::Unicode => write!(f, "unicode"),
            BaseType::Void => write!(f, "void"),
            BaseType::Object => write!(f, "object"),
            BaseType::UserDefined(name) => write!(f, "{name}"),
            BaseType::ClassInstance(name) => write!(f, "{name}"),
            BaseType::Unknown => write!(f, "?"),
        }
    }
}

impl BaseType {
    /// The IL type code this base type lowers to: `w`, `l`, `s`, `d`, or
    /// empty for void. Strings, unicode strings, objects, UDTs, and
    /// class instances are all represented as pointers (`l`) at the IL
    /// level; the Type Manager is the only place that distinguishes them.
    pub fn il_code(&self) -> &'static str {
        match self {
            BaseType::Byte { .. } | BaseType::Short { .. } | BaseType::Int { .. } => "w",
            BaseType::Long { .. } => "l",
            BaseType::Single => "s",
            BaseType::Double => "d",
            BaseType::Str
            | BaseType::Unicode
            | BaseType::Object
            | BaseType::UserDefined(_)
            | BaseType::ClassInstance(_) => "l",
            BaseType::Void => "",
            BaseType::Unknown => "w",
        }
    }

    /// Size in bytes for every variant except [`BaseType::UserDefined`],
    /// whose size depends on its registered field layout — use
    /// [`crate::udt::UdtTable::size_of`] for those.
    pub fn intrinsic_size(&self) -> usize {
        match self {
            BaseType::Byte { .. } => 1,
            BaseType::Short { .. } => 2,
            BaseType::Int { .. } => 4,
            BaseType::Long { .. } => 8,
            BaseType::Single => 4,
            BaseType::Double => 8,
            BaseType::Str
            | BaseType::Unicode
            | BaseType::Object
            | BaseType::UserDefined(_)
            | BaseType::ClassInstance(_) => 8,
            BaseType::Void => 0,
            BaseType::Unknown => 4,
        }
    }

    /// Natural alignment in bytes. For every variant here, alignment
    /// equals size (UDTs are the one exception, handled separately).
    pub fn intrinsic_align(&self) -> usize {
        match self {
            BaseType::Void => 1,
            BaseType::Unknown => 4,
            other => other.intrinsic_size(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            BaseType::Byte { .. }
                | BaseType::Short { .. }
                | BaseType::Int { .. }
                | BaseType::Long { .. }
                | BaseType::Single
                | BaseType::Double
        )
    }

    pub fn is_signed(&self) -> bool {
        match self {
            BaseType::Byte { signed } | BaseType::Short { signed } | BaseType::Int { signed } | BaseType::Long { signed } => *signed,
            BaseType::Single | BaseType::Double => true,
            _ => false,
        }
    }
}

/// Promotion rank used when two base types meet in a binary expression.
/// Ordered lowest to highest; string outranks every numeric type (BASIC
/// string concatenation/comparison dominates mixed expressions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Int,
    Long,
    Single,
    Double,
    Str,
}

fn rank_of(bt: &BaseType) -> Rank {
    match bt {
        BaseType::Byte { .. } | BaseType::Short { .. } | BaseType::Int { .. } | BaseType::Unknown => Rank::Int,
        BaseType::Long { .. } => Rank::Long,
        BaseType::Single => Rank::Single,
        BaseType::Double => Rank::Double,
        BaseType::Str | BaseType::Unicode => Rank::Str,
        // Object-like types never participate in numeric promotion; callers
        // should have already rejected this combination at a higher level.
        // Treat conservatively as the lowest rank so a mistaken call does
        // not silently widen past what the caller expected.
        BaseType::Void | BaseType::Object | BaseType::UserDefined(_) | BaseType::ClassInstance(_) => Rank::Int,
    }
}

/// Promote two operand types to a common type per §4.D: string
/// dominates, then double, single, long, int (smaller integers widen to
/// int).
pub fn promote(a: &BaseType, b: &BaseType) -> BaseType {
    match rank_of(a).max(rank_of(b)) {
        Rank::Str => BaseType::Str,
        Rank::Double => BaseType::Double,
        Rank::Single => BaseType::Single,
        Rank::Long => BaseType::Long { signed: true },
        Rank::Int => BaseType::Int { signed: true },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn il_codes_match_spec_table() {
        assert_eq!(BaseType::Int { signed: true }.il_code(), "w");
        assert_eq!(BaseType::Long { signed: true }.il_code(), "l");
        assert_eq!(BaseType::Single.il_code(), "s");
        assert_eq!(BaseType::Double.il_code(), "d");
        assert_eq!(BaseType::Void.il_code(), "");
        assert_eq!(BaseType::Str.il_code(), "l");
    }

    #[test]
    fn promotion_prefers_string_over_everything() {
        assert_eq!(promote(&BaseType::Str, &BaseType::Double), BaseType::Str);
    }

    #[test]
    fn promotion_widens_small_ints_to_int() {
        let a = BaseType::Byte { signed: true };
        let b = BaseType::Short { signed: true };
        assert_eq!(promote(&a, &b), BaseType::Int { signed: true });
    }

    #[test]
    fn promotion_orders_double_over_single_over_long() {
        assert_eq!(promote(&BaseType::Double, &BaseType::Single), BaseType::Double);
        assert_eq!(promote(&BaseType::Single, &BaseType::Long { signed: true }), BaseType::Single);
        assert_eq!(
            promote(&BaseType::Long { signed: true }, &BaseType::Int { signed: true }),
            BaseType::Long { signed: true }
        );
    }
}
