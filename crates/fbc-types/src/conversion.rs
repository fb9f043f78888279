//! Conversion-op selection between base types.
//!
//! Most conversions the embedded IL backend exposes are a single
//! instruction (`extsw`, `swtof`, `dtosi`, ...). Three pairs — integer to
//! double, single to long, and double to long — are not directly
//! representable and must be emitted as two chained instructions. The
//! Type Manager is the single place that knows which pairs need this.

use crate::base_type::BaseType;

/// A single named IL conversion instruction, e.g. `extsw`, `swtof`.
/// Carried as a static string because the IL Builder's `emit_extend` /
/// `emit_convert` / `emit_trunc` take the op name verbatim.
pub type IlOp = &'static str;

/// The result of resolving a conversion between two base types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionPlan {
    /// No conversion needed (types already agree at the IL level).
    Identity,
    /// A single IL instruction lowers the conversion directly.
    Direct(IlOp),
    /// Two chained IL instructions are required; the first consumes the
    /// source value, the second consumes the first's result and
    /// produces the requested destination type.
    TwoStep(IlOp, IlOp),
}

/// Resolve how to convert a value of type `from` into type `to`.
/// Returns `None` if the pair is not a recognized conversion (e.g.
/// object-to-numeric).
pub fn resolve_conversion(from: &BaseType, to: &BaseType) -> Option<ConversionPlan> {
    use BaseType::*;

    if from == to {
        return Some(ConversionPlan::Identity);
    }

    Some(match (from, to) {
        // Integer widening within the word/long domain.
        (Byte { signed }, Short { .. }) | (Byte { signed }, Int { .. }) => {
            ConversionPlan::Direct(if *signed { "extsb" } else { "extub" })
        }
        (Short { signed }, Int { .. }) => ConversionPlan::Direct(if *signed { "extsh" } else { "extuh" }),
        (Byte { signed }, Long { .. }) | (Short { signed }, Long { .. }) | (Int { signed }, Long { .. }) => {
            ConversionPlan::Direct(if *signed { "extsw" } else { "extuw" })
        }

        // Integer narrowing (truncation into a smaller register-width class).
        (Long { .. }, Byte { .. }) | (Long { .. }, Short { .. }) | (Long { .. }, Int { .. }) => {
            ConversionPlan::Direct("truncl")
        }

        // Integer to float: word-width is direct; long-width is direct to
        // single, but long-to-double requires widening through a temp
        // conversion the embedded backend doesn't expose as one op.
        (Int { signed }, Single) => ConversionPlan::Direct(if *signed { "swtof" } else { "uwtof" }),
        (Long { signed }, Single) => ConversionPlan::Direct(if *signed { "sltof" } else { "ultof" }),
        (Int { signed }, Double) => {
            ConversionPlan::TwoStep(if *signed { "extsw" } else { "extuw" }, "sltof")
        }
        (Long { signed }, Double) => ConversionPlan::Direct(if *signed { "sltof" } else { "ultof" }),

        // Float to float.
        (Single, Double) => ConversionPlan::Direct("exts"),
        (Double, Single) => ConversionPlan::Direct("truncd"),

        // Float to integer truncation.
        (Single, Int { .. }) => ConversionPlan::Direct("stosi"),
        (Single, Long { .. }) => ConversionPlan::TwoStep("exts", "dtosi"),
        (Double, Int { .. }) => ConversionPlan::Direct("dtosi"),
        (Double, Long { .. }) => ConversionPlan::TwoStep("truncd", "stosi"),

        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_type::BaseType::*;

    #[test]
    fn identity_needs_no_conversion() {
        assert_eq!(resolve_conversion(&Double, &Double), Some(ConversionPlan::Identity));
    }

    #[test]
    fn int_to_double_is_two_step() {
        let plan = resolve_conversion(&Int { signed: true }, &Double).unwrap();
        assert_eq!(plan, ConversionPlan::TwoStep("extsw", "sltof"));
    }

    #[test]
    fn single_to_long_is_two_step() {
        let plan = resolve_conversion(&Single, &Long { signed: true }).unwrap();
        assert_eq!(plan, ConversionPlan::TwoStep("exts", "dtosi"));
    }

    #[test]
    fn double_to_long_is_two_step() {
        let plan = resolve_conversion(&Double, &Long { signed: true }).unwrap();
        assert_eq!(plan, ConversionPlan::TwoStep("truncd", "stosi"));
    }

    #[test]
    fn long_to_double_is_direct() {
        let plan = resolve_conversion(&Long { signed: true }, &Double).unwrap();
        assert_eq!(plan, ConversionPlan::Direct("sltof"));
    }

    #[test]
    fn unsupported_pair_returns_none() {
        assert_eq!(resolve_conversion(&Str, &Double), None);
    }
}
