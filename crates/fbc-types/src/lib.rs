//! Base types, IL type codes, promotion, conversion-op selection, and
//! UDT field layout.
//!
//! [`TypeManager`] is the single façade the rest of the pipeline talks
//! to; [`base_type`], [`conversion`], and [`udt`] hold the pieces it is
//! assembled from.

pub mod base_type;
pub mod conversion;
pub mod udt;

pub use base_type::{promote, BaseType};
pub use conversion::{resolve_conversion, ConversionPlan, IlOp};
pub use udt::{FieldLayout, UdtError, UdtTable};

/// Façade combining the UDT registry with the free functions in
/// [`base_type`] and [`conversion`]. The CFG/AST emitters hold one of
/// these for the lifetime of a compilation unit.
#[derive(Debug, Default)]
pub struct TypeManager {
    udts: UdtTable,
}

impl TypeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_udt(&mut self, name: impl Into<String>, fields: Vec<(String, BaseType)>) {
        self.udts.define(name, fields);
    }

    pub fn is_udt(&self, name: &str) -> bool {
        self.udts.is_defined(name)
    }

    pub fn size_of(&self, ty: &BaseType) -> Result<usize, UdtError> {
        self.udts.size_of(ty)
    }

    pub fn align_of(&self, ty: &BaseType) -> Result<usize, UdtError> {
        self.udts.align_of(ty)
    }

    pub fn field_layout(&self, udt_name: &str) -> Result<Vec<FieldLayout>, UdtError> {
        self.udts.field_layout(udt_name)
    }

    pub fn il_code(&self, ty: &BaseType) -> &'static str {
        ty.il_code()
    }

    pub fn promote(&self, a: &BaseType, b: &BaseType) -> BaseType {
        promote(a, b)
    }

    pub fn resolve_conversion(&self, from: &BaseType, to: &BaseType) -> Option<ConversionPlan> {
        resolve_conversion(from, to)
    }
}
