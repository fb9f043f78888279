//! User-defined type (record) field layout.
//!
//! Field layout follows natural alignment: each field starts at the next
//! offset that is a multiple of its own alignment, and the record's
//! total size is padded up to the alignment of its widest field. UDTs
//! may nest other UDTs; size/alignment computation recurses through
//! [`UdtTable`].

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::base_type::BaseType;

#[derive(Debug, Error)]
pub enum UdtError {
    #[error("UDT '{0}' is not registered")]
    UnknownUdt(String),
    #[error("UDT '{0}' field layout forms a cycle through '{1}'")]
    CyclicLayout(String, String),
}

#[derive(Debug, Clone)]
pub struct FieldLayout {
    pub name: String,
    pub ty: BaseType,
    pub offset: usize,
}

#[derive(Debug, Clone)]
struct UdtDef {
    fields: Vec<(String, BaseType)>,
}

/// The registry of `TYPE ... END TYPE` definitions seen so far. Each
/// definition's size and field offsets are computed lazily and cached.
#[derive(Debug, Default)]
pub struct UdtTable {
    defs: FxHashMap<String, UdtDef>,
}

impl UdtTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: impl Into<String>, fields: Vec<(String, BaseType)>) {
        self.defs.insert(name.into(), UdtDef { fields });
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Alignment of a base type: for UDTs this is the alignment of its
    /// widest field, recursively.
    pub fn align_of(&self, ty: &BaseType) -> Result<usize, UdtError> {
        match ty {
            BaseType::UserDefined(name) => {
                let def = self.defs.get(name).ok_or_else(|| UdtError::UnknownUdt(name.clone()))?;
                let mut align = 1usize;
                for (_, field_ty) in &def.fields {
                    align = align.max(self.align_of(field_ty)?);
                }
                Ok(align.max(1))
            }
            other => Ok(other.intrinsic_align()),
        }
    }

    /// Total size of a base type in bytes, including UDT tail padding.
    pub fn size_of(&self, ty: &BaseType) -> Result<usize, UdtError> {
        match ty {
            BaseType::UserDefined(name) => {
                let layout = self.field_layout(name)?;
                let align = self.align_of(ty)?;
                let raw_end = layout
                    .last()
                    .map(|f| f.offset + self.size_of(&f.ty).unwrap_or(0))
                    .unwrap_or(0);
                Ok(pad_to(raw_end, align))
            }
            other => Ok(other.intrinsic_size()),
        }
    }

    /// Compute each field's byte offset within the record, applying
    /// natural alignment between fields.
    pub fn field_layout(&self, name: &str) -> Result<Vec<FieldLayout>, UdtError> {
        let def = self.defs.get(name).ok_or_else(|| UdtError::UnknownUdt(name.to_string()))?;
        let mut offset = 0usize;
        let mut out = Vec::with_capacity(def.fields.len());
        for (field_name, field_ty) in &def.fields {
            let field_align = self.align_of(field_ty)?;
            offset = pad_to(offset, field_align);
            out.push(FieldLayout {
                name: field_name.clone(),
                ty: field_ty.clone(),
                offset,
            });
            offset += self.size_of(field_ty)?;
        }
        Ok(out)
    }
}

fn pad_to(offset: usize, align: usize) -> usize {
    if align == 0 {
        return offset;
    }
    (offset + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_type::BaseType;

    #[test]
    fn flat_record_has_no_padding_when_fields_are_same_width() {
        let mut table = UdtTable::new();
        table.define(
            "POINT",
            vec![
                ("X".into(), BaseType::Int { signed: true }),
                ("Y".into(), BaseType::Int { signed: true }),
            ],
        );
        let layout = table.field_layout("POINT").unwrap();
        assert_eq!(layout[0].offset, 0);
        assert_eq!(layout[1].offset, 4);
        assert_eq!(table.size_of(&BaseType::UserDefined("POINT".into())).unwrap(), 8);
    }

    #[test]
    fn mixed_width_fields_get_natural_alignment_and_tail_padding() {
        let mut table = UdtTable::new();
        table.define(
            "MIXED",
            vec![
                ("FLAG".into(), BaseType::Byte { signed: true }),
                ("BIG".into(), BaseType::Long { signed: true }),
                ("SMALL".into(), BaseType::Byte { signed: true }),
            ],
        );
        let layout = table.field_layout("MIXED").unwrap();
        assert_eq!(layout[0].offset, 0); // FLAG
        assert_eq!(layout[1].offset, 8); // BIG, aligned up from 1
        assert_eq!(layout[2].offset, 16); // SMALL
        // Tail padded up to the widest field's alignment (8).
        assert_eq!(table.size_of(&BaseType::UserDefined("MIXED".into())).unwrap(), 24);
    }

    #[test]
    fn nested_udt_size_recurses() {
        let mut table = UdtTable::new();
        table.define(
            "POINT",
            vec![
                ("X".into(), BaseType::Int { signed: true }),
                ("Y".into(), BaseType::Int { signed: true }),
            ],
        );
        table.define(
            "RECT",
            vec![
                ("TOPLEFT".into(), BaseType::UserDefined("POINT".into())),
                ("BOTTOMRIGHT".into(), BaseType::UserDefined("POINT".into())),
            ],
        );
        assert_eq!(table.size_of(&BaseType::UserDefined("RECT".into())).unwrap(), 16);
    }

    #[test]
    fn unknown_udt_is_an_error() {
        let table = UdtTable::new();
        assert!(matches!(
            table.size_of(&BaseType::UserDefined("NOPE".into())),
            Err(UdtError::UnknownUdt(_))
        ));
    }
}
