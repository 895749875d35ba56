//! Element type description: spec §3 "Element type".

use crate::error::CArrayError;

/// The maximum atom size the core will accept (spec §4.2 size limit).
pub const MAX_ATOM_SIZE: u64 = 1 << 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DTypeKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    /// Fixed-length byte string, length in bytes ('S' kind).
    FixedBytes(usize),
    /// Fixed-length UCS-4 string, length in 4-byte code units ('U' kind).
    FixedUcs4(usize),
    /// Fixed-size opaque composite record, length in bytes.
    FixedOpaque(usize),
    /// Variable-length opaque object, one element per chunk ('O' kind).
    Object,
}

impl DTypeKind {
    /// Bytes per scalar, ignoring any trailing shape dimensions.
    pub fn base_item_size(self) -> usize {
        match self {
            DTypeKind::I8 | DTypeKind::U8 | DTypeKind::Bool => 1,
            DTypeKind::I16 | DTypeKind::U16 => 2,
            DTypeKind::I32 | DTypeKind::U32 | DTypeKind::F32 => 4,
            DTypeKind::I64 | DTypeKind::U64 | DTypeKind::F64 => 8,
            DTypeKind::FixedBytes(n) => n,
            DTypeKind::FixedUcs4(n) => n * 4,
            DTypeKind::FixedOpaque(n) => n,
            DTypeKind::Object => 0,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DTypeKind::F32 | DTypeKind::F64)
    }

    pub fn is_bool(self) -> bool {
        matches!(self, DTypeKind::Bool)
    }

    pub fn is_object(self) -> bool {
        matches!(self, DTypeKind::Object)
    }

    /// Canonical on-disk/metadata type descriptor, e.g. `"i4"`, `"f8"`, `"S10"`.
    pub fn to_descriptor(self) -> String {
        match self {
            DTypeKind::I8 => "i1".into(),
            DTypeKind::I16 => "i2".into(),
            DTypeKind::I32 => "i4".into(),
            DTypeKind::I64 => "i8".into(),
            DTypeKind::U8 => "u1".into(),
            DTypeKind::U16 => "u2".into(),
            DTypeKind::U32 => "u4".into(),
            DTypeKind::U64 => "u8".into(),
            DTypeKind::F32 => "f4".into(),
            DTypeKind::F64 => "f8".into(),
            DTypeKind::Bool => "b1".into(),
            DTypeKind::FixedBytes(n) => format!("S{n}"),
            DTypeKind::FixedUcs4(n) => format!("U{n}"),
            DTypeKind::FixedOpaque(n) => format!("V{n}"),
            DTypeKind::Object => "O".into(),
        }
    }

    pub fn from_descriptor(s: &str) -> Result<Self, CArrayError> {
        let parse_len = |rest: &str| -> Result<usize, CArrayError> {
            rest.parse::<usize>()
                .map_err(|_| CArrayError::InvalidArgument(format!("bad type descriptor {s:?}")))
        };
        match s {
            "i1" => Ok(DTypeKind::I8),
            "i2" => Ok(DTypeKind::I16),
            "i4" => Ok(DTypeKind::I32),
            "i8" => Ok(DTypeKind::I64),
            "u1" => Ok(DTypeKind::U8),
            "u2" => Ok(DTypeKind::U16),
            "u4" => Ok(DTypeKind::U32),
            "u8" => Ok(DTypeKind::U64),
            "f4" => Ok(DTypeKind::F32),
            "f8" => Ok(DTypeKind::F64),
            "b1" => Ok(DTypeKind::Bool),
            "O" => Ok(DTypeKind::Object),
            other if other.starts_with('S') => Ok(DTypeKind::FixedBytes(parse_len(&other[1..])?)),
            other if other.starts_with('U') => Ok(DTypeKind::FixedUcs4(parse_len(&other[1..])?)),
            other if other.starts_with('V') => Ok(DTypeKind::FixedOpaque(parse_len(&other[1..])?)),
            other => Err(CArrayError::InvalidArgument(format!(
                "unrecognized type descriptor {other:?}"
            ))),
        }
    }
}

/// A fixed-size record description: one scalar plus any trailing shape
/// dimensions folded into the atom (spec §3 "Shape").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementType {
    pub kind: DTypeKind,
    pub trailing_dims: Vec<usize>,
    /// Bytes per logical row, trailing dims included.
    pub atom_size: usize,
}

impl ElementType {
    pub fn scalar(kind: DTypeKind) -> Result<Self, CArrayError> {
        Self::new(kind, &[])
    }

    pub fn new(kind: DTypeKind, trailing_dims: &[usize]) -> Result<Self, CArrayError> {
        if kind.is_object() && !trailing_dims.is_empty() {
            return Err(CArrayError::NotSupported(
                "object-rank > 1 is not supported".into(),
            ));
        }
        let fold: usize = trailing_dims.iter().product::<usize>().max(1);
        let atom_size = kind.base_item_size() * fold;
        if atom_size as u64 >= MAX_ATOM_SIZE {
            return Err(CArrayError::TypeTooLarge(atom_size));
        }
        Ok(ElementType {
            kind,
            trailing_dims: trailing_dims.to_vec(),
            atom_size,
        })
    }

    /// The effective per-item size fed to the compression codec (spec §4.2):
    /// 1 byte for string kinds, 4 for UCS-4, 1 for opaque atoms that don't
    /// fit in a byte, and the full atom size otherwise.
    pub fn codec_item_size(&self) -> usize {
        match self.kind {
            DTypeKind::FixedBytes(_) => 1,
            DTypeKind::FixedUcs4(_) => 4,
            _ => {
                if self.atom_size <= 255 {
                    self.atom_size.max(1)
                } else {
                    1
                }
            }
        }
    }

    pub fn descriptor(&self) -> String {
        self.kind.to_descriptor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_roundtrip() {
        for kind in [
            DTypeKind::I32,
            DTypeKind::F64,
            DTypeKind::Bool,
            DTypeKind::FixedBytes(12),
            DTypeKind::FixedUcs4(4),
            DTypeKind::FixedOpaque(20),
            DTypeKind::Object,
        ] {
            let d = kind.to_descriptor();
            assert_eq!(DTypeKind::from_descriptor(&d).unwrap(), kind);
        }
    }

    #[test]
    fn trailing_dims_fold_into_atom_size() {
        let et = ElementType::new(DTypeKind::F64, &[3, 2]).unwrap();
        assert_eq!(et.atom_size, 8 * 6);
    }

    #[test]
    fn oversized_atom_rejected() {
        let err = ElementType::new(DTypeKind::U8, &[1 << 31]).unwrap_err();
        assert!(matches!(err, CArrayError::TypeTooLarge(_)));
    }
}
