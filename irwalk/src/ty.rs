//! Storage types and layout queries.
//!
//! Every value the engine manipulates has a static type describing its
//! in-memory footprint. The layout rules are C-like: scalars occupy a
//! power-of-two number of bytes, struct fields are padded to their natural
//! alignment, and struct sizes round up to the struct alignment so arrays
//! of structs tile without gaps.

use anyhow::{Result, bail};

/// Size in bytes of a pointer, and the alignment of pointer-typed storage.
pub const PTR_SIZE: usize = 8;

/// Static type of a value in the interpreted program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    /// No value. Only valid as a function return type or instruction type.
    Void,
    /// Integer with an explicit bit width, 1..=128.
    Int(u32),
    /// IEEE-754 binary float; width is 32 or 64.
    Float(u32),
    /// Untyped pointer into interpreted memory.
    Ptr,
    /// Fixed-length array of a single element type.
    Array {
        /// Element type.
        elem: Box<Type>,
        /// Number of elements.
        len: usize,
    },
    /// Ordered, padded field sequence.
    Struct(Vec<Type>),
    /// SIMD vector. Present in the data model so front ends can describe it,
    /// but the engine rejects vector-typed storage as unsupported.
    Vector {
        /// Element type.
        elem: Box<Type>,
        /// Number of lanes.
        len: usize,
    },
}

impl Type {
    /// Returns true for the zero-sized `Void` type.
    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Storage size in bytes.
    pub fn size(&self) -> Result<usize> {
        match self {
            Type::Void => bail!("void has no storage size"),
            Type::Int(width) => int_size(*width),
            Type::Float(32) => Ok(4),
            Type::Float(64) => Ok(8),
            Type::Float(width) => bail!("unsupported float width: {width}"),
            Type::Ptr => Ok(PTR_SIZE),
            Type::Array { elem, len } | Type::Vector { elem, len } => {
                Ok(elem.size()? * len)
            }
            Type::Struct(fields) => {
                let (size, align) = struct_layout(fields, fields.len())?;
                // Round the tail up so consecutive structs stay aligned.
                Ok(align_up(size, align))
            }
        }
    }

    /// Required alignment in bytes. Never larger than a pointer.
    pub fn alignment(&self) -> Result<usize> {
        match self {
            Type::Void => bail!("void has no alignment"),
            Type::Int(width) => Ok(int_size(*width)?.min(PTR_SIZE)),
            Type::Float(_) | Type::Ptr => Ok(self.size()?.min(PTR_SIZE)),
            Type::Array { elem, .. } | Type::Vector { elem, .. } => elem.alignment(),
            Type::Struct(fields) => {
                let mut align = 1;
                for field in fields {
                    align = align.max(field.alignment()?);
                }
                Ok(align)
            }
        }
    }

    /// Byte offset of field `index` within a struct, or element `index`
    /// within an array.
    pub fn field_offset(&self, index: usize) -> Result<usize> {
        match self {
            Type::Struct(fields) => {
                if index >= fields.len() {
                    bail!("field index {index} out of bounds for {self:?}");
                }
                let (offset, _) = struct_layout(fields, index)?;
                Ok(offset)
            }
            Type::Array { elem, len } => {
                if index >= *len {
                    bail!("element index {index} out of bounds for {self:?}");
                }
                Ok(elem.size()? * index)
            }
            _ => bail!("{self:?} has no addressable fields"),
        }
    }

    /// Type of field `index` of a struct or array.
    pub fn field_type(&self, index: usize) -> Result<&Type> {
        match self {
            Type::Struct(fields) => fields
                .get(index)
                .ok_or_else(|| anyhow::anyhow!("field index {index} out of bounds for {self:?}")),
            Type::Array { elem, len } => {
                if index >= *len {
                    bail!("element index {index} out of bounds for {self:?}");
                }
                Ok(elem)
            }
            _ => bail!("{self:?} has no addressable fields"),
        }
    }
}

/// Storage size of an integer: the byte count rounded up to a power of two.
fn int_size(width: u32) -> Result<usize> {
    if width == 0 || width > 128 {
        bail!("unsupported integer width: {width}");
    }
    Ok((width as usize).div_ceil(8).next_power_of_two())
}

/// Computes the offset of field `upto` (and the max alignment seen so far)
/// by laying out fields `0..upto` with natural padding. Passing
/// `upto == fields.len()` yields the unpadded struct size.
fn struct_layout(fields: &[Type], upto: usize) -> Result<(usize, usize)> {
    let mut offset = 0;
    let mut max_align = 1;
    for (i, field) in fields.iter().enumerate() {
        let align = field.alignment()?;
        max_align = max_align.max(align);
        offset = align_up(offset, align);
        if i == upto {
            return Ok((offset, max_align));
        }
        offset += field.size()?;
    }
    Ok((offset, max_align))
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}
