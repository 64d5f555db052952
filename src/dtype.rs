// src/dtype.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Element type tags shared by native arrays and external views

use std::fmt;

/// Runtime element type tag carried by an `NdarrayView`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl DType {
    /// Size of one element in bytes
    pub fn itemsize(self) -> usize {
        match self {
            DType::Bool | DType::Int8 | DType::UInt8 => 1,
            DType::Int16 | DType::UInt16 => 2,
            DType::Int32 | DType::UInt32 | DType::Float32 => 4,
            DType::Int64 | DType::UInt64 | DType::Float64 => 8,
        }
    }

    /// NumPy-style name ("float64", "int32", ...)
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    /// Map a NumPy array-interface kind character and item size to a tag
    pub fn from_kind(kind: u8, itemsize: usize) -> Option<Self> {
        Some(match (kind, itemsize) {
            (b'b', 1) => DType::Bool,
            (b'i', 1) => DType::Int8,
            (b'i', 2) => DType::Int16,
            (b'i', 4) => DType::Int32,
            (b'i', 8) => DType::Int64,
            (b'u', 1) => DType::UInt8,
            (b'u', 2) => DType::UInt16,
            (b'u', 4) => DType::UInt32,
            (b'u', 8) => DType::UInt64,
            (b'f', 4) => DType::Float32,
            (b'f', 8) => DType::Float64,
            _ => return None,
        })
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Plain-old-data element types a `SimpleArray` can hold
///
/// Every bit pattern must be a valid value, since host memory is aliased as
/// `[T]` unchecked. `DType::Bool` is a tag only and has no element type.
pub trait Element: Copy + Default + Send + Sync + 'static {
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$tag;
            }
        )*
    };
}

impl_element! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_itemsize_matches_rust_type() {
        assert_eq!(<f64 as Element>::DTYPE.itemsize(), std::mem::size_of::<f64>());
        assert_eq!(<i16 as Element>::DTYPE.itemsize(), std::mem::size_of::<i16>());
        assert_eq!(<u8 as Element>::DTYPE.itemsize(), std::mem::size_of::<u8>());
    }

    #[test]
    fn test_from_kind() {
        assert_eq!(DType::from_kind(b'f', 8), Some(DType::Float64));
        assert_eq!(DType::from_kind(b'u', 2), Some(DType::UInt16));
        assert_eq!(DType::from_kind(b'b', 1), Some(DType::Bool));
        assert_eq!(DType::from_kind(b'c', 16), None);
        assert_eq!(DType::Float32.to_string(), "float32");
    }
}
