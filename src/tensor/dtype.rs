//! Primitive data types shared by views, feature types and the native engine

use std::fmt::{self, Debug, Display};
use serde::{Deserialize, Serialize};

/// Feature data type.
///
/// Discriminants match the native engine's data type codes and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum DType {
    Undefined = 0,
    U8 = 1,
    I16 = 2,
    I32 = 3,
    I64 = 4,
    F32 = 5,
    F64 = 6,
    String = 7,
    Sequence = 8,
    Dictionary = 9,
    I8 = 10,
    U16 = 11,
    U32 = 12,
    U64 = 13,
    F16 = 14,
    Bool = 15,
    Image = 16,
    Binary = 17,
}

impl DType {
    /// Size in bytes of one element, or `0` for non-tensor types
    pub const fn size(&self) -> usize {
        match self {
            DType::U8 | DType::I8 | DType::Bool => 1,
            DType::I16 | DType::U16 | DType::F16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
            DType::Undefined
            | DType::String
            | DType::Sequence
            | DType::Dictionary
            | DType::Image
            | DType::Binary => 0,
        }
    }

    /// Check if this is a floating point type
    pub const fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::F32 | DType::F64)
    }

    /// Check if this is an integer type
    pub const fn is_int(&self) -> bool {
        matches!(
            self,
            DType::I8 | DType::I16 | DType::I32 | DType::I64 |
            DType::U8 | DType::U16 | DType::U32 | DType::U64
        )
    }

    /// Check if values of this type live in a strided tensor buffer
    pub const fn is_tensor(&self) -> bool {
        self.size() > 0
    }

    /// Native engine code
    pub const fn code(&self) -> i32 {
        *self as i32
    }

    /// Parse a native engine code
    pub fn from_code(code: i32) -> Option<Self> {
        let dtype = match code {
            0 => DType::Undefined,
            1 => DType::U8,
            2 => DType::I16,
            3 => DType::I32,
            4 => DType::I64,
            5 => DType::F32,
            6 => DType::F64,
            7 => DType::String,
            8 => DType::Sequence,
            9 => DType::Dictionary,
            10 => DType::I8,
            11 => DType::U16,
            12 => DType::U32,
            13 => DType::U64,
            14 => DType::F16,
            15 => DType::Bool,
            16 => DType::Image,
            17 => DType::Binary,
            _ => return None,
        };
        Some(dtype)
    }

    /// NumPy-style name
    pub fn name(&self) -> &'static str {
        match self {
            DType::Undefined => "undefined",
            DType::U8 => "uint8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::String => "string",
            DType::Sequence => "sequence",
            DType::Dictionary => "dictionary",
            DType::I8 => "int8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::U64 => "uint64",
            DType::F16 => "float16",
            DType::Bool => "bool",
            DType::Image => "image",
            DType::Binary => "binary",
        }
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element types a [`TensorView`](super::TensorView) can be typed over.
///
/// `Pod` lets views reinterpret their raw bytes without `unsafe` at call sites.
pub trait Element: bytemuck::Pod + Debug + PartialEq + Send + Sync + 'static {
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(impl Element for $ty {
            const DTYPE: DType = DType::$dtype;
        })*
    };
}

impl_element! {
    u8 => U8,
    i8 => I8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

#[cfg(feature = "f16")]
impl Element for half::f16 {
    const DTYPE: DType = DType::F16;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_codes_round_trip() {
        for code in 0..=17 {
            let dtype = DType::from_code(code).unwrap();
            assert_eq!(dtype.code(), code);
        }
        assert_eq!(DType::from_code(18), None);
        assert_eq!(DType::from_code(-1), None);
    }

    #[test]
    fn test_dtype_features() {
        assert_eq!(DType::F32.size(), 4);
        assert_eq!(DType::F16.size(), 2);
        assert_eq!(DType::String.size(), 0);
        assert!(DType::F32.is_float());
        assert!(DType::U16.is_int());
        assert!(!DType::Image.is_tensor());
        assert_eq!(DType::F32.to_string(), "float32");
    }

    #[test]
    fn test_element_dtypes() {
        assert_eq!(<f32 as Element>::DTYPE, DType::F32);
        assert_eq!(<u8 as Element>::DTYPE, DType::U8);
        assert_eq!(<i64 as Element>::DTYPE.size(), std::mem::size_of::<i64>());
    }
}
