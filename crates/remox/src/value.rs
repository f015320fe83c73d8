//! Protocol values exchanged with managed objects
//!
//! Attributes, operation arguments and results all travel as [`Value`]s.
//! Values are dynamically typed; the distinct integer and float widths exist
//! so that overload resolution can enforce the no-cross-coercion rule.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::descriptor::PrimitiveKind;

/// Well-known type name for strings
pub const TYPE_STRING: &str = "string";
/// Well-known type name for raw byte payloads
pub const TYPE_BYTES: &str = "bytes";

/// A dynamically typed management protocol value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value; matches any parameter type during resolution
    Null,
    /// Boolean value
    Bool(bool),
    /// 8-bit signed integer
    I8(i8),
    /// 16-bit signed integer
    I16(i16),
    /// 32-bit signed integer
    I32(i32),
    /// 64-bit signed integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// Single character
    Char(char),
    /// UTF-8 string
    Str(String),
    /// Raw byte payload
    Bytes(Bytes),
    /// Ordered sequence of values
    Array(Vec<Value>),
    /// An application-defined value carried opaquely with its type name
    Opaque {
        /// Fully qualified type name as reported by the remote side
        type_name: String,
        /// Serialized payload
        data: Bytes,
    },
}

impl Value {
    /// Returns the primitive kind of this value, if it carries one
    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match self {
            Self::Bool(_) => Some(PrimitiveKind::Bool),
            Self::I8(_) => Some(PrimitiveKind::I8),
            Self::I16(_) => Some(PrimitiveKind::I16),
            Self::I32(_) => Some(PrimitiveKind::I32),
            Self::I64(_) => Some(PrimitiveKind::I64),
            Self::F32(_) => Some(PrimitiveKind::F32),
            Self::F64(_) => Some(PrimitiveKind::F64),
            Self::Char(_) => Some(PrimitiveKind::Char),
            _ => None,
        }
    }

    /// Returns the named type this value carries, if any
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Str(_) => Some(TYPE_STRING),
            Self::Bytes(_) => Some(TYPE_BYTES),
            Self::Opaque { type_name, .. } => Some(type_name),
            _ => None,
        }
    }

    /// True if this value is the absent value
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Extracts an i64 if this value is any integer width
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I8(v) => Some(i64::from(*v)),
            Self::I16(v) => Some(i64::from(*v)),
            Self::I32(v) => Some(i64::from(*v)),
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Extracts a string slice if this value is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Extracts the byte payload if this value is a byte value
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Extracts the elements if this value is an array
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Self::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}
