//! Type descriptors and assignability rules
//!
//! Operation metadata declares parameter types as string tokens. Lowercase
//! tokens (`i64`, `bool`, ...) are primitives, their capitalized forms
//! (`I64`, `Bool`, ...) are the boxed wrappers, `object` is the universal
//! type, `unknown` stands for a type the remote side could not resolve, and
//! a trailing `[]` denotes an array of the prefix token. Anything else is a
//! named object type.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RemoxError;
use crate::value::Value;

/// Universal type token; any argument is assignable to it
pub const TOKEN_OBJECT: &str = "object";
/// Token for a parameter type the remote side could not resolve
pub const TOKEN_UNKNOWN: &str = "unknown";

/// The primitive kinds of the management protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    /// Boolean
    Bool,
    /// 8-bit signed integer
    I8,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// Single character
    Char,
}

impl PrimitiveKind {
    fn from_primitive_token(token: &str) -> Option<Self> {
        match token {
            "bool" => Some(Self::Bool),
            "i8" => Some(Self::I8),
            "i16" => Some(Self::I16),
            "i32" => Some(Self::I32),
            "i64" => Some(Self::I64),
            "f32" => Some(Self::F32),
            "f64" => Some(Self::F64),
            "char" => Some(Self::Char),
            _ => None,
        }
    }

    fn from_boxed_token(token: &str) -> Option<Self> {
        match token {
            "Bool" => Some(Self::Bool),
            "I8" => Some(Self::I8),
            "I16" => Some(Self::I16),
            "I32" => Some(Self::I32),
            "I64" => Some(Self::I64),
            "F32" => Some(Self::F32),
            "F64" => Some(Self::F64),
            "Char" => Some(Self::Char),
            _ => None,
        }
    }

    fn primitive_token(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Char => "char",
        }
    }

    fn boxed_token(self) -> &'static str {
        match self {
            Self::Bool => "Bool",
            Self::I8 => "I8",
            Self::I16 => "I16",
            Self::I32 => "I32",
            Self::I64 => "I64",
            Self::F32 => "F32",
            Self::F64 => "F64",
            Self::Char => "Char",
        }
    }
}

/// A parsed parameter type token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeDescriptor {
    /// A type token the remote side could not resolve; matches anything
    Unknown,
    /// The universal type; matches anything
    Any,
    /// A primitive type
    Primitive(PrimitiveKind),
    /// The boxed wrapper of a primitive type
    Boxed(PrimitiveKind),
    /// A named object type
    Named(String),
    /// An array of the component type
    Array(Box<TypeDescriptor>),
}

impl TypeDescriptor {
    /// Parses a wire type token.
    ///
    /// `unknown` (or an unresolvable garbage token the caller chose to map)
    /// is valid and matches anything; an empty token is malformed metadata.
    pub fn parse(token: &str) -> Result<Self, RemoxError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(RemoxError::Metadata("empty type token".to_string()));
        }
        if let Some(component) = token.strip_suffix("[]") {
            return Ok(Self::Array(Box::new(Self::parse(component)?)));
        }
        if token == TOKEN_UNKNOWN {
            return Ok(Self::Unknown);
        }
        if token == TOKEN_OBJECT {
            return Ok(Self::Any);
        }
        if let Some(kind) = PrimitiveKind::from_primitive_token(token) {
            return Ok(Self::Primitive(kind));
        }
        if let Some(kind) = PrimitiveKind::from_boxed_token(token) {
            return Ok(Self::Boxed(kind));
        }
        Ok(Self::Named(token.to_string()))
    }

    /// Renders the canonical wire token for this descriptor
    pub fn token(&self) -> String {
        match self {
            Self::Unknown => TOKEN_UNKNOWN.to_string(),
            Self::Any => TOKEN_OBJECT.to_string(),
            Self::Primitive(kind) => kind.primitive_token().to_string(),
            Self::Boxed(kind) => kind.boxed_token().to_string(),
            Self::Named(name) => name.clone(),
            Self::Array(component) => format!("{}[]", component.token()),
        }
    }

    /// Decides whether `arg` is assignable to this parameter type.
    ///
    /// Rules, in order: a null argument matches anything; an unknown or
    /// universal parameter type matches anything; primitives and their boxed
    /// wrappers are mutually assignable with no cross-kind coercion; named
    /// types match by name; arrays match element-wise, and it is a hard
    /// mismatch when exactly one side is an array.
    pub fn accepts(&self, arg: &Value) -> bool {
        if arg.is_null() {
            return true;
        }
        match self {
            Self::Unknown | Self::Any => true,
            Self::Primitive(kind) | Self::Boxed(kind) => arg.primitive_kind() == Some(*kind),
            Self::Named(name) => arg.type_name() == Some(name.as_str()),
            Self::Array(component) => match arg {
                Value::Array(items) => items.iter().all(|item| component.accepts(item)),
                _ => false,
            },
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_parse_primitive_and_boxed() {
        assert_eq!(
            TypeDescriptor::parse("i64").unwrap(),
            TypeDescriptor::Primitive(PrimitiveKind::I64)
        );
        assert_eq!(
            TypeDescriptor::parse("I64").unwrap(),
            TypeDescriptor::Boxed(PrimitiveKind::I64)
        );
        assert_eq!(TypeDescriptor::parse("object").unwrap(), TypeDescriptor::Any);
        assert_eq!(TypeDescriptor::parse("unknown").unwrap(), TypeDescriptor::Unknown);
        assert_eq!(
            TypeDescriptor::parse("remox.CodeUnit").unwrap(),
            TypeDescriptor::Named("remox.CodeUnit".to_string())
        );
    }

    #[test]
    fn test_parse_arrays() {
        let descriptor = TypeDescriptor::parse("i32[][]").unwrap();
        assert_eq!(descriptor.token(), "i32[][]");
        match descriptor {
            TypeDescriptor::Array(inner) => match *inner {
                TypeDescriptor::Array(component) => {
                    assert_eq!(*component, TypeDescriptor::Primitive(PrimitiveKind::I32))
                }
                other => panic!("Expected nested array, got {:?}", other),
            },
            other => panic!("Expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_token_is_metadata_error() {
        assert!(TypeDescriptor::parse("").is_err());
        assert!(TypeDescriptor::parse("[]").is_err());
    }

    #[test]
    fn test_null_matches_anything() {
        for token in ["i64", "I64", "string", "object", "unknown", "i32[]"] {
            let descriptor = TypeDescriptor::parse(token).unwrap();
            assert!(descriptor.accepts(&Value::Null), "null should match {}", token);
        }
    }

    #[test]
    fn test_primitive_boxed_equivalence_no_cross_coercion() {
        let long_param = TypeDescriptor::parse("i64").unwrap();
        assert!(long_param.accepts(&Value::I64(1)));
        assert!(!long_param.accepts(&Value::I32(1)));

        let boxed_long = TypeDescriptor::parse("I64").unwrap();
        assert!(boxed_long.accepts(&Value::I64(1)));
        assert!(!boxed_long.accepts(&Value::I32(1)));
    }

    #[test]
    fn test_named_matching() {
        let string_param = TypeDescriptor::parse("string").unwrap();
        assert!(string_param.accepts(&Value::Str("x".into())));
        assert!(!string_param.accepts(&Value::I64(1)));

        let opaque = Value::Opaque {
            type_name: "app.Widget".into(),
            data: Bytes::new(),
        };
        assert!(TypeDescriptor::parse("app.Widget").unwrap().accepts(&opaque));
        assert!(!TypeDescriptor::parse("app.Gadget").unwrap().accepts(&opaque));
    }

    #[test]
    fn test_array_matching() {
        let descriptor = TypeDescriptor::parse("i64[]").unwrap();
        assert!(descriptor.accepts(&Value::Array(vec![Value::I64(1), Value::Null])));
        assert!(!descriptor.accepts(&Value::Array(vec![Value::I64(1), Value::I32(2)])));
        // Exactly one side being an array is a hard mismatch.
        assert!(!descriptor.accepts(&Value::I64(1)));
        assert!(!TypeDescriptor::parse("i64").unwrap().accepts(&Value::Array(vec![])));
    }
}
