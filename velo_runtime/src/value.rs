//! Tagged runtime values

use serde::{Deserialize, Serialize};
use std::fmt;
use velo_common::StringId;

/// Index of a heap object. A handle is only meaningful against the heap
/// that produced it, and only while that object is live.
pub type Handle = u32;

/// A dynamic value: the tag travels with the payload.
///
/// Interned strings are immortal and carry no refcount; heap strings,
/// arrays, objects, callables, and resources are refcounted heap handles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Pool-interned string, immortal.
    InternedStr(StringId),
    /// Heap-allocated string.
    Str(Handle),
    Array(Handle),
    Object(Handle),
    Callable(Handle),
    Resource(Handle),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::InternedStr(_) | Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Callable(_) => "callable",
            Value::Resource(_) => "resource",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Value::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Value::Float(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::InternedStr(_) | Value::Str(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// The heap handle, for values that carry one.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Value::Str(h)
            | Value::Array(h)
            | Value::Object(h)
            | Value::Callable(h)
            | Value::Resource(h) => Some(*h),
            _ => None,
        }
    }

    /// Same tag and same immediate payload. Content comparison for heap
    /// values lives on the heap.
    pub fn same_tag(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            || (self.is_string() && other.is_string())
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::InternedStr(id) => write!(f, "{}", velo_common::resolve(*id)),
            Value::Str(h) => write!(f, "<string #{}>", h),
            Value::Array(h) => write!(f, "<array #{}>", h),
            Value::Object(h) => write!(f, "<object #{}>", h),
            Value::Callable(h) => write!(f, "<callable #{}>", h),
            Value::Resource(h) => write!(f, "<resource #{}>", h),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velo_common::intern;

    #[test]
    fn test_tags_and_predicates() {
        assert!(Value::Null.is_null());
        assert!(Value::Int(3).is_numeric());
        assert!(Value::Float(1.5).is_numeric());
        assert!(Value::InternedStr(intern("x")).is_string());
        assert_eq!(Value::Array(7).handle(), Some(7));
        assert_eq!(Value::Int(1).handle(), None);
    }

    #[test]
    fn test_same_tag_merges_string_forms() {
        assert!(Value::InternedStr(intern("a")).same_tag(&Value::Str(0)));
        assert!(!Value::Int(1).same_tag(&Value::Float(1.0)));
    }
}
