//! # Value and Data Type Model
//!
//! Runtime values and column type descriptors shared by the schema layer and
//! the storage engine.
//!
//! ## Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | `DataType` | Storage-level type discriminant for a column |
//! | `Value` | Heap-owned runtime value for row operations |
//!
//! The storage engine never interprets row bytes itself; it works on `Value`
//! slices produced by the row codec and only cares which fields participate
//! in which keys.

use std::fmt;

/// Storage-level type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int,
    Float,
    Text,
    Blob,
}

impl DataType {
    /// Fixed encoded width in bytes, or `None` for variable-width types.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            DataType::Bool => Some(1),
            DataType::Int => Some(8),
            DataType::Float => Some(8),
            DataType::Text | DataType::Blob => None,
        }
    }

    pub fn is_fixed_width(&self) -> bool {
        self.fixed_width().is_some()
    }

    /// Number of type parameters the type accepts in DDL (e.g. a length for
    /// variable-width types).
    pub fn parameter_count(&self) -> usize {
        match self {
            DataType::Text | DataType::Blob => 1,
            _ => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Text => "text",
            DataType::Blob => "blob",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Heap-owned runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Data type of the value, `None` for NULL.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(DataType::Bool),
            Value::Int(_) => Some(DataType::Int),
            Value::Float(_) => Some(DataType::Float),
            Value::Text(_) => Some(DataType::Text),
            Value::Blob(_) => Some(DataType::Blob),
        }
    }

    /// Whether the value is storable in a column of the given type.
    /// NULL is admissible for every type; nullability is checked elsewhere.
    pub fn matches_type(&self, data_type: DataType) -> bool {
        match self.data_type() {
            None => true,
            Some(dt) => dt == data_type,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_matches_every_type() {
        assert!(Value::Null.matches_type(DataType::Int));
        assert!(Value::Null.matches_type(DataType::Text));
        assert!(Value::Null.is_null());
        assert_eq!(Value::Null.data_type(), None);
    }

    #[test]
    fn value_type_mismatch_is_detected() {
        assert!(Value::Int(1).matches_type(DataType::Int));
        assert!(!Value::Int(1).matches_type(DataType::Text));
        assert!(!Value::text("a").matches_type(DataType::Int));
    }

    #[test]
    fn fixed_width_covers_scalar_types() {
        assert_eq!(DataType::Int.fixed_width(), Some(8));
        assert_eq!(DataType::Bool.fixed_width(), Some(1));
        assert_eq!(DataType::Text.fixed_width(), None);
        assert_eq!(DataType::Text.parameter_count(), 1);
        assert_eq!(DataType::Int.parameter_count(), 0);
    }
}
