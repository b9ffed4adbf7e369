//! Runtime values
//!
//! The closed set of values event scripts can manipulate, with the
//! truthiness and equality rules the VM relies on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A script runtime value
///
/// Values are cheap to clone: string payloads are shared `Arc<str>` owned by
/// the compiled event, so no stack copy ever outlives its literal text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    None,
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Bool(bool),
}

impl Value {
    /// Check if the value is truthy
    ///
    /// Only `None` and `false` are falsey; integer zero and the empty
    /// string are truthy.
    pub fn is_truthy(&self) -> bool {
        !self.is_falsey()
    }

    /// Check if the value is falsey
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::None | Value::Bool(false))
    }

    /// Check if the value is an int or a float
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Short tag name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
        }
    }
}

impl PartialEq for Value {
    /// Script equality: differing tags are unequal, except that ints and
    /// floats compare by numeric value (implicit widening).
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(Value::None.is_falsey());
        assert!(Value::Bool(false).is_falsey());

        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::Float(0.0).is_truthy());
        assert!(Value::Str("".into()).is_truthy());
    }

    #[test]
    fn test_numeric_equality_widens() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_eq!(Value::Float(2.0), Value::Int(2));
        assert_ne!(Value::Int(2), Value::Float(2.5));
    }

    #[test]
    fn test_cross_tag_inequality() {
        assert_ne!(Value::Int(2), Value::Str("2".into()));
        assert_ne!(Value::Bool(true), Value::Int(1));
        assert_ne!(Value::None, Value::Bool(false));
        assert_ne!(Value::None, Value::Int(0));
    }

    #[test]
    fn test_string_equality() {
        assert_eq!(Value::Str("abc".into()), Value::Str("abc".into()));
        assert_ne!(Value::Str("abc".into()), Value::Str("abd".into()));
    }
}
