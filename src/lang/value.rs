use serde::{Deserialize, Serialize};

/// Runtime value in the PyVM language.
///
/// Values are the only data that can exist on the operand stack and in the
/// variable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 32-bit signed integer.
    Integer(i32),

    /// 64-bit floating-point number.
    Float(f64),

    /// UTF-8 string value.
    String(std::string::String),

    /// Boolean value.
    Bool(bool),

    /// Absence of a value. Produced only by operations with no result,
    /// e.g. a call to `print`.
    Null,
}

impl Value {
    /// Human-readable type name, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "str",
            Value::Bool(_) => "bool",
            Value::Null => "null",
        }
    }

    /// Truth value used by conditional jumps and the logical operators.
    ///
    /// Booleans are themselves, numbers are true when non-zero, strings
    /// when non-empty, and `Null` is always false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Integer(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Null => false,
        }
    }
}

impl std::fmt::Display for Value {
    /// Format a value in its canonical textual form: integers without a
    /// decimal point, floats with at least one, strings without quotes,
    /// booleans lowercase, `null` for the unit value.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(x) => {
                if x.is_finite() && x.fract() == 0.0 {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_integer_display() {
        assert_eq!(Value::Integer(30).to_string(), "30");
        assert_eq!(Value::Integer(-7).to_string(), "-7");
    }

    #[test]
    fn test_canonical_float_has_decimal() {
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Float(-1.0).to_string(), "-1.0");
    }

    #[test]
    fn test_canonical_string_unquoted() {
        assert_eq!(Value::String("pos".to_string()).to_string(), "pos");
    }

    #[test]
    fn test_canonical_bool_lowercase() {
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Bool(false).to_string(), "false");
    }

    #[test]
    fn test_canonical_null() {
        assert_eq!(Value::Null.to_string(), "null");
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::Integer(1).is_truthy());
        assert!(!Value::Integer(0).is_truthy());
        assert!(Value::Float(0.5).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(Value::String("x".to_string()).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn test_serde_json_round_trip() {
        let values = vec![
            Value::Integer(42),
            Value::Float(1.5),
            Value::String("hello".to_string()),
            Value::Bool(true),
            Value::Null,
        ];

        for value in values {
            let json = serde_json::to_string(&value).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(back, value);
        }
    }
}
