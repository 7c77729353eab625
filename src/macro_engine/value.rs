//! The dynamic value model for macro variables (spec.md §3 "Variable", §9
//! "Dynamic typing of macro variables").
//!
//! Grounded on
//! `examples/original_source/tests/unit/test_macros.py`'s `TestDynamicTypes`
//! and `TestArgument`: a value is one of four shapes, and a value parsed
//! from a quoted string literal is permanently exempt from numeric
//! coercion, even though its runtime shape is indistinguishable from an
//! unquoted one.

use crate::error::{ParseError, RuntimeError};

/// The four shapes a macro variable can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
        }
    }

    /// Parse an unquoted source token: int, then float, then string — the
    /// first one that fits wins (spec.md §4.2 "Type acceptance").
    pub fn parse_unquoted(token: &str) -> Value {
        if let Ok(i) = token.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = token.parse::<f64>() {
            return Value::Float(f);
        }
        Value::Str(token.to_string())
    }
}

/// One of the type tags a Task argument slot accepts. Mirrors Python's
/// `[str, int]`-style type lists in `ArgumentConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Null,
    Int,
    Float,
    Str,
}

impl TypeTag {
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Null => "null",
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::Str => "str",
        }
    }
}

/// A resolved argument: either a constant fixed at parse time, or a dynamic
/// reference to a name in the `VariableStore`, resolved fresh on every read.
///
/// `forced_string` is the quote-provenance flag from spec.md §9: once a
/// literal was written inside double quotes, neither this constant nor any
/// later `set()` of the same *name* from that literal may be read back as a
/// number, regardless of what the stored `Value` shape would otherwise allow.
#[derive(Debug, Clone)]
pub enum Variable {
    Const { value: Value, forced_string: bool },
    Dynamic { name: String },
}

impl Variable {
    pub fn constant(value: Value) -> Self {
        Variable::Const { value, forced_string: false }
    }

    /// Build a constant from a double-quoted source literal: always a
    /// string, and permanently exempt from numeric coercion.
    pub fn quoted_string(text: String) -> Self {
        Variable::Const { value: Value::Str(text), forced_string: true }
    }

    /// Build a constant from an unquoted token, applying the int/float/str
    /// cascade.
    pub fn unquoted(token: &str) -> Self {
        Variable::Const { value: Value::parse_unquoted(token), forced_string: false }
    }

    pub fn dynamic(name: impl Into<String>) -> Self {
        Variable::Dynamic { name: name.into() }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Variable::Dynamic { name } => Some(name),
            Variable::Const { .. } => None,
        }
    }

    /// Resolve against the store (a no-op for constants) and type-check the
    /// result against `accepted`, applying the coercion/cascade rules from
    /// spec.md §4.2. `task` is only used to name the offending task in the
    /// error.
    pub fn resolve(
        &self,
        store: &super::store::VariableStore,
        task: &str,
        accepted: &[TypeTag],
    ) -> Result<Value, RuntimeError> {
        let (value, forced_string) = match self {
            Variable::Const { value, forced_string } => (value.clone(), *forced_string),
            Variable::Dynamic { name } => (store.get(name).unwrap_or(Value::Null), false),
        };

        coerce(task, &value, forced_string, accepted)
    }
}

/// Apply spec.md §4.2's coercion cascade: strings produced by a quoted
/// literal never become numbers; otherwise an int may widen to float when
/// the slot doesn't accept int but does accept float, and an int/float may
/// be read as its string rendering when the slot doesn't accept numbers at
/// all but does accept strings.
fn coerce(task: &str, value: &Value, forced_string: bool, accepted: &[TypeTag]) -> Result<Value, RuntimeError> {
    let wants = |tag: TypeTag| accepted.contains(&tag);

    match value {
        Value::Null if wants(TypeTag::Null) => Ok(Value::Null),
        Value::Str(s) if wants(TypeTag::Str) => Ok(Value::Str(s.clone())),
        Value::Int(i) if !forced_string => {
            if wants(TypeTag::Int) {
                Ok(Value::Int(*i))
            } else if wants(TypeTag::Float) {
                Ok(Value::Float(*i as f64))
            } else if wants(TypeTag::Str) {
                Ok(Value::Str(i.to_string()))
            } else {
                Err(type_violation(task, value, accepted))
            }
        }
        Value::Float(f) if !forced_string => {
            if wants(TypeTag::Float) {
                Ok(Value::Float(*f))
            } else if wants(TypeTag::Str) {
                Ok(Value::Str(f.to_string()))
            } else {
                Err(type_violation(task, value, accepted))
            }
        }
        _ => Err(type_violation(task, value, accepted)),
    }
}

fn type_violation(task: &str, value: &Value, accepted: &[TypeTag]) -> RuntimeError {
    let expected: Vec<&str> = accepted.iter().map(|t| t.name()).collect();
    RuntimeError::TypeViolation {
        task: task.to_string(),
        variable: String::new(),
        detail: format!("found {:?}, expected one of {:?}", value.type_name(), expected),
    }
}

/// Validate a `set`/parameter name per spec.md §4.4's naming rules: must
/// begin with a letter or underscore and contain only letters, digits,
/// underscores; `$`, `+`, `-`, `*`, `#`, `,`, digits-only, non-string, and
/// empty names are rejected.
pub fn validate_variable_name(name: &str) -> Result<(), ParseError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(ParseError::InvalidVariableName(name.to_string()));
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(ParseError::InvalidVariableName(name.to_string()));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ParseError::InvalidVariableName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macro_engine::store::VariableStore;

    #[test]
    fn unquoted_cascade_prefers_int_then_float_then_string() {
        assert_eq!(Value::parse_unquoted("4"), Value::Int(4));
        assert_eq!(Value::parse_unquoted("5.5"), Value::Float(5.5));
        assert_eq!(Value::parse_unquoted("odiaeresis"), Value::Str("odiaeresis".to_string()));
    }

    #[test]
    fn int_widens_to_string_when_only_string_accepted() {
        let store = VariableStore::new();
        store.set("a", Value::Int(4));
        let v = Variable::dynamic("a");
        let resolved = v.resolve(&store, "test", &[TypeTag::Str]).unwrap();
        assert_eq!(resolved, Value::Str("4".to_string()));
    }

    #[test]
    fn int_rejected_when_only_int_and_string_not_requested_as_int_slot() {
        let store = VariableStore::new();
        store.set("a", Value::Float(6.6));
        let v = Variable::dynamic("a");
        let err = v.resolve(&store, "test", &[TypeTag::Int]);
        assert!(err.is_err());
    }

    #[test]
    fn forced_string_never_coerces_to_number() {
        let v = Variable::quoted_string("7.7".to_string());
        let store = VariableStore::new();
        let err = v.resolve(&store, "test", &[TypeTag::Float]);
        assert!(err.is_err());
        let ok = v.resolve(&store, "test", &[TypeTag::Str]).unwrap();
        assert_eq!(ok, Value::Str("7.7".to_string()));
    }

    #[test]
    fn variable_name_validation() {
        assert!(validate_variable_name("foo").is_ok());
        assert!(validate_variable_name("_foo_1").is_ok());
        assert!(validate_variable_name("").is_err());
        assert!(validate_variable_name("1foo").is_err());
        assert!(validate_variable_name("$foo").is_err());
        assert!(validate_variable_name("foo-bar").is_err());
    }
}
