use std::{
    fmt::{Debug, Display},
    rc::Rc,
};

use indexmap::IndexMap;

use crate::interpreter::{BuiltinFunc, PartialApp, SolFunc};

/// A Sol number is an integer until a float enters the computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Int(int) => *int as f64,
            Number::Float(dbl) => *dbl,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Number::Int(int) => *int == 0,
            Number::Float(dbl) => *dbl == 0f64,
        }
    }

    /// The integral value, if this number is (or exactly represents) one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Number::Int(int) => Some(*int),
            Number::Float(dbl) if dbl.fract() == 0f64 => Some(*dbl as i64),
            Number::Float(_) => None,
        }
    }
}

impl Display for Number {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Number::Int(int) => write!(f, "{}", int),
            Number::Float(dbl) => write!(f, "{}", dbl),
        }
    }
}

#[derive(Clone)]
pub enum Value {
    Number(Number),
    Str(Rc<String>),
    Array(Rc<Vec<Value>>),
    Dict(Rc<IndexMap<String, Value>>),
    Bool(bool),
    Null,
    Closure(Rc<SolFunc>),
    Builtin(&'static BuiltinFunc),
    Partial(Rc<PartialApp>),
    Result(Rc<SolResult>),
}

/// The payload of `ok`/`err`: builtins model fallible operations with this
/// rather than with evaluator errors.
pub struct SolResult {
    pub success: bool,
    pub value: Value,
    pub error: Value,
}

impl SolResult {
    pub fn ok(value: Value) -> Value {
        Value::Result(Rc::new(SolResult {
            success: true,
            value,
            error: Value::Null,
        }))
    }

    pub fn err(error: Value) -> Value {
        Value::Result(Rc::new(SolResult {
            success: false,
            value: Value::Null,
            error,
        }))
    }
}

impl Value {
    pub fn string(text: impl Into<String>) -> Value {
        Value::Str(Rc::new(text.into()))
    }

    pub fn int(int: i64) -> Value {
        Value::Number(Number::Int(int))
    }

    pub fn float(dbl: f64) -> Value {
        Value::Number(Number::Float(dbl))
    }

    /// Falsy: false, null, zero, the empty string/array/dict, an err Result.
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => !n.is_zero(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Dict(entries) => !entries.is_empty(),
            Value::Result(result) => result.success,
            _ => true,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Closure(_) | Value::Builtin(_) | Value::Partial(_)
        )
    }

    /// A short name for the type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Dict(_) => "dict",
            Value::Bool(_) => "bool",
            Value::Null => "null",
            Value::Closure(_) => "function",
            Value::Builtin(_) => "builtin",
            Value::Partial(_) => "partial",
            Value::Result(_) => "result",
        }
    }

    // The quoted form used inside containers, so arrays of strings render
    // the way their literals were written
    fn fmt_quoted(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Str(s) => write!(f, "'{}'", s),
            other => write!(f, "{}", other),
        }
    }
}

// The echo renderer. Strings are bare at the top level and single-quoted
// inside containers; this is also the canonical form used when a path
// component is coerced to a dict key.
impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Str(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => f.write_str("null"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_quoted(f)?;
                }
                f.write_str("]")
            }
            Value::Dict(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "'{}': ", key)?;
                    value.fmt_quoted(f)?;
                }
                f.write_str("}")
            }
            Value::Closure(func) => write!(f, "<fn {}>", func.name),
            Value::Builtin(builtin) => write!(f, "<builtin {}>", builtin.name),
            Value::Partial(partial) => write!(f, "<partial {}>", partial.name()),
            Value::Result(result) => {
                if result.success {
                    write!(f, "Ok({})", result.value)
                } else {
                    write!(f, "Err({})", result.error)
                }
            }
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            // Numbers compare numerically across the Int/Float split
            (Value::Number(left), Value::Number(right)) => match (left, right) {
                (Number::Int(l), Number::Int(r)) => l == r,
                (l, r) => l.as_f64() == r.as_f64(),
            },
            (Value::Str(left), Value::Str(right)) => left == right,
            (Value::Bool(left), Value::Bool(right)) => left == right,
            (Value::Null, Value::Null) => true,
            (Value::Array(left), Value::Array(right)) => left == right,
            (Value::Dict(left), Value::Dict(right)) => {
                left.len() == right.len()
                    && left
                        .iter()
                        .all(|(key, value)| right.get(key) == Some(value))
            }
            (Value::Result(left), Value::Result(right)) => {
                left.success == right.success
                    && left.value == right.value
                    && left.error == right.error
            }
            // Callables never compare equal
            _ => false,
        }
    }
}
