use std::rc::Rc;

use indexmap::IndexMap;

use super::callable::{BuiltinFunc, VARIADIC};
use super::runtime::{Interpreter, RuntimeError};
use super::stdlib;
use crate::value::{Number, SolResult, Value};

/// The builtin registry. The evaluator consults this table whenever a free
/// name misses the environment.
pub static BUILTINS: &[BuiltinFunc] = &[
    // Arithmetic; `+` is variadic and doubles as string concatenation
    BuiltinFunc { name: "+", min_arity: 2, max_arity: VARIADIC, call: add_impl },
    BuiltinFunc { name: "-", min_arity: 2, max_arity: 2, call: sub_impl },
    BuiltinFunc { name: "*", min_arity: 2, max_arity: 2, call: mul_impl },
    BuiltinFunc { name: "/", min_arity: 2, max_arity: 2, call: div_impl },
    BuiltinFunc { name: "%", min_arity: 2, max_arity: 2, call: rem_impl },
    // Comparisons take the threshold first so their partials read naturally
    BuiltinFunc { name: "==", min_arity: 2, max_arity: 2, call: eq_impl },
    BuiltinFunc { name: "<", min_arity: 2, max_arity: 2, call: lt_impl },
    BuiltinFunc { name: ">", min_arity: 2, max_arity: 2, call: gt_impl },
    // Higher-order functions
    BuiltinFunc { name: "map", min_arity: 2, max_arity: 2, call: map_impl },
    BuiltinFunc { name: "filter", min_arity: 2, max_arity: 2, call: filter_impl },
    BuiltinFunc { name: "fold", min_arity: 2, max_arity: 3, call: fold_impl },
    // Containers
    BuiltinFunc { name: "set", min_arity: 3, max_arity: 3, call: set_impl },
    // Output and conversion
    BuiltinFunc { name: "echo", min_arity: 1, max_arity: 1, call: echo_impl },
    BuiltinFunc { name: "to_string", min_arity: 1, max_arity: 1, call: to_string_impl },
    BuiltinFunc { name: "to_number", min_arity: 1, max_arity: 1, call: to_number_impl },
    // Results
    BuiltinFunc { name: "ok", min_arity: 1, max_arity: 1, call: ok_impl },
    BuiltinFunc { name: "err", min_arity: 1, max_arity: 1, call: err_impl },
    BuiltinFunc { name: "unwrap_or", min_arity: 2, max_arity: 2, call: unwrap_or_impl },
    BuiltinFunc { name: "unwrap_or_exit", min_arity: 1, max_arity: 2, call: unwrap_or_exit_impl },
    BuiltinFunc { name: "failed", min_arity: 1, max_arity: 1, call: failed_impl },
    BuiltinFunc { name: "succeeded", min_arity: 1, max_arity: 1, call: succeeded_impl },
    // Process and filesystem, implemented over in stdlib
    BuiltinFunc { name: "sh", min_arity: 1, max_arity: 1, call: stdlib::sh_impl },
    BuiltinFunc { name: "getenv", min_arity: 1, max_arity: 1, call: stdlib::getenv_impl },
    BuiltinFunc { name: "setenv", min_arity: 2, max_arity: 2, call: stdlib::setenv_impl },
    BuiltinFunc { name: "listenv", min_arity: 0, max_arity: 0, call: stdlib::listenv_impl },
    BuiltinFunc { name: "exit", min_arity: 0, max_arity: 1, call: stdlib::exit_impl },
    BuiltinFunc { name: "cpu_count", min_arity: 0, max_arity: 0, call: stdlib::cpu_count_impl },
    BuiltinFunc { name: "pwd", min_arity: 0, max_arity: 0, call: stdlib::pwd_impl },
    BuiltinFunc { name: "ls", min_arity: 0, max_arity: 1, call: stdlib::ls_impl },
    BuiltinFunc { name: "read", min_arity: 1, max_arity: 1, call: stdlib::read_impl },
    BuiltinFunc { name: "write", min_arity: 2, max_arity: 2, call: stdlib::write_impl },
    BuiltinFunc { name: "mkdir", min_arity: 1, max_arity: 1, call: stdlib::mkdir_impl },
    BuiltinFunc { name: "rm", min_arity: 1, max_arity: 1, call: stdlib::rm_impl },
    BuiltinFunc { name: "jsonparse", min_arity: 1, max_arity: 1, call: stdlib::jsonparse_impl },
    BuiltinFunc { name: "jsonstringify", min_arity: 1, max_arity: 1, call: stdlib::jsonstringify_impl },
    BuiltinFunc { name: "jsonread", min_arity: 1, max_arity: 1, call: stdlib::jsonread_impl },
    BuiltinFunc { name: "jsonwrite", min_arity: 2, max_arity: 2, call: stdlib::jsonwrite_impl },
];

pub fn lookup(name: &str) -> Option<&'static BuiltinFunc> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

fn number_arg(name: &str, value: &Value) -> Result<Number, RuntimeError> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(RuntimeError::Type(format!(
            "'{}' expects numbers, got {}",
            name,
            other.type_name()
        ))),
    }
}

fn add_two(left: Number, right: Number) -> Number {
    match (left, right) {
        (Number::Int(l), Number::Int(r)) => match l.checked_add(r) {
            Some(sum) => Number::Int(sum),
            None => Number::Float(l as f64 + r as f64),
        },
        (l, r) => Number::Float(l.as_f64() + r.as_f64()),
    }
}

fn add_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    // Any string operand turns the whole thing into concatenation
    if args.iter().any(|arg| matches!(arg, Value::Str(_))) {
        let mut out = String::new();
        for arg in &args {
            out.push_str(&arg.to_string());
        }
        return Ok(Value::string(out));
    }
    let mut acc = number_arg("+", &args[0])?;
    for arg in &args[1..] {
        acc = add_two(acc, number_arg("+", arg)?);
    }
    Ok(Value::Number(acc))
}

fn sub_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let left = number_arg("-", &args[0])?;
    let right = number_arg("-", &args[1])?;
    let result = match (left, right) {
        (Number::Int(l), Number::Int(r)) => match l.checked_sub(r) {
            Some(diff) => Number::Int(diff),
            None => Number::Float(l as f64 - r as f64),
        },
        (l, r) => Number::Float(l.as_f64() - r.as_f64()),
    };
    Ok(Value::Number(result))
}

fn mul_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let left = number_arg("*", &args[0])?;
    let right = number_arg("*", &args[1])?;
    let result = match (left, right) {
        (Number::Int(l), Number::Int(r)) => match l.checked_mul(r) {
            Some(product) => Number::Int(product),
            None => Number::Float(l as f64 * r as f64),
        },
        (l, r) => Number::Float(l.as_f64() * r.as_f64()),
    };
    Ok(Value::Number(result))
}

fn div_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let left = number_arg("/", &args[0])?;
    let right = number_arg("/", &args[1])?;
    if right.is_zero() {
        return Err(RuntimeError::DivideByZero);
    }
    // Exact integer division stays integral, anything else promotes
    let result = match (left, right) {
        (Number::Int(l), Number::Int(r)) if l % r == 0 => Number::Int(l / r),
        (l, r) => Number::Float(l.as_f64() / r.as_f64()),
    };
    Ok(Value::Number(result))
}

fn rem_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let left = number_arg("%", &args[0])?;
    let right = number_arg("%", &args[1])?;
    if right.is_zero() {
        return Err(RuntimeError::DivideByZero);
    }
    let result = match (left, right) {
        (Number::Int(l), Number::Int(r)) => Number::Int(l % r),
        (l, r) => Number::Float(l.as_f64() % r.as_f64()),
    };
    Ok(Value::Number(result))
}

fn eq_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    // `== expected value`
    Ok(Value::Bool(args[1] == args[0]))
}

// `< threshold value` is value < threshold, so the partial `(< 10)` reads
// "less than 10"
fn lt_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    compare("<", &args[0], &args[1]).map(|ordering| Value::Bool(ordering == std::cmp::Ordering::Less))
}

fn gt_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    compare(">", &args[0], &args[1])
        .map(|ordering| Value::Bool(ordering == std::cmp::Ordering::Greater))
}

fn compare(
    name: &str,
    threshold: &Value,
    value: &Value,
) -> Result<std::cmp::Ordering, RuntimeError> {
    match (value, threshold) {
        (Value::Number(l), Value::Number(r)) => Ok(l
            .as_f64()
            .partial_cmp(&r.as_f64())
            .unwrap_or(std::cmp::Ordering::Equal)),
        (Value::Str(l), Value::Str(r)) => Ok(l.cmp(r)),
        (l, r) => Err(RuntimeError::Type(format!(
            "'{}' cannot compare {} and {}",
            name,
            l.type_name(),
            r.type_name()
        ))),
    }
}

// The higher-order builtins accept their array on either side so both
// `map f arr` and `arr |> map f` work
fn hof_pair(name: &str, args: Vec<Value>) -> Result<(Value, Rc<Vec<Value>>), RuntimeError> {
    let mut args = args.into_iter();
    let first = args.next().unwrap();
    let second = args.next().unwrap();
    let (func, arr) = if matches!(first, Value::Array(_)) && second.is_callable() {
        (second, first)
    } else {
        (first, second)
    };
    match arr {
        Value::Array(items) => Ok((func, items)),
        other => Err(RuntimeError::Type(format!(
            "'{}' expects an array, got {}",
            name,
            other.type_name()
        ))),
    }
}

fn map_impl(interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let (func, items) = hof_pair("map", args)?;
    let mut mapped = Vec::with_capacity(items.len());
    for item in items.iter() {
        mapped.push(interpreter.apply(func.clone(), vec![item.clone()])?);
    }
    Ok(Value::Array(Rc::new(mapped)))
}

fn filter_impl(interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let (func, items) = hof_pair("filter", args)?;
    let mut kept = Vec::new();
    for item in items.iter() {
        if interpreter.apply(func.clone(), vec![item.clone()])?.to_bool() {
            kept.push(item.clone());
        }
    }
    Ok(Value::Array(Rc::new(kept)))
}

fn fold_impl(interpreter: &mut Interpreter, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    let init = if args.len() == 3 { args.pop() } else { None };
    let (func, items) = hof_pair("fold", args)?;
    let mut items = items.iter();
    let mut acc = match init {
        Some(seed) => seed,
        // Without a seed the first element starts the fold
        None => match items.next() {
            Some(first) => first.clone(),
            None => {
                return Err(RuntimeError::Type(
                    "'fold' of an empty array needs an initial value".to_string(),
                ));
            }
        },
    };
    for item in items {
        acc = interpreter.apply(func.clone(), vec![acc, item.clone()])?;
    }
    Ok(acc)
}

fn set_impl(_interpreter: &mut Interpreter, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    let value = args.pop().unwrap();
    let path = args.pop().unwrap();
    let container = args.pop().unwrap();
    let path = match &path {
        Value::Str(s) => s,
        other => {
            return Err(RuntimeError::Type(format!(
                "'set' expects a path string, got {}",
                other.type_name()
            )));
        }
    };
    let parts: Vec<&str> = path.split('|').collect();
    set_in(&container, &parts, value)
}

// Immutable update: rebuild the spine of containers along the path.
// Missing dict keys come into existence, array positions never do.
fn set_in(container: &Value, parts: &[&str], value: Value) -> Result<Value, RuntimeError> {
    let (head, rest) = parts.split_first().expect("a set path always has a head");
    match container {
        Value::Dict(entries) => {
            let next = if rest.is_empty() {
                value
            } else {
                let child = entries
                    .get(*head)
                    .cloned()
                    .unwrap_or_else(|| Value::Dict(Rc::new(IndexMap::new())));
                set_in(&child, rest, value)?
            };
            let mut updated = (**entries).clone();
            updated.insert(head.to_string(), next);
            Ok(Value::Dict(Rc::new(updated)))
        }
        Value::Array(items) => {
            let index: i64 = head.trim().parse().map_err(|_| {
                RuntimeError::Type(format!("invalid array index '{}' in set path", head))
            })?;
            if index < 1 || index as usize > items.len() {
                return Err(RuntimeError::Index(format!(
                    "index {} out of range for array of length {}",
                    index,
                    items.len()
                )));
            }
            let slot = index as usize - 1;
            let next = if rest.is_empty() {
                value
            } else {
                set_in(&items[slot], rest, value)?
            };
            let mut updated = (**items).clone();
            updated[slot] = next;
            Ok(Value::Array(Rc::new(updated)))
        }
        other => Err(RuntimeError::Type(format!(
            "cannot set '{}' on a {}",
            head,
            other.type_name()
        ))),
    }
}

fn echo_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    println!("{}", args[0]);
    Ok(Value::Null)
}

fn to_string_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    Ok(Value::string(args[0].to_string()))
}

fn to_number_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let converted = match &args[0] {
        Value::Number(n) => Some(Value::Number(*n)),
        Value::Bool(b) => Some(Value::int(i64::from(*b))),
        Value::Str(s) => {
            if s.contains('.') {
                s.trim().parse::<f64>().ok().map(Value::float)
            } else {
                s.trim().parse::<i64>().ok().map(Value::int)
            }
        }
        _ => None,
    };
    // Conversion failures keep the legacy error-string form rather than
    // faulting the statement
    Ok(converted.unwrap_or_else(|| {
        Value::string(format!("Error: Cannot convert '{}' to number", args[0]))
    }))
}

fn ok_impl(_interpreter: &mut Interpreter, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    Ok(SolResult::ok(args.pop().unwrap()))
}

fn err_impl(_interpreter: &mut Interpreter, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    Ok(SolResult::err(args.pop().unwrap()))
}

fn unwrap_or_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Result(result) => {
            if result.success {
                Ok(result.value.clone())
            } else {
                Ok(args[1].clone())
            }
        }
        // Anything that is not a Result passes through untouched
        other => Ok(other.clone()),
    }
}

fn unwrap_or_exit_impl(
    _interpreter: &mut Interpreter,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Result(result) => {
            if result.success {
                Ok(result.value.clone())
            } else {
                if let Some(message) = args.get(1) {
                    eprintln!("Error: {}", message);
                }
                if !matches!(result.error, Value::Null) {
                    eprintln!("  Details: {}", result.error);
                }
                stdlib::flush_and_exit(1);
            }
        }
        other => Ok(other.clone()),
    }
}

fn failed_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let failed = match &args[0] {
        Value::Result(result) => !result.success,
        _ => false,
    };
    Ok(Value::Bool(failed))
}

fn succeeded_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let succeeded = match &args[0] {
        Value::Result(result) => result.success,
        _ => true,
    };
    Ok(Value::Bool(succeeded))
}

#[cfg(test)]
mod test {
    use super::*;

    fn interp() -> Interpreter {
        Interpreter::new()
    }

    #[test]
    fn add_preserves_integers() {
        let sum = add_impl(&mut interp(), vec![Value::int(1), Value::int(2), Value::int(3)])
            .unwrap();
        assert_eq!(Value::int(6), sum);
    }

    #[test]
    fn add_promotes_on_float() {
        let sum = add_impl(&mut interp(), vec![Value::int(1), Value::float(2.5)]).unwrap();
        assert_eq!(Value::float(3.5), sum);
    }

    #[test]
    fn add_concatenates_when_any_string() {
        let joined = add_impl(
            &mut interp(),
            vec![Value::string("v"), Value::int(1), Value::string("!")],
        )
        .unwrap();
        assert_eq!(Value::string("v1!"), joined);
    }

    #[test]
    fn div_is_exact_or_promotes() {
        let exact = div_impl(&mut interp(), vec![Value::int(10), Value::int(2)]).unwrap();
        assert_eq!(Value::int(5), exact);
        let inexact = div_impl(&mut interp(), vec![Value::int(7), Value::int(2)]).unwrap();
        assert_eq!(Value::float(3.5), inexact);
    }

    #[test]
    fn div_by_zero_faults() {
        let err = div_impl(&mut interp(), vec![Value::int(1), Value::int(0)]).unwrap_err();
        assert_eq!("DivideByZero", err.kind());
        let err = rem_impl(&mut interp(), vec![Value::int(1), Value::int(0)]).unwrap_err();
        assert_eq!("DivideByZero", err.kind());
    }

    #[test]
    fn rem_of_integers() {
        let rem = rem_impl(&mut interp(), vec![Value::int(7), Value::int(3)]).unwrap();
        assert_eq!(Value::int(1), rem);
    }

    #[test]
    fn comparisons_are_threshold_first() {
        // `> 5 10` asks whether 10 > 5
        let result = gt_impl(&mut interp(), vec![Value::int(5), Value::int(10)]).unwrap();
        assert_eq!(Value::Bool(true), result);
        let result = lt_impl(&mut interp(), vec![Value::int(5), Value::int(10)]).unwrap();
        assert_eq!(Value::Bool(false), result);
    }

    #[test]
    fn comparing_strings_is_lexicographic() {
        let result = gt_impl(
            &mut interp(),
            vec![Value::string("apple"), Value::string("pear")],
        )
        .unwrap();
        assert_eq!(Value::Bool(true), result);
    }

    #[test]
    fn comparing_mixed_types_is_a_type_error() {
        let err = gt_impl(&mut interp(), vec![Value::int(1), Value::string("2")]).unwrap_err();
        assert_eq!("TypeError", err.kind());
    }

    #[test]
    fn arithmetic_rejects_non_numbers() {
        let err = mul_impl(&mut interp(), vec![Value::int(1), Value::Null]).unwrap_err();
        assert_eq!("TypeError", err.kind());
    }

    #[test]
    fn map_accepts_array_in_either_position() {
        let arr = Value::Array(Rc::new(vec![Value::int(1), Value::int(2)]));
        let inc = super::super::callable::PartialApp::new(
            Value::Builtin(lookup("+").unwrap()),
            vec![Value::int(1)],
        );
        let forward = map_impl(&mut interp(), vec![inc.clone(), arr.clone()]).unwrap();
        let flipped = map_impl(&mut interp(), vec![arr, inc]).unwrap();
        assert_eq!(forward, flipped);
        assert_eq!("[2, 3]", forward.to_string());
    }

    #[test]
    fn fold_uses_explicit_init() {
        let arr = Value::Array(Rc::new(vec![Value::int(1), Value::int(2), Value::int(3)]));
        let plus = Value::Builtin(lookup("+").unwrap());
        let sum = fold_impl(&mut interp(), vec![plus, arr, Value::int(10)]).unwrap();
        assert_eq!(Value::int(16), sum);
    }

    #[test]
    fn fold_of_empty_array_without_init_is_a_type_error() {
        let arr = Value::Array(Rc::new(vec![]));
        let plus = Value::Builtin(lookup("+").unwrap());
        let err = fold_impl(&mut interp(), vec![plus, arr]).unwrap_err();
        assert_eq!("TypeError", err.kind());
    }

    #[test]
    fn set_builds_missing_dict_spine() {
        let empty = Value::Dict(Rc::new(IndexMap::new()));
        let updated = set_impl(
            &mut interp(),
            vec![empty, Value::string("a|b|c"), Value::int(1)],
        )
        .unwrap();
        assert_eq!("{'a': {'b': {'c': 1}}}", updated.to_string());
    }

    #[test]
    fn set_replaces_array_slot() {
        let arr = Value::Array(Rc::new(vec![Value::int(1), Value::int(2)]));
        let updated = set_impl(
            &mut interp(),
            vec![arr.clone(), Value::string("2"), Value::int(9)],
        )
        .unwrap();
        assert_eq!("[1, 9]", updated.to_string());
        // The original array is untouched
        assert_eq!("[1, 2]", arr.to_string());
    }

    #[test]
    fn to_number_conversions() {
        assert_eq!(
            Value::int(42),
            to_number_impl(&mut interp(), vec![Value::string("42")]).unwrap()
        );
        assert_eq!(
            Value::float(3.25),
            to_number_impl(&mut interp(), vec![Value::string("3.25")]).unwrap()
        );
        assert_eq!(
            Value::int(1),
            to_number_impl(&mut interp(), vec![Value::Bool(true)]).unwrap()
        );
        assert_eq!(
            Value::string("Error: Cannot convert 'nope' to number"),
            to_number_impl(&mut interp(), vec![Value::string("nope")]).unwrap()
        );
    }

    #[test]
    fn unwrap_or_passes_non_results_through() {
        let value = unwrap_or_impl(&mut interp(), vec![Value::int(7), Value::int(0)]).unwrap();
        assert_eq!(Value::int(7), value);
    }

    #[test]
    fn registry_knows_every_required_name() {
        for name in [
            "echo", "+", "-", "*", "/", "%", "==", "<", ">", "map", "filter", "fold", "set",
            "to_string", "to_number", "unwrap_or", "unwrap_or_exit", "failed", "succeeded", "ok",
            "err", "sh", "getenv", "exit",
        ] {
            assert!(lookup(name).is_some(), "missing builtin {}", name);
        }
        assert!(lookup("no_such_builtin").is_none());
    }
}
