use std::rc::Rc;

use super::runtime::{Environment, Interpreter, RuntimeError};
use crate::ast::Expr;
use crate::value::Value;

/// Max-arity marker for variadic builtins such as `+`.
pub const VARIADIC: u8 = u8::MAX;

/// A builtin registered with the evaluator: a name, an arity range and an
/// invocation handle. The evaluator never looks inside the handle.
pub struct BuiltinFunc {
    pub name: &'static str,
    pub min_arity: u8,
    pub max_arity: u8,
    pub call: fn(&mut Interpreter, Vec<Value>) -> Result<Value, RuntimeError>,
}

/// A user-defined function. The defining environment is captured by
/// reference, so definitions that arrive later in the same scope are
/// visible when the body finally runs.
pub struct SolFunc {
    pub name: String,
    pub parameters: Vec<String>,
    pub body: Expr,
    pub closure: Rc<Environment>,
}

impl SolFunc {
    // Saturated call: the caller has already matched the argument count to
    // the parameter list
    pub fn call_fun(
        &self,
        interpreter: &mut Interpreter,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let scope = self.closure.open_scope();
        for (parameter, value) in self.parameters.iter().zip(args.into_iter()) {
            scope.bind(parameter, value);
        }
        interpreter.eval(&self.body, &scope)
    }
}

/// A callable with an accumulated argument prefix, awaiting the rest.
pub struct PartialApp {
    pub target: Value,
    pub seen: Vec<Value>,
}

impl PartialApp {
    pub fn new(target: Value, seen: Vec<Value>) -> Value {
        Value::Partial(Rc::new(PartialApp { target, seen }))
    }

    /// The name of the underlying callable, for display purposes.
    pub fn name(&self) -> String {
        match &self.target {
            Value::Closure(func) => func.name.clone(),
            Value::Builtin(builtin) => builtin.name.to_string(),
            Value::Partial(partial) => partial.name(),
            other => other.type_name().to_string(),
        }
    }
}
