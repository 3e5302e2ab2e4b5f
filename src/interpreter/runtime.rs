use std::{cell::RefCell, collections::HashMap, rc::Rc};

use thiserror::Error;

use super::builtin;
use super::callable::{PartialApp, SolFunc};
use crate::ast::{Expr, ExprInner, Literal, PathSeg, Program, Segment, Stmt, StmtInner};
use crate::value::Value;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("unknown name '{0}'")]
    Name(String),
    #[error("{0}")]
    Type(String),
    #[error("{0}")]
    Arity(String),
    #[error("{0}")]
    Key(String),
    #[error("{0}")]
    Index(String),
    #[error("divide by zero")]
    DivideByZero,
}

impl RuntimeError {
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::Name(_) => "NameError",
            RuntimeError::Type(_) => "TypeError",
            RuntimeError::Arity(_) => "ArityError",
            RuntimeError::Key(_) => "KeyError",
            RuntimeError::Index(_) => "IndexError",
            RuntimeError::DivideByZero => "DivideByZero",
        }
    }
}

/// A runtime error pinned to the source line of the statement that raised
/// it. Fatal in file mode, recoverable in line mode.
#[derive(Error, Debug)]
#[error("{} at line {line}: {error}", error.kind())]
pub struct Fault {
    pub error: RuntimeError,
    pub line: usize,
}

/// A chained frame of bindings. Lookup walks outward, binding writes the
/// innermost frame. Closures hold one of these by reference.
pub struct Environment {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Environment>>,
}

impl Environment {
    pub fn new_global() -> Rc<Environment> {
        Rc::new(Environment {
            vars: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    pub fn open_scope(self: &Rc<Self>) -> Rc<Environment> {
        Rc::new(Environment {
            vars: RefCell::new(HashMap::new()),
            parent: Some(self.clone()),
        })
    }

    pub fn bind(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(name))
    }
}

pub struct Interpreter {
    globals: Rc<Environment>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter {
            globals: Environment::new_global(),
        }
    }

    /// Evaluate a whole program, stopping at the first fault (file mode).
    pub fn interpret(&mut self, program: &Program) -> Result<(), Fault> {
        for stmt in &program.0 {
            self.interpret_one(stmt)?;
        }
        Ok(())
    }

    /// Evaluate one statement, returning its value so the driver can echo
    /// it in line mode. Faults leave the environment intact.
    pub fn interpret_one(&mut self, stmt: &Stmt) -> Result<Value, Fault> {
        self.execute(stmt).map_err(|error| Fault {
            error,
            line: stmt.pos.line,
        })
    }

    /// Look a name up in the outermost frame, mostly for inspecting the
    /// session from tests and tooling.
    pub fn lookup_global(&self, name: &str) -> Option<Value> {
        self.globals.lookup(name)
    }

    fn execute(&mut self, stmt: &Stmt) -> Result<Value, RuntimeError> {
        let env = self.globals.clone();
        match &stmt.inner {
            StmtInner::Assign { name, params, expr } => {
                if params.is_empty() {
                    let value = self.eval(expr, &env)?;
                    env.bind(name, value);
                } else {
                    let func = SolFunc {
                        name: name.clone(),
                        parameters: params.clone(),
                        body: expr.clone(),
                        closure: env.clone(),
                    };
                    env.bind(name, Value::Closure(Rc::new(func)));
                }
                Ok(Value::Null)
            }
            StmtInner::Expr(expr) => self.eval(expr, &env),
        }
    }

    pub(crate) fn eval(
        &mut self,
        expr: &Expr,
        env: &Rc<Environment>,
    ) -> Result<Value, RuntimeError> {
        match &expr.inner {
            ExprInner::Literal(Literal::Int(int)) => Ok(Value::int(*int)),
            ExprInner::Literal(Literal::Float(dbl)) => Ok(Value::float(dbl.into_inner())),
            ExprInner::Literal(Literal::Str(s)) => Ok(Value::string(s.clone())),
            ExprInner::Literal(Literal::Boolean(b)) => Ok(Value::Bool(*b)),
            ExprInner::Literal(Literal::Null) => Ok(Value::Null),
            ExprInner::Interp(segments) => self.interpolate(segments, env),
            ExprInner::Array(elements) => {
                let items = elements
                    .iter()
                    .map(|element| self.eval(element, env))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(Rc::new(items)))
            }
            ExprInner::Dict(pairs) => {
                let mut entries = indexmap::IndexMap::new();
                for (key, value_expr) in pairs {
                    let value = self.eval(value_expr, env)?;
                    entries.insert(key.clone(), value);
                }
                Ok(Value::Dict(Rc::new(entries)))
            }
            ExprInner::Identifier(name) => {
                let value = self
                    .resolve(name, env)
                    .ok_or_else(|| RuntimeError::Name(name.clone()))?;
                // A zero-arity builtin in value position runs right away,
                // so `pwd.` and `exit.` behave as calls
                if let Value::Builtin(builtin) = &value {
                    if builtin.min_arity == 0 {
                        return (builtin.call)(self, Vec::new());
                    }
                }
                Ok(value)
            }
            ExprInner::Apply { callee, arguments } => {
                let callee = self.eval_callee(callee, env)?;
                let args = arguments
                    .iter()
                    .map(|argument| self.eval(argument, env))
                    .collect::<Result<Vec<_>, _>>()?;
                self.apply(callee, args)
            }
            ExprInner::Pipeline { left, call } => {
                let piped = self.eval(left, env)?;
                // The piped value becomes the first argument of the
                // right-hand application
                match &call.inner {
                    ExprInner::Apply { callee, arguments } => {
                        let callee = self.eval_callee(callee, env)?;
                        let mut args = Vec::with_capacity(arguments.len() + 1);
                        args.push(piped);
                        for argument in arguments {
                            args.push(self.eval(argument, env)?);
                        }
                        self.apply(callee, args)
                    }
                    _ => {
                        let callee = self.eval_callee(call, env)?;
                        self.apply(callee, vec![piped])
                    }
                }
            }
            ExprInner::If {
                test,
                if_true,
                if_false,
            } => {
                if self.eval(test, env)?.to_bool() {
                    self.eval(if_true, env)
                } else {
                    self.eval(if_false, env)
                }
            }
            ExprInner::Path { base, segments } => {
                let mut current = self.eval(base, env)?;
                for segment in segments {
                    current = self.access(current, segment, env)?;
                }
                Ok(current)
            }
        }
    }

    // Environment first, then the builtin registry; a binding shadows the
    // registry entry of the same name
    fn resolve(&self, name: &str, env: &Rc<Environment>) -> Option<Value> {
        env.lookup(name)
            .or_else(|| builtin::lookup(name).map(Value::Builtin))
    }

    // Callee position wants the callable itself, never the eager zero-arity
    // invocation (`exit 1` must not run `exit` while resolving it)
    fn eval_callee(&mut self, expr: &Expr, env: &Rc<Environment>) -> Result<Value, RuntimeError> {
        match &expr.inner {
            ExprInner::Identifier(name) => self
                .resolve(name, env)
                .ok_or_else(|| RuntimeError::Name(name.clone())),
            _ => self.eval(expr, env),
        }
    }

    /// Apply a callee to already-evaluated arguments, producing a Partial
    /// when the callee is undersupplied.
    pub(crate) fn apply(
        &mut self,
        callee: Value,
        mut args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        match callee {
            Value::Closure(func) => {
                let want = func.parameters.len();
                if args.len() == want {
                    func.call_fun(self, args)
                } else if args.len() < want {
                    Ok(PartialApp::new(Value::Closure(func), args))
                } else {
                    // Saturate, then curry the leftovers through the result
                    let rest = args.split_off(want);
                    let result = func.call_fun(self, args)?;
                    self.apply(result, rest)
                }
            }
            Value::Builtin(builtin) => {
                if args.len() < builtin.min_arity as usize {
                    Ok(PartialApp::new(Value::Builtin(builtin), args))
                } else if args.len() > builtin.max_arity as usize {
                    Err(RuntimeError::Arity(format!(
                        "'{}' expects at most {} arguments, got {}",
                        builtin.name, builtin.max_arity, args.len()
                    )))
                } else {
                    (builtin.call)(self, args)
                }
            }
            Value::Partial(partial) => {
                let mut all = partial.seen.clone();
                all.append(&mut args);
                self.apply(partial.target.clone(), all)
            }
            other => {
                if args.is_empty() {
                    Ok(other)
                } else if args[0].is_callable() {
                    // `x == 1` reads as an application of x; fall back to
                    // treating the operator as the callee with x in front
                    let op = args.remove(0);
                    args.insert(0, other);
                    self.apply(op, args)
                } else {
                    Err(RuntimeError::Type(format!(
                        "{} is not callable",
                        other.type_name()
                    )))
                }
            }
        }
    }

    /// One step of `|`-path access, shared by path expressions, string
    /// interpolation slots, and the `set` builtin's lookups.
    pub(crate) fn access(
        &mut self,
        value: Value,
        segment: &PathSeg,
        env: &Rc<Environment>,
    ) -> Result<Value, RuntimeError> {
        match value {
            Value::Dict(entries) => {
                let key = match segment {
                    PathSeg::Key(key) => key.clone(),
                    PathSeg::Index(index) => index.to_string(),
                    PathSeg::Expr(expr) => self.eval(expr, env)?.to_string(),
                };
                entries
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| RuntimeError::Key(format!("key '{}' not found in dict", key)))
            }
            Value::Array(items) => {
                let index = match segment {
                    PathSeg::Index(index) => *index,
                    PathSeg::Expr(expr) => match self.eval(expr, env)? {
                        Value::Number(n) => n.as_integer().ok_or_else(|| {
                            RuntimeError::Type(format!("invalid array index '{}'", n))
                        })?,
                        other => {
                            return Err(RuntimeError::Type(format!(
                                "invalid array index '{}'",
                                other
                            )));
                        }
                    },
                    PathSeg::Key(key) => {
                        return Err(RuntimeError::Type(format!("invalid array index '{}'", key)));
                    }
                };
                index_array(&items, index)
            }
            other => Err(RuntimeError::Type(format!(
                "cannot access '{}' on a {}",
                segment,
                other.type_name()
            ))),
        }
    }

    fn interpolate(
        &mut self,
        segments: &[Segment],
        env: &Rc<Environment>,
    ) -> Result<Value, RuntimeError> {
        let mut out = String::new();
        for segment in segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Slot { name, path, raw } => match self.resolve(name, env) {
                    // An unbound slot stays as written, braces included
                    None => out.push_str(raw),
                    Some(mut value) => {
                        for seg in path {
                            value = self.access(value, seg, env)?;
                        }
                        out.push_str(&value.to_string());
                    }
                },
            }
        }
        Ok(Value::string(out))
    }
}

/// 1-based array indexing with range reporting.
pub(crate) fn index_array(items: &[Value], index: i64) -> Result<Value, RuntimeError> {
    if index >= 1 && index as usize <= items.len() {
        Ok(items[index as usize - 1].clone())
    } else {
        Err(RuntimeError::Index(format!(
            "index {} out of range for array of length {}",
            index,
            items.len()
        )))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::parse;

    fn run(code: &str) -> Interpreter {
        let program = parse(code).unwrap();
        let mut interpreter = Interpreter::new();
        interpreter.interpret(&program).unwrap();
        interpreter
    }

    fn global(interpreter: &Interpreter, name: &str) -> Value {
        interpreter
            .lookup_global(name)
            .unwrap_or_else(|| panic!("expected a binding for {}", name))
    }

    fn run_one(interpreter: &mut Interpreter, code: &str) -> Result<Value, Fault> {
        let Program(stmts) = parse(code).unwrap();
        let mut last = Value::Null;
        for stmt in &stmts {
            last = interpreter.interpret_one(stmt)?;
        }
        Ok(last)
    }

    #[test]
    fn map_with_partial_addition() {
        let interp = run("myarray = [1, 2, 3]. res = map (+ 1) myarray.");
        assert_eq!("[2, 3, 4]", global(&interp, "res").to_string());
    }

    #[test]
    fn user_function_definition_and_call() {
        let interp = run("f a b = * a b. r = f 2 3.");
        assert_eq!(Value::int(6), global(&interp, "r"));
    }

    #[test]
    fn pipeline_map_filter_fold() {
        let interp =
            run("nums = [1, 2, 3, 4, 5]. sum = nums |> map (* 2) |> filter (> 5) |> fold + 0.");
        assert_eq!(Value::int(24), global(&interp, "sum"));
    }

    #[test]
    fn interpolation_against_environment() {
        let interp = run("name = \"World\". msg = \"Hello, {name}!\".");
        assert_eq!(Value::string("Hello, World!"), global(&interp, "msg"));
    }

    #[test]
    fn single_quotes_do_not_interpolate() {
        let interp = run("name = \"World\". msg = 'Hello, {name}!'.");
        assert_eq!(Value::string("Hello, {name}!"), global(&interp, "msg"));
    }

    #[test]
    fn if_expression_with_infix_style_condition() {
        let interp = run("x = 1. y = if x == 1 then \"yes\" else \"no\".");
        assert_eq!(Value::string("yes"), global(&interp, "y"));
    }

    #[test]
    fn path_access_with_literal_and_variable_keys() {
        let mut interp = run("d = {\"x\": [1, 2]}.");
        assert_eq!(
            Value::int(1),
            run_one(&mut interp, "d|x|1.").unwrap()
        );
        assert_eq!(
            Value::int(2),
            run_one(&mut interp, "k = \"x\". d|(k)|2.").unwrap()
        );
    }

    #[test]
    fn prefix_comparisons_take_threshold_first() {
        let interp = run("a = > 5 10. b = < 5 3. c = == 4 4.");
        assert_eq!(Value::Bool(true), global(&interp, "a"));
        assert_eq!(Value::Bool(true), global(&interp, "b"));
        assert_eq!(Value::Bool(true), global(&interp, "c"));
    }

    #[test]
    fn partial_of_builtin_saturates_to_same_result() {
        let interp = run("p = > 5. applied = p 10. direct = > 5 10.");
        assert_eq!(global(&interp, "direct"), global(&interp, "applied"));
    }

    #[test]
    fn closure_partial_application_shapes_agree() {
        let interp = run(
            "f a b c = + a (+ b c). \
             whole = f 1 2 3. \
             staged = ((f 1) 2) 3. \
             split = (f 1 2) 3.",
        );
        assert_eq!(Value::int(6), global(&interp, "whole"));
        assert_eq!(global(&interp, "whole"), global(&interp, "staged"));
        assert_eq!(global(&interp, "whole"), global(&interp, "split"));
    }

    #[test]
    fn over_application_curries_through_returned_value() {
        // h yields a partial; the extra argument applies to it
        let interp = run("h x = + x. r = h 1 2.");
        assert_eq!(Value::int(3), global(&interp, "r"));
    }

    #[test]
    fn closures_see_later_definitions() {
        let interp = run("f x = g x. g x = * x 2. r = f 3.");
        assert_eq!(Value::int(6), global(&interp, "r"));
    }

    #[test]
    fn bindings_shadow_builtins() {
        let interp = run("map = 5. r = map.");
        assert_eq!(Value::int(5), global(&interp, "r"));
    }

    #[test]
    fn unchosen_branch_is_not_evaluated() {
        // The else branch divides by zero; picking then must not touch it
        let interp = run("y = if 1 then 'a' else to_string (/ 1 0).");
        assert_eq!(Value::string("a"), global(&interp, "y"));
    }

    #[test]
    fn if_truthiness_table() {
        let interp = run(
            "a = if 0 then 1 else 2. \
             b = if '' then 1 else 2. \
             c = if [] then 1 else 2. \
             d = if {} then 1 else 2. \
             e = if null then 1 else 2. \
             f = if false then 1 else 2. \
             g = if err 'x' then 1 else 2. \
             h = if [0] then 1 else 2.",
        );
        for falsy in ["a", "b", "c", "d", "e", "f", "g"] {
            assert_eq!(Value::int(2), global(&interp, falsy), "case {}", falsy);
        }
        assert_eq!(Value::int(1), global(&interp, "h"));
    }

    #[test]
    fn pipeline_into_bare_callable() {
        let interp = run("r = 5 |> + 10.");
        assert_eq!(Value::int(15), global(&interp, "r"));
    }

    #[test]
    fn if_branches_bind_tighter_than_trailing_pipeline() {
        // The pipeline belongs to the else branch, not to the whole if
        let interp = run("x = 10. r = if (> 5 x) then x else 0 |> + 100.");
        assert_eq!(Value::int(10), global(&interp, "r"));
        let interp = run("x = 1. r = if (> 5 x) then x else 0 |> + 100.");
        assert_eq!(Value::int(100), global(&interp, "r"));
    }

    #[test]
    fn result_helpers() {
        let interp = run(
            "a = unwrap_or (ok 5) 0. \
             b = unwrap_or (err 'boom') 9. \
             c = succeeded (ok 1). \
             d = failed (err 'x'). \
             e = failed (ok 1).",
        );
        assert_eq!(Value::int(5), global(&interp, "a"));
        assert_eq!(Value::int(9), global(&interp, "b"));
        assert_eq!(Value::Bool(true), global(&interp, "c"));
        assert_eq!(Value::Bool(true), global(&interp, "d"));
        assert_eq!(Value::Bool(false), global(&interp, "e"));
    }

    #[test]
    fn piping_an_err_does_not_short_circuit() {
        let interp = run("r = err 'down' |> unwrap_or 'fallback'.");
        assert_eq!(Value::string("fallback"), global(&interp, "r"));
    }

    #[test]
    fn set_creates_and_overwrites() {
        let mut interp = run("d = {}. d' = set d 'a|b' 5.");
        assert_eq!(
            Value::int(5),
            run_one(&mut interp, "d'|a|b.").unwrap()
        );
        // The source dict is untouched
        assert_eq!("{}", global(&interp, "d").to_string());
        let overwritten = run_one(&mut interp, "set d' 'a|b' 6 |> to_string.").unwrap();
        assert_eq!(Value::string("{'a': {'b': 6}}"), overwritten);
    }

    #[test]
    fn set_rejects_out_of_range_array_position() {
        let mut interp = run("a = [1, 2].");
        let fault = run_one(&mut interp, "set a '3' 9.").unwrap_err();
        assert_eq!("IndexError", fault.error.kind());
    }

    #[test]
    fn array_bounds_are_one_based() {
        let mut interp = run("a = [10, 20, 30].");
        assert_eq!(Value::int(10), run_one(&mut interp, "a|1.").unwrap());
        assert_eq!(Value::int(30), run_one(&mut interp, "a|3.").unwrap());
        let fault = run_one(&mut interp, "a|0.").unwrap_err();
        assert_eq!("IndexError", fault.error.kind());
        let fault = run_one(&mut interp, "a|4.").unwrap_err();
        assert_eq!("IndexError", fault.error.kind());
    }

    #[test]
    fn missing_dict_key_faults() {
        let mut interp = run("d = {x: 1}.");
        let fault = run_one(&mut interp, "d|y.").unwrap_err();
        assert_eq!("KeyError", fault.error.kind());
    }

    #[test]
    fn numeric_dict_keys_compare_by_decimal_form() {
        let mut interp = run("d = {1: 'one'}.");
        assert_eq!(Value::string("one"), run_one(&mut interp, "d|1.").unwrap());
        // A runtime key rendering to the same decimal reaches the same entry
        assert_eq!(
            Value::string("one"),
            run_one(&mut interp, "k = 1. d|(k).").unwrap()
        );
    }

    #[test]
    fn faults_leave_the_session_usable() {
        let mut interp = run("x = 1.");
        let fault = run_one(&mut interp, "y = / 1 0.").unwrap_err();
        assert_eq!("DivideByZero", fault.error.kind());
        assert_eq!(Value::int(2), run_one(&mut interp, "+ x 1.").unwrap());
        assert!(interp.lookup_global("y").is_none());
    }

    #[test]
    fn unknown_name_faults_with_name_error() {
        let mut interp = Interpreter::new();
        let fault = run_one(&mut interp, "nope.").unwrap_err();
        assert_eq!("NameError", fault.error.kind());
        assert_eq!(1, fault.line);
    }

    #[test]
    fn applying_a_number_is_a_type_error() {
        let mut interp = Interpreter::new();
        let fault = run_one(&mut interp, "x = 3. x 1 2.").unwrap_err();
        assert_eq!("TypeError", fault.error.kind());
    }

    #[test]
    fn over_applied_builtin_is_an_arity_error() {
        let mut interp = Interpreter::new();
        let fault = run_one(&mut interp, "to_string 1 2.").unwrap_err();
        assert_eq!("ArityError", fault.error.kind());
    }

    #[test]
    fn bare_value_applications_return_the_value() {
        let interp = run("x = 3. y = x.");
        assert_eq!(Value::int(3), global(&interp, "y"));
    }

    #[test]
    fn unbound_slot_renders_raw() {
        let interp = run("msg = \"hi {nope}\".");
        assert_eq!(Value::string("hi {nope}"), global(&interp, "msg"));
    }

    #[test]
    fn slot_path_renders_nested_value() {
        let interp = run("d = {x: [1, 2]}. msg = \"got {d|x|2}\".");
        assert_eq!(Value::string("got 2"), global(&interp, "msg"));
    }

    #[test]
    fn slot_renders_containers_and_results() {
        let interp = run("r = ok 3. a = [1, 2]. msg = \"{r} {a}\".");
        assert_eq!(Value::string("Ok(3) [1, 2]"), global(&interp, "msg"));
    }

    #[test]
    fn registry_resolution_behind_environment() {
        let interp = run("r = to_string 42.");
        assert_eq!(Value::string("42"), global(&interp, "r"));
    }

    #[test]
    fn fold_seeds_from_first_element_without_init() {
        let interp = run("r = fold + [1, 2, 3, 4].");
        assert_eq!(Value::int(10), global(&interp, "r"));
    }

    #[test]
    fn fault_display_formats() {
        let mut interp = Interpreter::new();
        let fault = run_one(&mut interp, "\n\nmissing.").unwrap_err();
        assert_eq!(
            "NameError at line 3: unknown name 'missing'",
            fault.to_string()
        );
    }
}
