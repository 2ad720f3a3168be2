//! The evaluation loop: special forms, macro expansion and application.
//!
//! [`eval`] is a trampoline. Special forms return a [`Tail`] telling the loop
//! either that evaluation is finished or which expression to continue with,
//! and in which environment. Closure application continues the same way, so
//! tail calls run in constant host stack. Only non-tail sub-evaluations
//! (arguments, conditions, binding values, `try*` bodies) re-enter [`eval`]
//! and count against [`MAX_EVAL_DEPTH`](crate::MAX_EVAL_DEPTH).

use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::Error;
use crate::ast::{Closure, ParamSpec, Value, sym};
use crate::builtinops::get_builtin_ops;

pub mod environment;
pub mod intooperation;
mod quasiquote;
pub(crate) mod stack;

pub use environment::Environment;
pub use intooperation::{NumIter, ValueIter};

use quasiquote::quasiquote;
use stack::{DepthGuard, ensure_sufficient_stack};

/// Accepted argument counts of a function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    /// Check an argument count, failing with `ArityError`
    pub fn validate(self, count: usize) -> Result<(), Error> {
        let ok = match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::arity_error(self, count))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Outcome of a special form
enum Tail {
    /// Evaluation finished with this value
    Done(Value),
    /// Continue the loop with this expression in this environment
    Eval(Value, Environment),
}

/// Special forms receive their unevaluated arguments
type SpecialForm = fn(&[Value], &Environment) -> Result<Tail, Error>;

fn special_form(name: &str) -> Option<SpecialForm> {
    let form: SpecialForm = match name {
        "def!" => eval_define,
        "let*" => eval_let,
        "do" => eval_do,
        "if" => eval_if,
        "fn*" => eval_lambda,
        "quote" => eval_quote,
        "quasiquoteexpand" => eval_quasiquoteexpand,
        "quasiquote" => eval_quasiquote,
        "defmacro!" => eval_defmacro,
        "macroexpand" => eval_macroexpand,
        "try*" => eval_try,
        _ => return None,
    };
    Some(form)
}

/// Evaluate an expression (public API)
pub fn eval(expr: &Value, env: &Environment) -> Result<Value, Error> {
    let _depth = DepthGuard::enter()?;
    ensure_sufficient_stack(|| eval_loop(expr.clone(), env.clone()))
}

fn eval_loop(mut ast: Value, mut env: Environment) -> Result<Value, Error> {
    loop {
        ast = expand_macros(ast, &env)?;

        let items = match &ast {
            Value::List(items) if !items.is_empty() => items.clone(),
            Value::List(_) => return Ok(ast),
            _ => return eval_ast(&ast, &env),
        };

        if let Some(Value::Symbol(head)) = items.first()
            && let Some(form) = special_form(head)
        {
            match form(&items[1..], &env)? {
                Tail::Done(value) => return Ok(value),
                Tail::Eval(next, next_env) => {
                    ast = next;
                    env = next_env;
                    continue;
                }
            }
        }

        let mut args = eval_args(&items, &env)?;
        let func = args.remove(0);
        match func {
            Value::Function(closure) => {
                trace!(body = %closure.body, "tail call");
                env = Environment::bind(&closure.env, &closure.params, args)
                    .map_err(|err| with_call_expression(err, &ast))?;
                ast = closure.body.clone();
            }
            Value::BuiltinFunction { func, .. } => return func(args),
            other => return Err(Error::NotCallable(other.to_string())),
        }
    }
}

/// Attach the call form to an arity error raised while binding arguments
fn with_call_expression(err: Error, call: &Value) -> Error {
    match err {
        Error::ArityError {
            expected,
            got,
            expression: None,
        } => Error::arity_error_with_expr(expected, got, call.to_string()),
        other => other,
    }
}

/// Evaluate a form that is not a non-empty list
fn eval_ast(ast: &Value, env: &Environment) -> Result<Value, Error> {
    match ast {
        Value::Symbol(name) => env.get(name),
        Value::List(items) => Ok(Value::list(eval_args(items, env)?)),
        Value::Vector(items) => Ok(Value::vector(eval_args(items, env)?)),
        Value::HashMap(entries) => {
            let evaluated = entries
                .iter()
                .map(|(key, value)| Ok((key.clone(), eval(value, env)?)))
                .collect::<Result<_, Error>>()?;
            Ok(Value::hash_map(evaluated))
        }
        Value::Nil
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Keyword(_)
        | Value::Atom(_)
        | Value::BuiltinFunction { .. }
        | Value::Function(_) => Ok(ast.clone()),
    }
}

/// Evaluate each element left to right
fn eval_args(items: &[Value], env: &Environment) -> Result<Vec<Value>, Error> {
    items.iter().map(|item| eval(item, env)).collect()
}

/// Call a function value with already evaluated arguments.
///
/// Used by natives such as `apply`, `map` and `swap!`, and by macro
/// expansion. The closure body is evaluated in a nested [`eval`].
pub fn apply(func: &Value, args: Vec<Value>) -> Result<Value, Error> {
    match func {
        Value::Function(closure) => {
            let env = Environment::bind(&closure.env, &closure.params, args)?;
            eval(&closure.body, &env)
        }
        Value::BuiltinFunction { func, .. } => func(args),
        other => Err(Error::NotCallable(other.to_string())),
    }
}

/// The macro and its arguments when `ast` is a call to a macro.
///
/// Heads that are not symbols, or that are not bound, do not make a
/// macro call.
fn macro_call(ast: &Value, env: &Environment) -> Option<(Value, Vec<Value>)> {
    let Value::List(items) = ast else {
        return None;
    };
    let [Value::Symbol(head), args @ ..] = items.as_slice() else {
        return None;
    };
    let func = env.lookup(head)?;
    func.is_macro().then(|| (func, args.to_vec()))
}

fn expand_macros(mut ast: Value, env: &Environment) -> Result<Value, Error> {
    while let Some((func, args)) = macro_call(&ast, env) {
        trace!(form = %ast, "macro expansion");
        ast = apply(&func, args)?;
    }
    Ok(ast)
}

/// Expand `ast` until its head is no longer a macro, without evaluating
/// the result
pub fn macroexpand(ast: &Value, env: &Environment) -> Result<Value, Error> {
    expand_macros(ast.clone(), env)
}

/// Evaluate def! special form
fn eval_define(args: &[Value], env: &Environment) -> Result<Tail, Error> {
    match args {
        [Value::Symbol(name), expr] => {
            let value = eval(expr, env)?;
            debug!(%name, "def!");
            Ok(Tail::Done(env.set(name.as_str(), value)))
        }
        [_, _] => Err(Error::malformed("def!", "name must be a symbol")),
        _ => Err(Error::malformed(
            "def!",
            format!("expected a name and an expression, got {} forms", args.len()),
        )),
    }
}

/// Evaluate defmacro! special form
fn eval_defmacro(args: &[Value], env: &Environment) -> Result<Tail, Error> {
    match args {
        [Value::Symbol(name), expr] => {
            let value = eval(expr, env)?;
            let Some(macro_fn) = value.to_macro() else {
                return Err(Error::TypeError(format!(
                    "defmacro! requires a function, got {}",
                    value.type_name()
                )));
            };
            debug!(%name, "defmacro!");
            Ok(Tail::Done(env.set(name.as_str(), macro_fn)))
        }
        [_, _] => Err(Error::malformed("defmacro!", "name must be a symbol")),
        _ => Err(Error::malformed(
            "defmacro!",
            format!("expected a name and an expression, got {} forms", args.len()),
        )),
    }
}

/// Evaluate let* special form
fn eval_let(args: &[Value], env: &Environment) -> Result<Tail, Error> {
    let [bindings, body] = args else {
        return Err(Error::malformed(
            "let*",
            format!("expected bindings and one body form, got {} forms", args.len()),
        ));
    };
    let Some(bindings) = bindings.as_sequence() else {
        return Err(Error::malformed("let*", "bindings must be a list or vector"));
    };
    if bindings.len() % 2 != 0 {
        return Err(Error::malformed(
            "let*",
            "bindings must contain an even number of forms",
        ));
    }

    let child = Environment::with_parent(env);
    for pair in bindings.chunks_exact(2) {
        let [Value::Symbol(name), expr] = pair else {
            return Err(Error::malformed("let*", "binding names must be symbols"));
        };
        let value = eval(expr, &child)?;
        child.set(name.as_str(), value);
    }
    Ok(Tail::Eval(body.clone(), child))
}

/// Evaluate do special form
fn eval_do(args: &[Value], env: &Environment) -> Result<Tail, Error> {
    match args {
        [] => Ok(Tail::Done(Value::Nil)),
        [init @ .., last] => {
            for expr in init {
                eval(expr, env)?;
            }
            Ok(Tail::Eval(last.clone(), env.clone()))
        }
    }
}

/// Evaluate if special form
fn eval_if(args: &[Value], env: &Environment) -> Result<Tail, Error> {
    let (condition, then_expr, else_expr) = match args {
        [condition, then_expr] => (condition, then_expr, None),
        [condition, then_expr, else_expr] => (condition, then_expr, Some(else_expr)),
        _ => {
            return Err(Error::malformed(
                "if",
                format!("expected 2 or 3 forms, got {}", args.len()),
            ));
        }
    };

    if eval(condition, env)?.is_truthy() {
        Ok(Tail::Eval(then_expr.clone(), env.clone()))
    } else {
        match else_expr {
            Some(expr) => Ok(Tail::Eval(expr.clone(), env.clone())),
            None => Ok(Tail::Done(Value::Nil)),
        }
    }
}

/// Evaluate fn* special form
fn eval_lambda(args: &[Value], env: &Environment) -> Result<Tail, Error> {
    let [params, body] = args else {
        return Err(Error::malformed(
            "fn*",
            format!("expected parameters and one body form, got {} forms", args.len()),
        ));
    };
    Ok(Tail::Done(Value::Function(Rc::new(Closure {
        params: ParamSpec::from_form(params)?,
        body: body.clone(),
        env: env.clone(),
        is_macro: false,
    }))))
}

/// Evaluate quote special form
fn eval_quote(args: &[Value], _env: &Environment) -> Result<Tail, Error> {
    match args {
        [Value::Vector(items)] => Ok(Tail::Done(Value::List(items.clone()))),
        [expr] => Ok(Tail::Done(expr.clone())),
        _ => Err(Error::malformed(
            "quote",
            format!("expected 1 form, got {}", args.len()),
        )),
    }
}

fn eval_quasiquoteexpand(args: &[Value], _env: &Environment) -> Result<Tail, Error> {
    match args {
        [expr] => Ok(Tail::Done(quasiquote(expr))),
        _ => Err(Error::malformed(
            "quasiquoteexpand",
            format!("expected 1 form, got {}", args.len()),
        )),
    }
}

fn eval_quasiquote(args: &[Value], env: &Environment) -> Result<Tail, Error> {
    match args {
        [expr] => Ok(Tail::Eval(quasiquote(expr), env.clone())),
        _ => Err(Error::malformed(
            "quasiquote",
            format!("expected 1 form, got {}", args.len()),
        )),
    }
}

fn eval_macroexpand(args: &[Value], env: &Environment) -> Result<Tail, Error> {
    match args {
        [expr] => Ok(Tail::Done(macroexpand(expr, env)?)),
        _ => Err(Error::malformed(
            "macroexpand",
            format!("expected 1 form, got {}", args.len()),
        )),
    }
}

/// Evaluate try* special form
///
/// The catch clause is validated before the body runs, so a malformed
/// clause is reported even when the body succeeds.
fn eval_try(args: &[Value], env: &Environment) -> Result<Tail, Error> {
    let (body, clause) = match args {
        [body] => return Ok(Tail::Eval(body.clone(), env.clone())),
        [body, clause] => (body, clause),
        _ => {
            return Err(Error::malformed(
                "try*",
                format!("expected a body and at most one catch* clause, got {} forms", args.len()),
            ));
        }
    };

    let (name, handler) = match clause.as_sequence() {
        Some([Value::Symbol(head), Value::Symbol(name), handler])
            if head == "catch*" && matches!(clause, Value::List(_)) =>
        {
            (name, handler)
        }
        _ => {
            return Err(Error::malformed(
                "try*",
                "catch clause must have the form (catch* symbol handler)",
            ));
        }
    };

    match eval(body, env) {
        Ok(value) => Ok(Tail::Done(value)),
        Err(err) if err.is_catchable() => {
            debug!(error = %err, binding = %name, "exception caught");
            let child = Environment::with_parent(env);
            child.set(name.as_str(), err.into_value());
            Ok(Tail::Eval(handler.clone(), child))
        }
        Err(err) => Err(err),
    }
}

/// `cond` as a native macro, one clause per expansion step:
/// `(cond c e rest...)` becomes `(if c e (cond rest...))` and `(cond)` is nil.
/// A test without an expression throws only when that test is true.
fn expand_cond(args: Vec<Value>) -> Result<Value, Error> {
    let Some(test) = args.first() else {
        return Ok(Value::Nil);
    };
    let branch = match args.get(1) {
        Some(expr) => expr.clone(),
        None => Value::list(vec![sym("throw"), Value::from("odd number of forms to cond")]),
    };
    let mut rest = vec![sym("cond")];
    rest.extend(args.iter().skip(2).cloned());
    Ok(Value::list(vec![sym("if"), test.clone(), branch, Value::list(rest)]))
}

/// Create a global environment with the native library installed
///
/// Besides the native function table this binds `eval` (evaluating in this
/// environment), `load-file` when the reader is available, the `cond`
/// macro, `*ARGV*` (an empty list) and `*host-language*`.
pub fn create_global_env() -> Environment {
    let env = Environment::new();

    for builtin_op in get_builtin_ops() {
        env.set(builtin_op.id, builtin_op.to_value());
    }

    let root = env.downgrade();
    env.set(
        "eval",
        Value::native("eval", move |args| {
            let [ast] = args.as_slice() else {
                return Err(Error::arity_error(Arity::Exact(1), args.len()));
            };
            let env = root
                .upgrade()
                .ok_or_else(|| Error::EvalError("eval: environment no longer exists".into()))?;
            eval(ast, &env)
        }),
    );

    #[cfg(feature = "reader")]
    {
        let root = env.downgrade();
        env.set(
            "load-file",
            Value::native("load-file", move |args| {
                let [Value::String(path)] = args.as_slice() else {
                    return match args.as_slice() {
                        [other] => Err(Error::TypeError(format!(
                            "load-file expects a string, got {}",
                            other.type_name()
                        ))),
                        _ => Err(Error::arity_error(Arity::Exact(1), args.len())),
                    };
                };
                let env = root.upgrade().ok_or_else(|| {
                    Error::EvalError("load-file: environment no longer exists".into())
                })?;
                let text = std::fs::read_to_string(path)
                    .map_err(|err| Error::EvalError(format!("load-file {path}: {err}")))?;
                debug!(%path, "load-file");
                let program = crate::reader::read_str(&format!("(do {text}\nnil)"))?;
                eval(&program, &env)
            }),
        );
    }

    env.set(
        "cond",
        Value::BuiltinFunction {
            id: "cond".to_owned(),
            func: Rc::new(expand_cond),
            is_macro: true,
        },
    );
    env.set("*ARGV*", Value::list(Vec::new()));
    env.set("*host-language*", Value::from("rust"));

    env
}
