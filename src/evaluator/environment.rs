use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::Error;
use crate::ast::{ParamSpec, Value};
use crate::evaluator::Arity;
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};

struct Frame {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Environment>,
}

/// A lexical scope: a table of bindings plus an optional enclosing scope.
///
/// `Environment` is a cheap handle. Cloning it yields another handle to the
/// same scope, so a `def!` performed through one handle is visible through
/// every other, including the handles captured by closures.
#[derive(Clone)]
pub struct Environment {
    frame: Rc<Frame>,
}

/// Non-owning handle to an [`Environment`].
///
/// Natives that need to call back into the evaluator (`eval`, `load-file`)
/// hold the root environment through this handle so that the root does not
/// keep itself alive through its own bindings.
#[derive(Clone)]
pub(crate) struct WeakEnvironment {
    frame: Weak<Frame>,
}

impl WeakEnvironment {
    pub(crate) fn upgrade(&self) -> Option<Environment> {
        self.frame.upgrade().map(|frame| Environment { frame })
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// A new root scope with no bindings
    pub fn new() -> Self {
        Environment {
            frame: Rc::new(Frame {
                bindings: RefCell::new(HashMap::new()),
                parent: None,
            }),
        }
    }

    /// A new empty scope whose lookups fall back to `parent`
    pub fn with_parent(parent: &Environment) -> Self {
        Environment {
            frame: Rc::new(Frame {
                bindings: RefCell::new(HashMap::new()),
                parent: Some(parent.clone()),
            }),
        }
    }

    /// A new child scope of `parent` binding `params` to `args`.
    ///
    /// Fixed parameters are bound positionally. A variadic parameter
    /// receives the remaining arguments as a list, which is empty when no
    /// arguments remain.
    pub fn bind(parent: &Environment, params: &ParamSpec, args: Vec<Value>) -> Result<Self, Error> {
        let fixed = params.fixed.len();
        let arity = match params.rest {
            Some(_) => Arity::AtLeast(fixed),
            None => Arity::Exact(fixed),
        };
        arity.validate(args.len())?;

        let env = Environment::with_parent(parent);
        {
            let mut bindings = env.frame.bindings.borrow_mut();
            let mut args = args.into_iter();
            for (name, arg) in params.fixed.iter().zip(args.by_ref()) {
                bindings.insert(name.clone(), arg);
            }
            if let Some(rest) = &params.rest {
                bindings.insert(rest.clone(), Value::list(args.collect()));
            }
        }
        Ok(env)
    }

    /// Bind `name` in this scope (never in a parent), replacing any
    /// previous binding. Returns the bound value.
    pub fn set(&self, name: impl Into<String>, value: Value) -> Value {
        self.frame
            .bindings
            .borrow_mut()
            .insert(name.into(), value.clone());
        value
    }

    /// Look `name` up in this scope and then in each enclosing scope
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut frame = &self.frame;
        loop {
            if let Some(value) = frame.bindings.borrow().get(name) {
                return Some(value.clone());
            }
            match &frame.parent {
                Some(parent) => frame = &parent.frame,
                None => return None,
            }
        }
    }

    /// Like [`Environment::lookup`], failing with `UnboundSymbol`
    pub fn get(&self, name: &str) -> Result<Value, Error> {
        self.lookup(name)
            .ok_or_else(|| Error::UnboundSymbol(name.to_owned()))
    }

    pub(crate) fn downgrade(&self) -> WeakEnvironment {
        WeakEnvironment {
            frame: Rc::downgrade(&self.frame),
        }
    }

    fn insert_native(&self, name: &str, func: Arc<OperationFn>) {
        self.set(
            name,
            Value::BuiltinFunction {
                id: name.to_owned(),
                func: Rc::new(move |args: Vec<Value>| func(args)),
                is_macro: false,
            },
        );
    }

    /// Register a custom native function in this scope.
    ///
    /// This is the low-level API: it accepts a function that already works
    /// on `&[Value]`. For most new code, prefer
    /// [`Environment::register_builtin_operation`], which converts
    /// arguments and results automatically.
    ///
    /// # Example
    /// ```
    /// use malxp::evaluator::create_global_env;
    /// use malxp::ast::Value;
    /// use malxp::Error;
    ///
    /// fn arg_count(args: &[Value]) -> Result<Value, Error> {
    ///     Ok(Value::Number(args.len() as i64))
    /// }
    ///
    /// let env = create_global_env();
    /// env.register_builtin_function("arg-count", arg_count);
    /// // Now (arg-count 1 2 3) evaluates to 3
    /// ```
    pub fn register_builtin_function(&self, name: &str, func: fn(&[Value]) -> Result<Value, Error>) {
        self.insert_native(name, Arc::new(move |args: Vec<Value>| func(&args)));
    }

    /// Register a strongly-typed Rust function as a native using automatic
    /// argument extraction and result conversion.
    ///
    /// ```rust,ignore
    /// fn add(a: i64, b: i64) -> i64 { a + b }
    /// let env = malxp::evaluator::create_global_env();
    /// env.register_builtin_operation::<_, (i64, i64)>("add", add);
    /// ```
    ///
    /// Supported parameter types:
    /// - `i64` (number)
    /// - `bool` (boolean)
    /// - `String` and `&str` (string)
    /// - `Value` (owned access to the raw value)
    /// - `ValueIter<'_>` (elements of a list or vector argument as `&Value`)
    /// - `NumIter<'_>` (numeric elements of a list or vector argument)
    ///
    /// Supported return types are any `R: Into<Value>` and
    /// `Result<R, Error>`.
    ///
    /// Arity is enforced automatically. Conversion failures yield
    /// `TypeError`.
    pub fn register_builtin_operation<F, Args>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args> + 'static,
    {
        self.insert_native(name, func.into_operation());
    }

    /// Register a variadic native with explicit arity metadata.
    ///
    /// The Rust signature ends in a rest parameter expressed with the
    /// iterator types from [`crate::evaluator::intooperation`]:
    /// - rest of all arguments as values: `fn(ValueIter<'_>) -> R`
    /// - fixed prefix plus numeric tail: `fn(i64, NumIter<'_>) -> R`
    ///
    /// The provided [`Arity`] validates the total argument count at call
    /// time.
    pub fn register_variadic_builtin_operation<F, Args>(&self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args> + 'static,
    {
        let inner = func.into_variadic_operation();
        self.insert_native(
            name,
            Arc::new(move |args: Vec<Value>| {
                arity.validate(args.len())?;
                inner(args)
            }),
        );
    }

    /// Get all bindings in this environment and its parents
    /// Returns a Vec of (name, value) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = HashMap::new();

        // Innermost binding wins, so walk outward and keep the first seen
        let mut frame = Some(&self.frame);
        while let Some(current) = frame {
            for (name, value) in current.bindings.borrow().iter() {
                bindings
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
            frame = current.parent.as_ref().map(|parent| &parent.frame);
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

// Closures capture their defining scope, which may contain the closure
// itself, so the derived Debug would recurse without end.
impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut depth = 0;
        let mut frame = self.frame.parent.as_ref();
        while let Some(parent) = frame {
            depth += 1;
            frame = parent.frame.parent.as_ref();
        }
        f.debug_struct("Environment")
            .field("bindings", &self.frame.bindings.borrow().len())
            .field("depth", &depth)
            .finish()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{sym, val};

    #[test]
    fn test_set_and_lookup_through_parents() {
        let root = Environment::new();
        root.set("x", val(1));
        let child = Environment::with_parent(&root);
        child.set("y", val(2));

        assert_eq!(child.get("x").unwrap(), val(1));
        assert_eq!(child.get("y").unwrap(), val(2));
        assert!(root.lookup("y").is_none());

        // Shadowing only affects the child
        child.set("x", val(10));
        assert_eq!(child.get("x").unwrap(), val(10));
        assert_eq!(root.get("x").unwrap(), val(1));

        assert_eq!(
            child.get("missing").unwrap_err(),
            Error::UnboundSymbol("missing".into())
        );
    }

    #[test]
    fn test_shared_handles_observe_mutation() {
        let env = Environment::new();
        let alias = env.clone();
        let child = Environment::with_parent(&env);

        alias.set("late", val("bound"));
        assert_eq!(child.get("late").unwrap(), val("bound"));
        assert_eq!(env.get("late").unwrap(), val("bound"));

        child.set("late", val("shadowed"));
        assert_eq!(alias.get("late").unwrap(), val("bound"));
    }

    #[test]
    fn test_bind_fixed_and_rest() {
        let root = Environment::new();
        let params = ParamSpec::from_form(&val(vec![sym("a"), sym("&"), sym("more")])).unwrap();

        let env = Environment::bind(&root, &params, vec![val(1), val(2), val(3)]).unwrap();
        assert_eq!(env.get("a").unwrap(), val(1));
        assert_eq!(env.get("more").unwrap(), val([2, 3]));

        let env = Environment::bind(&root, &params, vec![val(1)]).unwrap();
        assert_eq!(env.get("more").unwrap(), val(Vec::<Value>::new()));

        assert!(matches!(
            Environment::bind(&root, &params, vec![]),
            Err(Error::ArityError {
                expected: Arity::AtLeast(1),
                got: 0,
                ..
            })
        ));

        let fixed = ParamSpec::from_form(&val(vec![sym("a"), sym("b")])).unwrap();
        assert!(matches!(
            Environment::bind(&root, &fixed, vec![val(1), val(2), val(3)]),
            Err(Error::ArityError {
                expected: Arity::Exact(2),
                got: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_get_all_bindings_prefers_inner() {
        let root = Environment::new();
        root.set("a", val(1));
        root.set("b", val(2));
        let child = Environment::with_parent(&root);
        child.set("a", val(100));

        let all = child.get_all_bindings();
        assert_eq!(
            all,
            vec![("a".to_owned(), val(100)), ("b".to_owned(), val(2))]
        );
    }

    #[test]
    fn test_weak_handle_does_not_keep_scope_alive() {
        let env = Environment::new();
        let weak = env.downgrade();
        assert!(weak.upgrade().is_some());
        drop(env);
        assert!(weak.upgrade().is_none());
    }
}
