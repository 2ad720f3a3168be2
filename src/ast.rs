//! This module defines the [`Value`] type, the single representation used for
//! Mal source code and for runtime data alike. It covers the scalar types
//! (nil, booleans, integers, strings, keywords, symbols), the three immutable
//! collections (lists, vectors, hash maps), mutable atoms, and the two kinds
//! of functions: natives implemented in Rust and closures created by `fn*`.
//!
//! Ergonomic helpers such as [`val`], [`sym`] and [`nil`] build values in
//! code and tests; `From` conversions cover common Rust types. Equality
//! follows Mal semantics (lists and vectors with equal elements are equal,
//! functions and atoms compare by identity), and `Display` prints values
//! readably so that the reader accepts the printed form again.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::Error;
use crate::evaluator::Environment;
use crate::evaluator::intooperation::NativeFn;
use crate::evaluator::stack::ensure_sufficient_stack;

/// Type alias for number values in interpreter
pub(crate) type NumberType = i64;

/// Separator in a parameter list introducing the variadic parameter
pub(crate) const VARIADIC_MARKER: &str = "&";

/// Key of a Mal hash map: either a string or a keyword
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapKey {
    String(String),
    Keyword(String),
}

impl MapKey {
    pub fn to_value(&self) -> Value {
        match self {
            MapKey::String(s) => Value::String(s.clone()),
            MapKey::Keyword(k) => Value::Keyword(k.clone()),
        }
    }
}

impl TryFrom<&Value> for MapKey {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self, Error> {
        match value {
            Value::String(s) => Ok(MapKey::String(s.clone())),
            Value::Keyword(k) => Ok(MapKey::Keyword(k.clone())),
            other => Err(Error::TypeError(format!(
                "hash-map keys must be strings or keywords, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Parameter list of a closure: fixed names, then an optional variadic name
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub fixed: Vec<String>,
    pub rest: Option<String>,
}

impl ParamSpec {
    /// Build a parameter spec from the parameter form of `fn*`.
    ///
    /// The form is a list or vector of symbols in which `&` may appear once,
    /// followed by exactly one more symbol.
    pub fn from_form(form: &Value) -> Result<Self, Error> {
        let Some(items) = form.as_sequence() else {
            return Err(Error::malformed(
                "fn*",
                format!("parameters must be a list or vector, got {form}"),
            ));
        };

        let mut fixed = Vec::with_capacity(items.len());
        let mut iter = items.iter();
        while let Some(item) = iter.next() {
            let Value::Symbol(name) = item else {
                return Err(Error::malformed(
                    "fn*",
                    format!("parameter names must be symbols, got {item}"),
                ));
            };

            if name == VARIADIC_MARKER {
                return match (iter.next(), iter.next()) {
                    (Some(Value::Symbol(rest)), None) if rest != VARIADIC_MARKER => Ok(ParamSpec {
                        fixed,
                        rest: Some(rest.clone()),
                    }),
                    _ => Err(Error::malformed(
                        "fn*",
                        "'&' must be followed by exactly one parameter name",
                    )),
                };
            }
            fixed.push(name.clone());
        }

        Ok(ParamSpec { fixed, rest: None })
    }
}

/// A function created by `fn*`
pub struct Closure {
    pub params: ParamSpec,
    pub body: Value,
    /// Defining scope, shared with the code that created the closure
    pub env: Environment,
    pub is_macro: bool,
}

impl Closure {
    /// Copy of this closure with the macro flag set
    pub(crate) fn as_macro(&self) -> Closure {
        Closure {
            params: self.params.clone(),
            body: self.body.clone(),
            env: self.env.clone(),
            is_macro: true,
        }
    }
}

/// Storage behind a [`Shared`] handle that can give up its nested values
pub trait NestedValues {
    /// Move every directly contained value into `out`
    fn drain_into(&mut self, out: &mut Vec<Value>);
}

impl NestedValues for Vec<Value> {
    fn drain_into(&mut self, out: &mut Vec<Value>) {
        out.append(self);
    }
}

impl NestedValues for HashMap<MapKey, Value> {
    fn drain_into(&mut self, out: &mut Vec<Value>) {
        out.extend(self.drain().map(|(_, value)| value));
    }
}

impl NestedValues for RefCell<Value> {
    fn drain_into(&mut self, out: &mut Vec<Value>) {
        out.push(std::mem::replace(self.get_mut(), Value::Nil));
    }
}

/// Reference-counted collection storage.
///
/// Dropping the last handle releases nested collections with a worklist
/// instead of recursion, so arbitrarily deep values can be freed on any
/// stack.
pub struct Shared<T: NestedValues>(Rc<T>);

impl<T: NestedValues> Shared<T> {
    pub fn new(inner: T) -> Self {
        Shared(Rc::new(inner))
    }

    /// Whether both handles refer to the same storage
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl<T: NestedValues> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared(Rc::clone(&self.0))
    }
}

impl<T: NestedValues> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: NestedValues + PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        *self.0 == *other.0
    }
}

impl<T: NestedValues> Drop for Shared<T> {
    fn drop(&mut self) {
        let Some(inner) = Rc::get_mut(&mut self.0) else {
            return;
        };
        let mut pending = Vec::new();
        inner.drain_into(&mut pending);
        // Each popped value is emptied first, so its own drop is shallow
        while let Some(mut value) = pending.pop() {
            value.drain_unique_children(&mut pending);
        }
    }
}

/// Core value type of the interpreter
///
/// Lists, vectors and maps are reference-counted immutable snapshots: builtin
/// operations build new collections instead of modifying existing ones.
/// Atoms are the only mutable values.
///
/// To build values, use the ergonomic helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for nil
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    /// Numbers (integers only)
    Number(NumberType),
    String(String),
    /// Keywords, stored without the leading colon
    Keyword(String),
    /// Symbols (identifiers)
    Symbol(String),
    List(Shared<Vec<Value>>),
    Vector(Shared<Vec<Value>>),
    HashMap(Shared<HashMap<MapKey, Value>>),
    Atom(Shared<RefCell<Value>>),
    /// Functions implemented in Rust
    /// Uses the id string for equality comparison instead of the function pointer
    BuiltinFunction {
        id: String,
        func: Rc<NativeFn>,
        is_macro: bool,
    },
    /// User-defined functions and macros
    Function(Rc<Closure>),
}

impl Value {
    pub fn symbol(name: impl AsRef<str>) -> Value {
        Value::Symbol(name.as_ref().to_owned())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Shared::new(items))
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(Shared::new(items))
    }

    pub fn hash_map(entries: HashMap<MapKey, Value>) -> Value {
        Value::HashMap(Shared::new(entries))
    }

    pub fn atom(value: Value) -> Value {
        Value::Atom(Shared::new(RefCell::new(value)))
    }

    /// Wrap a Rust closure as a native function value
    pub fn native<F>(id: &str, func: F) -> Value
    where
        F: Fn(Vec<Value>) -> Result<Value, Error> + 'static,
    {
        Value::BuiltinFunction {
            id: id.to_owned(),
            func: Rc::new(func),
            is_macro: false,
        }
    }

    /// Build a map from alternating key/value forms
    pub fn hash_map_from_pairs<'a>(
        items: impl ExactSizeIterator<Item = &'a Value>,
    ) -> Result<Value, Error> {
        if items.len() % 2 != 0 {
            return Err(Error::EvalError(
                "hash-map requires an even number of arguments".into(),
            ));
        }

        let mut entries = HashMap::with_capacity(items.len() / 2);
        let mut items = items;
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            entries.insert(MapKey::try_from(key)?, value.clone());
        }
        Ok(Value::hash_map(entries))
    }

    /// Only nil and false are falsy; `0`, `""` and empty collections are truthy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Move the contents of uniquely owned collections into `out`
    fn drain_unique_children(&mut self, out: &mut Vec<Value>) {
        match self {
            Value::List(items) | Value::Vector(items) => {
                if let Some(inner) = Rc::get_mut(&mut items.0) {
                    inner.drain_into(out);
                }
            }
            Value::HashMap(entries) => {
                if let Some(inner) = Rc::get_mut(&mut entries.0) {
                    inner.drain_into(out);
                }
            }
            Value::Atom(cell) => {
                if let Some(inner) = Rc::get_mut(&mut cell.0) {
                    inner.drain_into(out);
                }
            }
            _ => {}
        }
    }

    /// Elements of a list or vector
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Vector(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Whether this is a function flagged as a macro
    pub fn is_macro(&self) -> bool {
        match self {
            Value::BuiltinFunction { is_macro, .. } => *is_macro,
            Value::Function(closure) => closure.is_macro,
            _ => false,
        }
    }

    /// Copy of a function value with the macro flag set; None for non-functions
    pub(crate) fn to_macro(&self) -> Option<Value> {
        match self {
            Value::BuiltinFunction { id, func, .. } => Some(Value::BuiltinFunction {
                id: id.clone(),
                func: Rc::clone(func),
                is_macro: true,
            }),
            Value::Function(closure) => Some(Value::Function(Rc::new(closure.as_macro()))),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Symbol(_) => "symbol",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::HashMap(_) => "hash-map",
            Value::Atom(_) => "atom",
            Value::BuiltinFunction { .. } | Value::Function(_) => "function",
        }
    }

    /// Display adapter choosing between readable and raw printing
    ///
    /// Readable output quotes and escapes strings (`pr-str`, `prn`); raw
    /// output emits string contents as-is (`str`, `println`).
    pub fn printed(&self, readably: bool) -> Printed<'_> {
        Printed {
            value: self,
            readably,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ensure_sufficient_stack(|| self.write_debug(f))
    }
}

impl Value {
    fn write_debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_items(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{v:?}")?;
            }
            Ok(())
        }

        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String(\"{s}\")"),
            Value::Keyword(k) => write!(f, "Keyword({k})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::List(items) => {
                write!(f, "List(")?;
                write_items(f, items)?;
                write!(f, ")")
            }
            Value::Vector(items) => {
                write!(f, "Vector(")?;
                write_items(f, items)?;
                write!(f, ")")
            }
            Value::HashMap(entries) => {
                let mut sorted: Vec<_> = entries.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(b.0));
                write!(f, "HashMap(")?;
                for (i, (k, v)) in sorted.into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k:?} => {v:?}")?;
                }
                write!(f, ")")
            }
            Value::Atom(cell) => write!(f, "Atom({:?})", cell.borrow()),
            Value::BuiltinFunction { id, is_macro, .. } => {
                write!(f, "BuiltinFunction({id}, macro={is_macro})")
            }
            Value::Function(closure) => write!(
                f,
                "Function(params={:?}, body={:?}, macro={})",
                closure.params, closure.body, closure.is_macro
            ),
        }
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Number(n as i64)
            }
        }
    };
}

// Generate From implementations for all integer types
impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(NumberType); // Special case - no casting
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(slice: &[T]) -> Self {
        Value::list(slice.iter().cloned().map(|x| x.into()).collect())
    }
}

// Fallible conversions from `Value` back into primitive Rust types.
// These feed the typed builtin adapters in `evaluator::intooperation`.

impl TryFrom<Value> for NumberType {
    type Error = Error;

    fn try_from(value: Value) -> Result<NumberType, Error> {
        if let Value::Number(n) = value {
            Ok(n)
        } else {
            Err(Error::TypeError(format!(
                "expected number, got {}",
                value.type_name()
            )))
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<bool, Error> {
        if let Value::Bool(b) = value {
            Ok(b)
        } else {
            Err(Error::TypeError(format!(
                "expected boolean, got {}",
                value.type_name()
            )))
        }
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<String, Error> {
        if let Value::String(s) = value {
            Ok(s)
        } else {
            Err(Error::TypeError(format!(
                "expected string, got {}",
                value.type_name()
            )))
        }
    }
}

/// Helper function for creating symbols - works great in mixed lists!
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::symbol(name)
}

/// Helper function for creating keywords; the name excludes the colon
pub fn kw<S: AsRef<str>>(name: S) -> Value {
    Value::Keyword(name.as_ref().to_owned())
}

/// Helper function for creating Values - works great in mixed lists!
/// Accepts any type that can be converted to Value
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for creating nil
pub fn nil() -> Value {
    Value::Nil
}

/// Helper function for creating vectors from anything convertible to values
pub fn vector<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Value {
    Value::vector(items.into_iter().map(Into::into).collect())
}

/// Printing adapter returned by [`Value::printed`]
pub struct Printed<'a> {
    value: &'a Value,
    readably: bool,
}

impl Printed<'_> {
    fn nested<'b>(&self, value: &'b Value) -> Printed<'b> {
        Printed {
            value,
            readably: self.readably,
        }
    }

    fn write_seq(
        &self,
        f: &mut fmt::Formatter<'_>,
        open: &str,
        items: &[Value],
        close: &str,
    ) -> fmt::Result {
        write!(f, "{open}")?;
        for (i, elem) in items.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", self.nested(elem))?;
        }
        write!(f, "{close}")
    }
}

impl fmt::Display for Printed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ensure_sufficient_stack(|| self.write_value(f))
    }
}

impl Printed<'_> {
    fn write_value(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) if self.readably => write_escaped(f, s),
            Value::String(s) => write!(f, "{s}"),
            Value::Keyword(k) => write!(f, ":{k}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::List(items) => self.write_seq(f, "(", items, ")"),
            Value::Vector(items) => self.write_seq(f, "[", items, "]"),
            Value::HashMap(entries) => {
                // Sorted so that printing is deterministic
                let mut sorted: Vec<_> = entries.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(b.0));
                write!(f, "{{")?;
                for (i, (key, value)) in sorted.into_iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    let key = key.to_value();
                    write!(f, "{} {}", self.nested(&key), self.nested(value))?;
                }
                write!(f, "}}")
            }
            Value::Atom(cell) => write!(f, "(atom {})", self.nested(&cell.borrow())),
            Value::BuiltinFunction { id, .. } => write!(f, "#<builtin-function:{id}>"),
            Value::Function(closure) if closure.is_macro => write!(f, "#<macro>"),
            Value::Function(_) => write!(f, "#<function>"),
        }
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for ch in s.chars() {
        match ch {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.printed(true))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        ensure_sufficient_stack(|| self.equals(other))
    }
}

impl Value {
    fn equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            // Lists and vectors with equal elements are equal
            (
                Value::List(a) | Value::Vector(a),
                Value::List(b) | Value::Vector(b),
            ) => a == b,
            (Value::HashMap(a), Value::HashMap(b)) => a == b,
            (Value::Atom(a), Value::Atom(b)) => Shared::ptr_eq(a, b),
            (
                Value::BuiltinFunction {
                    id: id1,
                    is_macro: m1,
                    ..
                },
                Value::BuiltinFunction {
                    id: id2,
                    is_macro: m2,
                    ..
                },
            ) => {
                // Compare BuiltinFunctions by id string, not function pointer
                id1 == id2 && m1 == m2
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false, // Different variants are never equal
        }
    }
}
