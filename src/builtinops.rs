//! Built-in native function registry.
//!
//! This module provides the table of native functions installed into every
//! global environment. Each native is an ordinary strongly-typed Rust
//! function wired through the adapter layer in
//! [`crate::evaluator::intooperation`], which converts arguments, checks
//! types and normalizes results.
//!
//! ```text
//! (+ 1 2 3)                 ; arithmetic, checked for overflow
//! (assoc {:a 1} :b 2)       ; immutable maps
//! (swap! counter + 1)       ; atoms, calling back into the evaluator
//! ```
//!
//! ## Error Handling
//!
//! - **Type errors**: arguments of the wrong type fail with `TypeError`
//!   before the native runs
//! - **Runtime errors**: overflow, out-of-range indices and I/O failures are
//!   `EvalError`s
//! - **Arity**: every native declares an [`Arity`], validated on each call
//!
//! All of these except arity errors can be caught with `try*`.
//!
//! Natives that need the evaluator's environment (`eval`, `load-file`) and
//! the `cond` macro are installed by
//! [`create_global_env`](crate::evaluator::create_global_env) instead.

use crate::Error;
use crate::ast::{MapKey, NumberType, Value};
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};
use crate::evaluator::{Arity, NumIter, ValueIter, apply};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, LazyLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Definition of a built-in operation
#[derive(Clone)]
pub struct BuiltinOp {
    /// The symbol this operation is bound to
    pub id: &'static str,
    /// The implementation, via the canonical erased builtin signature
    pub func: Arc<OperationFn>,
    /// Expected number of arguments
    pub arity: Arity,
}

impl std::fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinOp")
            .field("id", &self.id)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        // Operations are uniquely identified by their symbol
        self.id == other.id
    }
}

impl BuiltinOp {
    /// Check if the given number of arguments is valid for this operation
    pub(crate) fn validate_arity(&self, arg_count: usize) -> Result<(), Error> {
        self.arity.validate(arg_count)
    }

    /// Call the operation, validating arity first
    pub fn call(&self, args: Vec<Value>) -> Result<Value, Error> {
        self.validate_arity(args.len())?;
        (self.func)(args)
    }

    /// The operation as a callable value
    pub fn to_value(&self) -> Value {
        let func = Arc::clone(&self.func);
        let arity = self.arity;
        Value::BuiltinFunction {
            id: self.id.to_owned(),
            func: Rc::new(move |args: Vec<Value>| {
                arity.validate(args.len())?;
                func(args)
            }),
            is_macro: false,
        }
    }
}

fn type_error(op: &str, expected: &str, got: &Value) -> Error {
    Error::TypeError(format!("{op}: expected {expected}, got {}", got.type_name()))
}

//
// Arithmetic and comparison
//

// Macro to generate chained numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $op:tt) => {
        fn $name(first: NumberType, rest: NumIter<'_>) -> bool {
            // All adjacent pairs must satisfy the comparison
            let mut prev = first;
            for current in rest {
                if !(prev $op current) {
                    return false;
                }
                prev = current;
            }
            true
        }
    };
}

numeric_comparison!(builtin_lt, <);
numeric_comparison!(builtin_gt, >);
numeric_comparison!(builtin_le, <=);
numeric_comparison!(builtin_ge, >=);

fn builtin_add(args: NumIter<'_>) -> Result<NumberType, Error> {
    let mut sum = 0 as NumberType;
    for arg in args {
        sum = sum
            .checked_add(arg)
            .ok_or_else(|| Error::EvalError("Integer overflow in addition".into()))?;
    }
    Ok(sum)
}

fn builtin_sub(first: NumberType, rest: NumIter<'_>) -> Result<NumberType, Error> {
    let mut iter = rest.peekable();

    if iter.peek().is_none() {
        return first
            .checked_neg()
            .ok_or_else(|| Error::EvalError("Integer overflow in negation".into()));
    }

    let mut result = first;
    for n in iter {
        result = result
            .checked_sub(n)
            .ok_or_else(|| Error::EvalError("Integer overflow in subtraction".into()))?;
    }

    Ok(result)
}

fn builtin_mul(first: NumberType, rest: NumIter<'_>) -> Result<NumberType, Error> {
    let mut product = first;
    for n in rest {
        product = product
            .checked_mul(n)
            .ok_or_else(|| Error::EvalError("Integer overflow in multiplication".into()))?;
    }
    Ok(product)
}

fn builtin_div(first: NumberType, rest: NumIter<'_>) -> Result<NumberType, Error> {
    let mut quotient = first;
    for n in rest {
        if n == 0 {
            return Err(Error::EvalError("Division by zero".into()));
        }
        quotient = quotient
            .checked_div(n)
            .ok_or_else(|| Error::EvalError("Integer overflow in division".into()))?;
    }
    Ok(quotient)
}

fn builtin_equal(first: Value, second: Value) -> bool {
    first == second
}

//
// Predicates
//

macro_rules! type_predicate {
    ($name:ident, $pattern:pat) => {
        fn $name(value: Value) -> bool {
            matches!(value, $pattern)
        }
    };
}

type_predicate!(builtin_nil_p, Value::Nil);
type_predicate!(builtin_true_p, Value::Bool(true));
type_predicate!(builtin_false_p, Value::Bool(false));
type_predicate!(builtin_symbol_p, Value::Symbol(_));
type_predicate!(builtin_keyword_p, Value::Keyword(_));
type_predicate!(builtin_string_p, Value::String(_));
type_predicate!(builtin_number_p, Value::Number(_));
type_predicate!(builtin_list_p, Value::List(_));
type_predicate!(builtin_vector_p, Value::Vector(_));
type_predicate!(builtin_map_p, Value::HashMap(_));
type_predicate!(builtin_sequential_p, Value::List(_) | Value::Vector(_));
type_predicate!(builtin_atom_p, Value::Atom(_));

fn builtin_fn_p(value: Value) -> bool {
    matches!(value, Value::BuiltinFunction { .. } | Value::Function(_)) && !value.is_macro()
}

fn builtin_macro_p(value: Value) -> bool {
    value.is_macro()
}

fn builtin_empty_p(seq: ValueIter<'_>) -> bool {
    seq.len() == 0
}

fn builtin_contains_p(map: Value, key: Value) -> Result<bool, Error> {
    match &map {
        Value::HashMap(entries) => Ok(MapKey::try_from(&key)
            .map(|key| entries.contains_key(&key))
            .unwrap_or(false)),
        Value::Nil => Ok(false),
        other => Err(type_error("contains?", "hash-map", other)),
    }
}

//
// Constructors
//

fn builtin_symbol(name: String) -> Value {
    Value::Symbol(name)
}

fn builtin_keyword(name: Value) -> Result<Value, Error> {
    match name {
        Value::String(s) => Ok(Value::Keyword(s)),
        keyword @ Value::Keyword(_) => Ok(keyword),
        other => Err(type_error("keyword", "string", &other)),
    }
}

fn builtin_list(args: ValueIter<'_>) -> Value {
    Value::list(args.cloned().collect())
}

fn builtin_vector(args: ValueIter<'_>) -> Value {
    Value::vector(args.cloned().collect())
}

fn builtin_hash_map(args: ValueIter<'_>) -> Result<Value, Error> {
    Value::hash_map_from_pairs(args)
}

fn builtin_vec(seq: ValueIter<'_>) -> Value {
    Value::vector(seq.cloned().collect())
}

//
// Maps
//

fn map_entries<'a>(op: &str, map: &'a Value) -> Result<Option<&'a HashMap<MapKey, Value>>, Error> {
    match map {
        Value::HashMap(entries) => Ok(Some(&**entries)),
        Value::Nil => Ok(None),
        other => Err(type_error(op, "hash-map", other)),
    }
}

fn builtin_assoc(map: Value, mut pairs: ValueIter<'_>) -> Result<Value, Error> {
    if pairs.len() % 2 != 0 {
        return Err(Error::EvalError(
            "assoc requires an even number of key/value arguments".into(),
        ));
    }
    let mut entries = map_entries("assoc", &map)?.cloned().unwrap_or_default();
    while let (Some(key), Some(value)) = (pairs.next(), pairs.next()) {
        entries.insert(MapKey::try_from(key)?, value.clone());
    }
    Ok(Value::hash_map(entries))
}

fn builtin_dissoc(map: Value, keys: ValueIter<'_>) -> Result<Value, Error> {
    let mut entries = map_entries("dissoc", &map)?.cloned().unwrap_or_default();
    for key in keys {
        if let Ok(key) = MapKey::try_from(key) {
            entries.remove(&key);
        }
    }
    Ok(Value::hash_map(entries))
}

fn builtin_get(map: Value, key: Value) -> Result<Value, Error> {
    let Some(entries) = map_entries("get", &map)? else {
        return Ok(Value::Nil);
    };
    Ok(MapKey::try_from(&key)
        .ok()
        .and_then(|key| entries.get(&key).cloned())
        .unwrap_or(Value::Nil))
}

/// Entries sorted by key so that `keys` and `vals` line up and print
/// deterministically
fn sorted_entries(op: &str, map: &Value) -> Result<Vec<(MapKey, Value)>, Error> {
    let mut entries: Vec<_> = map_entries(op, map)?
        .map(|entries| entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

fn builtin_keys(map: Value) -> Result<Value, Error> {
    let entries = sorted_entries("keys", &map)?;
    Ok(Value::list(entries.iter().map(|(k, _)| k.to_value()).collect()))
}

fn builtin_vals(map: Value) -> Result<Value, Error> {
    let entries = sorted_entries("vals", &map)?;
    Ok(Value::list(entries.into_iter().map(|(_, v)| v).collect()))
}

//
// Sequences
//

fn builtin_cons(first: Value, rest: ValueIter<'_>) -> Value {
    let mut items = Vec::with_capacity(rest.len() + 1);
    items.push(first);
    items.extend(rest.cloned());
    Value::list(items)
}

fn builtin_concat(seqs: ValueIter<'_>) -> Result<Value, Error> {
    let mut items = Vec::new();
    for seq in seqs {
        match seq {
            Value::List(elements) | Value::Vector(elements) => items.extend_from_slice(elements),
            Value::Nil => {}
            other => return Err(type_error("concat", "list or vector", other)),
        }
    }
    Ok(Value::list(items))
}

fn builtin_nth(seq: ValueIter<'_>, index: NumberType) -> Result<Value, Error> {
    let items = seq.as_slice();
    usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i))
        .cloned()
        .ok_or_else(|| {
            Error::EvalError(format!(
                "nth: index {index} out of range for sequence of length {}",
                items.len()
            ))
        })
}

fn builtin_first(mut seq: ValueIter<'_>) -> Value {
    seq.next().cloned().unwrap_or(Value::Nil)
}

fn builtin_rest(mut seq: ValueIter<'_>) -> Value {
    seq.next();
    Value::list(seq.cloned().collect())
}

fn builtin_count(seq: ValueIter<'_>) -> NumberType {
    seq.len() as NumberType
}

fn builtin_conj(coll: Value, items: ValueIter<'_>) -> Result<Value, Error> {
    match &coll {
        Value::List(existing) => {
            // Each new item goes on the front, so they end up reversed
            let mut result: Vec<Value> = items.rev().cloned().collect();
            result.extend_from_slice(existing);
            Ok(Value::list(result))
        }
        Value::Vector(existing) => {
            let mut result = existing.to_vec();
            result.extend(items.cloned());
            Ok(Value::vector(result))
        }
        other => Err(type_error("conj", "list or vector", other)),
    }
}

fn builtin_seq(value: Value) -> Result<Value, Error> {
    match &value {
        Value::List(items) | Value::Vector(items) if items.is_empty() => Ok(Value::Nil),
        Value::List(_) => Ok(value),
        Value::Vector(items) => Ok(Value::List(items.clone())),
        Value::String(s) if s.is_empty() => Ok(Value::Nil),
        Value::String(s) => Ok(Value::list(
            s.chars().map(|c| Value::String(c.to_string())).collect(),
        )),
        Value::Nil => Ok(Value::Nil),
        other => Err(type_error("seq", "list, vector, string or nil", other)),
    }
}

fn builtin_apply(func: Value, mut args: ValueIter<'_>) -> Result<Value, Error> {
    let mut call_args: Vec<Value> = Vec::new();
    if let Some(last) = args.next_back() {
        call_args.extend(args.cloned());
        match last {
            Value::List(items) | Value::Vector(items) => call_args.extend_from_slice(items),
            Value::Nil => {}
            other => return Err(type_error("apply", "list or vector as last argument", other)),
        }
    }
    apply(&func, call_args)
}

fn builtin_map(func: Value, seq: ValueIter<'_>) -> Result<Value, Error> {
    let mapped = seq
        .map(|item| apply(&func, vec![item.clone()]))
        .collect::<Result<Vec<_>, Error>>()?;
    Ok(Value::list(mapped))
}

//
// Strings and output
//

fn join_printed(values: ValueIter<'_>, readably: bool, separator: &str) -> String {
    values
        .map(|value| value.printed(readably).to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

fn builtin_pr_str(args: ValueIter<'_>) -> String {
    join_printed(args, true, " ")
}

fn builtin_str(args: ValueIter<'_>) -> String {
    join_printed(args, false, "")
}

fn builtin_prn(args: ValueIter<'_>) -> Value {
    println!("{}", join_printed(args, true, " "));
    Value::Nil
}

fn builtin_println(args: ValueIter<'_>) -> Value {
    println!("{}", join_printed(args, false, " "));
    Value::Nil
}

//
// Atoms
//

fn builtin_atom(value: Value) -> Value {
    Value::atom(value)
}

fn builtin_deref(atom: Value) -> Result<Value, Error> {
    match &atom {
        Value::Atom(cell) => Ok(cell.borrow().clone()),
        other => Err(type_error("deref", "atom", other)),
    }
}

fn builtin_reset(atom: Value, value: Value) -> Result<Value, Error> {
    match &atom {
        Value::Atom(cell) => {
            *cell.borrow_mut() = value.clone();
            Ok(value)
        }
        other => Err(type_error("reset!", "atom", other)),
    }
}

fn builtin_swap(atom: Value, func: Value, extra: ValueIter<'_>) -> Result<Value, Error> {
    let Value::Atom(cell) = &atom else {
        return Err(type_error("swap!", "atom", &atom));
    };
    // The borrow is released before calling back into the evaluator,
    // which may read or reset the same atom
    let current = cell.borrow().clone();
    let mut args = Vec::with_capacity(extra.len() + 1);
    args.push(current);
    args.extend(extra.cloned());
    let updated = apply(&func, args)?;
    *cell.borrow_mut() = updated.clone();
    Ok(updated)
}

//
// Miscellaneous
//

fn builtin_throw(value: Value) -> Result<Value, Error> {
    Err(Error::Throw(value))
}

fn builtin_not(value: Value) -> bool {
    !value.is_truthy()
}

fn builtin_time_ms() -> Result<NumberType, Error> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| Error::EvalError(format!("time-ms: {err}")))?;
    NumberType::try_from(elapsed.as_millis())
        .map_err(|_| Error::EvalError("time-ms: clock out of range".into()))
}

fn builtin_slurp(path: &str) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|err| Error::EvalError(format!("slurp {path}: {err}")))
}

#[cfg(feature = "reader")]
fn builtin_read_string(source: &str) -> Result<Value, Error> {
    use crate::ParseErrorKind;

    match crate::reader::read_str(source) {
        Err(Error::ParseError(err)) if err.kind == ParseErrorKind::Empty => Ok(Value::Nil),
        other => other,
    }
}

/// Global registry of all built-in operations.
///
/// The registry is a single contiguous collection of `BuiltinOp` values for
/// ease of auditing. The typed implementations are wired through the
/// adapter layer once, at initialization time, via a `LazyLock`.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn builtin_fixed<Args, F>(f: F) -> Arc<OperationFn>
    where
        F: IntoOperation<Args>,
    {
        <F as IntoOperation<Args>>::into_operation(f)
    }

    fn builtin_variadic<Args, F>(f: F) -> Arc<OperationFn>
    where
        F: IntoVariadicOperation<Args>,
    {
        <F as IntoVariadicOperation<Args>>::into_variadic_operation(f)
    }

    fn op(id: &'static str, arity: Arity, func: Arc<OperationFn>) -> BuiltinOp {
        BuiltinOp { id, func, arity }
    }

    type Rest = ValueIter<'static>;
    type Nums = NumIter<'static>;

    let mut ops = vec![
        // Arithmetic operations
        op("+", Arity::Any, builtin_variadic::<(Nums,), _>(builtin_add)),
        op("-", Arity::AtLeast(1), builtin_variadic::<(NumberType, Nums), _>(builtin_sub)),
        op("*", Arity::AtLeast(1), builtin_variadic::<(NumberType, Nums), _>(builtin_mul)),
        op("/", Arity::AtLeast(2), builtin_variadic::<(NumberType, Nums), _>(builtin_div)),
        // Comparison operations
        op("=", Arity::Exact(2), builtin_fixed::<(Value, Value), _>(builtin_equal)),
        op("<", Arity::AtLeast(2), builtin_variadic::<(NumberType, Nums), _>(builtin_lt)),
        op("<=", Arity::AtLeast(2), builtin_variadic::<(NumberType, Nums), _>(builtin_le)),
        op(">", Arity::AtLeast(2), builtin_variadic::<(NumberType, Nums), _>(builtin_gt)),
        op(">=", Arity::AtLeast(2), builtin_variadic::<(NumberType, Nums), _>(builtin_ge)),
        // Predicates
        op("nil?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_nil_p)),
        op("true?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_true_p)),
        op("false?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_false_p)),
        op("symbol?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_symbol_p)),
        op("keyword?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_keyword_p)),
        op("string?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_string_p)),
        op("number?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_number_p)),
        op("fn?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_fn_p)),
        op("macro?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_macro_p)),
        op("list?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_list_p)),
        op("vector?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_vector_p)),
        op("map?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_map_p)),
        op("sequential?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_sequential_p)),
        op("atom?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_atom_p)),
        op("empty?", Arity::Exact(1), builtin_fixed::<(Rest,), _>(builtin_empty_p)),
        op("contains?", Arity::Exact(2), builtin_fixed::<(Value, Value), _>(builtin_contains_p)),
        // Constructors
        op("symbol", Arity::Exact(1), builtin_fixed::<(String,), _>(builtin_symbol)),
        op("keyword", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_keyword)),
        op("list", Arity::Any, builtin_variadic::<(Rest,), _>(builtin_list)),
        op("vector", Arity::Any, builtin_variadic::<(Rest,), _>(builtin_vector)),
        op("hash-map", Arity::Any, builtin_variadic::<(Rest,), _>(builtin_hash_map)),
        op("vec", Arity::Exact(1), builtin_fixed::<(Rest,), _>(builtin_vec)),
        // Maps
        op("assoc", Arity::AtLeast(1), builtin_variadic::<(Value, Rest), _>(builtin_assoc)),
        op("dissoc", Arity::AtLeast(1), builtin_variadic::<(Value, Rest), _>(builtin_dissoc)),
        op("get", Arity::Exact(2), builtin_fixed::<(Value, Value), _>(builtin_get)),
        op("keys", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_keys)),
        op("vals", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_vals)),
        // Sequences
        op("cons", Arity::Exact(2), builtin_fixed::<(Value, Rest), _>(builtin_cons)),
        op("concat", Arity::Any, builtin_variadic::<(Rest,), _>(builtin_concat)),
        op("nth", Arity::Exact(2), builtin_fixed::<(Rest, NumberType), _>(builtin_nth)),
        op("first", Arity::Exact(1), builtin_fixed::<(Rest,), _>(builtin_first)),
        op("rest", Arity::Exact(1), builtin_fixed::<(Rest,), _>(builtin_rest)),
        op("count", Arity::Exact(1), builtin_fixed::<(Rest,), _>(builtin_count)),
        op("conj", Arity::AtLeast(1), builtin_variadic::<(Value, Rest), _>(builtin_conj)),
        op("seq", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_seq)),
        op("apply", Arity::AtLeast(1), builtin_variadic::<(Value, Rest), _>(builtin_apply)),
        op("map", Arity::Exact(2), builtin_fixed::<(Value, Rest), _>(builtin_map)),
        // Strings and output
        op("pr-str", Arity::Any, builtin_variadic::<(Rest,), _>(builtin_pr_str)),
        op("str", Arity::Any, builtin_variadic::<(Rest,), _>(builtin_str)),
        op("prn", Arity::Any, builtin_variadic::<(Rest,), _>(builtin_prn)),
        op("println", Arity::Any, builtin_variadic::<(Rest,), _>(builtin_println)),
        // Atoms
        op("atom", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_atom)),
        op("deref", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_deref)),
        op("reset!", Arity::Exact(2), builtin_fixed::<(Value, Value), _>(builtin_reset)),
        op("swap!", Arity::AtLeast(2), builtin_variadic::<(Value, Value, Rest), _>(builtin_swap)),
        // Miscellaneous
        op("throw", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_throw)),
        op("not", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_not)),
        op("time-ms", Arity::Exact(0), builtin_fixed::<(), _>(builtin_time_ms)),
        op("slurp", Arity::Exact(1), builtin_fixed::<(&str,), _>(builtin_slurp)),
    ];

    #[cfg(feature = "reader")]
    ops.push(op(
        "read-string",
        Arity::Exact(1),
        builtin_fixed::<(&str,), _>(builtin_read_string),
    ));

    ops
});

/// Lazy static map from id to BuiltinOp (private - use find_builtin_op)
static BUILTIN_BY_ID: LazyLock<HashMap<&'static str, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter().map(|op| (op.id, op)).collect()
});

/// Get all builtin operations (for internal use by evaluator)
pub(crate) fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin operation by the symbol it is bound to
pub fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_ID.get(id).copied()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{kw, nil, sym, val, vector};
    use pretty_assertions::assert_eq;

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> Option<Value> {
        Some(val(value))
    }

    /// Invoke a builtin through the registry using the canonical erased
    /// signature, exercising the adapter layer and arity validation.
    fn call_builtin(name: &str, args: &[Value]) -> Result<Value, Error> {
        let op = find_builtin_op(name).unwrap();
        op.call(args.to_vec())
    }

    fn map_of(pairs: &[Value]) -> Value {
        Value::hash_map_from_pairs(pairs.iter()).unwrap()
    }

    /// Macro to create test cases, invoking builtins via the registry.
    macro_rules! test {
        ($name:expr, $args:expr, $expected:expr) => {
            ($name, call_builtin($name, $args), $expected)
        };
    }

    #[test]
    fn test_builtin_ops_registry() {
        let not_op = find_builtin_op("not").unwrap();
        assert_eq!(not_op.arity, Arity::Exact(1));

        let add_op = find_builtin_op("+").unwrap();
        assert_eq!(add_op.arity, Arity::Any);
        assert_eq!((add_op.func)(vec![val(1), val(2)]).unwrap(), val(3));

        assert!(find_builtin_op("unknown").is_none());
        // Special forms and environment-aware natives are not in the table
        for id in ["if", "def!", "eval", "cond"] {
            assert!(find_builtin_op(id).is_none(), "{id} should not be a builtin op");
        }

        // Ids are unique
        let all_ops = get_builtin_ops();
        assert_eq!(all_ops.len(), BUILTIN_BY_ID.len());

        let as_value = add_op.to_value();
        assert!(matches!(&as_value, Value::BuiltinFunction { id, is_macro: false, .. } if id == "+"));
        assert_eq!(as_value.to_string(), "#<builtin-function:+>");
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_builtin_function_implementations() {
        type TestCase = (&'static str, Result<Value, Error>, Option<Value>);

        let int_list = val([1, 2, 3]);
        let int_vec = vector([1, 2, 3]);
        let empty = val(Vec::<Value>::new());
        let many_ones: Vec<Value> = (0..100).map(|_| val(1)).collect();
        let m = map_of(&[kw("a"), val(1), val("b"), val(2)]);

        let test_cases: Vec<TestCase> = vec![
            // === ARITHMETIC ===
            test!("+", &[val(1), val(2), val(3)], success(6)),
            test!("+", &[], success(0)),
            test!("+", &many_ones, success(100)),
            test!("+", &[val(i64::MAX), val(1)], None),
            test!("+", &[val(1), val("2")], None),
            test!("-", &[val(10), val(3), val(2)], success(5)),
            test!("-", &[val(10)], success(-10)),
            test!("-", &[val(i64::MIN)], None),
            test!("*", &[val(2), val(3), val(4)], success(24)),
            test!("*", &[val(i64::MAX), val(2)], None),
            test!("/", &[val(20), val(2), val(5)], success(2)),
            test!("/", &[val(7), val(2)], success(3)),
            test!("/", &[val(-7), val(2)], success(-3)),
            test!("/", &[val(1), val(0)], None),
            test!("/", &[val(i64::MIN), val(-1)], None),
            // === COMPARISON ===
            test!("<", &[val(1), val(2), val(3)], success(true)),
            test!("<", &[val(1), val(3), val(2)], success(false)),
            test!("<=", &[val(1), val(1), val(2)], success(true)),
            test!(">", &[val(3), val(2)], success(true)),
            test!(">=", &[val(2), val(3)], success(false)),
            test!("<", &[val(1), val("a")], None),
            test!("=", &[val(1), val(1)], success(true)),
            test!("=", &[val("a"), val("a")], success(true)),
            test!("=", &[int_list.clone(), int_vec.clone()], success(true)),
            test!("=", &[val(1), val("1")], success(false)),
            test!("=", &[nil(), empty.clone()], success(false)),
            test!("=", &[m.clone(), map_of(&[val("b"), val(2), kw("a"), val(1)])], success(true)),
            // === PREDICATES ===
            test!("nil?", &[nil()], success(true)),
            test!("nil?", &[val(false)], success(false)),
            test!("true?", &[val(true)], success(true)),
            test!("true?", &[val(1)], success(false)),
            test!("false?", &[val(false)], success(true)),
            test!("symbol?", &[sym("a")], success(true)),
            test!("symbol?", &[val("a")], success(false)),
            test!("keyword?", &[kw("a")], success(true)),
            test!("string?", &[val("a")], success(true)),
            test!("string?", &[kw("a")], success(false)),
            test!("number?", &[val(1)], success(true)),
            test!("fn?", &[Value::native("f", |_| Ok(Value::Nil))], success(true)),
            test!("fn?", &[val(1)], success(false)),
            test!("macro?", &[val(1)], success(false)),
            test!("list?", &[int_list.clone()], success(true)),
            test!("list?", &[int_vec.clone()], success(false)),
            test!("vector?", &[int_vec.clone()], success(true)),
            test!("map?", &[m.clone()], success(true)),
            test!("sequential?", &[int_vec.clone()], success(true)),
            test!("sequential?", &[m.clone()], success(false)),
            test!("atom?", &[Value::atom(nil())], success(true)),
            test!("empty?", &[empty.clone()], success(true)),
            test!("empty?", &[int_vec.clone()], success(false)),
            test!("empty?", &[nil()], success(true)),
            test!("empty?", &[val(1)], None),
            test!("contains?", &[m.clone(), kw("a")], success(true)),
            test!("contains?", &[m.clone(), val("a")], success(false)),
            test!("contains?", &[m.clone(), val(1)], success(false)),
            test!("contains?", &[val(1), kw("a")], None),
            // === CONSTRUCTORS ===
            test!("symbol", &[val("abc")], Some(sym("abc"))),
            test!("symbol", &[val(1)], None),
            test!("keyword", &[val("abc")], Some(kw("abc"))),
            test!("keyword", &[kw("abc")], Some(kw("abc"))),
            test!("list", &[], Some(empty.clone())),
            test!("list", &[val(1), val("a")], success(vec![val(1), val("a")])),
            test!("vector", &[val(1), val(2)], Some(vector([1, 2]))),
            test!("hash-map", &[kw("a"), val(1), val("b"), val(2)], Some(m.clone())),
            test!("hash-map", &[kw("a")], None),
            test!("hash-map", &[val(1), val(2)], None),
            test!("vec", &[int_list.clone()], Some(int_vec.clone())),
            test!("vec", &[nil()], Some(vector(Vec::<Value>::new()))),
            // === MAPS ===
            test!(
                "assoc",
                &[m.clone(), kw("a"), val(10), kw("c"), val(3)],
                Some(map_of(&[kw("a"), val(10), val("b"), val(2), kw("c"), val(3)]))
            ),
            test!("assoc", &[m.clone(), kw("a")], None),
            test!("assoc", &[nil(), kw("a"), val(1)], Some(map_of(&[kw("a"), val(1)]))),
            test!("dissoc", &[m.clone(), kw("a"), kw("zzz")], Some(map_of(&[val("b"), val(2)]))),
            test!("get", &[m.clone(), kw("a")], success(1)),
            test!("get", &[m.clone(), kw("missing")], Some(nil())),
            test!("get", &[nil(), kw("a")], Some(nil())),
            test!("get", &[int_list.clone(), kw("a")], None),
            test!("keys", &[m.clone()], Some(val(vec![val("b"), kw("a")]))),
            test!("vals", &[m.clone()], success([2, 1])),
            // === SEQUENCES ===
            test!("cons", &[val(0), int_vec.clone()], success([0, 1, 2, 3])),
            test!("cons", &[val(0), nil()], success([0])),
            test!("cons", &[val(0), val(1)], None),
            test!("concat", &[], Some(empty.clone())),
            test!("concat", &[int_list.clone(), int_vec.clone()], success([1, 2, 3, 1, 2, 3])),
            test!("concat", &[int_list.clone(), val(4)], None),
            test!("nth", &[int_vec.clone(), val(1)], success(2)),
            test!("nth", &[int_list.clone(), val(3)], None),
            test!("nth", &[int_list.clone(), val(-1)], None),
            test!("first", &[int_vec.clone()], success(1)),
            test!("first", &[empty.clone()], Some(nil())),
            test!("first", &[nil()], Some(nil())),
            test!("rest", &[int_vec.clone()], success([2, 3])),
            test!("rest", &[nil()], Some(empty.clone())),
            test!("count", &[int_list.clone()], success(3)),
            test!("count", &[nil()], success(0)),
            test!("count", &[val("abc")], None),
            test!("conj", &[int_list.clone(), val(4), val(5)], success([5, 4, 1, 2, 3])),
            test!("conj", &[int_vec.clone(), val(4), val(5)], Some(vector([1, 2, 3, 4, 5]))),
            test!("conj", &[nil(), val(1)], None),
            test!("seq", &[int_vec.clone()], success([1, 2, 3])),
            test!("seq", &[empty.clone()], Some(nil())),
            test!("seq", &[val("ab")], success(["a", "b"])),
            test!("seq", &[val("")], Some(nil())),
            test!("seq", &[nil()], Some(nil())),
            // === HIGHER ORDER ===
            test!(
                "apply",
                &[find_builtin_op("+").unwrap().to_value(), val(1), val([2, 3])],
                success(6)
            ),
            test!("apply", &[find_builtin_op("list").unwrap().to_value()], Some(empty.clone())),
            test!("apply", &[find_builtin_op("+").unwrap().to_value(), val(1)], None),
            test!(
                "map",
                &[find_builtin_op("count").unwrap().to_value(), val(vec![int_list.clone(), empty.clone()])],
                success([3, 0])
            ),
            test!("map", &[val(1), int_list.clone()], None),
            // === STRINGS ===
            test!("pr-str", &[val("a\"b"), kw("k"), int_vec.clone()], success("\"a\\\"b\" :k [1 2 3]")),
            test!("pr-str", &[], success("")),
            test!("str", &[val("a"), val(1), nil(), kw("k")], success("a1nil:k")),
            test!("str", &[val(vec![val("x")])], success("(x)")),
            // === ATOMS ===
            test!("deref", &[Value::atom(val(5))], success(5)),
            test!("deref", &[val(5)], None),
            test!("reset!", &[Value::atom(val(5)), val(6)], success(6)),
            test!("reset!", &[val(5), val(6)], None),
            // === MISCELLANEOUS ===
            test!("throw", &[val("boom")], None),
            test!("not", &[nil()], success(true)),
            test!("not", &[val(0)], success(false)),
            test!("slurp", &[val("/this/path/does/not/exist")], None),
        ];

        for (i, (name, actual, expected)) in test_cases.into_iter().enumerate() {
            match (actual, expected) {
                (Ok(actual), Some(expected)) => {
                    assert_eq!(actual, expected, "case #{} ({name})", i + 1);
                }
                (Err(_), None) => {}
                (Ok(actual), None) => {
                    panic!("case #{} ({name}): expected error, got {actual:?}", i + 1)
                }
                (Err(err), Some(expected)) => {
                    panic!("case #{} ({name}): expected {expected:?}, got error {err:?}", i + 1)
                }
            }
        }
    }

    #[test]
    fn test_arity_validation() {
        use Arity::*;

        let cases: Vec<(&str, usize, Arity)> = vec![
            ("not", 0, Exact(1)),
            ("not", 2, Exact(1)),
            ("-", 0, AtLeast(1)),
            ("<", 1, AtLeast(2)),
            ("swap!", 1, AtLeast(2)),
            ("time-ms", 1, Exact(0)),
        ];

        for (name, count, expected_arity) in cases {
            let args: Vec<Value> = (0..count).map(|_| val(1)).collect();
            match call_builtin(name, &args).unwrap_err() {
                Error::ArityError { expected, got, .. } => {
                    assert_eq!(expected, expected_arity, "{name}");
                    assert_eq!(got, count, "{name}");
                }
                other => panic!("{name}: expected ArityError, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_swap_calls_function_with_current_value() {
        let counter = Value::atom(val(1));
        let plus = find_builtin_op("+").unwrap().to_value();

        let result = call_builtin("swap!", &[counter.clone(), plus, val(10), val(5)]).unwrap();
        assert_eq!(result, val(16));
        assert_eq!(call_builtin("deref", &[counter.clone()]).unwrap(), val(16));

        // A failing function leaves the atom unchanged
        let throw = find_builtin_op("throw").unwrap().to_value();
        assert!(call_builtin("swap!", &[counter.clone(), throw]).is_err());
        assert_eq!(call_builtin("deref", &[counter]).unwrap(), val(16));
    }

    #[test]
    fn test_throw_carries_value() {
        let err = call_builtin("throw", &[map_of(&[kw("code"), val(7)])]).unwrap_err();
        assert!(err.is_catchable());
        assert_eq!(err.into_value(), map_of(&[kw("code"), val(7)]));
    }

    #[test]
    fn test_time_ms_is_positive() {
        let Value::Number(ms) = call_builtin("time-ms", &[]).unwrap() else {
            panic!("time-ms should return a number");
        };
        assert!(ms > 0);
    }

    #[cfg(feature = "reader")]
    #[test]
    fn test_read_string() {
        assert_eq!(
            call_builtin("read-string", &[val("(+ 1 [2])")]).unwrap(),
            val(vec![sym("+"), val(1), vector([2])])
        );
        assert_eq!(call_builtin("read-string", &[val("  ; only a comment")]).unwrap(), nil());
        assert!(matches!(
            call_builtin("read-string", &[val("(1 2")]),
            Err(Error::ParseError(_))
        ));
    }
}
