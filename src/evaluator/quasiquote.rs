//! Rewriting of `quasiquote` templates into ordinary list-building code.
//!
//! The expansion only uses `quote`, `cons`, `concat` and `vec`, so the
//! result can be evaluated (and tail-called) like any other form.

use crate::ast::{Value, sym};

const UNQUOTE: &str = "unquote";
const SPLICE_UNQUOTE: &str = "splice-unquote";

/// The argument of `(tag X)` when `value` has exactly that shape
fn tagged<'a>(value: &'a Value, tag: &str) -> Option<&'a Value> {
    match value {
        Value::List(items) => match items.as_slice() {
            [Value::Symbol(head), arg] if head == tag => Some(arg),
            _ => None,
        },
        _ => None,
    }
}

/// Expand a quasiquote template.
///
/// - `(unquote X)` becomes `X`
/// - lists are folded from the right into `cons`/`concat` calls, with
///   `(splice-unquote X)` elements contributing `X` through `concat`
/// - vectors are expanded like lists and wrapped in `(vec ...)`
/// - symbols and maps are quoted
/// - everything else evaluates to itself and is returned unchanged
pub(crate) fn quasiquote(ast: &Value) -> Value {
    match ast {
        Value::List(items) => match tagged(ast, UNQUOTE) {
            Some(inner) => inner.clone(),
            None => fold_elements(items),
        },
        Value::Vector(items) => Value::list(vec![sym("vec"), fold_elements(items)]),
        Value::Symbol(_) | Value::HashMap(_) => Value::list(vec![sym("quote"), ast.clone()]),
        _ => ast.clone(),
    }
}

fn fold_elements(items: &[Value]) -> Value {
    items.iter().rev().fold(Value::list(Vec::new()), |acc, elt| {
        match tagged(elt, SPLICE_UNQUOTE) {
            Some(spliced) => Value::list(vec![sym("concat"), spliced.clone(), acc]),
            None => Value::list(vec![sym("cons"), quasiquote(elt), acc]),
        }
    })
}
