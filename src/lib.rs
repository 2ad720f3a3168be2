//! malxp - a tree-walking evaluator for Mal
//!
//! This crate implements the core of a Mal interpreter: a small Lisp where
//! lists, vectors and maps serve both as data and as code. The evaluator
//! supports closures, macros, quasiquoting and exception-based error
//! handling, and runs tail calls in constant host stack.
//!
//! ```text
//! (def! fact (fn* (n acc) (if (= n 0) acc (fact (- n 1) (* n acc)))))
//! (fact 20 1)                          ; => 2432902008176640000
//! (defmacro! unless (fn* (c a b) `(if ~c ~b ~a)))
//! (try* (throw {:code 7}) (catch* e (get e :code)))   ; => 7
//! ```
//!
//! ## Evaluation model
//!
//! [`evaluator::eval`] is a trampoline: the positions that can be in tail
//! position (`let*` body, last form of `do`, `if` branches, closure bodies,
//! `quasiquote` and the `catch*` handler) reassign the current expression and
//! environment and loop instead of recursing. Non-tail nesting is bounded by
//! [`MAX_EVAL_DEPTH`].
//!
//! Environments are shared, reference-counted scopes. A closure holds the
//! same handle as the scope that defined it, so recursive definitions and
//! shared state between closures behave as in any Lisp.
//!
//! ## Errors
//!
//! Every failure is an [`Error`]. Values raised with `throw`, and runtime
//! failures of native functions, can be caught with `try*`/`catch*`.
//! Malformed special forms, arity mismatches and evaluation depth overflow
//! are fatal: they pass through every `try*` and reach the caller of `eval`.
//!
//! ## Modules
//!
//! - `ast`: the [`ast::Value`] model, equality and printing
//! - `evaluator`: environments, the evaluation loop, macro expansion
//! - `builtinops`: the native function library
//! - `reader`: text to [`ast::Value`] (feature `reader`)

use std::fmt;

use crate::ast::Value;
use crate::evaluator::Arity;

/// Maximum reader nesting depth.
/// Bounds the recursion of the reader on deeply nested or hostile input.
pub const MAX_PARSE_DEPTH: usize = 256;

/// Maximum number of nested (non-tail) evaluator entries.
/// Tail calls do not count against this limit.
pub const MAX_EVAL_DEPTH: usize = 10_000;

/// Categorizes the different kinds of reader errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (stray closing delimiter, bad escape, malformed map)
    InvalidSyntax,
    /// Input ended before the form was complete (unclosed delimiter, unterminated string)
    Incomplete,
    /// Form nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
    /// Extra input found after a complete form
    TrailingContent,
    /// Input contained only whitespace and comments
    Empty,
}

/// A structured error describing a reader failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with all fields
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let prefix = input.get(..error_offset).unwrap_or(input);
        let context_start = prefix.chars().count().saturating_sub(20);

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < input.chars().count() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        let found = input
            .get(error_offset..)
            .and_then(|rest| rest.chars().next())
            .map(String::from);

        Self::new(kind, message, Some(display_context), found)
    }

    /// True when more input could complete the form
    pub fn is_incomplete(&self) -> bool {
        self.kind == ParseErrorKind::Incomplete
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParseError: {}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    ParseError(ParseError),
    #[error("EvaluationError: {0}")]
    EvalError(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("'{0}' not found")]
    UnboundSymbol(String),
    #[error("Cannot apply non-function: {0}")]
    NotCallable(String),
    #[error(
        "ArityError: {}expected {} arguments, got {}",
        expression_prefix(.expression),
        .expected,
        .got
    )]
    ArityError {
        expected: Arity,
        got: usize,
        expression: Option<String>,
    },
    #[error("Malformed {form}: {message}")]
    MalformedSpecialForm { form: String, message: String },
    #[error("Evaluation depth limit exceeded (max: {0})")]
    DepthExceeded(usize),
    /// A value raised by `throw`
    #[error("Exception: {0}")]
    Throw(Value),
}

fn expression_prefix(expression: &Option<String>) -> String {
    match expression {
        Some(expr) => format!("expression {expr}: "),
        None => String::new(),
    }
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: Arity, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError with expression context
    pub fn arity_error_with_expr(expected: Arity, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }

    /// Create a MalformedSpecialForm error for the named form
    pub fn malformed(form: &str, message: impl Into<String>) -> Self {
        Error::MalformedSpecialForm {
            form: form.to_owned(),
            message: message.into(),
        }
    }

    /// Whether `try*`/`catch*` may intercept this error.
    ///
    /// Arity mismatches, malformed special forms and depth overflow describe
    /// a broken program rather than a runtime condition and always reach the
    /// caller of `eval`.
    pub fn is_catchable(&self) -> bool {
        match self {
            Error::Throw(_)
            | Error::UnboundSymbol(_)
            | Error::NotCallable(_)
            | Error::TypeError(_)
            | Error::EvalError(_)
            | Error::ParseError(_) => true,
            Error::ArityError { .. }
            | Error::MalformedSpecialForm { .. }
            | Error::DepthExceeded(_) => false,
        }
    }

    /// The value bound by `catch*`: the thrown value itself, or the error
    /// message as a string for errors raised by the runtime.
    pub fn into_value(self) -> Value {
        match self {
            Error::Throw(value) => value,
            other => Value::String(other.to_string()),
        }
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;

#[cfg(feature = "reader")]
pub mod reader;
