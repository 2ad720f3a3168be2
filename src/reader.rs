//! Text to [`Value`]: the Mal reader.
//!
//! Built from `nom` combinators. Whitespace and commas separate forms and
//! `;` starts a comment running to the end of the line. The reader macros
//! `'x`, `` `x ``, `~x`, `~@x` and `@x` expand to `quote`, `quasiquote`,
//! `unquote`, `splice-unquote` and `deref` forms.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, not_line_ending},
    combinator::{cut, map, recognize, value},
    error::ErrorKind,
    multi::many0_count,
    sequence::pair,
};

use crate::ast::{MapKey, NumberType, Value};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

type NomError<'a> = nom::error::Error<&'a str>;

fn failure(input: &str, kind: ErrorKind) -> nom::Err<NomError<'_>> {
    nom::Err::Failure(nom::error::Error::new(input, kind))
}

/// Characters that end a symbol, keyword or number token
fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || "[]{}()'\"`,;".contains(c)
}

/// Skip whitespace, commas and comments
fn skip_ignored(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0_count(alt((
            take_while1(|c: char| c.is_whitespace() || c == ','),
            recognize(pair(char(';'), not_line_ending)),
        ))),
    )
    .parse(input)
}

/// Convert nom parsing errors to structured reader errors
fn parse_error_to_message(input: &str, error: nom::Err<NomError<'_>>) -> ParseError {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            let (kind, message) = match e.code {
                ErrorKind::Eof => (
                    ParseErrorKind::Incomplete,
                    "Unexpected end of input: unbalanced delimiter or unterminated string"
                        .to_owned(),
                ),
                ErrorKind::TooLarge => (
                    ParseErrorKind::TooDeeplyNested,
                    format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                ),
                ErrorKind::Escaped => (
                    ParseErrorKind::InvalidSyntax,
                    "Invalid escape sequence in string".to_owned(),
                ),
                ErrorKind::Digit => (
                    ParseErrorKind::InvalidSyntax,
                    "Integer literal out of range".to_owned(),
                ),
                ErrorKind::Count => (
                    ParseErrorKind::InvalidSyntax,
                    "Map literal requires an even number of forms".to_owned(),
                ),
                ErrorKind::Verify => (
                    ParseErrorKind::InvalidSyntax,
                    "Map keys must be strings or keywords".to_owned(),
                ),
                _ => {
                    let remaining_chars: String = input.chars().skip(position).take(10).collect();
                    (
                        ParseErrorKind::InvalidSyntax,
                        format!("Invalid syntax near '{remaining_chars}'"),
                    )
                }
            };
            ParseError::with_context(kind, message, input, position)
        }
        nom::Err::Incomplete(_) => {
            ParseError::from_message(ParseErrorKind::Incomplete, "Incomplete input")
        }
    }
}

fn is_integer(token: &str) -> bool {
    let digits = token.strip_prefix('-').unwrap_or(token);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a number, keyword, symbol or one of `nil`, `true`, `false`
fn parse_atom(input: &str) -> IResult<&str, Value> {
    let (remaining, token) = take_while1(|c: char| !is_delimiter(c)).parse(input)?;

    let atom = match token {
        "nil" => Value::Nil,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ if is_integer(token) => match token.parse::<NumberType>() {
            Ok(n) => Value::Number(n),
            Err(_) => return Err(failure(input, ErrorKind::Digit)),
        },
        _ => match token.strip_prefix(':') {
            Some(name) => Value::Keyword(name.to_owned()),
            None => Value::Symbol(token.to_owned()),
        },
    };
    Ok((remaining, atom))
}

/// Parse a string literal
fn parse_string(input: &str) -> IResult<&str, Value> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut chars = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => return Ok((char_iter.as_str(), Value::String(chars))),
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => chars.push('\n'),
                    Some('t') => chars.push('\t'),
                    Some('r') => chars.push('\r'),
                    Some('\\') => chars.push('\\'),
                    Some('"') => chars.push('"'),
                    Some(_) => return Err(failure(remaining, ErrorKind::Escaped)),
                    // Backslash at the very end
                    None => return Err(failure(remaining, ErrorKind::Eof)),
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                chars.push(ch);
                remaining = char_iter.as_str();
            }
            None => return Err(failure(remaining, ErrorKind::Eof)),
        }
    }
}

/// Parse the forms between `open` and `close`
fn parse_delimited(
    input: &str,
    open: char,
    close: char,
    depth: usize,
) -> IResult<&str, Vec<Value>> {
    let (mut input, _) = char(open).parse(input)?;
    let mut items = Vec::new();

    loop {
        let (rest, _) = skip_ignored(input)?;
        if rest.is_empty() {
            return Err(failure(rest, ErrorKind::Eof));
        }
        if let Some(rest) = rest.strip_prefix(close) {
            return Ok((rest, items));
        }
        let (rest, item) = cut(|input| parse_form(input, depth + 1)).parse(rest)?;
        items.push(item);
        input = rest;
    }
}

fn parse_map(input: &str, depth: usize) -> IResult<&str, Value> {
    let (remaining, items) = parse_delimited(input, '{', '}', depth)?;
    if items.len() % 2 != 0 {
        return Err(failure(input, ErrorKind::Count));
    }

    let mut entries = std::collections::HashMap::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(key), Some(val)) = (items.next(), items.next()) {
        let Ok(key) = MapKey::try_from(&key) else {
            return Err(failure(input, ErrorKind::Verify));
        };
        entries.insert(key, val);
    }
    Ok((remaining, Value::hash_map(entries)))
}

/// Parse a reader macro form ('x -> (quote x), ~@x -> (splice-unquote x), ...)
fn parse_reader_macro(input: &str, depth: usize) -> IResult<&str, Value> {
    let (input, name) = alt((
        value("splice-unquote", tag("~@")),
        value("unquote", tag("~")),
        value("quote", tag("'")),
        value("quasiquote", tag("`")),
        value("deref", tag("@")),
    ))
    .parse(input)?;
    let (input, form) = cut(|input| parse_form(input, depth + 1)).parse(input)?;
    Ok((input, Value::list(vec![Value::symbol(name), form])))
}

/// Parse one form, preceded by any whitespace and comments
fn parse_form(input: &str, depth: usize) -> IResult<&str, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(failure(input, ErrorKind::TooLarge));
    }
    let (input, _) = skip_ignored(input)?;
    if input.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(input, ErrorKind::Eof)));
    }

    alt((
        |input| parse_reader_macro(input, depth),
        map(|input| parse_delimited(input, '(', ')', depth), Value::list),
        map(|input| parse_delimited(input, '[', ']', depth), Value::vector),
        |input| parse_map(input, depth),
        parse_string,
        parse_atom,
    ))
    .parse(input)
}

/// Read exactly one form from `input`.
///
/// Blank or comment-only input fails with [`ParseErrorKind::Empty`];
/// anything but whitespace and comments after the form fails with
/// [`ParseErrorKind::TrailingContent`].
pub fn read_str(input: &str) -> Result<Value, Error> {
    let start = skip_ignored(input).map_or(input, |(rest, _)| rest);
    if start.is_empty() {
        return Err(Error::ParseError(ParseError::from_message(
            ParseErrorKind::Empty,
            "No form to read",
        )));
    }

    match parse_form(input, 0) {
        Ok((remaining, form)) => {
            let remaining = skip_ignored(remaining).map_or(remaining, |(rest, _)| rest);
            if remaining.is_empty() {
                Ok(form)
            } else {
                Err(Error::ParseError(ParseError::with_context(
                    ParseErrorKind::TrailingContent,
                    "Unexpected input after the form",
                    input,
                    input.len() - remaining.len(),
                )))
            }
        }
        Err(e) => Err(Error::ParseError(parse_error_to_message(input, e))),
    }
}
