//! Placeholder binding and literal coercion.
//!
//! A statement uses one placeholder dialect, detected once up front:
//!
//! | Dialect    | Markers        | Resolution                      |
//! |------------|----------------|---------------------------------|
//! | Sequential | `?`            | next unused parameter           |
//! | Numbered   | `$n`, `?n`     | `params[n - 1]`, any scan order |
//!
//! The binder is threaded through the parser in token order, so `SET`
//! assignments always consume their parameters before the `WHERE` clause.

use chrono::{SecondsFormat, Utc};
use serde_json::{Number, Value};

use crate::lexer::{Lexeme, Marker, Token};

/// The placeholder dialect of one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    Sequential,
    Numbered,
}

impl BindingMode {
    /// Numbered if any numbered marker appears, otherwise sequential.
    pub fn detect(lexemes: &[Lexeme]) -> Self {
        let numbered = lexemes
            .iter()
            .any(|l| matches!(l.token, Token::Placeholder(Marker::Numbered(_))));
        if numbered {
            BindingMode::Numbered
        } else {
            BindingMode::Sequential
        }
    }
}

/// Resolves markers against a caller-supplied parameter list.
#[derive(Debug)]
pub struct Binder<'p> {
    params: &'p [Value],
    mode: BindingMode,
    cursor: usize,
}

impl<'p> Binder<'p> {
    pub fn new(params: &'p [Value], mode: BindingMode) -> Self {
        Self {
            params,
            mode,
            cursor: 0,
        }
    }

    pub fn mode(&self) -> BindingMode {
        self.mode
    }

    /// Bind a marker to its value. Out-of-range references bind `null`.
    pub fn bind(&mut self, marker: Marker) -> Value {
        match (self.mode, marker) {
            (BindingMode::Sequential, Marker::Next) => {
                let index = self.cursor;
                self.cursor += 1;
                self.lookup(index)
            }
            (_, Marker::Numbered(n)) => match n.checked_sub(1) {
                Some(index) => self.lookup(index),
                None => {
                    tracing::warn!("Placeholder ${} is out of range", n);
                    Value::Null
                }
            },
            // A bare `?` in a numbered statement is not a marker of its dialect.
            (BindingMode::Numbered, Marker::Next) => coerce_literal(&Token::Word("?".into())),
        }
    }

    /// Consume a marker without using its value.
    pub fn skip(&mut self, marker: Marker) {
        if self.mode == BindingMode::Sequential && marker == Marker::Next {
            self.cursor += 1;
        }
    }

    /// Skip every marker in a span of lexemes.
    pub fn skip_all(&mut self, lexemes: &[Lexeme]) {
        for marker in lexemes.iter().filter_map(|l| l.token.as_marker()) {
            self.skip(marker);
        }
    }

    /// Bind a marker token, or coerce any other token as a literal.
    pub fn resolve(&mut self, token: &Token) -> Value {
        match token.as_marker() {
            Some(marker) => self.bind(marker),
            None => coerce_literal(token),
        }
    }

    fn lookup(&self, index: usize) -> Value {
        match self.params.get(index) {
            Some(v) => v.clone(),
            None => {
                tracing::warn!(
                    "Placeholder {} is out of range ({} parameters supplied)",
                    index + 1,
                    self.params.len()
                );
                Value::Null
            }
        }
    }
}

/// Coerce a literal token into a typed scalar.
pub fn coerce_literal(token: &Token) -> Value {
    match token {
        Token::Str(s) => Value::String(s.clone()),
        Token::Word(w) if w.eq_ignore_ascii_case("true") => Value::Bool(true),
        Token::Word(w) if w.eq_ignore_ascii_case("false") => Value::Bool(false),
        Token::Word(w) if is_now_keyword(w) => now_timestamp(),
        Token::Word(w) if w.eq_ignore_ascii_case("null") => Value::Null,
        Token::Number(n) => coerce_number(n),
        Token::Word(w) | Token::QuotedIdent(w) | Token::Op(w) => Value::String(strip_quotes(w)),
        Token::Placeholder(Marker::Next) => Value::String("?".into()),
        Token::Placeholder(Marker::Numbered(n)) => Value::String(format!("${}", n)),
        Token::LParen => Value::String("(".into()),
        Token::RParen => Value::String(")".into()),
        Token::Comma => Value::String(",".into()),
        Token::Eq => Value::String("=".into()),
        Token::Star => Value::String("*".into()),
        Token::Dot => Value::String(".".into()),
        Token::Semicolon => Value::String(";".into()),
    }
}

/// Coerce a function-call literal such as `now()` or `datetime('now')`.
///
/// Only calls meaning "now" have a value; any other call is SQL the backend
/// cannot evaluate and yields `None`.
pub fn coerce_call(name: &str, args: &[Lexeme]) -> Option<Value> {
    let means_now = match args {
        [] => is_now_keyword(name) || name.eq_ignore_ascii_case("now"),
        [arg] => {
            name.eq_ignore_ascii_case("datetime")
                && matches!(&arg.token, Token::Str(s) if s.eq_ignore_ascii_case("now"))
        }
        _ => false,
    };

    means_now.then(now_timestamp)
}

/// Current UTC time as ISO-8601 with millisecond precision.
pub fn now_timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn is_now_keyword(word: &str) -> bool {
    word.eq_ignore_ascii_case("current_timestamp")
}

fn coerce_number(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return Value::Number(i.into());
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(text.to_string()))
}

fn strip_quotes(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '\'' | '"')).collect()
}

/// Substitute bound parameters into the statement text.
///
/// Used for the raw-SQL endpoint, which takes no separate parameter list.
pub fn inline_params(sql: &str, lexemes: &[Lexeme], params: &[Value], mode: BindingMode) -> String {
    let mut binder = Binder::new(params, mode);
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;

    for lexeme in lexemes {
        let Some(marker) = lexeme.token.as_marker() else {
            continue;
        };
        if mode == BindingMode::Numbered && marker == Marker::Next {
            continue;
        }
        out.push_str(&sql[copied..lexeme.start]);
        out.push_str(&sql_literal(&binder.bind(marker)));
        copied = lexeme.end;
    }

    out.push_str(&sql[copied..]);
    out
}

/// Render a scalar as a SQL literal.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}
