//! SQL tokenizer using nom.
//!
//! Splits a statement into spanned lexemes. Spans are byte offsets into the
//! original text so later stages can quote raw fragments back (function-call
//! literals, parameter inlining for the raw-SQL endpoint).
//!
//! ```text
//! UPDATE subs SET price = ? WHERE id = $2 -- trailing comment
//! ──┬─── ─┬── ─┬─ ──┬── ┬ ┬ ──┬── ┬─ ┬ ┬─
//!   │     │    │    │   │ │   │   │  │ └── Placeholder(Numbered(2))
//!   │     │    │    │   │ │   │   │  └──── Eq
//!   │     │    │    │   │ └───────────── Placeholder(Next)
//!   └─────┴────┴────┴───┴─────┴───┴────── Word / Eq
//! ```

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_until},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace1, not_line_ending},
    combinator::{map, opt, recognize, value},
    multi::{fold_many0, many0_count},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::error::SyntaxError;

/// A positional parameter marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// `?`
    Next,
    /// `$n` or `?n`, 1-based.
    Numbered(usize),
}

/// A single SQL token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Bare identifier or keyword, as written.
    Word(String),
    /// `"ident"` or `` `ident` ``.
    QuotedIdent(String),
    /// `'text'` with `''` unescaped.
    Str(String),
    /// Numeric literal as written.
    Number(String),
    Placeholder(Marker),
    LParen,
    RParen,
    Comma,
    Eq,
    Star,
    Dot,
    Semicolon,
    /// Any other operator (`<`, `>=`, `||`, `+`, ...).
    Op(String),
}

impl Token {
    /// Case-insensitive keyword check. Quoted identifiers never match.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    /// The identifier name, for bare or quoted identifiers.
    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Token::Word(w) | Token::QuotedIdent(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_marker(&self) -> Option<Marker> {
        match self {
            Token::Placeholder(m) => Some(*m),
            _ => None,
        }
    }
}

/// A token with its byte span in the source statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

/// Tokenize a complete statement.
pub fn tokenize(sql: &str) -> Result<Vec<Lexeme>, SyntaxError> {
    let mut lexemes = Vec::new();
    let mut rest = sql;

    loop {
        if let Ok((remaining, _)) = skip_trivia(rest) {
            rest = remaining;
        }
        if rest.is_empty() {
            break;
        }

        let start = sql.len() - rest.len();
        match parse_token(rest) {
            Ok((remaining, token)) => {
                lexemes.push(Lexeme {
                    token,
                    start,
                    end: sql.len() - remaining.len(),
                });
                rest = remaining;
            }
            Err(_) => {
                let message = match rest.chars().next() {
                    Some('\'') => "Unterminated string literal".to_string(),
                    Some(c) => format!("Unexpected character '{}'", c),
                    None => "Unexpected end of input".to_string(),
                };
                return Err(SyntaxError::new(start, message));
            }
        }
    }

    Ok(lexemes)
}

/// Skip whitespace, `-- line` and `/* block */` comments.
fn skip_trivia(input: &str) -> IResult<&str, usize> {
    many0_count(alt((
        map(multispace1, |_| ()),
        map(pair(tag("--"), not_line_ending), |_| ()),
        map(delimited(tag("/*"), take_until("*/"), tag("*/")), |_| ()),
    )))(input)
}

fn parse_token(input: &str) -> IResult<&str, Token> {
    alt((
        parse_placeholder,
        parse_quoted_string,
        parse_quoted_identifier,
        parse_number,
        parse_word,
        parse_symbol,
    ))(input)
}

/// Parse `$n`, `?n`, or `?`.
fn parse_placeholder(input: &str) -> IResult<&str, Token> {
    alt((
        map(preceded(char('$'), digit1), |n: &str| {
            Token::Placeholder(Marker::Numbered(n.parse().unwrap_or(0)))
        }),
        map(preceded(char('?'), digit1), |n: &str| {
            Token::Placeholder(Marker::Numbered(n.parse().unwrap_or(0)))
        }),
        value(Token::Placeholder(Marker::Next), char('?')),
    ))(input)
}

/// Parse a single-quoted string, unescaping doubled quotes.
fn parse_quoted_string(input: &str) -> IResult<&str, Token> {
    let (input, _) = char('\'')(input)?;
    let (input, content) = fold_many0(
        alt((is_not("'"), value("'", tag("''")))),
        String::new,
        |mut acc: String, piece: &str| {
            acc.push_str(piece);
            acc
        },
    )(input)?;
    let (input, _) = char('\'')(input)?;

    Ok((input, Token::Str(content)))
}

fn parse_quoted_identifier(input: &str) -> IResult<&str, Token> {
    alt((
        map(delimited(char('"'), is_not("\""), char('"')), |s: &str| {
            Token::QuotedIdent(s.to_string())
        }),
        map(delimited(char('`'), is_not("`"), char('`')), |s: &str| {
            Token::QuotedIdent(s.to_string())
        }),
    ))(input)
}

/// Parse an integer or decimal, optionally negative.
fn parse_number(input: &str) -> IResult<&str, Token> {
    map(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
        ))),
        |s: &str| Token::Number(s.to_string()),
    )(input)
}

fn parse_word(input: &str) -> IResult<&str, Token> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0_count(alt((alphanumeric1, tag("_")))),
        )),
        |s: &str| Token::Word(s.to_string()),
    )(input)
}

fn parse_symbol(input: &str) -> IResult<&str, Token> {
    alt((
        map(
            alt((tag("<="), tag(">="), tag("<>"), tag("!="), tag("||"))),
            |s: &str| Token::Op(s.to_string()),
        ),
        value(Token::LParen, char('(')),
        value(Token::RParen, char(')')),
        value(Token::Comma, char(',')),
        value(Token::Eq, char('=')),
        value(Token::Star, char('*')),
        value(Token::Dot, char('.')),
        value(Token::Semicolon, char(';')),
        map(
            alt((char('<'), char('>'), char('+'), char('-'), char('/'), char('%'))),
            |c: char| Token::Op(c.to_string()),
        ),
    ))(input)
}
