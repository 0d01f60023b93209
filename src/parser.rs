//! Statement classifier and recursive-descent parser.
//!
//! Recognises the statement shapes the REST backend can express:
//!
//! ```text
//! SELECT <*|col, ...> FROM t [WHERE c = v AND ...] [ORDER BY col [ASC|DESC], ...]
//!        [LIMIT n [OFFSET m]]
//! INSERT INTO t (col, ...) VALUES (v, ...)
//! UPDATE t SET col = v, ... WHERE c = v AND ...
//! DELETE FROM t WHERE c = v AND ...
//! ```
//!
//! Statements containing an aggregate call are routed to the fallback
//! executor before any of the above is attempted.

use serde_json::Value;

use crate::ast::*;
use crate::binding::{coerce_call, inline_params, Binder, BindingMode};
use crate::error::SyntaxError;
use crate::lexer::{tokenize, Lexeme, Token};

const AGGREGATE_FUNCTIONS: &[&str] = &["SUM", "COUNT", "AVG", "MIN", "MAX"];

const SCHEMA_KEYWORDS: &[&str] = &[
    "CREATE", "ALTER", "PRAGMA", "BEGIN", "COMMIT", "END", "ROLLBACK",
];

const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "AND", "OR", "ORDER", "BY", "LIMIT", "OFFSET", "SET", "VALUES",
    "INTO", "JOIN", "ON", "GROUP", "HAVING", "UNION",
];

/// Classify a statement without binding anything.
pub fn classify(sql: &str) -> StatementKind {
    match tokenize(sql.trim()) {
        Ok(lexemes) => classify_lexemes(&lexemes),
        Err(_) => StatementKind::Unsupported,
    }
}

fn classify_lexemes(lexemes: &[Lexeme]) -> StatementKind {
    let Some(Token::Word(first)) = lexemes.first().map(|l| &l.token) else {
        return StatementKind::Unsupported;
    };

    if has_aggregate_call(lexemes) {
        return StatementKind::Aggregate;
    }

    match first.to_ascii_uppercase().as_str() {
        "SELECT" => StatementKind::Select,
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        kw if SCHEMA_KEYWORDS.contains(&kw) => StatementKind::SchemaNoop,
        _ => StatementKind::Unsupported,
    }
}

fn has_aggregate_call(lexemes: &[Lexeme]) -> bool {
    lexemes.windows(2).any(|pair| {
        matches!(&pair[0].token, Token::Word(w) if AGGREGATE_FUNCTIONS.iter().any(|f| w.eq_ignore_ascii_case(f)))
            && pair[1].token == Token::LParen
    })
}

/// Parse a complete statement, binding its placeholders against `params`.
pub fn parse(sql: &str, params: &[Value]) -> Result<Statement, SyntaxError> {
    let sql = sql.trim();
    let lexemes = tokenize(sql)?;
    let mode = BindingMode::detect(&lexemes);
    let mut parser = Parser::new(sql, &lexemes, Binder::new(params, mode));

    match classify_lexemes(&lexemes) {
        StatementKind::Select => parser.parse_select().map(Statement::Select),
        StatementKind::Insert => parser.parse_insert().map(Statement::Insert),
        StatementKind::Update => parser.parse_update().map(Statement::Update),
        StatementKind::Delete => parser.parse_delete(),
        StatementKind::Aggregate => {
            let shape = match parser.parse_aggregate_shape() {
                Ok(shape) => Some(shape),
                Err(e) => {
                    tracing::debug!("Aggregate is not a plain single-table shape: {}", e);
                    None
                }
            };
            Ok(Statement::Aggregate(AggregatePlan {
                shape,
                remote_sql: inline_params(sql, &lexemes, params, mode),
            }))
        }
        StatementKind::SchemaNoop => {
            let keyword = lexemes[0].token.as_ident().unwrap_or_default();
            Ok(Statement::SchemaNoop(keyword.to_ascii_uppercase()))
        }
        StatementKind::Unsupported => Err(SyntaxError::new(0, "Unrecognized statement")),
    }
}

struct Parser<'a> {
    sql: &'a str,
    lexemes: &'a [Lexeme],
    pos: usize,
    binder: Binder<'a>,
    /// WHERE conditions that could not become filters.
    dropped: usize,
}

impl<'a> Parser<'a> {
    fn new(sql: &'a str, lexemes: &'a [Lexeme], binder: Binder<'a>) -> Self {
        Self {
            sql,
            lexemes,
            pos: 0,
            binder,
            dropped: 0,
        }
    }

    // ---- token navigation ----

    fn peek(&self) -> Option<&'a Token> {
        self.lexemes.get(self.pos).map(|l| &l.token)
    }

    fn advance(&mut self) -> Option<&'a Lexeme> {
        let lexeme = self.lexemes.get(self.pos)?;
        self.pos += 1;
        Some(lexeme)
    }

    fn position(&self) -> usize {
        self.lexemes
            .get(self.pos)
            .map(|l| l.start)
            .unwrap_or(self.sql.len())
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.position(), message)
    }

    fn unexpected(&self) -> SyntaxError {
        match self.lexemes.get(self.pos) {
            Some(l) => self.error(format!("Unexpected '{}'", &self.sql[l.start..l.end])),
            None => self.error("Unexpected end of statement"),
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), SyntaxError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("Expected {}", keyword)))
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), SyntaxError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(format!("Expected {}", what)))
        }
    }

    /// A bare or quoted identifier; qualified names are rejected.
    fn identifier(&mut self) -> Result<String, SyntaxError> {
        let name = match self.peek() {
            Some(Token::Word(w)) if !is_reserved(w) => w.clone(),
            Some(Token::QuotedIdent(w)) => w.clone(),
            _ => return Err(self.error("Expected identifier")),
        };
        self.pos += 1;
        if self.peek() == Some(&Token::Dot) {
            return Err(self.error("Qualified names are not supported"));
        }
        Ok(name)
    }

    fn identifier_list(&mut self) -> Result<Vec<String>, SyntaxError> {
        let mut names = vec![self.identifier()?];
        while self.eat(&Token::Comma) {
            names.push(self.identifier()?);
        }
        Ok(names)
    }

    /// Take lexemes up to (not including) a top-level stop token, or an
    /// unbalanced closing parenthesis.
    fn take_span(&mut self, stop: impl Fn(&Token) -> bool) -> &'a [Lexeme] {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(token) = self.peek() {
            match token {
                Token::LParen => depth += 1,
                Token::RParen if depth == 0 => break,
                Token::RParen => depth -= 1,
                t if depth == 0 && stop(t) => break,
                _ => {}
            }
            self.pos += 1;
        }
        &self.lexemes[start..self.pos]
    }

    fn raw(&self, span: &[Lexeme]) -> &'a str {
        match (span.first(), span.last()) {
            (Some(first), Some(last)) => &self.sql[first.start..last.end],
            _ => "",
        }
    }

    /// Accept trailing semicolons, then require the end of input.
    fn finish(&mut self) -> Result<(), SyntaxError> {
        while self.eat(&Token::Semicolon) {}
        if self.peek().is_some() {
            return Err(self.unexpected());
        }
        Ok(())
    }

    // ---- values and conditions ----

    /// Resolve a value span: a single literal or marker, or a call meaning
    /// "now". Markers inside anything else are consumed and `None` is
    /// returned.
    fn simple_value(&mut self, span: &'a [Lexeme]) -> Option<Value> {
        match span {
            [single] => match &single.token {
                Token::Word(_)
                | Token::QuotedIdent(_)
                | Token::Str(_)
                | Token::Number(_)
                | Token::Placeholder(_) => Some(self.binder.resolve(&single.token)),
                _ => None,
            },
            [name, _, args @ .., _] if is_call(span) => {
                self.binder.skip_all(args);
                let name = name.token.as_ident().unwrap_or_default();
                coerce_call(name, args)
            }
            _ => {
                self.binder.skip_all(span);
                None
            }
        }
    }

    fn condition(&mut self, span: &'a [Lexeme]) -> Option<Filter> {
        match span {
            [column, eq, rest @ ..] if eq.token == Token::Eq && !rest.is_empty() => {
                let Some(name) = column.token.as_ident() else {
                    self.binder.skip_all(span);
                    return None;
                };
                self.simple_value(rest).map(|v| Filter::new(name, v))
            }
            [column, is, null]
                if is.token.is_keyword("IS") && null.token.is_keyword("NULL") =>
            {
                column
                    .token
                    .as_ident()
                    .map(|name| Filter::new(name, Value::Null))
            }
            _ => {
                self.binder.skip_all(span);
                None
            }
        }
    }

    /// `cond (AND cond)*`. Conditions other than equality are dropped.
    fn parse_conditions(&mut self) -> Result<Vec<Filter>, SyntaxError> {
        let mut filters = Vec::new();
        loop {
            let span = self.take_span(|t| {
                t.is_keyword("AND") || *t == Token::Semicolon || is_clause_keyword(t)
            });
            if span.is_empty() {
                return Err(self.error("Expected condition"));
            }
            match self.condition(span) {
                Some(filter) => filters.push(filter),
                None => {
                    tracing::debug!("Dropping unsupported condition: {}", self.raw(span));
                    self.dropped += 1;
                }
            }
            if !self.eat_keyword("AND") {
                break;
            }
        }
        Ok(filters)
    }

    /// A `LIMIT`/`OFFSET` operand: an integer literal or a marker.
    fn parse_count(&mut self) -> Result<u64, SyntaxError> {
        let position = self.position();
        let value = match self.advance().map(|l| &l.token) {
            Some(Token::Number(n)) => n.parse::<u64>().ok(),
            Some(Token::Placeholder(m)) => match self.binder.bind(*m) {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse::<u64>().ok(),
                _ => None,
            },
            _ => None,
        };
        value.ok_or_else(|| SyntaxError::new(position, "Expected a non-negative integer"))
    }

    fn parse_order_by(&mut self) -> Result<Vec<OrderBy>, SyntaxError> {
        self.expect_keyword("BY")?;
        let mut keys = Vec::new();
        loop {
            let column = self.identifier()?;
            let order = if self.eat_keyword("DESC") {
                SortOrder::Desc
            } else {
                self.eat_keyword("ASC");
                SortOrder::Asc
            };
            keys.push(OrderBy { column, order });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(keys)
    }

    // ---- statements ----

    fn parse_select(&mut self) -> Result<QueryDescriptor, SyntaxError> {
        self.expect_keyword("SELECT")?;
        let columns = if self.eat(&Token::Star) {
            Columns::All
        } else {
            Columns::Named(self.identifier_list()?)
        };
        self.expect_keyword("FROM")?;
        let table = self.identifier()?;

        let filters = if self.eat_keyword("WHERE") {
            self.parse_conditions()?
        } else {
            Vec::new()
        };
        let order_by = if self.eat_keyword("ORDER") {
            self.parse_order_by()?
        } else {
            Vec::new()
        };
        let limit = if self.eat_keyword("LIMIT") {
            Some(self.parse_count()?)
        } else {
            None
        };
        let offset = if self.eat_keyword("OFFSET") {
            Some(self.parse_count()?)
        } else {
            None
        };
        self.finish()?;

        Ok(QueryDescriptor {
            table,
            columns,
            filters,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_insert(&mut self) -> Result<MutationAssignment, SyntaxError> {
        self.expect_keyword("INSERT")?;
        self.expect_keyword("INTO")?;
        let table = self.identifier()?;

        self.expect(Token::LParen, "'(' before column list")?;
        let columns = self.identifier_list()?;
        self.expect(Token::RParen, "')' after column list")?;

        self.expect_keyword("VALUES")?;
        self.expect(Token::LParen, "'(' before values")?;
        let mut values = Vec::new();
        loop {
            let span = self.take_span(|t| *t == Token::Comma);
            let Some(first) = span.first() else {
                return Err(self.error("Expected value"));
            };
            let value = self
                .simple_value(span)
                .ok_or_else(|| SyntaxError::new(first.start, "Unsupported value expression"))?;
            values.push(value);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen, "')' after values")?;
        if self.peek() == Some(&Token::Comma) {
            return Err(self.error("Multi-row VALUES lists are not supported"));
        }
        self.finish()?;

        if columns.len() != values.len() {
            return Err(SyntaxError::new(
                0,
                format!(
                    "{} columns but {} values",
                    columns.len(),
                    values.len()
                ),
            ));
        }

        Ok(MutationAssignment {
            table,
            values: columns.into_iter().zip(values).collect(),
            filters: Vec::new(),
        })
    }

    fn parse_update(&mut self) -> Result<MutationAssignment, SyntaxError> {
        self.expect_keyword("UPDATE")?;
        let table = self.identifier()?;
        self.expect_keyword("SET")?;

        let mut values = Row::new();
        loop {
            let column = self.identifier()?;
            self.expect(Token::Eq, "'=' in assignment")?;
            let span = self.take_span(|t| *t == Token::Comma || t.is_keyword("WHERE"));
            let Some(first) = span.first() else {
                return Err(self.error("Expected value"));
            };
            let value = self
                .simple_value(span)
                .ok_or_else(|| SyntaxError::new(first.start, "Unsupported value expression"))?;
            values.insert(column, value);
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        self.expect_keyword("WHERE")?;
        let filters = self.parse_conditions()?;
        self.finish()?;
        require_filters("UPDATE", &table, &filters)?;

        Ok(MutationAssignment {
            table,
            values,
            filters,
        })
    }

    fn parse_delete(&mut self) -> Result<Statement, SyntaxError> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;
        let table = self.identifier()?;
        self.expect_keyword("WHERE")?;
        let filters = self.parse_conditions()?;
        self.finish()?;
        require_filters("DELETE", &table, &filters)?;

        Ok(Statement::Delete { table, filters })
    }

    fn parse_aggregate_shape(&mut self) -> Result<AggregateShape, SyntaxError> {
        self.expect_keyword("SELECT")?;
        let list = self.take_span(|t| t.is_keyword("FROM"));
        self.binder.skip_all(list);
        self.expect_keyword("FROM")?;
        let table = self.identifier()?;

        let filters = if self.eat_keyword("WHERE") {
            self.parse_conditions()?
        } else {
            Vec::new()
        };
        if self.peek().is_some_and(|t| t.is_keyword("GROUP")) {
            return Err(self.error("GROUP BY cannot be recomputed locally"));
        }
        // A single aggregate row: ordering and paging do not change it.
        if self.eat_keyword("ORDER") {
            self.parse_order_by()?;
        }
        if self.eat_keyword("LIMIT") {
            self.parse_count()?;
        }
        if self.eat_keyword("OFFSET") {
            self.parse_count()?;
        }
        self.finish()?;

        let (start, function) = list
            .windows(2)
            .enumerate()
            .find_map(|(i, pair)| match (&pair[0].token, &pair[1].token) {
                (Token::Word(w), Token::LParen)
                    if AGGREGATE_FUNCTIONS.iter().any(|f| w.eq_ignore_ascii_case(f)) =>
                {
                    Some((i, w.to_ascii_uppercase()))
                }
                _ => None,
            })
            .ok_or_else(|| SyntaxError::new(0, "Aggregate is not in the select list"))?;
        let end = closing_paren(list, start + 1)
            .ok_or_else(|| SyntaxError::new(0, "Unbalanced aggregate call"))?;
        let argument = self.raw(&list[start + 2..end]).to_string();
        let bare = start == 0
            && match &list[end + 1..] {
                [] => true,
                [name] => name.token.as_ident().is_some(),
                [kw, name] => kw.token.is_keyword("AS") && name.token.as_ident().is_some(),
                _ => false,
            };

        let words = list
            .iter()
            .filter_map(|l| l.token.as_ident())
            .map(|w| w.to_ascii_lowercase())
            .collect();
        let has_case = list.iter().any(|l| l.token.is_keyword("CASE"));

        Ok(AggregateShape {
            table,
            function,
            argument,
            bare,
            words,
            has_case,
            alias: alias_of(list),
            filters,
            exact: self.dropped == 0,
        })
    }
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|k| word.eq_ignore_ascii_case(k))
}

fn is_clause_keyword(token: &Token) -> bool {
    ["ORDER", "LIMIT", "OFFSET", "GROUP", "HAVING"]
        .iter()
        .any(|k| token.is_keyword(k))
}

/// `name ( ... )` where the opening parenthesis closes at the last lexeme.
fn is_call(span: &[Lexeme]) -> bool {
    if span.len() < 3
        || !matches!(span[0].token, Token::Word(_))
        || span[1].token != Token::LParen
    {
        return false;
    }
    let mut depth = 0usize;
    for (i, lexeme) in span.iter().enumerate().skip(1) {
        match lexeme.token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return i == span.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// Index of the parenthesis closing the one at `open`.
fn closing_paren(list: &[Lexeme], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, lexeme) in list.iter().enumerate().skip(open) {
        match lexeme.token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Output column name of a select list: `... AS name` or `...) name`.
fn alias_of(list: &[Lexeme]) -> Option<String> {
    match list {
        [.., before, last] => {
            let name = last.token.as_ident()?;
            let aliased = before.token.is_keyword("AS")
                || (before.token == Token::RParen && !is_reserved(name));
            aliased.then(|| name.to_string())
        }
        _ => None,
    }
}

fn require_filters(verb: &str, table: &str, filters: &[Filter]) -> Result<(), SyntaxError> {
    if filters.is_empty() {
        tracing::warn!("Refusing {} on '{}' without a usable WHERE filter", verb, table);
        return Err(SyntaxError::new(
            0,
            format!("{} requires at least one equality condition", verb),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn select(sql: &str, params: &[Value]) -> QueryDescriptor {
        match parse(sql, params).unwrap() {
            Statement::Select(d) => d,
            other => panic!("expected SELECT, got {:?}", other),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("SELECT * FROM t"), StatementKind::Select);
        assert_eq!(classify("  insert into t (a) values (1)"), StatementKind::Insert);
        assert_eq!(classify("UPDATE t SET a = 1 WHERE id = 1"), StatementKind::Update);
        assert_eq!(classify("delete from t where id = 1"), StatementKind::Delete);
        assert_eq!(
            classify("CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY)"),
            StatementKind::SchemaNoop
        );
        assert_eq!(classify("PRAGMA foreign_keys = ON"), StatementKind::SchemaNoop);
        assert_eq!(classify("VACUUM"), StatementKind::Unsupported);
        assert_eq!(classify(""), StatementKind::Unsupported);
        assert_eq!(
            classify("SELECT SUM(CASE WHEN a = 'x' THEN b ELSE 0 END) FROM t"),
            StatementKind::Aggregate
        );
    }

    #[test]
    fn test_select_star() {
        let d = select("SELECT * FROM users", &[]);
        assert_eq!(d, QueryDescriptor::table("users"));
    }

    #[test]
    fn test_select_full_grammar() {
        let d = select(
            "select id, name from subscriptions where user_id = ? and active = true \
             order by next_billing_date desc, name limit 10 offset 20;",
            &[json!(7)],
        );
        assert_eq!(d.table, "subscriptions");
        assert_eq!(d.columns, Columns::Named(vec!["id".into(), "name".into()]));
        assert_eq!(
            d.filters,
            vec![
                Filter::new("user_id", json!(7)),
                Filter::new("active", json!(true)),
            ]
        );
        assert_eq!(
            d.order_by,
            vec![
                OrderBy {
                    column: "next_billing_date".into(),
                    order: SortOrder::Desc
                },
                OrderBy {
                    column: "name".into(),
                    order: SortOrder::Asc
                },
            ]
        );
        assert_eq!(d.limit, Some(10));
        assert_eq!(d.offset, Some(20));
    }

    #[test]
    fn test_select_both_dialects_agree() {
        let seq = select("SELECT * FROM t WHERE a = ? AND b = ?", &[json!(1), json!("x")]);
        let num = select("SELECT * FROM t WHERE b = $2 AND a = $1", &[json!(1), json!("x")]);
        let mut seq_filters = seq.filters.clone();
        let mut num_filters = num.filters.clone();
        seq_filters.sort_by(|a, b| a.column.cmp(&b.column));
        num_filters.sort_by(|a, b| a.column.cmp(&b.column));
        assert_eq!(seq_filters, num_filters);
    }

    #[test]
    fn test_where_drops_non_equality_but_keeps_binding_order() {
        let d = select(
            "SELECT * FROM t WHERE amount > ? AND user_id = ?",
            &[json!(10), json!(3)],
        );
        assert_eq!(d.filters, vec![Filter::new("user_id", json!(3))]);
    }

    #[test]
    fn test_where_is_null() {
        let d = select("SELECT * FROM t WHERE deleted_at IS NULL", &[]);
        assert_eq!(d.filters, vec![Filter::new("deleted_at", Value::Null)]);
    }

    #[test]
    fn test_limit_placeholder() {
        let d = select("SELECT * FROM t WHERE a = $1 LIMIT $2", &[json!("x"), json!(5)]);
        assert_eq!(d.limit, Some(5));
    }

    #[test]
    fn test_select_rejects_join_and_missing_from() {
        assert!(parse("SELECT * FROM a JOIN b ON a.id = b.a_id", &[]).is_err());
        assert!(parse("SELECT * WHERE id = 1", &[]).is_err());
        assert!(parse("SELECT a.id FROM a", &[]).is_err());
        assert!(parse("SELECT * FROM a; SELECT * FROM b", &[]).is_err());
    }

    #[test]
    fn test_insert_typed_values() {
        let stmt = parse(
            "INSERT INTO subscriptions (user_id, name, amount, active, note, created_at) \
             VALUES (?, 'Netflix, Inc', 15.99, true, NULL, CURRENT_TIMESTAMP)",
            &[json!(4)],
        )
        .unwrap();
        let Statement::Insert(m) = stmt else {
            panic!("expected INSERT");
        };
        assert_eq!(m.table, "subscriptions");
        assert_eq!(m.values.len(), 6);
        assert_eq!(m.values["user_id"], json!(4));
        assert_eq!(m.values["name"], json!("Netflix, Inc"));
        assert_eq!(m.values["amount"], json!(15.99));
        assert_eq!(m.values["active"], json!(true));
        assert_eq!(m.values["note"], Value::Null);
        assert!(m.values["created_at"].as_str().unwrap().ends_with('Z'));
        assert!(m.filters.is_empty());
    }

    #[test]
    fn test_insert_now_function() {
        let Statement::Insert(m) =
            parse("INSERT INTO t (a, b) VALUES ($1, datetime('now'))", &[json!(1)]).unwrap()
        else {
            panic!("expected INSERT");
        };
        assert!(m.values["b"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_insert_rejects_other_calls() {
        let err = parse(
            "INSERT INTO subs (name, next_date) VALUES (?, date(?, '+1 month'))",
            &[json!("Netflix"), json!("2024-01-31")],
        )
        .unwrap_err();
        assert_eq!(err.message, "Unsupported value expression");
    }

    #[test]
    fn test_update_rejects_call_in_set() {
        assert!(parse("UPDATE t SET name = upper(?) WHERE id = ?", &[json!("a"), json!(1)]).is_err());
    }

    #[test]
    fn test_call_in_where_is_dropped_not_stringified() {
        let d = select(
            "SELECT * FROM subs WHERE email = lower(?) AND user_id = ?",
            &[json!("A@X.COM"), json!(4)],
        );
        assert_eq!(d.filters, vec![Filter::new("user_id", json!(4))]);

        // Nothing usable left: the write is refused.
        assert!(parse(
            "UPDATE subs SET name = ? WHERE email = lower(?)",
            &[json!("n"), json!("A@X.COM")],
        )
        .is_err());
    }

    #[test]
    fn test_where_now_call_is_a_value() {
        let d = select("SELECT * FROM t WHERE seen_at = now()", &[]);
        assert!(d.filters[0].value.as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_insert_arity_mismatch() {
        let err = parse("INSERT INTO t (a, b) VALUES (1)", &[]).unwrap_err();
        assert!(err.message.contains("2 columns but 1 values"));
    }

    #[test]
    fn test_insert_rejects_multi_row() {
        assert!(parse("INSERT INTO t (a) VALUES (1), (2)", &[]).is_err());
    }

    #[test]
    fn test_update_set_binds_before_where() {
        let Statement::Update(m) = parse(
            "UPDATE budgets SET amount = ?, currency = ? WHERE id = ? AND user_id = ?",
            &[json!(500), json!("EUR"), json!(9), json!(2)],
        )
        .unwrap() else {
            panic!("expected UPDATE");
        };
        assert_eq!(m.values["amount"], json!(500));
        assert_eq!(m.values["currency"], json!("EUR"));
        assert_eq!(
            m.filters,
            vec![Filter::new("id", json!(9)), Filter::new("user_id", json!(2))]
        );
    }

    #[test]
    fn test_update_rejects_expressions_and_missing_where() {
        assert!(parse("UPDATE t SET n = n + 1 WHERE id = 1", &[]).is_err());
        assert!(parse("UPDATE t SET n = 1", &[]).is_err());
        assert!(parse("UPDATE t SET n = 1 WHERE id > 1", &[]).is_err());
    }

    #[test]
    fn test_delete() {
        let stmt = parse("DELETE FROM sessions WHERE user_id = $1", &[json!("u1")]).unwrap();
        assert_eq!(
            stmt,
            Statement::Delete {
                table: "sessions".into(),
                filters: vec![Filter::new("user_id", json!("u1"))],
            }
        );
    }

    #[test]
    fn test_unfiltered_delete_is_refused() {
        assert!(parse("DELETE FROM sessions WHERE expires_at < ?", &[json!(1)]).is_err());
        assert!(parse("DELETE FROM sessions", &[]).is_err());
    }

    #[test]
    fn test_schema_noop() {
        assert_eq!(
            parse("create table if not exists t (id integer)", &[]).unwrap(),
            Statement::SchemaNoop("CREATE".into())
        );
    }

    #[test]
    fn test_aggregate_shape() {
        let sql = "SELECT SUM(CASE WHEN billing_cycle = 'yearly' THEN amount / 12 \
                   ELSE amount END) AS monthly_total FROM subscriptions \
                   WHERE user_id = ? AND currency = ?";
        let Statement::Aggregate(plan) = parse(sql, &[json!(1), json!("USD")]).unwrap() else {
            panic!("expected aggregate");
        };
        let shape = plan.shape.unwrap();
        assert_eq!(shape.table, "subscriptions");
        assert_eq!(shape.function, "SUM");
        assert!(shape.has_case);
        assert!(shape.mentions("billing_cycle"));
        assert!(shape.mentions("amount"));
        assert_eq!(shape.alias.as_deref(), Some("monthly_total"));
        assert_eq!(
            shape.filters,
            vec![
                Filter::new("user_id", json!(1)),
                Filter::new("currency", json!("USD")),
            ]
        );
        assert!(plan.remote_sql.ends_with("WHERE user_id = 1 AND currency = 'USD'"));
        assert!(shape.bare);
        assert!(shape.exact);
        assert!(shape.argument.starts_with("CASE WHEN billing_cycle"));
    }

    #[test]
    fn test_aggregate_shape_records_dropped_conditions() {
        let Statement::Aggregate(plan) = parse(
            "SELECT COUNT(*) AS n FROM subscriptions WHERE user_id = ? AND amount > ?",
            &[json!(1), json!(500)],
        )
        .unwrap() else {
            panic!("expected aggregate");
        };
        let shape = plan.shape.unwrap();
        assert_eq!(shape.argument, "*");
        assert_eq!(shape.alias.as_deref(), Some("n"));
        assert_eq!(shape.filters, vec![Filter::new("user_id", json!(1))]);
        assert!(!shape.exact);
    }

    #[test]
    fn test_aggregate_shape_argument_and_bare() {
        let shape_of = |sql: &str| match parse(sql, &[]).unwrap() {
            Statement::Aggregate(plan) => plan.shape.unwrap(),
            other => panic!("expected aggregate, got {:?}", other),
        };
        assert_eq!(shape_of("SELECT COUNT(DISTINCT category_id) FROM t").argument, "DISTINCT category_id");
        assert!(shape_of("SELECT COUNT(*) FROM t").bare);
        assert!(shape_of("SELECT COUNT(*) total FROM t").bare);
        assert!(!shape_of("SELECT COUNT(*) + 1 FROM t").bare);
        assert!(!shape_of("SELECT name, COUNT(*) FROM t").bare);
    }

    #[test]
    fn test_aggregate_select_list_markers_are_consumed() {
        let Statement::Aggregate(plan) = parse(
            "SELECT SUM(CASE WHEN kind = ? THEN 1 ELSE 0 END) FROM t WHERE owner = ?",
            &[json!("a"), json!("me")],
        )
        .unwrap() else {
            panic!("expected aggregate");
        };
        let shape = plan.shape.unwrap();
        assert_eq!(shape.filters, vec![Filter::new("owner", json!("me"))]);
        assert_eq!(shape.alias, None);
    }

    #[test]
    fn test_aggregate_with_group_by_has_no_shape() {
        let Statement::Aggregate(plan) =
            parse("SELECT category, SUM(amount) FROM t GROUP BY category", &[]).unwrap()
        else {
            panic!("expected aggregate");
        };
        assert!(plan.shape.is_none());
    }
}
