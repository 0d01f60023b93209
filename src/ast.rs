//! Structured forms of the statements restsql understands.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// A row as returned by the table-query service.
pub type Row = serde_json::Map<String, Value>;

/// Column projection of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Columns {
    /// `*`
    All,
    /// An explicit, ordered list.
    Named(Vec<String>),
}

impl fmt::Display for Columns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Columns::All => write!(f, "*"),
            Columns::Named(cols) => write!(f, "{}", cols.join(",")),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn is_ascending(self) -> bool {
        self == SortOrder::Asc
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "ASC"),
            SortOrder::Desc => write!(f, "DESC"),
        }
    }
}

/// One `ORDER BY` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub order: SortOrder,
}

/// An equality filter. A `null` value means `IS NULL`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn new(column: impl Into<String>, value: Value) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_null() {
            write!(f, "{} IS NULL", self.column)
        } else {
            write!(f, "{} = {}", self.column, self.value)
        }
    }
}

/// A translatable single-table `SELECT`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub table: String,
    pub columns: Columns,
    /// Applied conjunctively.
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl QueryDescriptor {
    /// A `SELECT *` over the whole table.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Columns::All,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}

/// Target, assignments, and filters of an `INSERT` or `UPDATE`.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationAssignment {
    pub table: String,
    pub values: Row,
    /// Always empty for `INSERT`.
    pub filters: Vec<Filter>,
}

/// What the fallback executor needs to know about an aggregate `SELECT`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateShape {
    pub table: String,
    /// Upper-cased aggregate function name, e.g. `SUM`.
    pub function: String,
    /// Argument text of the aggregate call as written, e.g. `*`.
    pub argument: String,
    /// The select list is the aggregate call alone, optionally aliased.
    pub bare: bool,
    /// Lower-cased identifiers appearing in the select list.
    pub words: Vec<String>,
    pub has_case: bool,
    pub alias: Option<String>,
    pub filters: Vec<Filter>,
    /// Every WHERE condition became a filter; nothing was dropped.
    pub exact: bool,
}

impl AggregateShape {
    pub fn mentions(&self, word: &str) -> bool {
        self.words.iter().any(|w| w == word)
    }

    pub fn has_filter(&self, column: &str) -> bool {
        self.filters.iter().any(|f| f.column == column)
    }
}

/// An aggregate statement routed to the fallback executor.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatePlan {
    /// `None` when the statement is not a plain single-table aggregate.
    pub shape: Option<AggregateShape>,
    /// The statement with its parameters inlined, ready for the RPC tier.
    pub remote_sql: String,
}

/// The statement classes of the driver contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Aggregate,
    SchemaNoop,
    Unsupported,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementKind::Select => "SELECT",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::Aggregate => "AGGREGATE",
            StatementKind::SchemaNoop => "SCHEMA_NOOP",
            StatementKind::Unsupported => "UNSUPPORTED",
        };
        write!(f, "{}", name)
    }
}

/// A parsed statement with every placeholder already bound.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(QueryDescriptor),
    Insert(MutationAssignment),
    Update(MutationAssignment),
    Delete { table: String, filters: Vec<Filter> },
    Aggregate(AggregatePlan),
    /// Schema or transaction statement, carried by its leading keyword.
    SchemaNoop(String),
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::Select(_) => StatementKind::Select,
            Statement::Insert(_) => StatementKind::Insert,
            Statement::Update(_) => StatementKind::Update,
            Statement::Delete { .. } => StatementKind::Delete,
            Statement::Aggregate(_) => StatementKind::Aggregate,
            Statement::SchemaNoop(_) => StatementKind::SchemaNoop,
        }
    }
}

/// The `{lastID, changes}` object handed to write callbacks.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResultContext {
    #[serde(rename = "lastID")]
    pub last_id: Option<Value>,
    pub changes: u64,
}

impl ResultContext {
    pub fn new(last_id: Option<Value>, changes: u64) -> Self {
        Self { last_id, changes }
    }

    pub fn changes(changes: u64) -> Self {
        Self {
            last_id: None,
            changes,
        }
    }
}
