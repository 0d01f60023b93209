//! # restsql
//!
//! Runs a small SQL dialect against a REST table-query service such as
//! PostgREST, behind the callback interface of a classic embedded SQL
//! driver.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use restsql::prelude::*;
//! use serde_json::json;
//!
//! let db = Database::new(MemoryService::new().with_table("users", vec![
//!     json!({"id": 1, "email": "a@example.com"}),
//! ]));
//!
//! db.get("SELECT email FROM users WHERE id = ?", &[json!(1)], |err, row| {
//!     assert!(err.is_none());
//!     assert_eq!(row.unwrap()["email"], json!("a@example.com"));
//! })
//! .await;
//! ```
//!
//! ## Dialect
//!
//! | Statement | Translation                                   |
//! |-----------|-----------------------------------------------|
//! | `SELECT`  | `select` + `eq` filters + `order` + `limit`   |
//! | `INSERT`  | `insert` of one row                           |
//! | `UPDATE`  | `update` filtered by the `WHERE` equalities   |
//! | `DELETE`  | `delete` filtered by the `WHERE` equalities   |
//! | `SUM(..)` | raw SQL RPC, else a local recompute recipe    |
//! | `CREATE`  | accepted and ignored                          |
//!
//! Placeholders are `?` (sequential) or `$n` / `?n` (numbered).

pub mod aggregate;
pub mod ast;
pub mod binding;
pub mod config;
pub mod engine;
pub mod error;
pub mod legacy;
pub mod lexer;
pub mod memory;
pub mod parser;
pub mod rest;
pub mod service;
pub mod transpiler;

pub mod prelude {
    pub use crate::aggregate::{AggregateRecipe, AggregateRegistry};
    pub use crate::ast::*;
    pub use crate::config::BridgeConfig;
    pub use crate::engine::{Bridge, Cardinality, Fetched};
    pub use crate::error::*;
    pub use crate::legacy::Database;
    pub use crate::memory::MemoryService;
    pub use crate::parser::parse;
    pub use crate::rest::RestService;
    pub use crate::service::{TableQuery, TableService};
    pub use crate::transpiler::ToRest;
}

/// Parse a statement and bind its parameters.
///
/// # Example
///
/// ```
/// use restsql::ast::Statement;
/// use serde_json::json;
///
/// let stmt = restsql::parse("SELECT * FROM users WHERE id = ?", &[json!(7)]).unwrap();
/// let Statement::Select(query) = stmt else { panic!() };
/// assert_eq!(query.table, "users");
/// assert_eq!(query.filters[0].value, json!(7));
/// ```
pub fn parse(
    sql: &str,
    params: &[serde_json::Value],
) -> Result<ast::Statement, error::SyntaxError> {
    parser::parse(sql, params)
}
