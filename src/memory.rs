//! In-memory table-query backend.
//!
//! Mirrors how a PostgREST backend answers the builder calls: filters compare
//! by text (so `eq.1` matches `1`, `"1"` and `true`), ascending sorts put
//! nulls last, and a single-row read fails when it matches nothing.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::ast::{Columns, Filter, OrderBy, Row};
use crate::error::ServiceError;
use crate::service::{ServiceResult, TableQuery, TableService, UpdateOutcome};

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

impl Table {
    fn with_rows(rows: Vec<Row>, key: &str) -> Self {
        let max_id = rows
            .iter()
            .filter_map(|r| r.get(key).and_then(Value::as_i64))
            .max()
            .unwrap_or(0);
        Self {
            rows,
            next_id: max_id + 1,
        }
    }
}

/// A table store held in process memory.
#[derive(Debug)]
pub struct MemoryService {
    tables: RwLock<HashMap<String, Table>>,
    key_column: String,
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryService {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            key_column: "id".to_string(),
        }
    }

    /// Use a key column other than `id` for generated keys.
    pub fn with_key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    /// Create a table seeded with JSON objects; non-objects are ignored.
    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        let table = Table::with_rows(rows, &self.key_column);
        self.tables.get_mut().insert(name.into(), table);
        self
    }

    /// Snapshot of a table's rows, in storage order.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        let tables = self.tables.read().await;
        tables.get(table).map(|t| t.rows.clone()).unwrap_or_default()
    }
}

fn missing_table(table: &str) -> ServiceError {
    ServiceError::remote("42P01", format!("relation \"{}\" does not exist", table))
}

impl TableService for MemoryService {
    async fn select(&self, query: TableQuery) -> ServiceResult<Vec<Row>> {
        let tables = self.tables.read().await;
        let table = tables
            .get(&query.table)
            .ok_or_else(|| missing_table(&query.table))?;

        let mut rows: Vec<&Row> = table
            .rows
            .iter()
            .filter(|row| matches_all(row, &query.filters))
            .collect();
        sort_rows(&mut rows, &query.order);

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|n| n as usize).unwrap_or(usize::MAX);
        let rows: Vec<Row> = rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| project(row, &query.columns))
            .collect();

        if query.single {
            match rows.len() {
                0 => return Err(ServiceError::NoRowsMatched),
                1 => {}
                n => {
                    return Err(ServiceError::remote(
                        "PGRST116",
                        format!("JSON object requested, {} rows returned", n),
                    ));
                }
            }
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, mut values: Row) -> ServiceResult<Option<Row>> {
        let mut tables = self.tables.write().await;
        let stored = tables.get_mut(table).ok_or_else(|| missing_table(table))?;

        match values.get(&self.key_column).and_then(Value::as_i64) {
            Some(id) => stored.next_id = stored.next_id.max(id + 1),
            None if !values.contains_key(&self.key_column) => {
                values.insert(self.key_column.clone(), Value::from(stored.next_id));
                stored.next_id += 1;
            }
            None => {}
        }

        stored.rows.push(values.clone());
        Ok(Some(values))
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        values: Row,
    ) -> ServiceResult<UpdateOutcome> {
        let mut tables = self.tables.write().await;
        let stored = tables.get_mut(table).ok_or_else(|| missing_table(table))?;

        let mut updated = Vec::new();
        for row in stored.rows.iter_mut().filter(|r| matches_all(r, filters)) {
            for (column, value) in &values {
                row.insert(column.clone(), value.clone());
            }
            updated.push(row.clone());
        }

        Ok(UpdateOutcome {
            count: Some(updated.len() as u64),
            rows: updated,
        })
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> ServiceResult<Option<u64>> {
        let mut tables = self.tables.write().await;
        let stored = tables.get_mut(table).ok_or_else(|| missing_table(table))?;

        let before = stored.rows.len();
        stored.rows.retain(|r| !matches_all(r, filters));
        Ok(Some((before - stored.rows.len()) as u64))
    }
}

fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters
        .iter()
        .all(|f| loosely_equal(row.get(&f.column), &f.value))
}

/// Equality the way the backend casts a filter operand to the column type.
fn loosely_equal(cell: Option<&Value>, operand: &Value) -> bool {
    let Some(cell) = cell else {
        return operand.is_null();
    };
    match (cell, operand) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(b), other) | (other, Value::Bool(b)) => as_bool(other) == Some(*b),
        _ => match (as_number(cell), as_number(operand)) {
            (Some(a), Some(b)) => a == b,
            _ => text(cell) == text(operand),
        },
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Some(true),
            "false" | "f" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn sort_rows(rows: &mut [&Row], order: &[OrderBy]) {
    rows.sort_by(|a, b| {
        order
            .iter()
            .map(|key| {
                let ord = compare_cells(a.get(&key.column), b.get(&key.column));
                if key.order.is_ascending() {
                    ord
                } else {
                    ord.reverse()
                }
            })
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

/// Nulls sort greatest, so ascending puts them last and descending first.
fn compare_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => text(a).cmp(&text(b)),
        },
    }
}

fn project(row: &Row, columns: &Columns) -> Row {
    match columns {
        Columns::All => row.clone(),
        Columns::Named(names) => names
            .iter()
            .map(|name| (name.clone(), row.get(name).cloned().unwrap_or(Value::Null)))
            .collect(),
    }
}
