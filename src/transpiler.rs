//! REST transpiler for table queries.
//!
//! Converts builder requests into PostgREST query parameters.

use serde_json::Value;

use crate::ast::{Columns, Filter, OrderBy};
use crate::service::TableQuery;

/// Trait for converting requests to PostgREST query parameters.
pub trait ToRest {
    /// Query-string pairs, unencoded.
    fn to_rest(&self) -> Vec<(String, String)>;

    /// The pairs joined as a display string (not percent-encoded).
    fn to_query_string(&self) -> String {
        self.to_rest()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl ToRest for TableQuery {
    fn to_rest(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), select_param(&self.columns))];
        params.extend(self.filters.to_rest());

        if !self.order.is_empty() {
            params.push(("order".to_string(), order_param(&self.order)));
        }
        if let Some(n) = self.limit {
            params.push(("limit".to_string(), n.to_string()));
        }
        if let Some(n) = self.offset {
            params.push(("offset".to_string(), n.to_string()));
        }

        params
    }
}

impl ToRest for [Filter] {
    fn to_rest(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|f| (f.column.clone(), filter_operand(&f.value)))
            .collect()
    }
}

impl ToRest for Vec<Filter> {
    fn to_rest(&self) -> Vec<(String, String)> {
        self.as_slice().to_rest()
    }
}

fn select_param(columns: &Columns) -> String {
    columns.to_string()
}

fn order_param(order: &[OrderBy]) -> String {
    order
        .iter()
        .map(|o| {
            let dir = if o.order.is_ascending() { "asc" } else { "desc" };
            format!("{}.{}", o.column, dir)
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// The right-hand side of a filter parameter: `eq.<value>` or `is.null`.
pub fn filter_operand(value: &Value) -> String {
    match value {
        Value::Null => "is.null".to_string(),
        Value::String(s) => format!("eq.{}", s),
        other => format!("eq.{}", other),
    }
}
