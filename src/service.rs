//! The table-query service seam.
//!
//! Backends expose data only through a query builder:
//!
//! ```text
//! from(table).select(cols).eq(col, v)*.order(col, asc)*.limit(n)?.single()?
//! insert(values) · update(values).eq(...)* · delete().eq(...)* · rpc(sql)?
//! ```
//!
//! The translator talks to an injected [`TableService`], so tests substitute
//! [`MemoryService`](crate::memory::MemoryService) for the REST client.

use std::future::Future;

use serde_json::Value;

use crate::ast::{Columns, Filter, OrderBy, QueryDescriptor, Row, SortOrder};
use crate::error::ServiceError;

/// Result type alias for service calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// A read request, built the way the backend's builder chain is.
#[derive(Debug, Clone, PartialEq)]
pub struct TableQuery {
    pub table: String,
    pub columns: Columns,
    pub filters: Vec<Filter>,
    pub order: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Expect exactly one row; zero rows is [`ServiceError::NoRowsMatched`].
    pub single: bool,
}

impl TableQuery {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Columns::All,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            single: false,
        }
    }

    /// The builder chain for a parsed `SELECT`: projection, filters, order,
    /// offset and limit, in that order.
    pub fn for_descriptor(descriptor: &QueryDescriptor) -> Self {
        let mut query = Self::from(&descriptor.table).select(descriptor.columns.clone());
        for filter in &descriptor.filters {
            query = query.eq(&filter.column, filter.value.clone());
        }
        for key in &descriptor.order_by {
            query = query.order(&key.column, key.order.is_ascending());
        }
        query.offset = descriptor.offset;
        query.limit = descriptor.limit;
        query
    }

    pub fn select(mut self, columns: Columns) -> Self {
        self.columns = columns;
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: Value) -> Self {
        self.filters.push(Filter::new(column, value));
        self
    }

    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order.push(OrderBy {
            column: column.into(),
            order: if ascending {
                SortOrder::Asc
            } else {
                SortOrder::Desc
            },
        });
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }
}

/// What an update reports back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Updated rows, when the backend returns them.
    pub rows: Vec<Row>,
    /// Affected-row count, when the backend reports one.
    pub count: Option<u64>,
}

/// A remote table-query backend.
pub trait TableService: Send + Sync {
    /// Run a read. Single-row queries fail with `NoRowsMatched` on no match.
    fn select(&self, query: TableQuery) -> impl Future<Output = ServiceResult<Vec<Row>>> + Send;

    /// Insert one row and return it as created.
    fn insert(
        &self,
        table: &str,
        values: Row,
    ) -> impl Future<Output = ServiceResult<Option<Row>>> + Send;

    /// Update every row matching all `filters`.
    fn update(
        &self,
        table: &str,
        filters: &[Filter],
        values: Row,
    ) -> impl Future<Output = ServiceResult<UpdateOutcome>> + Send;

    /// Delete every row matching all `filters`, returning the count if known.
    fn delete(
        &self,
        table: &str,
        filters: &[Filter],
    ) -> impl Future<Output = ServiceResult<Option<u64>>> + Send;

    /// Run raw SQL through the backend's RPC endpoint, if it has one.
    fn execute_sql(&self, sql: &str) -> impl Future<Output = ServiceResult<Vec<Row>>> + Send {
        let _ = sql;
        async { Err(ServiceError::RpcUnavailable) }
    }
}
