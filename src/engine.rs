//! Translation engine for restsql.
//!
//! [`Bridge`] parses a statement, binds its parameters and issues the
//! equivalent builder calls against an injected [`TableService`].

use serde_json::Value;

use crate::aggregate::AggregateRegistry;
use crate::ast::*;
use crate::error::{BridgeError, BridgeResult, ServiceError};
use crate::parser;
use crate::service::{TableQuery, TableService};

/// How many rows a read expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Rows produced by [`Bridge::query`].
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    One(Option<Row>),
    Many(Vec<Row>),
}

impl Fetched {
    pub fn into_one(self) -> Option<Row> {
        match self {
            Fetched::One(row) => row,
            Fetched::Many(rows) => rows.into_iter().next(),
        }
    }

    pub fn into_many(self) -> Vec<Row> {
        match self {
            Fetched::One(row) => row.into_iter().collect(),
            Fetched::Many(rows) => rows,
        }
    }
}

/// Executes SQL statements through a table-query service.
pub struct Bridge<S> {
    service: S,
    recipes: AggregateRegistry,
    key_column: String,
}

impl<S: TableService> Bridge<S> {
    /// Create a bridge with the default aggregate recipes.
    pub fn new(service: S) -> Self {
        Self {
            service,
            recipes: AggregateRegistry::new(),
            key_column: "id".to_string(),
        }
    }

    /// Replace the aggregate recipe registry.
    pub fn with_recipes(mut self, recipes: AggregateRegistry) -> Self {
        self.recipes = recipes;
        self
    }

    /// Column reported as `lastID` after an insert.
    pub fn with_key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn recipes(&self) -> &AggregateRegistry {
        &self.recipes
    }

    fn prepare(&self, sql: &str, params: &[Value]) -> BridgeResult<Statement> {
        parser::parse(sql, params).map_err(|e| {
            tracing::warn!("Unsupported statement: {} (params: {:?}): {}", sql, params, e);
            BridgeError::parse(sql, params, e)
        })
    }

    /// Run a statement expecting at most one row.
    pub async fn fetch_one(&self, sql: &str, params: &[Value]) -> BridgeResult<Option<Row>> {
        match self.prepare(sql, params)? {
            Statement::Select(descriptor) => {
                Ok(self.query(&descriptor, Cardinality::One).await?.into_one())
            }
            Statement::Aggregate(plan) => {
                Ok(self.aggregate(&plan, sql, params).await?.into_iter().next())
            }
            other => {
                self.run_statement(other, sql, params).await?;
                Ok(None)
            }
        }
    }

    /// Run a statement expecting any number of rows.
    pub async fn fetch_all(&self, sql: &str, params: &[Value]) -> BridgeResult<Vec<Row>> {
        match self.prepare(sql, params)? {
            Statement::Select(descriptor) => {
                Ok(self.query(&descriptor, Cardinality::Many).await?.into_many())
            }
            Statement::Aggregate(plan) => self.aggregate(&plan, sql, params).await,
            other => {
                self.run_statement(other, sql, params).await?;
                Ok(Vec::new())
            }
        }
    }

    /// Run a statement for its effect.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> BridgeResult<ResultContext> {
        let statement = self.prepare(sql, params)?;
        self.run_statement(statement, sql, params).await
    }

    async fn run_statement(
        &self,
        statement: Statement,
        sql: &str,
        params: &[Value],
    ) -> BridgeResult<ResultContext> {
        match statement {
            Statement::Select(descriptor) => {
                self.query(&descriptor, Cardinality::Many).await?;
                Ok(ResultContext::default())
            }
            Statement::Aggregate(plan) => {
                self.aggregate(&plan, sql, params).await?;
                Ok(ResultContext::default())
            }
            Statement::SchemaNoop(keyword) => {
                if keyword == "ROLLBACK" {
                    tracing::warn!("ROLLBACK is a no-op: earlier writes are not undone");
                } else {
                    tracing::debug!("Skipping {} statement", keyword);
                }
                Ok(ResultContext::default())
            }
            Statement::Insert(assignment) => self.insert(assignment).await,
            Statement::Update(assignment) => self.update(assignment).await,
            Statement::Delete { table, filters } => self.delete(&table, &filters).await,
        }
    }

    /// Issue the builder chain for a descriptor.
    pub async fn query(
        &self,
        descriptor: &QueryDescriptor,
        cardinality: Cardinality,
    ) -> BridgeResult<Fetched> {
        tracing::debug!(
            "Selecting {} from '{}' ({} filters)",
            descriptor.columns,
            descriptor.table,
            descriptor.filters.len()
        );

        let query = TableQuery::for_descriptor(descriptor);

        match cardinality {
            Cardinality::One => {
                // First-row semantics: never ask the backend for more than one.
                let limit = descriptor.limit.map_or(1, |n| n.min(1));
                match self.service.select(query.limit(limit).single()).await {
                    Ok(rows) => Ok(Fetched::One(rows.into_iter().next())),
                    Err(ServiceError::NoRowsMatched) => Ok(Fetched::One(None)),
                    Err(e) => Err(e.into()),
                }
            }
            Cardinality::Many => Ok(Fetched::Many(self.service.select(query).await?)),
        }
    }

    async fn insert(&self, assignment: MutationAssignment) -> BridgeResult<ResultContext> {
        tracing::debug!(
            "Inserting into '{}' ({} columns)",
            assignment.table,
            assignment.values.len()
        );
        let created = self
            .service
            .insert(&assignment.table, assignment.values)
            .await?;
        let last_id = created
            .and_then(|row| row.get(&self.key_column).cloned())
            .filter(|id| !id.is_null());
        Ok(ResultContext::new(last_id, 1))
    }

    async fn update(&self, assignment: MutationAssignment) -> BridgeResult<ResultContext> {
        tracing::debug!(
            "Updating '{}' ({} columns, {} filters)",
            assignment.table,
            assignment.values.len(),
            assignment.filters.len()
        );
        let changes = match self
            .service
            .update(&assignment.table, &assignment.filters, assignment.values)
            .await
        {
            Ok(outcome) => outcome.count.unwrap_or(outcome.rows.len() as u64),
            Err(ServiceError::NoRowsMatched) => 0,
            Err(e) => return Err(e.into()),
        };
        Ok(ResultContext::changes(changes))
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> BridgeResult<ResultContext> {
        tracing::debug!("Deleting from '{}' ({} filters)", table, filters.len());
        let changes = match self.service.delete(table, filters).await {
            // Backends that report nothing get the legacy constant.
            Ok(count) => count.unwrap_or(1),
            Err(ServiceError::NoRowsMatched) => 0,
            Err(e) => return Err(e.into()),
        };
        Ok(ResultContext::changes(changes))
    }
}
