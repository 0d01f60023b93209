//! Fallback execution for aggregates the table-query builder cannot express.
//!
//! An aggregate is first sent verbatim (parameters inlined) to the raw-SQL
//! RPC endpoint. When that fails for any reason, the rows behind it are
//! fetched through the ordinary query path and folded locally by the first
//! registered [`AggregateRecipe`] that recognises the statement's shape.

use serde_json::{Number, Value};
use std::fmt;

use crate::ast::{AggregatePlan, AggregateShape, Columns, QueryDescriptor, Row};
use crate::engine::{Bridge, Cardinality};
use crate::error::{BridgeError, BridgeResult};
use crate::service::TableService;

/// A named way of recomputing one aggregate shape from raw rows.
pub trait AggregateRecipe: Send + Sync {
    /// Recipe identifier
    fn id(&self) -> &'static str;

    /// Higher priority recipes are tried first
    fn priority(&self) -> u32 {
        100
    }

    /// One-line description for listings
    fn description(&self) -> &'static str;

    /// Whether this recipe recognises the statement
    fn matches(&self, shape: &AggregateShape) -> bool;

    /// Filter columns the statement must carry for the recompute to be scoped
    fn required_filters(&self) -> &[&'static str] {
        &[]
    }

    /// Columns to fetch for each row
    fn columns(&self) -> Columns;

    /// Output column when the statement has no alias
    fn default_alias(&self) -> &'static str;

    /// One row's contribution to the total
    fn derive(&self, row: &Row) -> f64;

    fn finish(&self, total: f64) -> Value {
        Number::from_f64(total).map_or(Value::Null, Value::Number)
    }

    fn fold(&self, rows: &[Row]) -> Value {
        self.finish(rows.iter().map(|row| self.derive(row)).sum())
    }
}

/// How a billing cycle converts to a monthly amount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    Divide(f64),
    Multiply(f64),
}

impl Conversion {
    pub fn apply(self, amount: f64) -> f64 {
        match self {
            Conversion::Divide(d) => amount / d,
            Conversion::Multiply(m) => amount * m,
        }
    }
}

/// `SUM(CASE billing_cycle ... amount ...)`: a user's spend as a monthly
/// equivalent.
#[derive(Debug, Clone)]
pub struct MonthlySpendRecipe {
    pub amount_column: String,
    pub cycle_column: String,
    /// Normalised cycle name to conversion; unknown cycles count as monthly.
    pub conversions: Vec<(String, Conversion)>,
}

impl Default for MonthlySpendRecipe {
    fn default() -> Self {
        let conversions = [
            ("yearly", Conversion::Divide(12.0)),
            ("half-yearly", Conversion::Divide(6.0)),
            ("quarterly", Conversion::Divide(3.0)),
            ("weekly", Conversion::Multiply(4.33)),
            ("daily", Conversion::Multiply(30.44)),
            ("monthly", Conversion::Multiply(1.0)),
        ];
        Self {
            amount_column: "amount".to_string(),
            cycle_column: "billing_cycle".to_string(),
            conversions: conversions
                .into_iter()
                .map(|(cycle, c)| (cycle.to_string(), c))
                .collect(),
        }
    }
}

impl MonthlySpendRecipe {
    fn conversion(&self, cycle: &str) -> Conversion {
        let cycle = cycle.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        self.conversions
            .iter()
            .find(|(name, _)| *name == cycle)
            .map_or(Conversion::Multiply(1.0), |(_, c)| *c)
    }
}

impl AggregateRecipe for MonthlySpendRecipe {
    fn id(&self) -> &'static str {
        "monthly_spend"
    }

    fn priority(&self) -> u32 {
        200
    }

    fn description(&self) -> &'static str {
        "SUM of amount converted to a monthly equivalent by billing cycle"
    }

    fn matches(&self, shape: &AggregateShape) -> bool {
        shape.function == "SUM"
            && shape.bare
            && shape.has_case
            && shape.mentions(&self.amount_column)
            && shape.mentions(&self.cycle_column)
    }

    fn required_filters(&self) -> &[&'static str] {
        &["user_id"]
    }

    fn columns(&self) -> Columns {
        Columns::Named(vec![self.amount_column.clone(), self.cycle_column.clone()])
    }

    fn default_alias(&self) -> &'static str {
        "total"
    }

    fn derive(&self, row: &Row) -> f64 {
        let amount = match row.get(&self.amount_column) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        };
        let cycle = row
            .get(&self.cycle_column)
            .and_then(Value::as_str)
            .unwrap_or("monthly");
        self.conversion(cycle).apply(amount)
    }
}

/// `COUNT(*)` or `COUNT(1)`. Counting a column skips nulls, so those forms
/// are left unmatched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowCountRecipe;

impl AggregateRecipe for RowCountRecipe {
    fn id(&self) -> &'static str {
        "row_count"
    }

    fn description(&self) -> &'static str {
        "COUNT of matching rows"
    }

    fn matches(&self, shape: &AggregateShape) -> bool {
        shape.function == "COUNT"
            && shape.bare
            && matches!(shape.argument.trim(), "*" | "1")
    }

    fn columns(&self) -> Columns {
        Columns::All
    }

    fn default_alias(&self) -> &'static str {
        "count"
    }

    fn derive(&self, _row: &Row) -> f64 {
        1.0
    }

    fn finish(&self, total: f64) -> Value {
        Value::from(total as u64)
    }
}

/// Registry of aggregate recipes
pub struct AggregateRegistry {
    recipes: Vec<Box<dyn AggregateRecipe>>,
}

impl Default for AggregateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AggregateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.recipes.iter().map(|r| r.id()))
            .finish()
    }
}

impl AggregateRegistry {
    /// Create a new registry with the built-in recipes
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(MonthlySpendRecipe::default()));
        registry.register(Box::new(RowCountRecipe));
        registry
    }

    /// A registry that recomputes nothing
    pub fn empty() -> Self {
        Self {
            recipes: Vec::new(),
        }
    }

    /// Register a new recipe
    pub fn register(&mut self, recipe: Box<dyn AggregateRecipe>) {
        self.recipes.push(recipe);
        self.recipes.sort_by_key(|r| std::cmp::Reverse(r.priority()));
    }

    /// Find the recipe for a shape, if one matches and its filters are present.
    /// A shape with dropped WHERE conditions never matches.
    pub fn find(&self, shape: &AggregateShape) -> Option<&dyn AggregateRecipe> {
        if !shape.exact {
            return None;
        }
        self.recipes
            .iter()
            .find(|r| {
                r.matches(shape) && r.required_filters().iter().all(|c| shape.has_filter(c))
            })
            .map(|r| r.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn AggregateRecipe> {
        self.recipes.iter().map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

impl<S: TableService> Bridge<S> {
    /// Answer an aggregate through the RPC tier, else by local recompute.
    pub(crate) async fn aggregate(
        &self,
        plan: &AggregatePlan,
        sql: &str,
        params: &[Value],
    ) -> BridgeResult<Vec<Row>> {
        match self.service().execute_sql(&plan.remote_sql).await {
            Ok(rows) => return Ok(rows),
            Err(e) => tracing::debug!("RPC tier failed ({}), recomputing locally", e),
        }

        let Some((shape, recipe)) = plan
            .shape
            .as_ref()
            .and_then(|shape| self.recipes().find(shape).map(|r| (shape, r)))
        else {
            return Err(BridgeError::unsupported_aggregate(sql, params));
        };

        let descriptor = QueryDescriptor {
            columns: recipe.columns(),
            filters: shape.filters.clone(),
            ..QueryDescriptor::table(shape.table.clone())
        };
        let rows = self
            .query(&descriptor, Cardinality::Many)
            .await?
            .into_many();

        let value = recipe.fold(&rows);
        tracing::debug!(
            "Recomputed {} over {} rows of '{}': {}",
            recipe.id(),
            rows.len(),
            shape.table,
            value
        );

        let alias = shape
            .alias
            .clone()
            .unwrap_or_else(|| recipe.default_alias().to_string());
        let mut row = Row::new();
        row.insert(alias, value);
        Ok(vec![row])
    }
}
