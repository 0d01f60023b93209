//! The legacy `get`/`all`/`run`/`close` driver contract.
//!
//! Every call completes by invoking its callback exactly once. Errors are
//! delivered through the callback, never returned or raised.
//!
//! ```rust,ignore
//! let db = Database::new(MemoryService::new().with_table("users", rows));
//! db.get("SELECT * FROM users WHERE id = ?", &[json!(1)], |err, row| {
//!     // ...
//! })
//! .await;
//! ```

use serde_json::Value;

use crate::ast::{ResultContext, Row};
use crate::engine::Bridge;
use crate::error::BridgeError;
use crate::service::TableService;

/// A database handle with the legacy callback interface.
pub struct Database<S> {
    bridge: Bridge<S>,
}

impl<S: TableService> Database<S> {
    pub fn new(service: S) -> Self {
        Self::from_bridge(Bridge::new(service))
    }

    /// Wrap a configured bridge.
    pub fn from_bridge(bridge: Bridge<S>) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &Bridge<S> {
        &self.bridge
    }

    /// Fetch the first matching row, or `None`.
    pub async fn get<F>(&self, sql: &str, params: &[Value], callback: F)
    where
        F: FnOnce(Option<BridgeError>, Option<Row>),
    {
        match self.bridge.fetch_one(sql, params).await {
            Ok(row) => callback(None, row),
            Err(err) => {
                tracing::debug!("get failed: {}", err);
                callback(Some(err), None)
            }
        }
    }

    /// Fetch every matching row. On success the rows are always present.
    pub async fn all<F>(&self, sql: &str, params: &[Value], callback: F)
    where
        F: FnOnce(Option<BridgeError>, Option<Vec<Row>>),
    {
        match self.bridge.fetch_all(sql, params).await {
            Ok(rows) => callback(None, Some(rows)),
            Err(err) => {
                tracing::debug!("all failed: {}", err);
                callback(Some(err), None)
            }
        }
    }

    /// Execute a write. The callback receives the result context first.
    pub async fn run<F>(&self, sql: &str, params: &[Value], callback: F)
    where
        F: FnOnce(&ResultContext, Option<BridgeError>),
    {
        match self.bridge.execute(sql, params).await {
            Ok(ctx) => callback(&ctx, None),
            Err(err) => {
                tracing::debug!("run failed: {}", err);
                callback(&ResultContext::default(), Some(err))
            }
        }
    }

    /// No connection is held, so closing always succeeds.
    pub async fn close<F>(&self, callback: Option<F>)
    where
        F: FnOnce(Option<BridgeError>),
    {
        if let Some(callback) = callback {
            callback(None);
        }
    }
}
