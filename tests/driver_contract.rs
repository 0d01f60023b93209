use std::sync::Mutex;

use pretty_assertions::assert_eq;
use restsql::prelude::*;
use restsql::service::{ServiceResult, UpdateOutcome};
use serde_json::{json, Value};

fn fixture() -> MemoryService {
    MemoryService::new()
        .with_table(
            "subscriptions",
            vec![
                json!({"id": 1, "user_id": 1, "name": "Netflix", "amount": 100, "billing_cycle": "monthly", "currency": "USD"}),
                json!({"id": 2, "user_id": 1, "name": "Domain", "amount": 1200, "billing_cycle": "yearly", "currency": "USD"}),
                json!({"id": 3, "user_id": 1, "name": "Gym", "amount": 50, "billing_cycle": "weekly", "currency": "USD"}),
                json!({"id": 4, "user_id": 2, "name": "Hulu", "amount": 8, "billing_cycle": "monthly", "currency": "EUR"}),
            ],
        )
        .with_table("categories", vec![json!({"id": 1, "name": "Streaming"})])
}

async fn all(db: &Database<impl TableService>, sql: &str, params: &[Value]) -> Vec<Row> {
    let mut out = None;
    db.all(sql, params, |err, rows| {
        assert!(err.is_none(), "unexpected error: {:?}", err);
        out = rows;
    })
    .await;
    out.expect("rows are present on success")
}

async fn get(db: &Database<impl TableService>, sql: &str, params: &[Value]) -> Option<Row> {
    let mut out = None;
    db.get(sql, params, |err, row| {
        assert!(err.is_none(), "unexpected error: {:?}", err);
        out = row;
    })
    .await;
    out
}

async fn run(
    db: &Database<impl TableService>,
    sql: &str,
    params: &[Value],
) -> (ResultContext, Option<BridgeError>) {
    let mut out = None;
    db.run(sql, params, |ctx, err| out = Some((ctx.clone(), err))).await;
    out.expect("callback invoked")
}

fn names(rows: &[Row]) -> Vec<&str> {
    rows.iter().filter_map(|r| r["name"].as_str()).collect()
}

#[tokio::test]
async fn test_select_equality_matches_direct_filter() {
    let db = Database::new(fixture());
    let expected: Vec<Row> = db
        .bridge()
        .service()
        .rows("subscriptions")
        .await
        .into_iter()
        .filter(|r| r["user_id"] == json!(1) && r["currency"] == json!("USD"))
        .collect();

    let sequential = all(
        &db,
        "SELECT * FROM subscriptions WHERE user_id = ? AND currency = ?",
        &[json!(1), json!("USD")],
    )
    .await;
    let numbered = all(
        &db,
        "SELECT * FROM subscriptions WHERE currency = $2 AND user_id = $1",
        &[json!(1), json!("USD")],
    )
    .await;

    assert_eq!(sequential, expected);
    assert_eq!(numbered, expected);
}

#[tokio::test]
async fn test_select_ordering_and_paging() {
    let db = Database::new(fixture());
    let rows = all(
        &db,
        "SELECT name FROM subscriptions WHERE user_id = ?1 ORDER BY amount DESC LIMIT ?2 OFFSET ?3",
        &[json!(1), json!(2), json!(1)],
    )
    .await;
    assert_eq!(names(&rows), vec!["Netflix", "Gym"]);
}

#[tokio::test]
async fn test_dropped_condition_keeps_later_bindings_aligned() {
    let db = Database::new(fixture());
    let rows = all(
        &db,
        "SELECT name FROM subscriptions WHERE amount > ? AND user_id = ?",
        &[json!(60), json!(2)],
    )
    .await;
    assert_eq!(names(&rows), vec!["Hulu"]);
}

#[tokio::test]
async fn test_get_without_match_is_empty_not_error() {
    let db = Database::new(fixture());
    assert_eq!(get(&db, "SELECT * FROM subscriptions WHERE id = ?", &[json!(99)]).await, None);
    assert!(all(&db, "SELECT * FROM subscriptions WHERE user_id = 42", &[]).await.is_empty());
}

#[tokio::test]
async fn test_insert_builds_typed_value_map() {
    let stmt = restsql::parse(
        "INSERT INTO subscriptions (user_id, name, amount, active, cancelled_at) VALUES (?, ?, 9.99, true, NULL)",
        &[json!(3), json!("Disney+")],
    )
    .unwrap();
    let Statement::Insert(assignment) = stmt else {
        panic!("expected insert, got {:?}", stmt);
    };
    assert_eq!(assignment.values.len(), 5);
    assert_eq!(
        Value::Object(assignment.values),
        json!({"user_id": 3, "name": "Disney+", "amount": 9.99, "active": true, "cancelled_at": null})
    );
}

#[tokio::test]
async fn test_insert_then_select_by_last_id() {
    let db = Database::new(fixture());
    let (ctx, err) = run(
        &db,
        "INSERT INTO subscriptions (user_id, name, amount, billing_cycle) VALUES ($1, $2, $3, $4)",
        &[json!(3), json!("Disney+"), json!(9), json!("monthly")],
    )
    .await;
    assert!(err.is_none());
    assert_eq!(ctx.changes, 1);
    let id = ctx.last_id.clone().expect("insert reports lastID");

    let row = get(&db, "SELECT * FROM subscriptions WHERE id = ?", &[id.clone()])
        .await
        .expect("inserted row is readable");
    assert_eq!(row["id"], id);
    assert_eq!(row["name"], json!("Disney+"));
    assert_eq!(row["amount"], json!(9));
}

#[tokio::test]
async fn test_update_matching_nothing() {
    let db = Database::new(fixture());
    let (ctx, err) = run(
        &db,
        "UPDATE subscriptions SET amount = ? WHERE id = ?",
        &[json!(1), json!(999)],
    )
    .await;
    assert!(err.is_none());
    assert_eq!(ctx, ResultContext::default());
}

#[tokio::test]
async fn test_update_is_idempotent() {
    let db = Database::new(fixture());
    let sql = "UPDATE subscriptions SET name = ?, amount = ? WHERE id = ?";
    let params = [json!("Netflix Premium"), json!(120), json!(1)];

    let (first, _) = run(&db, sql, &params).await;
    let after_first = get(&db, "SELECT * FROM subscriptions WHERE id = 1", &[]).await;
    let (second, _) = run(&db, sql, &params).await;
    let after_second = get(&db, "SELECT * FROM subscriptions WHERE id = 1", &[]).await;

    assert_eq!(first.changes, 1);
    assert_eq!(second.changes, 1);
    assert_eq!(after_first, after_second);
    assert_eq!(after_second.unwrap()["amount"], json!(120));
}

#[tokio::test]
async fn test_delete_removes_only_targeted_rows() {
    let db = Database::new(fixture());
    let (ctx, err) = run(
        &db,
        "DELETE FROM subscriptions WHERE user_id = ? AND billing_cycle = ?",
        &[json!(1), json!("yearly")],
    )
    .await;
    assert!(err.is_none());
    assert_eq!(ctx.changes, 1);

    let remaining = all(&db, "SELECT name FROM subscriptions ORDER BY id", &[]).await;
    assert_eq!(names(&remaining), vec!["Netflix", "Gym", "Hulu"]);
}

#[tokio::test]
async fn test_unfiltered_delete_is_refused() {
    let db = Database::new(fixture());
    let (ctx, err) = run(&db, "DELETE FROM subscriptions WHERE amount > 0", &[]).await;
    assert!(matches!(err, Some(BridgeError::Parse { .. })));
    assert_eq!(ctx, ResultContext::default());
    assert_eq!(db.bridge().service().rows("subscriptions").await.len(), 4);
}

#[tokio::test]
async fn test_join_is_unsupported_with_statement_text() {
    let db = Database::new(fixture());
    let sql = "SELECT s.name FROM subscriptions s JOIN categories c ON c.id = s.category_id WHERE s.user_id = ?";
    let mut seen = None;
    db.all(sql, &[json!(1)], |err, rows| {
        assert!(rows.is_none());
        seen = err;
    })
    .await;

    match seen {
        Some(BridgeError::Parse { statement, params, .. }) => {
            assert_eq!(statement, sql);
            assert_eq!(params, vec![json!(1)]);
        }
        other => panic!("expected unsupported statement, got {:?}", other),
    }
}

#[tokio::test]
async fn test_schema_statements_are_noops() {
    let db = Database::new(fixture());
    for sql in [
        "CREATE TABLE IF NOT EXISTS budgets (id INTEGER PRIMARY KEY, amount REAL)",
        "ALTER TABLE subscriptions ADD COLUMN notes TEXT",
        "PRAGMA foreign_keys = ON",
        "BEGIN TRANSACTION",
        "COMMIT",
    ] {
        let (ctx, err) = run(&db, sql, &[]).await;
        assert!(err.is_none(), "{} failed", sql);
        assert_eq!(ctx.changes, 0);
    }
}

const MONTHLY_SPEND: &str = "SELECT SUM(CASE \
        WHEN billing_cycle = 'yearly' THEN amount / 12 \
        WHEN billing_cycle = 'half-yearly' THEN amount / 6 \
        WHEN billing_cycle = 'quarterly' THEN amount / 3 \
        WHEN billing_cycle = 'weekly' THEN amount * 4.33 \
        WHEN billing_cycle = 'daily' THEN amount * 30.44 \
        ELSE amount END) AS monthly_total \
        FROM subscriptions WHERE user_id = ? AND currency = ?";

#[tokio::test]
async fn test_monthly_spend_recomputed_locally() {
    let db = Database::new(fixture());
    let row = get(&db, MONTHLY_SPEND, &[json!(1), json!("USD")])
        .await
        .expect("aggregate yields one row");
    let total = row["monthly_total"].as_f64().unwrap();
    assert!((total - 416.5).abs() < 1e-6, "total was {}", total);
}

#[tokio::test]
async fn test_count_recomputed_locally() {
    let db = Database::new(fixture());
    let rows = all(&db, "SELECT COUNT(*) FROM subscriptions WHERE user_id = ?", &[json!(1)]).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["count"], json!(3));
}

#[tokio::test]
async fn test_unknown_aggregate_cannot_be_processed() {
    let db = Database::new(fixture());
    let mut seen = None;
    db.get(
        "SELECT AVG(amount) FROM subscriptions WHERE user_id = ?",
        &[json!(1)],
        |err, row| {
            assert!(row.is_none());
            seen = err;
        },
    )
    .await;
    assert!(matches!(seen, Some(BridgeError::UnsupportedAggregate { .. })));
}

async fn aggregate_error(db: &Database<impl TableService>, sql: &str, params: &[Value]) -> Option<BridgeError> {
    let mut seen = None;
    db.all(sql, params, |err, rows| {
        assert!(rows.is_none());
        seen = err;
    })
    .await;
    seen
}

#[tokio::test]
async fn test_aggregate_with_dropped_condition_is_not_recomputed() {
    let db = Database::new(fixture());
    let err = aggregate_error(
        &db,
        "SELECT COUNT(*) AS n FROM subscriptions WHERE user_id = ? AND amount > ?",
        &[json!(1), json!(500)],
    )
    .await;
    assert!(matches!(err, Some(BridgeError::UnsupportedAggregate { .. })));

    let narrowed = format!("{} AND next_billing_date < '2000-01-01'", MONTHLY_SPEND);
    let err = aggregate_error(&db, &narrowed, &[json!(1), json!("USD")]).await;
    assert!(matches!(err, Some(BridgeError::UnsupportedAggregate { .. })));
}

#[tokio::test]
async fn test_count_of_column_is_not_a_row_count() {
    let db = Database::new(MemoryService::new().with_table(
        "subscriptions",
        vec![
            json!({"id": 1, "user_id": 1, "category_id": null}),
            json!({"id": 2, "user_id": 1, "category_id": 5}),
            json!({"id": 3, "user_id": 1, "category_id": null}),
        ],
    ));
    for sql in [
        "SELECT COUNT(category_id) AS n FROM subscriptions WHERE user_id = ?",
        "SELECT COUNT(DISTINCT category_id) AS n FROM subscriptions WHERE user_id = ?",
    ] {
        let err = aggregate_error(&db, sql, &[json!(1)]).await;
        assert!(matches!(err, Some(BridgeError::UnsupportedAggregate { .. })), "{}", sql);
    }

    let rows = all(&db, "SELECT COUNT(1) AS n FROM subscriptions WHERE user_id = ?", &[json!(1)]).await;
    assert_eq!(rows[0]["n"], json!(3));
}

#[tokio::test]
async fn test_non_now_call_values_are_rejected() {
    let db = Database::new(fixture());
    let (ctx, err) = run(
        &db,
        "INSERT INTO subscriptions (name, next_billing_date) VALUES (?, date(?, '+1 month'))",
        &[json!("Netflix"), json!("2024-01-31")],
    )
    .await;
    assert!(matches!(err, Some(BridgeError::Parse { .. })));
    assert_eq!(ctx, ResultContext::default());

    let (_, err) = run(
        &db,
        "UPDATE subscriptions SET name = ? WHERE name = lower(?)",
        &[json!("Renamed"), json!("NETFLIX")],
    )
    .await;
    assert!(matches!(err, Some(BridgeError::Parse { .. })));
    assert_eq!(db.bridge().service().rows("subscriptions").await.len(), 4);
    assert!(all(&db, "SELECT * FROM subscriptions WHERE name = 'Renamed'", &[]).await.is_empty());
}

/// A backend whose raw-SQL endpoint works.
struct RpcService {
    inner: MemoryService,
    calls: Mutex<Vec<String>>,
}

impl TableService for RpcService {
    async fn select(&self, query: TableQuery) -> ServiceResult<Vec<Row>> {
        self.inner.select(query).await
    }

    async fn insert(&self, table: &str, values: Row) -> ServiceResult<Option<Row>> {
        self.inner.insert(table, values).await
    }

    async fn update(&self, table: &str, filters: &[Filter], values: Row) -> ServiceResult<UpdateOutcome> {
        self.inner.update(table, filters, values).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> ServiceResult<Option<u64>> {
        self.inner.delete(table, filters).await
    }

    async fn execute_sql(&self, sql: &str) -> ServiceResult<Vec<Row>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(sql.to_string());
        }
        let mut row = Row::new();
        row.insert("monthly_total".into(), json!(1.5));
        Ok(vec![row])
    }
}

#[tokio::test]
async fn test_aggregate_prefers_rpc_tier() {
    let db = Database::new(RpcService {
        inner: fixture(),
        calls: Mutex::new(Vec::new()),
    });
    let row = get(&db, MONTHLY_SPEND, &[json!(1), json!("USD")]).await.unwrap();
    assert_eq!(row["monthly_total"], json!(1.5));

    let calls = db.bridge().service().calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].ends_with("WHERE user_id = 1 AND currency = 'USD'"));
}

#[tokio::test]
async fn test_close_succeeds() {
    let db = Database::new(fixture());
    let mut result = None;
    db.close(Some(|err: Option<BridgeError>| result = Some(err.is_none())))
        .await;
    assert_eq!(result, Some(true));
}
