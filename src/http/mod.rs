//! The node's HTTP API (spec.md §4.7): read/write SQL, cluster join, and
//! a metrics snapshot. Routing follows the teacher's `Router::new()` +
//! `.with_state(...)` shape in `api/rest_api.rs`, trimmed to the plain
//! `axum::Json`/string-body extractors this surface actually needs (no
//! Swagger, auth middleware, or rate limiting — spec.md §1 puts
//! authentication and credential handling out of scope).

mod encoding;

use crate::node::Node;
use crate::store::{ExecuteRequest, Statement};
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use encoding::WireQueryRows;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/db", get(read_handler).post(write_handler))
        .route("/join", post(join_handler))
        .route("/statistics", get(statistics_handler))
        .with_state(node)
}

fn has_flag(query: &Option<String>, flag: &str) -> bool {
    query
        .as_deref()
        .map(|q| q.split('&').any(|pair| pair.split('=').next().unwrap_or("") == flag))
        .unwrap_or(false)
}

/// Formats a `Duration` the way Go's `time.Duration.String()` does for
/// the sub-second/second ranges this crate's operations fall into —
/// close enough for the `time` field's human-readable role; nothing
/// parses it back.
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 1e-6 {
        format!("{}ns", d.as_nanos())
    } else if secs < 1e-3 {
        format!("{:.3}µs", secs * 1e6)
    } else if secs < 1.0 {
        format!("{:.3}ms", secs * 1e3)
    } else {
        format!("{secs:.3}s")
    }
}

#[derive(Debug, Serialize)]
struct Failure {
    sql: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct ExecuteApiResponse {
    time: String,
    failures: Vec<Failure>,
}

#[derive(Debug, Serialize)]
struct QueryApiResponse {
    time: String,
    failures: Vec<Failure>,
    rows: WireQueryRows,
}

fn render_json<T: Serialize>(value: &T, pretty: bool) -> Response {
    let body = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    match body {
        Ok(json) => (StatusCode::OK, [("content-type", "application/json")], json).into_response(),
        // Harmonised to 500 for both read and write paths (spec.md
        // §4.7's open question): a marshal failure is server-side.
        Err(e) => plain_error(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to marshal response: {e}")),
    }
}

fn plain_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, message.into()).into_response()
}

/// `POST /db` — newline-separated SQL statements, each submitted through
/// the replicated log unless `?transaction` groups them into one atomic
/// batch (spec.md §4.7).
async fn write_handler(State(node): State<Arc<Node>>, RawQuery(query): RawQuery, body: String) -> Response {
    let pretty = has_flag(&query, "pretty");
    let transaction = has_flag(&query, "transaction");

    let statements: Vec<String> = body.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect();
    if statements.is_empty() {
        return plain_error(StatusCode::BAD_REQUEST, "request body must contain at least one SQL statement");
    }

    let start = Instant::now();
    let mut failures = Vec::new();

    if transaction {
        let req = ExecuteRequest {
            statements: statements.iter().cloned().map(Statement::from).collect(),
            transaction: true,
        };
        if let Err(e) = node.submit_execute(req).await {
            failures.push(Failure { sql: statements.join("\n"), error: e.to_string() });
        }
    } else {
        // Not atomic: submitted in order, and a failure stops submission
        // of the statements after it in this batch (spec.md §5).
        for sql in &statements {
            let req = ExecuteRequest { statements: vec![Statement::from(sql.clone())], transaction: false };
            if let Err(e) = node.submit_execute(req).await {
                failures.push(Failure { sql: sql.clone(), error: e.to_string() });
                break;
            }
        }
    }

    render_json(&ExecuteApiResponse { time: format_duration(start.elapsed()), failures }, pretty)
}

/// `GET /db` — a single SQL query, executed locally and never through
/// the log (spec.md §4.7).
async fn read_handler(State(node): State<Arc<Node>>, RawQuery(query): RawQuery, body: String) -> Response {
    let pretty = has_flag(&query, "pretty");
    let sql = body.trim();
    if sql.is_empty() {
        return plain_error(StatusCode::BAD_REQUEST, "request body must contain a SQL query");
    }

    let start = Instant::now();
    let mut failures = Vec::new();
    let rows = match node.query_local(&Statement::from(sql)).await {
        Ok(rows) => rows.into(),
        Err(e) => {
            failures.push(Failure { sql: sql.to_string(), error: e.to_string() });
            WireQueryRows::from(crate::store::QueryRows::default())
        }
    };

    render_json(&QueryApiResponse { time: format_duration(start.elapsed()), failures, rows }, pretty)
}

#[derive(Debug, Deserialize)]
struct JoinRequest {
    name: String,
    #[serde(rename = "connectionString")]
    connection_string: String,
}

/// `POST /join` — submits an `AddPeer` command through the log
/// (spec.md §4.7).
async fn join_handler(State(node): State<Arc<Node>>, Json(req): Json<JoinRequest>) -> Response {
    match node.join_peer(req.name, req.connection_string).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => plain_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `GET /statistics` — a JSON snapshot of the metrics registry
/// (spec.md §4.7).
async fn statistics_handler(State(node): State<Arc<Node>>) -> Response {
    render_json(&node.metrics.snapshot(), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_node() -> Arc<Node> {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        std::mem::forget(dir);
        Node::bootstrap(config).await.unwrap()
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let node = test_node().await;
        let app = router(node);

        let write_req = Request::post("/db")
            .body(Body::from("CREATE TABLE t(x INT)\nINSERT INTO t VALUES(1)"))
            .unwrap();
        let resp = app.clone().oneshot(write_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let read_req = Request::get("/db").body(Body::from("SELECT x FROM t")).unwrap();
        let resp = app.oneshot(read_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["rows"]["values"], serde_json::json!([[1]]));
    }

    #[tokio::test]
    async fn empty_write_body_is_rejected() {
        let node = test_node().await;
        let app = router(node);
        let req = Request::post("/db").body(Body::from("")).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn transaction_failure_reports_one_failure_and_rolls_back() {
        let node = test_node().await;
        let app = router(node.clone());

        let setup = Request::post("/db").body(Body::from("CREATE TABLE t(x INT)\nINSERT INTO t VALUES(1)")).unwrap();
        app.clone().oneshot(setup).await.unwrap();

        let tx_req = Request::post("/db?transaction").body(Body::from("INSERT INTO t VALUES(2)\nNOT_SQL")).unwrap();
        let resp = app.clone().oneshot(tx_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["failures"].as_array().unwrap().len(), 1);

        let count_req = Request::get("/db").body(Body::from("SELECT COUNT(*) FROM t")).unwrap();
        let resp = app.oneshot(count_req).await.unwrap();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["rows"]["values"], serde_json::json!([[1]]));
    }

    #[tokio::test]
    async fn statistics_reports_counters() {
        let node = test_node().await;
        let app = router(node);
        let req = Request::get("/statistics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json.get("query.received").is_some());
    }
}
