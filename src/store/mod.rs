//! The statement executor: the crate's one concrete "embedded SQL engine".
//!
//! spec.md treats the SQL engine as an out-of-scope external collaborator,
//! consumed only through the [`StatementExecutor`] trait. [`InMemoryEngine`]
//! is a minimal, single-writer implementation — enough SQL to make the
//! replicated-log pipeline and HTTP surface observable end to end, not a
//! competitor to a real engine.

mod engine;
mod value;

pub use engine::InMemoryEngine;
pub use value::Value;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single bound SQL statement with its typed parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Statement {
    pub sql: String,
    #[serde(default)]
    pub parameters: Vec<Value>,
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement { sql: sql.to_string(), parameters: Vec::new() }
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement { sql, parameters: Vec::new() }
    }
}

/// Engine-level request carried inside `InterNodeCommand::Execute`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecuteRequest {
    pub statements: Vec<Statement>,
    pub transaction: bool,
}

/// Engine-level request carried inside `InterNodeCommand::Query`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryRequest {
    pub statements: Vec<Statement>,
}

/// `{ last_insert_id, rows_affected, error?, time }` — omit-empty at the
/// JSON encoding layer, not here; this struct always carries every field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecuteResult {
    pub last_insert_id: i64,
    pub rows_affected: i64,
    pub error: Option<String>,
    pub time: f64,
}

/// `{ columns, types, values, error?, time }`.
///
/// `values[i] == None` and `values[i] == Some(vec![])` are distinct: the
/// former serialises as JSON `null` (§4.8), the latter as `[]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub types: Vec<String>,
    pub values: Vec<Option<Vec<Value>>>,
    pub error: Option<String>,
    pub time: f64,
}

/// The narrow interface the replicated log and HTTP layer use to reach the
/// embedded SQL engine. Swappable so unit tests or a different engine can
/// stand in without touching the cluster transport or HTTP code.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Executes one SQL statement for its side effect. The statement's own
    /// `ExecuteResult` is still returned to the caller (callers that don't
    /// need it, like log `apply`, simply discard it).
    async fn execute_one(&self, stmt: &Statement) -> Result<ExecuteResult>;

    /// Executes every statement inside a single SQL transaction. If any
    /// statement fails the whole batch rolls back and no side effect
    /// persists; the returned `Result` carries the failure.
    async fn execute_transaction(&self, stmts: &[Statement]) -> Result<Vec<ExecuteResult>>;

    /// Runs a read-only query. Never touches the replicated log.
    async fn query(&self, stmt: &Statement) -> Result<QueryRows>;
}
