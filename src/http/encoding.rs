//! Result encoding: stable, omit-empty JSON wire shapes for
//! [`ExecuteResult`]/[`QueryRows`] (spec.md §4.8).
//!
//! `crate::store::ExecuteResult`/`QueryRows` always carry every field —
//! the omit-empty behaviour lives here, at the JSON encoding boundary,
//! not on the store's own types (see `src/store/mod.rs`'s doc comment).

use crate::store::{ExecuteResult, QueryRows, Value};
use serde::{Serialize, Serializer};

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

/// `{ last_insert_id, rows_affected, error?, time }` with zero-valued
/// fields omitted (spec.md §4.8, invariant 3: `Result{0,0,"",0}` → `{}`).
#[derive(Debug, Serialize)]
pub struct WireExecuteResult {
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub last_insert_id: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub rows_affected: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub time: f64,
}

impl From<ExecuteResult> for WireExecuteResult {
    fn from(r: ExecuteResult) -> Self {
        Self { last_insert_id: r.last_insert_id, rows_affected: r.rows_affected, error: r.error, time: r.time }
    }
}

/// `{ columns, types, values, error?, time }` with empty arrays and a
/// zero `time` omitted (spec.md §4.8, invariant 3: an empty `QueryRows`
/// marshals to `{}`).
///
/// `values[i]` renders a null row (`None`) and a row with an empty
/// parameter list (`Some(vec![])`) identically as JSON `null` — spec.md
/// §4.8 invariant 4 — rather than the latter rendering as `[]`.
#[derive(Debug, Serialize)]
pub struct WireQueryRows {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", serialize_with = "serialize_values")]
    pub values: Vec<Option<Vec<Value>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub time: f64,
}

fn serialize_values<S>(values: &[Option<Vec<Value>>], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let normalised: Vec<Option<&Vec<Value>>> =
        values.iter().map(|v| v.as_ref().filter(|row| !row.is_empty())).collect();
    normalised.serialize(serializer)
}

impl From<QueryRows> for WireQueryRows {
    fn from(r: QueryRows) -> Self {
        Self { columns: r.columns, types: r.types, values: r.values, error: r.error, time: r.time }
    }
}
