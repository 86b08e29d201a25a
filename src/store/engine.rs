//! A minimal, single-writer, in-memory SQL engine.
//!
//! Parses with the teacher's `sqlparser` dependency (see `src/parser/mod.rs`
//! in the teacher for the AST shapes this mirrors) and stores rows as plain
//! `Vec<Value>` behind a `parking_lot::Mutex`. Supports exactly the SQL the
//! scenarios in spec.md §8 exercise: `CREATE TABLE`, `INSERT ... VALUES`,
//! `SELECT` with a column list or `*`, an optional single equality `WHERE`,
//! `COUNT(*)`, and `DELETE FROM ... WHERE`.

use super::value::Value as DbValue;
use super::{ExecuteResult, QueryRows, Statement, StatementExecutor};
use crate::error::{DbError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Query, SelectItem,
    SetExpr, Statement as Ast, TableFactor, Value as SqlValue, ValueWithSpan,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<DbValue>>,
}

/// In-memory relational store behind the [`StatementExecutor`] trait.
pub struct InMemoryEngine {
    tables: Mutex<HashMap<String, Table>>,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self { tables: Mutex::new(HashMap::new()) }
    }

    fn parse(sql: &str) -> Result<Ast> {
        let dialect = GenericDialect {};
        let mut stmts = Parser::parse_sql(&dialect, sql).map_err(|e| DbError::SqlParse(e.to_string()))?;
        if stmts.len() != 1 {
            return Err(DbError::SqlParse("expected exactly one statement".to_string()));
        }
        Ok(stmts.remove(0))
    }

    fn apply_one(tables: &mut HashMap<String, Table>, sql: &str) -> Result<ExecuteResult> {
        let start = Instant::now();
        let ast = Self::parse(sql)?;
        let result = match ast {
            Ast::CreateTable { name, columns, .. } => {
                let name = name.to_string();
                if tables.contains_key(&name) {
                    return Err(DbError::Execution(format!("table {name} already exists")));
                }
                let columns = columns.iter().map(|c| c.name.to_string()).collect();
                tables.insert(name, Table { columns, rows: Vec::new() });
                ExecuteResult { last_insert_id: 0, rows_affected: 0, error: None, time: 0.0 }
            }
            Ast::Insert { table_name, source, .. } => {
                let name = table_name.to_string();
                let table = tables
                    .get_mut(&name)
                    .ok_or_else(|| DbError::Execution(format!("no such table: {name}")))?;
                let rows = extract_insert_rows(source.as_deref())?;
                let mut affected = 0i64;
                for row in rows {
                    table.rows.push(row);
                    affected += 1;
                }
                ExecuteResult {
                    last_insert_id: table.rows.len() as i64,
                    rows_affected: affected,
                    error: None,
                    time: 0.0,
                }
            }
            Ast::Delete { from, selection, .. } => {
                let first = from.first().ok_or_else(|| DbError::SqlParse("DELETE without table".to_string()))?;
                let name = match &first.relation {
                    TableFactor::Table { name, .. } => name.to_string(),
                    _ => return Err(DbError::SqlParse("unsupported DELETE target".to_string())),
                };
                let table = tables
                    .get_mut(&name)
                    .ok_or_else(|| DbError::Execution(format!("no such table: {name}")))?;
                let before = table.rows.len();
                if let Some(pred) = &selection {
                    let cols = table.columns.clone();
                    table.rows.retain(|row| !row_matches(&cols, row, pred));
                } else {
                    table.rows.clear();
                }
                let affected = (before - table.rows.len()) as i64;
                ExecuteResult { last_insert_id: 0, rows_affected: affected, error: None, time: 0.0 }
            }
            other => {
                return Err(DbError::SqlParse(format!("unsupported statement for execute: {other}")))
            }
        };
        let _ = start.elapsed();
        Ok(result)
    }

    fn run_query(tables: &HashMap<String, Table>, sql: &str) -> Result<QueryRows> {
        let ast = Self::parse(sql)?;
        let query = match ast {
            Ast::Query(q) => q,
            other => return Err(DbError::SqlParse(format!("unsupported statement for query: {other}"))),
        };
        let select = match *query.body {
            SetExpr::Select(s) => s,
            _ => return Err(DbError::SqlParse("unsupported query body".to_string())),
        };
        let from = select
            .from
            .first()
            .ok_or_else(|| DbError::SqlParse("no table specified".to_string()))?;
        let table_name = match &from.relation {
            TableFactor::Table { name, .. } => name.to_string(),
            _ => return Err(DbError::SqlParse("unsupported FROM clause".to_string())),
        };
        let table = tables
            .get(&table_name)
            .ok_or_else(|| DbError::Execution(format!("no such table: {table_name}")))?;

        if let Some(count_alias) = count_star_projection(&select.projection) {
            let n = match &select.selection {
                Some(pred) => table.rows.iter().filter(|r| row_matches(&table.columns, r, pred)).count(),
                None => table.rows.len(),
            };
            return Ok(QueryRows {
                columns: vec![count_alias],
                types: vec!["integer".to_string()],
                values: vec![Some(vec![DbValue::Integer(n as i64)])],
                error: None,
                time: 0.0,
            });
        }

        let column_indices = projection_indices(&table.columns, &select.projection)?;
        let mut values = Vec::new();
        for row in &table.rows {
            if let Some(pred) = &select.selection {
                if !row_matches(&table.columns, row, pred) {
                    continue;
                }
            }
            let projected: Vec<DbValue> = column_indices.iter().map(|&i| row[i].clone()).collect();
            values.push(Some(projected));
        }
        let columns: Vec<String> = column_indices.iter().map(|&i| table.columns[i].clone()).collect();
        Ok(QueryRows {
            types: vec!["text".to_string(); columns.len()],
            columns,
            values,
            error: None,
            time: 0.0,
        })
    }
}

#[async_trait]
impl StatementExecutor for InMemoryEngine {
    async fn execute_one(&self, stmt: &Statement) -> Result<ExecuteResult> {
        let mut tables = self.tables.lock();
        Self::apply_one(&mut tables, &stmt.sql)
    }

    async fn execute_transaction(&self, stmts: &[Statement]) -> Result<Vec<ExecuteResult>> {
        let mut tables = self.tables.lock();
        // Snapshot so a mid-batch failure leaves no side effect, per spec.md
        // §4.6's transaction-atomicity invariant.
        let snapshot = tables.clone();
        let mut results = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            match Self::apply_one(&mut tables, &stmt.sql) {
                Ok(r) => results.push(r),
                Err(e) => {
                    *tables = snapshot;
                    return Err(e);
                }
            }
        }
        Ok(results)
    }

    async fn query(&self, stmt: &Statement) -> Result<QueryRows> {
        let tables = self.tables.lock();
        Self::run_query(&tables, &stmt.sql)
    }
}

fn extract_insert_rows(source: Option<&Query>) -> Result<Vec<Vec<DbValue>>> {
    let source = source.ok_or_else(|| DbError::SqlParse("INSERT without VALUES".to_string()))?;
    let values = match &*source.body {
        SetExpr::Values(v) => v,
        _ => return Err(DbError::SqlParse("INSERT source must be VALUES".to_string())),
    };
    let mut rows = Vec::with_capacity(values.rows.len());
    for row in &values.rows {
        let mut out = Vec::with_capacity(row.len());
        for expr in row {
            out.push(expr_to_value(expr)?);
        }
        rows.push(out);
    }
    Ok(rows)
}

fn expr_to_value(expr: &Expr) -> Result<DbValue> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => sql_value_to_db(value),
        Expr::UnaryOp { op: sqlparser::ast::UnaryOperator::Minus, expr } => match expr_to_value(expr)? {
            DbValue::Integer(i) => Ok(DbValue::Integer(-i)),
            DbValue::Float(f) => Ok(DbValue::Float(-f)),
            other => Ok(other),
        },
        other => Err(DbError::SqlParse(format!("unsupported literal: {other}"))),
    }
}

fn sql_value_to_db(v: &SqlValue) -> Result<DbValue> {
    match v {
        SqlValue::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(DbValue::Integer(i))
            } else {
                n.parse::<f64>().map(DbValue::Float).map_err(|_| DbError::SqlParse(format!("bad number: {n}")))
            }
        }
        SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => Ok(DbValue::Text(s.clone())),
        SqlValue::Boolean(b) => Ok(DbValue::Bool(*b)),
        SqlValue::Null => Ok(DbValue::Null),
        other => Err(DbError::SqlParse(format!("unsupported SQL literal: {other}"))),
    }
}

fn count_star_projection(projection: &[SelectItem]) -> Option<String> {
    if projection.len() != 1 {
        return None;
    }
    let (expr, alias) = match &projection[0] {
        SelectItem::UnnamedExpr(e) => (e, None),
        SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.to_string())),
        _ => return None,
    };
    let func = match expr {
        Expr::Function(f) => f,
        _ => return None,
    };
    if !func.name.to_string().eq_ignore_ascii_case("count") {
        return None;
    }
    let is_star = matches!(
        &func.args,
        FunctionArguments::List(list)
            if list.args.len() == 1 && matches!(list.args[0], FunctionArg::Unnamed(FunctionArgExpr::Wildcard))
    );
    if !is_star {
        return None;
    }
    Some(alias.unwrap_or_else(|| "count(*)".to_string()))
}

fn projection_indices(columns: &[String], projection: &[SelectItem]) -> Result<Vec<usize>> {
    let mut out = Vec::new();
    for item in projection {
        match item {
            SelectItem::Wildcard(_) => out.extend(0..columns.len()),
            SelectItem::UnnamedExpr(Expr::Identifier(ident)) => {
                let name = ident.value.clone();
                let idx = columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(&name))
                    .ok_or_else(|| DbError::Execution(format!("no such column: {name}")))?;
                out.push(idx);
            }
            other => return Err(DbError::SqlParse(format!("unsupported projection item: {other:?}"))),
        }
    }
    Ok(out)
}

fn row_matches(columns: &[String], row: &[DbValue], pred: &Expr) -> bool {
    match pred {
        Expr::BinaryOp { left, op: BinaryOperator::Eq, right } => {
            let col_val = |e: &Expr| match e {
                Expr::Identifier(ident) => {
                    columns.iter().position(|c| c.eq_ignore_ascii_case(&ident.value)).map(|i| row[i].clone())
                }
                Expr::Value(ValueWithSpan { value, .. }) => sql_value_to_db(value).ok(),
                _ => None,
            };
            match (col_val(left), col_val(right)) {
                (Some(a), Some(b)) => values_eq(&a, &b),
                _ => false,
            }
        }
        Expr::BinaryOp { left, op: BinaryOperator::And, right } => {
            row_matches(columns, row, left) && row_matches(columns, row, right)
        }
        _ => false,
    }
}

fn values_eq(a: &DbValue, b: &DbValue) -> bool {
    use DbValue::*;
    match (a, b) {
        (Integer(x), Integer(y)) => x == y,
        (Float(x), Float(y)) => x == y,
        (Integer(x), Float(y)) | (Float(y), Integer(x)) => *x as f64 == *y,
        (Text(x), Text(y)) => x == y,
        (Bool(x), Bool(y)) => x == y,
        (Null, Null) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_insert_select_roundtrip() {
        let engine = InMemoryEngine::new();
        engine.execute_one(&"CREATE TABLE t(x INT)".into()).await.unwrap();
        engine.execute_one(&"INSERT INTO t VALUES(1)".into()).await.unwrap();
        let rows = engine.query(&"SELECT x FROM t".into()).await.unwrap();
        assert_eq!(rows.values, vec![Some(vec![DbValue::Integer(1)])]);
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_failure() {
        let engine = InMemoryEngine::new();
        engine.execute_one(&"CREATE TABLE t(x INT)".into()).await.unwrap();
        engine.execute_one(&"INSERT INTO t VALUES(1)".into()).await.unwrap();
        let stmts = vec![Statement::from("INSERT INTO t VALUES(2)"), Statement::from("NOT_SQL")];
        assert!(engine.execute_transaction(&stmts).await.is_err());
        let rows = engine.query(&"SELECT COUNT(*) FROM t".into()).await.unwrap();
        assert_eq!(rows.values, vec![Some(vec![DbValue::Integer(1)])]);
    }

    #[tokio::test]
    async fn delete_with_predicate() {
        let engine = InMemoryEngine::new();
        engine.execute_one(&"CREATE TABLE t(x INT)".into()).await.unwrap();
        engine.execute_one(&"INSERT INTO t VALUES(1)".into()).await.unwrap();
        engine.execute_one(&"INSERT INTO t VALUES(2)".into()).await.unwrap();
        engine.execute_one(&"DELETE FROM t WHERE x = 1".into()).await.unwrap();
        let rows = engine.query(&"SELECT x FROM t".into()).await.unwrap();
        assert_eq!(rows.values, vec![Some(vec![DbValue::Integer(2)])]);
    }
}
