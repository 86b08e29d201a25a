//! `LocalLog`: a single-node `ReplicatedLog` that appends committed
//! commands to `<data-dir>/log` as newline-delimited JSON and applies
//! them sequentially through a caller-supplied apply function.

use super::{Command, ReplicatedLog};
use crate::error::Result;
use crate::store::ExecuteResult;
use crate::NodeAddr;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Applies one committed [`Command`] against whatever backs the node
/// (the statement executor, for SQL commands; the peer registry, for
/// `AddPeer`). Supplied by the node at construction so the log itself
/// stays ignorant of what a "statement executor" or "peer registry" is.
pub type ApplyFn = Arc<dyn Fn(Command) -> BoxFuture<'static, Result<Vec<ExecuteResult>>> + Send + Sync>;

struct Inner {
    file: File,
    len: usize,
}

/// Appends committed commands to a flat file and replays them on open.
/// A single `tokio::sync::Mutex` serialises append + apply as one
/// critical section, so apply is never concurrent with itself on this
/// node (spec.md §4.6, §5) and the log order is exactly the apply order.
pub struct LocalLog {
    inner: Mutex<Inner>,
    apply: ApplyFn,
    leader: bool,
}

impl LocalLog {
    /// Opens (creating if absent) `<data_dir>/log`, replaying any
    /// existing entries through `apply` in file order before returning.
    /// Replayed results are discarded — no caller is waiting on them
    /// (spec.md §4.6).
    pub async fn open(data_dir: &Path, apply: ApplyFn) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join("log");

        let mut len = 0usize;
        if let Ok(existing) = File::open(&path).await {
            let mut lines = BufReader::new(existing).lines();
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                let command: Command = serde_json::from_str(&line)?;
                apply(command).await?;
                len += 1;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self { inner: Mutex::new(Inner { file, len }), apply, leader: true })
    }
}

#[async_trait]
impl ReplicatedLog for LocalLog {
    async fn do_command(&self, command: Command) -> Result<Vec<ExecuteResult>> {
        let mut guard = self.inner.lock().await;
        let line = serde_json::to_string(&command)?;
        guard.file.write_all(line.as_bytes()).await?;
        guard.file.write_all(b"\n").await?;
        guard.file.flush().await?;
        guard.len += 1;
        // Held for the whole call: apply must run in the order entries
        // were appended, and never overlap itself on this node.
        (self.apply)(command).await
    }

    async fn is_empty(&self) -> bool {
        self.inner.lock().await.len == 0
    }

    async fn is_leader(&self) -> bool {
        self.leader
    }

    async fn leader_addr(&self) -> Option<NodeAddr> {
        None
    }

    async fn shutdown(&self) {
        let guard = self.inner.lock().await;
        if let Err(e) = guard.file.sync_all().await {
            tracing::warn!("failed to sync log file on shutdown: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryEngine, Statement, StatementExecutor};
    use std::sync::Arc as StdArc;

    fn apply_fn(engine: StdArc<InMemoryEngine>) -> ApplyFn {
        Arc::new(move |command: Command| {
            let engine = engine.clone();
            Box::pin(async move {
                match command {
                    Command::ExecuteOne { sql } => Ok(vec![engine.execute_one(&Statement::from(sql)).await?]),
                    Command::ExecuteTransaction { sqls } => {
                        let stmts: Vec<Statement> = sqls.into_iter().map(Statement::from).collect();
                        engine.execute_transaction(&stmts).await
                    }
                    Command::AddPeer { .. } => Ok(vec![]),
                }
            })
        })
    }

    #[tokio::test]
    async fn starts_empty_and_tracks_commits() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StdArc::new(InMemoryEngine::new());
        let log = LocalLog::open(dir.path(), apply_fn(engine)).await.unwrap();
        assert!(log.is_empty().await);
        log.do_command(Command::ExecuteOne { sql: "CREATE TABLE t(x INT)".into() }).await.unwrap();
        assert!(!log.is_empty().await);
    }

    #[tokio::test]
    async fn replays_committed_entries_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StdArc::new(InMemoryEngine::new());
        {
            let log = LocalLog::open(dir.path(), apply_fn(engine.clone())).await.unwrap();
            log.do_command(Command::ExecuteOne { sql: "CREATE TABLE t(x INT)".into() }).await.unwrap();
            log.do_command(Command::ExecuteOne { sql: "INSERT INTO t VALUES(1)".into() }).await.unwrap();
        }

        let engine2 = StdArc::new(InMemoryEngine::new());
        let log2 = LocalLog::open(dir.path(), apply_fn(engine2.clone())).await.unwrap();
        assert!(!log2.is_empty().await);
        let rows = engine2.query(&Statement::from("SELECT x FROM t")).await.unwrap();
        assert_eq!(rows.values.len(), 1);
    }

    #[tokio::test]
    async fn is_always_its_own_leader_with_no_peer() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StdArc::new(InMemoryEngine::new());
        let log = LocalLog::open(dir.path(), apply_fn(engine)).await.unwrap();
        assert!(log.is_leader().await);
        assert_eq!(log.leader_addr().await, None);
    }
}
