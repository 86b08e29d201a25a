//! The node: wires the statement executor, replicated log, cluster
//! client, and metrics registry together and exposes the operations the
//! HTTP layer and cluster service call into (spec.md §3 "Lifecycle", §9
//! "HTTP handler coupling to the log").

use crate::cluster::Client as ClusterClient;
use crate::config::Config;
use crate::error::{DbError, Result};
use crate::metrics::Metrics;
use crate::replication::{ApplyFn, Command, LocalLog, ReplicatedLog};
use crate::store::{ExecuteRequest, ExecuteResult, InMemoryEngine, QueryRows, Statement, StatementExecutor};
use crate::NodeAddr;
use dashmap::DashMap;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Default round-trip budget for a forwarded write/read when the HTTP
/// layer doesn't have a more specific caller-supplied timeout.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Node {
    pub name: String,
    pub config: Config,
    pub executor: Arc<dyn StatementExecutor>,
    pub log: Arc<dyn ReplicatedLog>,
    pub metrics: Arc<Metrics>,
    pub cluster_client: Arc<ClusterClient>,
    /// Peer name -> HTTP address, populated by `AddPeer` commands as
    /// they're applied (spec.md §3, "Peer pool map" is the cluster
    /// client's concern; this is the node's own membership view).
    pub peers: Arc<DashMap<String, NodeAddr>>,
}

impl Node {
    /// Boots a node: loads or creates its persisted name, opens (and
    /// replays) its local log, and runs the three-way bootstrap branch
    /// from spec.md §4.6 (`--join`, self-bootstrap, or silent recovery).
    pub async fn bootstrap(config: Config) -> Result<Arc<Node>> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let name = load_or_create_name(&config.data_dir).await?;

        let executor: Arc<dyn StatementExecutor> = Arc::new(InMemoryEngine::new());
        let peers: Arc<DashMap<String, NodeAddr>> = Arc::new(DashMap::new());
        let apply = build_apply_fn(executor.clone(), peers.clone());
        let log: Arc<dyn ReplicatedLog> = Arc::new(LocalLog::open(&config.data_dir, apply).await?);

        let cluster_client = Arc::new(match (&config.tls_cert, &config.tls_key) {
            (Some(cert_path), Some(_)) => {
                let cert_pem = tokio::fs::read(cert_path).await?;
                ClusterClient::new_tls(
                    config.pool_initial,
                    config.pool_max,
                    config.dial_timeout,
                    &cert_pem,
                    config.tls_insecure_skip_verify,
                )?
            }
            _ => ClusterClient::new(config.pool_initial, config.pool_max, config.dial_timeout),
        });

        match &config.join {
            Some(leader) => {
                if !log.is_empty().await {
                    return Err(DbError::Configuration("Cannot join with an existing log".to_string()));
                }
                join_cluster(leader, &name, &config.http_addr).await?;
            }
            None => {
                if log.is_empty().await {
                    log.do_command(Command::AddPeer { name: name.clone(), address: config.http_addr.clone() }).await?;
                }
                // Else: an existing non-empty log with no `--join` is a
                // silent recovery; `LocalLog::open` already replayed it.
            }
        }

        Ok(Arc::new(Node { name, config, executor, log, metrics: Arc::new(Metrics::new()), cluster_client, peers }))
    }

    /// Submits a write. Runs it through the local log directly when this
    /// node is the leader; otherwise forwards to the known leader over
    /// the cluster transport (spec.md §1, §4.6).
    pub async fn submit_execute(&self, req: ExecuteRequest) -> Result<Vec<ExecuteResult>> {
        self.metrics.execute_received.inc();
        if req.transaction {
            self.metrics.execute_tx_received.inc();
        }

        let result = if self.log.is_leader().await {
            let command = if req.transaction {
                Command::ExecuteTransaction { sqls: req.statements.iter().map(|s| s.sql.clone()).collect() }
            } else {
                let sql = req
                    .statements
                    .first()
                    .map(|s| s.sql.clone())
                    .ok_or_else(|| DbError::InvalidInput("no statement to execute".to_string()))?;
                Command::ExecuteOne { sql }
            };
            self.log.do_command(command).await
        } else {
            match self.log.leader_addr().await {
                Some(leader) => self.cluster_client.execute(req, &leader, DEFAULT_FORWARD_TIMEOUT).await,
                None => Err(DbError::Log("no known leader to forward the write to".to_string())),
            }
        };

        match &result {
            Ok(_) => self.metrics.execute_success.inc(),
            Err(_) => self.metrics.execute_fail.inc(),
        }
        result
    }

    /// Runs a read-only query locally — queries never traverse the log
    /// (spec.md §4.7, "`GET /db` ... Executed locally (never through the
    /// log)").
    pub async fn query_local(&self, stmt: &Statement) -> Result<QueryRows> {
        self.metrics.query_received.inc();
        let result = self.executor.query(stmt).await;
        match &result {
            Ok(_) => self.metrics.query_success.inc(),
            Err(_) => self.metrics.query_fail.inc(),
        }
        result
    }

    /// Submits an `AddPeer` command through the log, per the `/join`
    /// HTTP route (spec.md §4.7).
    pub async fn join_peer(&self, name: String, address: NodeAddr) -> Result<()> {
        self.log.do_command(Command::AddPeer { name, address }).await.map(|_| ())
    }
}

/// Builds the closure the replicated log calls to apply one committed
/// command: SQL commands run against the statement executor; `AddPeer`
/// updates the node's peer registry (spec.md §4.6).
fn build_apply_fn(executor: Arc<dyn StatementExecutor>, peers: Arc<DashMap<String, NodeAddr>>) -> ApplyFn {
    Arc::new(move |command: Command| {
        let executor = executor.clone();
        let peers = peers.clone();
        Box::pin(async move {
            match command {
                Command::ExecuteOne { sql } => Ok(vec![executor.execute_one(&Statement::from(sql)).await?]),
                Command::ExecuteTransaction { sqls } => {
                    let stmts: Vec<Statement> = sqls.into_iter().map(Statement::from).collect();
                    executor.execute_transaction(&stmts).await
                }
                Command::AddPeer { name, address } => {
                    peers.insert(name, address);
                    Ok(vec![])
                }
            }
        })
    })
}

/// `<data-dir>/name`: a 7-hex-digit ASCII identifier, generated uniformly
/// in the 28-bit space on first boot and reused thereafter (spec.md §3).
async fn load_or_create_name(data_dir: &Path) -> Result<String> {
    let path = data_dir.join("name");
    if let Ok(existing) = tokio::fs::read_to_string(&path).await {
        let trimmed = existing.trim();
        if trimmed.len() == 7 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(trimmed.to_string());
        }
    }
    let value: u32 = rand::rng().random_range(0..(1u32 << 28));
    let name = format!("{value:07x}");
    tokio::fs::write(&path, &name).await?;
    Ok(name)
}

/// POSTs this node's join descriptor to `http://<leader>/join`
/// (spec.md §4.6).
async fn join_cluster(leader: &str, name: &str, connection_string: &str) -> Result<()> {
    let url = format!("http://{}/join", leader.trim_end_matches('/'));
    let body = serde_json::json!({ "name": name, "connectionString": connection_string });
    let response = reqwest::Client::new().post(&url).json(&body).send().await?;
    if !response.status().is_success() {
        return Err(DbError::Transport(format!("join request to {leader} returned {}", response.status())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn self_bootstraps_a_single_node_cluster_when_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        let node = Node::bootstrap(config).await.unwrap();
        assert!(!node.log.is_empty().await);
        assert!(node.log.is_leader().await);
        assert_eq!(node.name.len(), 7);
    }

    #[tokio::test]
    async fn node_name_is_stable_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        let first = Node::bootstrap(config.clone()).await.unwrap();
        let second = Node::bootstrap(config).await.unwrap();
        assert_eq!(first.name, second.name);
    }

    #[tokio::test]
    async fn join_with_nonempty_log_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        // Boot once to populate the log via self-bootstrap.
        Node::bootstrap(config.clone()).await.unwrap();

        config.join = Some("127.0.0.1:1".to_string());
        let err = Node::bootstrap(config).await.unwrap_err();
        assert!(err.to_string().contains("Cannot join with an existing log"));
    }

    #[tokio::test]
    async fn local_write_then_local_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        let node = Node::bootstrap(config).await.unwrap();
        node.submit_execute(ExecuteRequest { statements: vec![Statement::from("CREATE TABLE t(x INT)")], transaction: false })
            .await
            .unwrap();
        node.submit_execute(ExecuteRequest { statements: vec![Statement::from("INSERT INTO t VALUES(1)")], transaction: false })
            .await
            .unwrap();
        let rows = node.query_local(&Statement::from("SELECT x FROM t")).await.unwrap();
        assert_eq!(rows.values.len(), 1);
    }
}
