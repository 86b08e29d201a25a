//! Server side of the cluster transport (spec.md §4.4).
//!
//! Accepts connections off its mux-registered [`MuxListener`], reads
//! frames in a loop per connection, and dispatches each decoded
//! [`InterNodeCommand`] to the local statement executor or replicated
//! log. Grounded in the teacher's accept-loop shape in
//! `network/cluster_network.rs` (one task per connection, response
//! written back on the same socket).
//!
//! spec.md §4.4 step 4 says the server "closes the connection" after
//! each response. Taken literally that defeats the connection pool
//! spec.md §4.2/§4.5 describes and the reuse scenario S4 asserts ("total
//! dials to B ≤ 64" across 100 sequential calls) — a pool that gets a
//! freshly dead socket back from every `Close()` can never actually
//! reuse one. We keep the connection open across multiple request/
//! response cycles and only stop on read error or EOF, so the pool's
//! reuse contract is actually satisfiable; see DESIGN.md.

use super::frame::{read_frame, write_frame};
use super::message::{decode, encode, Address, CommandExecuteResponse, CommandQueryResponse, InterNodeCommand, InterNodeResponse};
use super::mux::{MuxListener, MuxStream};
use crate::metrics::Metrics;
use crate::replication::{Command, ReplicatedLog};
use crate::store::{QueryRequest, StatementExecutor};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;

pub struct Service {
    listener: MuxListener,
    executor: Arc<dyn StatementExecutor>,
    log: Arc<dyn ReplicatedLog>,
    metrics: Arc<Metrics>,
    api_addr: RwLock<Option<String>>,
    addr: SocketAddr,
}

impl Service {
    pub fn new(
        listener: MuxListener,
        addr: SocketAddr,
        executor: Arc<dyn StatementExecutor>,
        log: Arc<dyn ReplicatedLog>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new(Self { listener, executor, log, metrics, api_addr: RwLock::new(None), addr })
    }

    /// Sets the URL advertised for `GetNodeAPIAddr`, called once at node
    /// boot after the HTTP listener address is known.
    pub fn set_api_addr(&self, addr: String) {
        *self.api_addr.write() = Some(addr);
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs the accept loop until the mux listener closes.
    pub async fn serve(self: Arc<Self>) {
        while let Some(stream) = self.listener.accept().await {
            let this = self.clone();
            tokio::spawn(async move {
                this.handle_conn(stream).await;
            });
        }
    }

    async fn handle_conn(&self, mut stream: MuxStream) {
        loop {
            let payload = match read_frame(&mut stream).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::debug!("cluster service: connection closed: {e}");
                    return;
                }
            };

            let command: InterNodeCommand = match decode(&payload) {
                Ok(c) => c,
                Err(e) => {
                    // Protocol error: malformed payload. Close without a
                    // structured response; the connection is presumed
                    // hostile (spec.md §7).
                    tracing::warn!("cluster service: bad payload: {e}");
                    return;
                }
            };

            let response = self.dispatch(command).await;
            let bytes = match encode(&response) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!("cluster service: failed to encode response: {e}");
                    return;
                }
            };
            if write_frame(&mut stream, &bytes).await.is_err() {
                return;
            }
        }
    }

    async fn dispatch(&self, command: InterNodeCommand) -> InterNodeResponse {
        match command {
            InterNodeCommand::GetNodeApiAddr => {
                let url = self.api_addr.read().as_ref().map(|a| format!("http://{a}")).unwrap_or_default();
                InterNodeResponse::Address(Address { url })
            }
            InterNodeCommand::Execute(req) => {
                self.metrics.execute_received.inc();
                if req.transaction {
                    self.metrics.execute_tx_received.inc();
                }
                let command = if req.transaction {
                    Command::ExecuteTransaction { sqls: req.statements.iter().map(|s| s.sql.clone()).collect() }
                } else {
                    let sql = req.statements.first().map(|s| s.sql.clone()).unwrap_or_default();
                    Command::ExecuteOne { sql }
                };
                match self.log.do_command(command).await {
                    Ok(results) => {
                        self.metrics.execute_success.inc();
                        InterNodeResponse::Execute(CommandExecuteResponse { error: None, results })
                    }
                    Err(e) => {
                        self.metrics.execute_fail.inc();
                        InterNodeResponse::Execute(CommandExecuteResponse { error: Some(e.to_string()), results: vec![] })
                    }
                }
            }
            InterNodeCommand::Query(req) => {
                self.metrics.query_received.inc();
                match self.run_query(&req).await {
                    Ok(rows) => {
                        self.metrics.query_success.inc();
                        InterNodeResponse::Query(CommandQueryResponse { error: None, rows })
                    }
                    Err(e) => {
                        self.metrics.query_fail.inc();
                        InterNodeResponse::Query(CommandQueryResponse { error: Some(e.to_string()), rows: vec![] })
                    }
                }
            }
        }
    }

    async fn run_query(&self, req: &QueryRequest) -> crate::error::Result<Vec<crate::store::QueryRows>> {
        let mut rows = Vec::with_capacity(req.statements.len());
        for stmt in &req.statements {
            rows.push(self.executor.query(stmt).await?);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mux::Mux;
    use crate::store::{ExecuteRequest, InMemoryEngine, Statement};
    use std::sync::Arc as StdArc;
    use tokio::net::{TcpListener, TcpStream};

    fn apply_fn(engine: StdArc<InMemoryEngine>) -> crate::replication::ApplyFn {
        use crate::store::StatementExecutor as _;
        StdArc::new(move |command: Command| {
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

    async fn start_service() -> (SocketAddr, StdArc<InMemoryEngine>) {
        let engine = StdArc::new(InMemoryEngine::new());
        let dir = tempfile::tempdir().unwrap();
        let log = StdArc::new(crate::replication::LocalLog::open(dir.path(), apply_fn(engine.clone())).await.unwrap());
        // Leak the TempDir guard: the service outlives this function, so
        // nothing would be left to hold it otherwise.
        std::mem::forget(dir);

        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let mux = StdArc::new(Mux::new());
        let listener = mux.listen(crate::config::CLUSTER_MUX_BYTE).await;
        tokio::spawn(mux.clone().serve(tcp));

        let service = Service::new(listener, addr, engine.clone(), log, StdArc::new(Metrics::new()));
        service.set_api_addr("127.0.0.1:4001".to_string());
        tokio::spawn(service.serve());
        (addr, engine)
    }

    #[tokio::test]
    async fn get_node_api_addr_returns_configured_url() {
        let (addr, _engine) = start_service().await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.set_nodelay(true).ok();
        use tokio::io::AsyncWriteExt;
        conn.write_all(&[crate::config::CLUSTER_MUX_BYTE]).await.unwrap();
        let bytes = encode(&InterNodeCommand::GetNodeApiAddr).unwrap();
        write_frame(&mut conn, &bytes).await.unwrap();
        let resp_bytes = read_frame(&mut conn).await.unwrap();
        let resp: InterNodeResponse = decode(&resp_bytes).unwrap();
        match resp {
            InterNodeResponse::Address(a) => assert_eq!(a.url, "http://127.0.0.1:4001"),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn execute_runs_against_local_log_and_returns_results() {
        let (addr, _engine) = start_service().await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        use tokio::io::AsyncWriteExt;
        conn.write_all(&[crate::config::CLUSTER_MUX_BYTE]).await.unwrap();

        let create = InterNodeCommand::Execute(ExecuteRequest {
            statements: vec![Statement::from("CREATE TABLE t(x INT)")],
            transaction: false,
        });
        write_frame(&mut conn, &encode(&create).unwrap()).await.unwrap();
        let _ = read_frame(&mut conn).await.unwrap();

        let insert = InterNodeCommand::Execute(ExecuteRequest {
            statements: vec![Statement::from("INSERT INTO t VALUES(1)")],
            transaction: false,
        });
        write_frame(&mut conn, &encode(&insert).unwrap()).await.unwrap();
        let resp_bytes = read_frame(&mut conn).await.unwrap();
        let resp: InterNodeResponse = decode(&resp_bytes).unwrap();
        match resp {
            InterNodeResponse::Execute(r) => {
                assert!(r.error.is_none());
                assert_eq!(r.results.len(), 1);
                assert_eq!(r.results[0].rows_affected, 1);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
