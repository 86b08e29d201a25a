// rqlited - node entry point.
//
// Boots a single node: loads/creates its persisted name, opens (and
// replays) its replicated log, runs the cluster mux and HTTP API, and
// blocks until shutdown.

use rqlited::cluster::service::Service;
use rqlited::cluster::Mux;
use rqlited::config::{Config, CLUSTER_MUX_BYTE};
use rqlited::discovery::DiscoveryClient;
use rqlited::node::Node;
use rqlited::{Result, VERSION};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_args(std::env::args().skip(1));
    info!(version = VERSION, data_dir = %config.data_dir.display(), "starting rqlited");

    let node = Node::bootstrap(config.clone()).await?;
    info!(name = %node.name, "node identity loaded");

    let cluster_listener = TcpListener::bind(&config.cluster_addr).await?;
    let cluster_socket_addr = cluster_listener.local_addr()?;
    let mux = match (&config.tls_cert, &config.tls_key) {
        (Some(cert_path), Some(key_path)) => {
            let cert = tokio::fs::read(cert_path).await?;
            let key = tokio::fs::read(key_path).await?;
            std::sync::Arc::new(Mux::new_tls(&cert, &key)?)
        }
        _ => std::sync::Arc::new(Mux::new()),
    };
    let service_listener = mux.listen(CLUSTER_MUX_BYTE).await;
    tokio::spawn(mux.clone().serve(cluster_listener));

    let service = Service::new(service_listener, cluster_socket_addr, node.executor.clone(), node.log.clone(), node.metrics.clone());
    service.set_api_addr(config.http_addr.clone());
    tokio::spawn(service.clone().serve());
    info!(addr = %service.addr(), "cluster service listening");

    if let Some(discovery_url) = config.discovery_url.clone() {
        let node_name = node.name.clone();
        let http_addr = config.http_addr.clone();
        tokio::spawn(async move {
            let client = DiscoveryClient::new(discovery_url);
            match client.register(&node_name, &http_addr).await {
                Ok(resp) => info!(disco_id = %resp.disco_id, nodes = resp.nodes.len(), "registered with discovery service"),
                Err(e) => warn!("discovery registration failed: {e}"),
            }
        });
    }

    let http_listener = TcpListener::bind(&config.http_addr)
        .await
        .map_err(|e| rqlited::error::DbError::Configuration(format!("failed to bind HTTP address {}: {e}", config.http_addr)))?;
    info!(addr = %config.http_addr, "HTTP API listening");

    let app = rqlited::http::router(node.clone());
    let result = axum::serve(http_listener, app).with_graceful_shutdown(shutdown_signal()).await;

    if let Err(e) = &result {
        error!("HTTP server stopped with error: {e}");
    }

    // spec.md §3: "Shutdown closes HTTP, cluster service, then log" — HTTP
    // has already stopped accepting above; close the mux so the cluster
    // service's accept loop unblocks and exits, then flush the log.
    mux.close().await;
    node.log.shutdown().await;
    info!("shutdown complete");

    result.map_err(Into::into)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
