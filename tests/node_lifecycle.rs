// End-to-end node lifecycle tests: boots a real node (HTTP router +
// cluster mux + cluster service) over actual TCP sockets, the way
// `main.rs` wires them together, and drives it the way an external
// client or peer node would.

use rqlited::cluster::service::Service;
use rqlited::cluster::{Client as ClusterClient, Mux};
use rqlited::config::{Config, CLUSTER_MUX_BYTE};
use rqlited::node::Node;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn boot_node() -> (Arc<Node>, std::net::SocketAddr, std::net::SocketAddr) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    config.http_addr = "127.0.0.1:0".to_string();
    config.cluster_addr = "127.0.0.1:0".to_string();
    std::mem::forget(dir);

    let node = Node::bootstrap(config).await.unwrap();

    let cluster_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cluster_addr = cluster_listener.local_addr().unwrap();
    let mux = Arc::new(Mux::new());
    let service_listener = mux.listen(CLUSTER_MUX_BYTE).await;
    tokio::spawn(mux.clone().serve(cluster_listener));
    let service = Service::new(service_listener, cluster_addr, node.executor.clone(), node.log.clone(), node.metrics.clone());

    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = http_listener.local_addr().unwrap();
    service.set_api_addr(http_addr.to_string());
    tokio::spawn(service.clone().serve());

    let app = rqlited::http::router(node.clone());
    tokio::spawn(async move {
        axum::serve(http_listener, app).await.unwrap();
    });

    (node, http_addr, cluster_addr)
}

#[tokio::test]
async fn http_write_then_read_over_real_sockets() {
    let (_, http_addr, _) = boot_node().await;
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("http://{http_addr}/db"))
        .body("CREATE TABLE t(x INT)\nINSERT INTO t VALUES(7)")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let resp = http.get(format!("http://{http_addr}/db")).body("SELECT x FROM t").send().await.unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["rows"]["values"], serde_json::json!([[7]]));
}

#[tokio::test]
async fn cluster_client_reaches_the_cluster_service_over_tcp() {
    let (_, http_addr, cluster_addr) = boot_node().await;
    let client = ClusterClient::new(2, 8, Duration::from_secs(5));
    let url = client.get_node_api_addr(&cluster_addr.to_string()).await.unwrap();
    assert_eq!(url, format!("http://{http_addr}"));
}

#[tokio::test]
async fn statistics_reflect_http_activity() {
    let (_, http_addr, _) = boot_node().await;
    let http = reqwest::Client::new();
    http.post(format!("http://{http_addr}/db")).body("CREATE TABLE t(x INT)").send().await.unwrap();
    http.get(format!("http://{http_addr}/db")).body("SELECT 1 FROM t").send().await.ok();

    let resp = http.get(format!("http://{http_addr}/statistics")).send().await.unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["execute.received"].as_u64().unwrap() >= 1);
}
