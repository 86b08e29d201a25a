//! Node configuration.
//!
//! Populated from minimal hand-rolled CLI flag parsing in `main.rs`; flag
//! parsing and process bootstrap are out of scope for this crate, so this
//! stays a plain struct rather than growing a builder or a config-file
//! loader.

use std::path::PathBuf;
use std::time::Duration;

/// Default size of a peer's connection pool at construction time.
pub const DEFAULT_POOL_INITIAL: usize = 4;
/// Default cap on live connections to a single peer.
pub const DEFAULT_POOL_MAX: usize = 64;
/// Default dial timeout used by the pool's connection factory.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);
/// Mux header byte the cluster service registers on.
pub const CLUSTER_MUX_BYTE: u8 = 1;

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the node's persisted `name` file and (if the
    /// default `LocalLog` is used) its replicated log.
    pub data_dir: PathBuf,

    /// Address the HTTP API binds to and advertises to peers.
    pub http_addr: String,

    /// Address the cluster mux listens on (carries both the cluster
    /// service and, in the future, any other muxed protocol).
    pub cluster_addr: String,

    /// Address of an existing cluster leader to join at boot, if any.
    pub join: Option<String>,

    /// Optional discovery service base URL.
    pub discovery_url: Option<String>,

    pub pool_initial: usize,
    pub pool_max: usize,
    pub dial_timeout: Duration,

    /// TLS cert/key for the mux's TLS variant. Both must be set to enable it.
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub tls_insecure_skip_verify: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            http_addr: "127.0.0.1:4001".to_string(),
            cluster_addr: "127.0.0.1:4002".to_string(),
            join: None,
            discovery_url: None,
            pool_initial: DEFAULT_POOL_INITIAL,
            pool_max: DEFAULT_POOL_MAX,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            tls_cert: None,
            tls_key: None,
            tls_insecure_skip_verify: false,
        }
    }
}

impl Config {
    /// Parses `--flag value` pairs from process arguments (skipping argv[0]).
    /// Unrecognized flags are ignored; this is deliberately not a general
    /// argument parser.
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Self {
        let mut cfg = Config::default();
        let mut it = args.into_iter();
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--data-dir" => {
                    if let Some(v) = it.next() {
                        cfg.data_dir = PathBuf::from(v);
                    }
                }
                "--http-addr" => {
                    if let Some(v) = it.next() {
                        cfg.http_addr = v;
                    }
                }
                "--cluster-addr" => {
                    if let Some(v) = it.next() {
                        cfg.cluster_addr = v;
                    }
                }
                "--join" => {
                    if let Some(v) = it.next() {
                        cfg.join = Some(v);
                    }
                }
                "--discovery-url" => {
                    if let Some(v) = it.next() {
                        cfg.discovery_url = Some(v);
                    }
                }
                "--tls-cert" => {
                    if let Some(v) = it.next() {
                        cfg.tls_cert = Some(PathBuf::from(v));
                    }
                }
                "--tls-key" => {
                    if let Some(v) = it.next() {
                        cfg.tls_key = Some(PathBuf::from(v));
                    }
                }
                _ => {}
            }
        }
        cfg
    }
}
