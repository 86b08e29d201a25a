//! Discovery service client (spec.md §6, "Discovery client (optional)").
//!
//! spec.md §1 lists the discovery service itself as out of scope ("a
//! trivial HTTP POST to register address/id"); this is only the client
//! side a node uses to call it. Grounded in the teacher's
//! `networking/discovery/consul.rs`: a bare `reqwest::Client` wrapping
//! one HTTP call, no retry or backoff logic of its own.

use crate::error::{DbError, Result};
use serde::{Deserialize, Serialize};

/// `{ created_at, disco_id, nodes }`, per `original_source`'s
/// `disco/client.go` (SPEC_FULL.md §3, "Discovery response shape").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoResponse {
    pub created_at: String,
    pub disco_id: String,
    pub nodes: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    addr: &'a str,
}

pub struct DiscoveryClient {
    http: reqwest::Client,
    base_url: String,
}

impl DiscoveryClient {
    pub fn new(base_url: String) -> Self {
        Self { http: reqwest::Client::new(), base_url }
    }

    /// `POST <discovery-url>/<id>` with body `{"addr": "<node-addr>"}`.
    /// A non-200 response is an error carrying the HTTP status as its
    /// message, per spec.md §6.
    pub async fn register(&self, id: &str, addr: &str) -> Result<DiscoResponse> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), id);
        let response = self.http.post(&url).json(&RegisterRequest { addr }).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DbError::Transport(format!("discovery service returned {status}")));
        }
        response.json::<DiscoResponse>().await.map_err(Into::into)
    }
}
