//! The replicated-log state machine (spec.md §4.6, §9 "HTTP handler
//! coupling to the log").
//!
//! spec.md §1 treats the consensus algorithm itself — leader election,
//! log replication, snapshotting — as an out-of-scope external
//! collaborator, consumed only through a narrow `ReplicatedLog` trait:
//! `do_command(Command) -> applied` and `is_empty() -> bool`. [`LocalLog`]
//! is the one concrete implementation this crate ships: a single-node
//! stand-in that is always its own leader. It exists so the HTTP and
//! cluster-transport layers above it are exercised end to end; a real
//! multi-node consensus back-end would implement the same trait without
//! either of those layers changing.

mod log;

pub use log::{ApplyFn, LocalLog};

use crate::error::Result;
use crate::store::ExecuteResult;
use crate::NodeAddr;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The atom of replication (spec.md §3). The ordered log is the single
/// source of truth for mutations; every committed entry is applied
/// exactly once per node, in log order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Command {
    ExecuteOne { sql: String },
    ExecuteTransaction { sqls: Vec<String> },
    /// Not named in spec.md §3's `Command` enum, but required by the
    /// bootstrap/join path spec.md §4.6 describes ("self-join command",
    /// "AddPeer-equivalent"). SPEC_FULL.md §3 adds it as a first-class
    /// variant rather than folding it into `ExecuteOne`/`ExecuteTransaction`,
    /// since it carries no SQL and applies against the peer registry, not
    /// the statement executor.
    AddPeer { name: String, address: NodeAddr },
}

/// The narrow interface the HTTP layer and cluster service use to reach
/// the replicated log, so a different consensus back-end can stand in
/// without touching either (spec.md §9).
#[async_trait]
pub trait ReplicatedLog: Send + Sync {
    /// Submits `command`, returning once it has been committed and
    /// applied on this node. For `ExecuteOne`/`ExecuteTransaction` the
    /// per-statement [`ExecuteResult`]s are returned to the caller; for
    /// `AddPeer` the vector is empty.
    ///
    /// spec.md §4.6 says apply's result is "discarded for purposes of
    /// apply" — true during log replay at boot, when nothing is waiting
    /// on the outcome. A *live* submission is a different caller: the
    /// HTTP write handler and the cluster service's `Execute` handler
    /// both need the actual `ExecuteResult`s to answer their own caller,
    /// so `do_command` surfaces them here rather than discarding them
    /// unconditionally.
    async fn do_command(&self, command: Command) -> Result<Vec<ExecuteResult>>;

    /// True if no entry has ever been committed to this node's log.
    /// Drives the three-way bootstrap branch in spec.md §4.6.
    async fn is_empty(&self) -> bool;

    /// True if this node may accept writes directly. Real leader
    /// election is out of scope (spec.md §1); [`LocalLog`] is always its
    /// own leader.
    async fn is_leader(&self) -> bool;

    /// Best-effort address of the current leader, used to forward a
    /// write when `is_leader` is false. `LocalLog` has no peers to
    /// forward to and always returns `None`.
    async fn leader_addr(&self) -> Option<NodeAddr>;

    /// Runs last in the node shutdown sequence (spec.md §3: "Shutdown
    /// closes HTTP, cluster service, then log"), after both the HTTP
    /// listener and the cluster mux have stopped accepting new work.
    /// `LocalLog` syncs its append-only file to disk; a default no-op
    /// covers implementations with nothing to flush.
    async fn shutdown(&self) {}
}
