//! The cluster RPC envelope.
//!
//! spec.md §6 specifies this as three tagged request shapes plus one
//! response per request type, wire-compatible (in semantics, not bytes)
//! with the original Protocol Buffers schema in
//! `original_source/cluster/message.pb.go`. We encode with `serde` +
//! `bincode`, already the teacher's codec of choice in
//! `networking/protocol/codec.rs`, instead of generating protobuf bindings.

use crate::store::{ExecuteRequest, ExecuteResult, QueryRequest, QueryRows};
use serde::{Deserialize, Serialize};

/// A request sent peer-to-peer over the cluster transport. Modeled as a sum
/// type (spec.md §9, "Command-vs-request routing") rather than a struct with
/// nullable fields, so an unrecognised variant can only arise from a
/// genuinely foreign payload, not from a missing field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum InterNodeCommand {
    GetNodeApiAddr,
    Execute(ExecuteRequest),
    Query(QueryRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Address {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandExecuteResponse {
    pub error: Option<String>,
    pub results: Vec<ExecuteResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandQueryResponse {
    pub error: Option<String>,
    pub rows: Vec<QueryRows>,
}

/// The full set of shapes a server response to an `InterNodeCommand` can
/// take. One frame always carries exactly one of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum InterNodeResponse {
    Address(Address),
    Execute(CommandExecuteResponse),
    Query(CommandQueryResponse),
}

pub fn encode<T: Serialize>(value: &T) -> crate::error::Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(Into::into)
}

pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> crate::error::Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Statement;

    #[test]
    fn inter_node_command_round_trips_through_encoding() {
        let cmd = InterNodeCommand::Execute(ExecuteRequest {
            statements: vec![Statement::from("INSERT INTO t VALUES(1)")],
            transaction: false,
        });
        let bytes = encode(&cmd).unwrap();
        let back: InterNodeCommand = decode(&bytes).unwrap();
        assert_eq!(cmd, back);
    }

    #[test]
    fn get_node_api_addr_has_no_body() {
        let cmd = InterNodeCommand::GetNodeApiAddr;
        let bytes = encode(&cmd).unwrap();
        let back: InterNodeCommand = decode(&bytes).unwrap();
        assert_eq!(cmd, back);
    }
}
