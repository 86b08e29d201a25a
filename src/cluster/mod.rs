//! The cluster transport: a length-prefixed, multiplexed binary protocol
//! used for peer-to-peer RPCs, plus the server/client sides that speak it.

pub mod client;
pub mod frame;
pub mod message;
pub mod mux;
pub mod pool;
pub mod service;

pub use client::Client;
pub use message::{Address, CommandExecuteResponse, CommandQueryResponse, InterNodeCommand};
pub use mux::Mux;
pub use pool::ConnectionPool;
pub use service::Service;
