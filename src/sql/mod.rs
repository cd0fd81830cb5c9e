//! SQL Server access for agwarden.
//!
//! Every read and write against the replicas funnels through
//! [`QueryExecutor`], which delegates wire work to a [`SqlConnector`].

mod address;
mod executor;
mod models;
mod tds;
mod templates;

pub use address::*;
pub use executor::*;
pub use models::*;
pub use tds::*;
pub use templates::*;

use std::time::Duration;
use thiserror::Error;

/// Query execution error types.
#[derive(Error, Debug, Clone)]
pub enum SqlError {
    #[error("invalid server address: {0}")]
    InvalidAddress(String),
    #[error("no query text supplied")]
    EmptyQuery,
    #[error("connection to {server} failed: {reason}")]
    Connection { server: String, reason: String },
    #[error("command on {server} timed out after {timeout:?}")]
    Timeout { server: String, timeout: Duration },
    #[error("{server}: Msg {}, Line {}: {}", .message.number, .message.line, .message.message)]
    Execution { server: String, message: ServerMessage },
}
