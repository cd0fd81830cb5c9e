//! Availability Group topology, state, failover and maintenance.

mod failover;
mod maintenance;
mod models;
mod state;
mod topology;

pub use failover::*;
pub use maintenance::*;
pub use models::*;
pub use state::*;
pub use topology::*;

#[cfg(test)]
pub(crate) use models::fixtures;

use thiserror::Error;

use crate::cluster::ClusterError;
use crate::sql::SqlError;

/// Availability Group error types.
#[derive(Error, Debug)]
pub enum AgError {
    #[error(transparent)]
    Sql(#[from] SqlError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("invalid topology for {group}: {reason}")]
    InvalidTopology { group: String, reason: String },
    #[error("result is missing required column {0}")]
    MissingField(&'static str),
    #[error("unexpected {field} value: {value}")]
    UnexpectedValue { field: &'static str, value: String },
    #[error("availability group {0} not found on its primary")]
    GroupNotFound(String),
    #[error("cannot resolve the log file name of {database} on {server}")]
    LogFileUnresolved { database: String, server: String },
    #[error("failover of {group} to {target} failed during {step}: {source}")]
    FailoverStep {
        group: String,
        target: String,
        step: String,
        #[source]
        source: Box<AgError>,
    },
}
