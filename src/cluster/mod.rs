//! Windows failover cluster operations.
//!
//! The cluster is driven through [`ClusterPort`]; [`PowerShellCluster`] is the
//! production implementation.

mod powershell;
mod relocator;

pub use powershell::*;
pub use relocator::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cluster command error types.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cluster command on {cluster} failed: {message}")]
    Command { cluster: String, message: String },
    #[error("unexpected cluster command output: {0}")]
    Parse(String),
}

/// Resource group state as reported by the cluster service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupState {
    Online,
    Offline,
    Failed,
    PartialOnline,
    Pending,
    Unknown,
}

impl GroupState {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => GroupState::Online,
            "offline" => GroupState::Offline,
            "failed" => GroupState::Failed,
            "partialonline" => GroupState::PartialOnline,
            "pending" => GroupState::Pending,
            _ => GroupState::Unknown,
        }
    }
}

/// A cluster resource group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterGroup {
    pub name: String,
    pub owner_node: Option<String>,
    pub state: GroupState,
}

/// A cluster node and its quorum vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterNode {
    pub name: String,
    pub state: String,
    pub node_weight: u32,
}

/// Remote clustering operations against a named cluster.
#[async_trait]
pub trait ClusterPort: Send + Sync {
    async fn list_groups(&self, cluster: &str) -> Result<Vec<ClusterGroup>, ClusterError>;

    /// Move a group and return its state afterwards.
    async fn move_group(&self, cluster: &str, group: &str, node: &str) -> Result<ClusterGroup, ClusterError>;

    async fn list_nodes(&self, cluster: &str) -> Result<Vec<ClusterNode>, ClusterError>;

    async fn set_node_weight(&self, cluster: &str, node: &str, weight: u32) -> Result<(), ClusterError>;

    async fn stop_node(&self, cluster: &str, node: &str) -> Result<(), ClusterError>;

    /// Start a node, forcing it to form quorum on its own.
    async fn start_node_fix_quorum(&self, cluster: &str, node: &str) -> Result<(), ClusterError>;
}
