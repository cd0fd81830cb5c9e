//! Resource group relocation.

use serde::Serialize;
use std::sync::Arc;

use super::{ClusterError, ClusterPort, GroupState};
use crate::ag::short_name;

/// What happened to one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "detail", rename_all = "snake_case")]
pub enum RelocationAction {
    Moved,
    AlreadyOwned,
    SkippedOffline,
    Failed(String),
}

/// Per-group relocation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRelocation {
    pub name: String,
    pub previous_owner: Option<String>,
    pub new_owner: Option<String>,
    pub state: GroupState,
    pub action: RelocationAction,
}

/// Moves cluster resource groups onto a node.
pub struct GroupRelocator {
    port: Arc<dyn ClusterPort>,
}

impl GroupRelocator {
    pub fn new(port: Arc<dyn ClusterPort>) -> Self {
        Self { port }
    }

    /// Move the cluster's groups (or only those named in `only`) to `node`.
    ///
    /// Offline groups are skipped, groups already on `node` are left alone,
    /// and a failed move is recorded without stopping the rest. Only a failure
    /// to list the groups is an error.
    pub async fn relocate(
        &self,
        cluster: &str,
        node: &str,
        only: &[String],
    ) -> Result<Vec<GroupRelocation>, ClusterError> {
        let groups = self.port.list_groups(cluster).await?;
        let wanted = short_name(node);

        let mut results = Vec::new();
        for group in groups {
            if !only.is_empty() && !only.iter().any(|n| n.eq_ignore_ascii_case(&group.name)) {
                continue;
            }

            let owned = group
                .owner_node
                .as_deref()
                .map(|owner| short_name(owner) == wanted)
                .unwrap_or(false);

            let record = if group.state == GroupState::Offline {
                tracing::warn!("Cluster group {} is offline; not moving it", group.name);
                GroupRelocation {
                    previous_owner: group.owner_node.clone(),
                    new_owner: group.owner_node,
                    state: group.state,
                    action: RelocationAction::SkippedOffline,
                    name: group.name,
                }
            } else if owned {
                tracing::info!("Cluster group {} is already on {}", group.name, node);
                GroupRelocation {
                    previous_owner: group.owner_node.clone(),
                    new_owner: group.owner_node,
                    state: group.state,
                    action: RelocationAction::AlreadyOwned,
                    name: group.name,
                }
            } else {
                match self.port.move_group(cluster, &group.name, node).await {
                    Ok(moved) => {
                        tracing::info!(
                            "Moved cluster group {} from {} to {}",
                            group.name,
                            group.owner_node.as_deref().unwrap_or("(none)"),
                            moved.owner_node.as_deref().unwrap_or("(none)")
                        );
                        GroupRelocation {
                            name: group.name,
                            previous_owner: group.owner_node,
                            new_owner: moved.owner_node,
                            state: moved.state,
                            action: RelocationAction::Moved,
                        }
                    }
                    Err(e) => {
                        tracing::error!("Moving cluster group {} to {} failed: {}", group.name, node, e);
                        GroupRelocation {
                            previous_owner: group.owner_node.clone(),
                            new_owner: group.owner_node,
                            state: group.state,
                            action: RelocationAction::Failed(e.to_string()),
                            name: group.name,
                        }
                    }
                }
            };
            results.push(record);
        }

        if results.is_empty() {
            tracing::warn!("No matching cluster groups found on {}", cluster);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterGroup;
    use crate::testutil::FakeCluster;

    fn group(name: &str, owner: &str, state: GroupState) -> ClusterGroup {
        ClusterGroup {
            name: name.to_string(),
            owner_node: Some(owner.to_string()),
            state,
        }
    }

    #[tokio::test]
    async fn test_relocation_outcomes_per_group() {
        let cluster = Arc::new(
            FakeCluster::new()
                .with_groups(vec![
                    group("Cluster Group", "SQL01", GroupState::Online),
                    group("Available Storage", "SQL02", GroupState::Offline),
                    group("AG1", "sql02.corp.local", GroupState::Online),
                    group("Broken", "SQL01", GroupState::Online),
                ])
                .failing_move("Broken"),
        );
        let relocator = GroupRelocator::new(cluster.clone());

        let results = relocator.relocate("CLUSTER1", "SQL02", &[]).await.unwrap();
        let actions: Vec<_> = results.iter().map(|r| (r.name.as_str(), r.action.clone())).collect();
        assert_eq!(actions[0], ("Cluster Group", RelocationAction::Moved));
        assert_eq!(actions[1], ("Available Storage", RelocationAction::SkippedOffline));
        assert_eq!(actions[2], ("AG1", RelocationAction::AlreadyOwned));
        assert!(matches!(actions[3].1, RelocationAction::Failed(_)));

        assert_eq!(results[0].previous_owner.as_deref(), Some("SQL01"));
        assert_eq!(results[0].new_owner.as_deref(), Some("SQL02"));
    }

    #[tokio::test]
    async fn test_filter_limits_groups() {
        let cluster = Arc::new(FakeCluster::new().with_groups(vec![
            group("Cluster Group", "SQL01", GroupState::Online),
            group("AG1", "SQL01", GroupState::Online),
        ]));
        let relocator = GroupRelocator::new(cluster.clone());

        let results = relocator
            .relocate("CLUSTER1", "SQL02", &["cluster group".to_string()])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            cluster.calls(),
            vec!["list_groups CLUSTER1".to_string(), "move_group Cluster Group SQL02".to_string()]
        );
    }
}
