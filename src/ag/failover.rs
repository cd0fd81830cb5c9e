//! Failover decision and execution.
//!
//! [`decide`] is a pure priority-ordered rule list; [`FailoverRunner`] carries
//! out whatever it returns. Multi-step paths are not transactional: a failure
//! part-way leaves earlier steps in place.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{cluster_node_of, resume_replication, short_name, AgError, AvailabilityGroupTopology, HealthState, ReplicaStateReader};
use crate::cluster::{ClusterPort, GroupRelocation, GroupRelocator};
use crate::prompt::Confirm;
use crate::sql::{Query, QueryExecutor};

/// Core resource group of a Windows failover cluster.
pub const CLUSTER_CORE_GROUP: &str = "Cluster Group";

const MASTER: &str = "master";

/// One requested failover of one group.
#[derive(Debug, Clone)]
pub struct FailoverRequest {
    pub topology: AvailabilityGroupTopology,
    pub target: String,
    pub force: bool,
    pub fix_quorum: bool,
    pub move_cluster_group: bool,
}

impl FailoverRequest {
    /// Only a forced failover to an asynchronous replica, without a quorum
    /// fix, depends on the target's own health.
    pub fn needs_target_health(&self) -> bool {
        let topo = &self.topology;
        topo.replica(&self.target).is_some()
            && !topo.is_primary(&self.target)
            && topo.is_asynchronous(&self.target)
            && self.force
            && !self.fix_quorum
    }
}

/// Why a failover was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    NotAReplica { target: String },
    GroupNotReady { health: HealthState, listener_missing: bool },
    AsynchronousNeedsForce { target: String },
    TargetNotHealthy { target: String, health: Option<HealthState> },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotAReplica { target } => {
                write!(f, "{} is not a valid replica of this availability group", target)
            }
            Rejection::GroupNotReady { health, listener_missing } => {
                write!(f, "group health is {}", health)?;
                if *listener_missing {
                    write!(f, " and no listener is configured")?;
                }
                write!(
                    f,
                    "; use force together with fix-quorum only for disaster recovery"
                )
            }
            Rejection::AsynchronousNeedsForce { target } => write!(
                f,
                "{} is an asynchronous replica; failing over to it risks data loss and requires force",
                target
            ),
            Rejection::TargetNotHealthy { target, health } => match health {
                Some(h) => write!(f, "{} is {}; a forced failover requires a Healthy target", target, h),
                None => write!(f, "health of {} is unknown; a forced failover requires a Healthy target", target),
            },
        }
    }
}

/// What the runner should do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FailoverDecision {
    Reject(Rejection),
    AlreadyPrimary,
    /// Planned failover, no data loss.
    Planned,
    /// Forced failover with possible data loss, then resume.
    Forced,
    /// Quorum override, forced failover, then resume.
    DisasterRecovery,
}

impl FailoverDecision {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            FailoverDecision::Planned | FailoverDecision::Forced | FailoverDecision::DisasterRecovery
        )
    }
}

/// Evaluate the failover rules top to bottom; the first match wins.
///
/// `target_health` is only consulted for a forced failover to an asynchronous
/// replica without a quorum fix.
pub fn decide(request: &FailoverRequest, target_health: Option<HealthState>) -> FailoverDecision {
    let topo = &request.topology;

    let Some(target) = topo.replica(&request.target) else {
        return FailoverDecision::Reject(Rejection::NotAReplica {
            target: request.target.clone(),
        });
    };

    if topo.is_primary(target) {
        return FailoverDecision::AlreadyPrimary;
    }

    let listener_missing = topo.listener().is_none();
    if (topo.health_state != HealthState::Healthy || listener_missing) && !request.force {
        return FailoverDecision::Reject(Rejection::GroupNotReady {
            health: topo.health_state,
            listener_missing,
        });
    }

    if topo.is_asynchronous(target) {
        if !request.force {
            return FailoverDecision::Reject(Rejection::AsynchronousNeedsForce {
                target: target.to_string(),
            });
        }
        if !request.fix_quorum {
            return match target_health {
                Some(HealthState::Healthy) => FailoverDecision::Forced,
                health => FailoverDecision::Reject(Rejection::TargetNotHealthy {
                    target: target.to_string(),
                    health,
                }),
            };
        }
        return FailoverDecision::DisasterRecovery;
    }

    FailoverDecision::Planned
}

/// Result of one request.
#[derive(Debug, Clone, Serialize)]
pub struct FailoverOutcome {
    pub group: String,
    pub target: String,
    pub decision: FailoverDecision,
    pub moved: bool,
    pub steps: Vec<String>,
    pub warnings: Vec<String>,
}

/// One entry of a batch: an outcome, or the error that stopped it.
#[derive(Debug, Serialize)]
pub struct FailoverResult {
    pub group: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<FailoverOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FailoverBatchOutcome {
    pub results: Vec<FailoverResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relocation: Option<Vec<GroupRelocation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relocation_error: Option<String>,
}

impl FailoverBatchOutcome {
    pub fn moved_any(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.outcome.as_ref().map(|o| o.moved).unwrap_or(false))
    }
}

/// Executes failover decisions against SQL Server and the cluster.
pub struct FailoverRunner {
    executor: QueryExecutor,
    cluster: Arc<dyn ClusterPort>,
    settle: Duration,
}

impl FailoverRunner {
    pub fn new(executor: QueryExecutor, cluster: Arc<dyn ClusterPort>, settle: Duration) -> Self {
        Self {
            executor,
            cluster,
            settle,
        }
    }

    /// Decide and, when allowed, fail the group over to the requested target.
    pub async fn run(&self, request: &FailoverRequest, confirm: &dyn Confirm) -> Result<FailoverOutcome, AgError> {
        let topology = &request.topology;
        topology.validate()?;

        let target = topology
            .replica(&request.target)
            .map(str::to_string)
            .unwrap_or_else(|| request.target.clone());

        let target_health = if request.needs_target_health() {
            match ReplicaStateReader::new(self.executor.clone())
                .health_of(topology, &target)
                .await
            {
                Ok(health) => health,
                Err(e) => {
                    tracing::warn!("{}: cannot read health of {}: {}", topology.name, target, e);
                    None
                }
            }
        } else {
            None
        };

        let decision = decide(request, target_health);
        tracing::info!(
            group = %topology.name,
            target = %target,
            force = request.force,
            fix_quorum = request.fix_quorum,
            mutating = decision.is_mutating(),
            "Failover decision: {:?}",
            decision
        );
        let mut outcome = FailoverOutcome {
            group: topology.name.clone(),
            target: target.clone(),
            decision: decision.clone(),
            moved: false,
            steps: Vec::new(),
            warnings: Vec::new(),
        };

        match decision {
            FailoverDecision::Reject(rejection) => {
                tracing::warn!("{}: failover to {} refused: {}", topology.name, target, rejection);
                outcome.warnings.push(rejection.to_string());
            }
            FailoverDecision::AlreadyPrimary => {
                tracing::info!("{}: {} is already the primary; nothing to do", topology.name, target);
            }
            FailoverDecision::Planned => {
                tracing::info!("{}: planned failover to {}", topology.name, target);
                self.sql_step(&mut outcome, Query::failover(&topology.name)).await?;
                outcome.moved = true;
                self.settle().await;
            }
            FailoverDecision::Forced => {
                tracing::warn!("{}: forced failover to {} (possible data loss)", topology.name, target);
                self.forced_failover(&mut outcome, topology).await?;
            }
            FailoverDecision::DisasterRecovery => {
                let prompt = format!(
                    "Disaster recovery for {}: node weights will be reset so only {} votes, {} will be \
                     restarted with forced quorum, and the group forced over with possible data loss. Continue?",
                    topology.name, target, target
                );
                if !confirm.confirm(&prompt) {
                    tracing::warn!("{}: disaster recovery declined by operator", topology.name);
                    outcome.warnings.push("declined by operator".to_string());
                    return Ok(outcome);
                }
                // Each step is logged; no health re-check runs between the
                // node restart and the forced failover.
                self.override_quorum(&mut outcome).await?;
                self.forced_failover(&mut outcome, topology).await?;
            }
        }

        Ok(outcome)
    }

    /// Run one request per group, then relocate the cluster core group when
    /// asked to.
    pub async fn run_batch(&self, requests: &[FailoverRequest], confirm: &dyn Confirm) -> FailoverBatchOutcome {
        let mut batch = FailoverBatchOutcome {
            results: Vec::with_capacity(requests.len()),
            relocation: None,
            relocation_error: None,
        };

        for request in requests {
            let (outcome, error) = match self.run(request, confirm).await {
                Ok(outcome) => (Some(outcome), None),
                Err(e) => {
                    tracing::error!("{} -> {}: {}", request.topology.name, request.target, e);
                    (None, Some(e.to_string()))
                }
            };
            batch.results.push(FailoverResult {
                group: request.topology.name.clone(),
                target: request.target.clone(),
                outcome,
                error,
            });
        }

        let Some(first) = requests.iter().find(|r| r.move_cluster_group) else {
            return batch;
        };
        let replica = first.topology.replica(&first.target).unwrap_or(first.target.as_str());
        let node = cluster_node_of(replica).to_string();

        let relocate = batch.moved_any()
            || confirm.confirm(&format!(
                "No availability group was moved to {}. Move the cluster group anyway?",
                node
            ));
        if relocate {
            let relocator = GroupRelocator::new(self.cluster.clone());
            match relocator
                .relocate(&node, &node, &[CLUSTER_CORE_GROUP.to_string()])
                .await
            {
                Ok(moves) => batch.relocation = Some(moves),
                Err(e) => {
                    tracing::error!("Cluster group relocation to {} failed: {}", node, e);
                    batch.relocation_error = Some(e.to_string());
                }
            }
        }

        batch
    }

    async fn forced_failover(
        &self,
        outcome: &mut FailoverOutcome,
        topology: &AvailabilityGroupTopology,
    ) -> Result<(), AgError> {
        self.sql_step(outcome, Query::force_failover(&topology.name)).await?;
        outcome.moved = true;
        self.settle().await;

        for result in resume_replication(&self.executor, &outcome.target, &topology.databases).await {
            if result.ok {
                outcome.steps.push(format!("resumed {} on {}", result.database, result.server));
            } else {
                outcome.warnings.push(format!("resume {}: {}", result.database, result.detail));
            }
        }
        Ok(())
    }

    /// Give the target the only quorum vote and restart it with forced quorum.
    async fn override_quorum(&self, outcome: &mut FailoverOutcome) -> Result<(), AgError> {
        let target = outcome.target.clone();
        let host = cluster_node_of(&target);
        let wrap = |step: &str, e: AgError| AgError::FailoverStep {
            group: outcome.group.clone(),
            target: target.clone(),
            step: step.to_string(),
            source: Box::new(e),
        };

        let nodes = self
            .cluster
            .list_nodes(host)
            .await
            .map_err(|e| wrap("list cluster nodes", e.into()))?;

        let mut steps = Vec::new();
        for node in &nodes {
            let weight = if short_name(&node.name) == short_name(host) { 1 } else { 0 };
            self.cluster
                .set_node_weight(host, &node.name, weight)
                .await
                .map_err(|e| wrap("set node weight", e.into()))?;
            steps.push(format!("set vote weight of {} to {}", node.name, weight));
        }

        self.cluster
            .stop_node(host, host)
            .await
            .map_err(|e| wrap("stop cluster node", e.into()))?;
        steps.push(format!("stopped cluster node {}", host));

        self.cluster
            .start_node_fix_quorum(host, host)
            .await
            .map_err(|e| wrap("start cluster node with forced quorum", e.into()))?;
        steps.push(format!("started cluster node {} with forced quorum", host));

        for step in steps {
            tracing::warn!("{}: {}", outcome.group, step);
            outcome.steps.push(step);
        }
        Ok(())
    }

    async fn sql_step(&self, outcome: &mut FailoverOutcome, query: Query) -> Result<(), AgError> {
        self.executor
            .query_one(&outcome.target, MASTER, &query)
            .await
            .map_err(|e| AgError::FailoverStep {
                group: outcome.group.clone(),
                target: outcome.target.clone(),
                step: query.text.clone(),
                source: Box::new(e.into()),
            })?;
        tracing::info!("{}: {} on {}", outcome.group, query.text, outcome.target);
        outcome.steps.push(format!("{} on {}", query.text, outcome.target));
        Ok(())
    }

    async fn settle(&self) {
        if !self.settle.is_zero() {
            tracing::info!("Waiting {:?} for the failover to settle", self.settle);
            tokio::time::sleep(self.settle).await;
        }
    }
}
