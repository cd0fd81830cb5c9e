//! Replica and database state readers.
//!
//! Both go through the group's listener so they follow the current primary.

use super::models::{required_enum, required_text};
use super::{
    AgError, AvailabilityGroupTopology, CatchupEstimate, DatabaseReplicationState, HealthState, OperationalState,
    ReplicaState,
};
use crate::sql::{Query, QueryExecutor};

const MASTER: &str = "master";

fn target_of(topology: &AvailabilityGroupTopology) -> &str {
    if topology.listener().is_none() {
        tracing::warn!(
            "{} has no listener; reading state from primary {}",
            topology.name,
            topology.primary_replica
        );
    }
    topology.query_target()
}

/// Reads per-replica role and health.
#[derive(Clone)]
pub struct ReplicaStateReader {
    executor: QueryExecutor,
}

impl ReplicaStateReader {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    pub async fn read(&self, topology: &AvailabilityGroupTopology) -> Result<Vec<ReplicaState>, AgError> {
        topology.validate()?;
        let target = target_of(topology);

        let rows = self
            .executor
            .query_one(target, MASTER, &Query::replica_states(&topology.group_id))
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ReplicaState {
                    group: topology.name.clone(),
                    replica: required_text(row, "replica_server_name")?,
                    role: required_enum(row, "role_desc")?,
                    availability_mode: required_enum(row, "availability_mode_desc")?,
                    failover_mode: required_enum(row, "failover_mode_desc")?,
                    operational_state: OperationalState::from_desc(row.text("operational_state_desc")),
                    connection_state: required_enum(row, "connected_state_desc")?,
                    synchronization_health: required_enum(row, "synchronization_health_desc")?,
                })
            })
            .collect()
    }

    /// Synchronization health of one replica, if the group reports it.
    pub async fn health_of(
        &self,
        topology: &AvailabilityGroupTopology,
        replica: &str,
    ) -> Result<Option<HealthState>, AgError> {
        let wanted = super::short_name(replica);
        Ok(self
            .read(topology)
            .await?
            .into_iter()
            .find(|s| super::short_name(&s.replica) == wanted)
            .map(|s| s.synchronization_health))
    }
}

/// Reads per-database synchronization state on every replica.
#[derive(Clone)]
pub struct DatabaseStateReader {
    executor: QueryExecutor,
}

impl DatabaseStateReader {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    /// A database whose group id cannot be resolved is skipped with a warning;
    /// a connection failure fails the whole group.
    pub async fn read(&self, topology: &AvailabilityGroupTopology) -> Result<Vec<DatabaseReplicationState>, AgError> {
        topology.validate()?;
        let target = target_of(topology);
        let mut states = Vec::new();

        for database in &topology.databases {
            let lookup = self
                .executor
                .query_one(target, MASTER, &Query::database_id_lookup(&topology.group_id, database))
                .await?;
            let Some(group_database_id) = lookup.first().and_then(|r| r.text("group_database_id")) else {
                tracing::warn!("{}: no group database id for {}; skipping", topology.name, database);
                continue;
            };

            let rows = self
                .executor
                .query_one(target, MASTER, &Query::database_replica_states(group_database_id))
                .await?;

            for row in &rows {
                let queue = non_negative(row.int("log_send_queue_size"));
                let rate = non_negative(row.int("log_send_rate"));
                states.push(DatabaseReplicationState {
                    group: topology.name.clone(),
                    database: database.clone(),
                    replica: required_text(row, "replica_server_name")?,
                    synchronization_state: required_enum(row, "synchronization_state_desc")?,
                    synchronization_health: required_enum(row, "synchronization_health_desc")?,
                    is_failover_ready: row.bool("is_failover_ready").unwrap_or(false),
                    is_suspended: row.bool("is_suspended").unwrap_or(false),
                    log_send_queue_size_kb: queue,
                    log_send_rate_kb_per_sec: rate,
                    estimated_catchup: CatchupEstimate::compute(queue, rate),
                });
            }
        }

        Ok(states)
    }
}

fn non_negative(value: Option<i64>) -> u64 {
    value.unwrap_or(0).max(0) as u64
}
