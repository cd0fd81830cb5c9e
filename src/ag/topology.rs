//! Availability Group discovery.

use std::collections::{BTreeSet, HashSet};

use super::models::{required_enum, required_text, short_name};
use super::{AgError, AvailabilityGroupTopology, AvailabilityMode, HealthState};
use crate::sql::{Query, QueryExecutor};

const MASTER: &str = "master";

/// Builds [`AvailabilityGroupTopology`] records from seed servers.
///
/// A seed is either a cluster node or an AG listener. Listing happens on the
/// seed; details are read from each group's current primary, since replica and
/// listener metadata is only guaranteed current there.
#[derive(Clone)]
pub struct TopologyReader {
    executor: QueryExecutor,
}

impl TopologyReader {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    /// Read every group reachable from the seeds.
    ///
    /// Unreachable seeds and groups are logged and skipped. A group seen from
    /// more than one seed is reported once.
    pub async fn read(&self, seeds: &[String]) -> Vec<AvailabilityGroupTopology> {
        let mut seen = HashSet::new();
        let mut groups = Vec::new();

        for seed in seeds {
            match self.read_seed(seed).await {
                Ok(found) => {
                    for group in found {
                        if seen.insert(group.group_id.to_ascii_lowercase()) {
                            groups.push(group);
                        }
                    }
                }
                Err(e) => tracing::error!("Skipping seed {}: {}", seed, e),
            }
        }

        groups
    }

    /// Read the groups known to one seed.
    ///
    /// Fails only when the seed itself cannot be listed.
    pub async fn read_seed(&self, seed: &str) -> Result<Vec<AvailabilityGroupTopology>, AgError> {
        let rows = self.executor.query_one(seed, MASTER, &Query::group_listing()).await?;

        let mut listed = Vec::with_capacity(rows.len());
        for row in &rows {
            listed.push((required_text(row, "ag_name")?, required_text(row, "primary_replica")?));
        }

        // A seed that names a group is that group's listener.
        let seed_name = short_name(seed);
        if let Some(pos) = listed.iter().position(|(name, _)| short_name(name) == seed_name) {
            let single = listed.swap_remove(pos);
            listed = vec![single];
        }

        if listed.is_empty() {
            tracing::warn!("No availability groups found on {}", seed);
        }

        let mut groups = Vec::with_capacity(listed.len());
        for (name, primary) in listed {
            match self.read_group(&name, &primary).await {
                Ok(group) => groups.push(group),
                Err(e) => tracing::error!("Skipping availability group {} (primary {}): {}", name, primary, e),
            }
        }
        Ok(groups)
    }

    /// Read one group's details from its primary.
    pub async fn read_group(&self, name: &str, primary: &str) -> Result<AvailabilityGroupTopology, AgError> {
        let detail = self
            .executor
            .query_one(primary, MASTER, &Query::group_detail(name))
            .await?;
        let detail = detail
            .first()
            .ok_or_else(|| AgError::GroupNotFound(name.to_string()))?;

        let group_id = required_text(detail, "group_id")?;
        let health_state: HealthState = required_enum(detail, "synchronization_health_desc")?;
        let primary_replica = detail
            .text("primary_replica")
            .map(str::to_string)
            .unwrap_or_else(|| primary.to_string());

        let mut replicas = BTreeSet::new();
        let mut synchronous_replicas = BTreeSet::new();
        let mut asynchronous_replicas = BTreeSet::new();
        for row in self
            .executor
            .query_one(primary, MASTER, &Query::group_replicas(name))
            .await?
        {
            let replica = required_text(&row, "replica_server_name")?;
            let mode = required_text(&row, "availability_mode_desc")?;
            if mode.eq_ignore_ascii_case("CONFIGURATION_ONLY") {
                // Holds cluster configuration only; never a failover target.
                tracing::debug!("Ignoring configuration-only replica {} of {}", replica, name);
                continue;
            }
            match mode.parse::<AvailabilityMode>()? {
                AvailabilityMode::Synchronous => synchronous_replicas.insert(replica.clone()),
                AvailabilityMode::Asynchronous => asynchronous_replicas.insert(replica.clone()),
            };
            replicas.insert(replica);
        }

        let databases = self
            .executor
            .query_one(primary, MASTER, &Query::group_databases(name))
            .await?
            .iter()
            .map(|row| required_text(row, "database_name"))
            .collect::<Result<BTreeSet<_>, _>>()?;

        let listener_dns_names = self
            .executor
            .query_one(primary, MASTER, &Query::group_listeners(name))
            .await?
            .iter()
            .map(|row| required_text(row, "dns_name"))
            .collect::<Result<BTreeSet<_>, _>>()?;

        let topology = AvailabilityGroupTopology {
            name: name.to_string(),
            group_id,
            primary_replica,
            replicas,
            synchronous_replicas,
            asynchronous_replicas,
            databases,
            listener_dns_names,
            health_state,
        };
        topology.validate()?;

        tracing::debug!(
            "Read {}: primary {}, {} replicas, {} databases",
            topology.name,
            topology.primary_replica,
            topology.replicas.len(),
            topology.databases.len()
        );
        Ok(topology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{QueryId, QueryOptions, SqlValue};
    use crate::testutil::{rows, FakeConnector};
    use std::sync::Arc;

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.to_string())
    }

    /// One group AG1 with primary SQL01 and an async replica SQL03.
    fn ag1_fixture(fake: FakeConnector) -> FakeConnector {
        fake.on(
            "SQL01",
            QueryId::GroupDetail,
            rows(vec![vec![
                ("group_id", text("6F1C2E4A-0000-4000-8000-000000000001")),
                ("primary_replica", text("SQL01")),
                ("synchronization_health_desc", text("HEALTHY")),
            ]]),
        )
        .on(
            "SQL01",
            QueryId::GroupReplicas,
            rows(vec![
                vec![("replica_server_name", text("SQL03")), ("availability_mode_desc", text("ASYNCHRONOUS_COMMIT"))],
                vec![("replica_server_name", text("SQL01")), ("availability_mode_desc", text("SYNCHRONOUS_COMMIT"))],
                vec![("replica_server_name", text("SQL02")), ("availability_mode_desc", text("SYNCHRONOUS_COMMIT"))],
            ]),
        )
        .on(
            "SQL01",
            QueryId::GroupDatabases,
            rows(vec![vec![("database_name", text("Sales"))], vec![("database_name", text("Orders"))]]),
        )
        .on(
            "SQL01",
            QueryId::GroupListeners,
            rows(vec![vec![("dns_name", text("ag1-listener"))]]),
        )
    }

    fn listing(groups: &[(&str, &str)]) -> crate::sql::QueryOutput {
        rows(
            groups
                .iter()
                .map(|(name, primary)| vec![("ag_name", text(name)), ("primary_replica", text(primary))])
                .collect(),
        )
    }

    fn reader(fake: FakeConnector) -> (TopologyReader, Arc<FakeConnector>) {
        let fake = Arc::new(fake);
        let executor = QueryExecutor::new(fake.clone(), QueryOptions::default());
        (TopologyReader::new(executor), fake)
    }

    #[tokio::test]
    async fn test_reads_details_from_primary() {
        let fake = ag1_fixture(FakeConnector::new().on("SQL02", QueryId::GroupListing, listing(&[("AG1", "SQL01")])));
        let (reader, fake) = reader(fake);

        let groups = reader.read(&["SQL02".to_string()]).await;
        assert_eq!(groups.len(), 1);
        let ag = &groups[0];
        assert_eq!(ag.primary_replica, "SQL01");
        assert_eq!(ag.asynchronous_replicas.iter().collect::<Vec<_>>(), vec!["SQL03"]);
        assert_eq!(ag.databases.iter().collect::<Vec<_>>(), vec!["Orders", "Sales"]);
        assert_eq!(ag.listener(), Some("ag1-listener"));

        // Details never come from the seed.
        assert!(fake
            .calls()
            .iter()
            .filter(|c| c.query != QueryId::GroupListing)
            .all(|c| c.server == "SQL01"));
    }

    #[tokio::test]
    async fn test_listener_seed_narrows_to_its_group() {
        let fake = ag1_fixture(
            FakeConnector::new().on("ag1.corp.local", QueryId::GroupListing, listing(&[("AG2", "SQL09"), ("AG1", "SQL01")])),
        );
        let (reader, fake) = reader(fake);

        let groups = reader.read(&["ag1.corp.local".to_string()]).await;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "AG1");
        assert!(fake.calls().iter().all(|c| c.server != "SQL09"));
    }

    #[tokio::test]
    async fn test_bad_seed_does_not_abort_batch() {
        let fake = ag1_fixture(
            FakeConnector::new()
                .unreachable("SQLX")
                .on("SQL02", QueryId::GroupListing, listing(&[("AG1", "SQL01")])),
        );
        let (reader, _) = reader(fake);

        let groups = reader.read(&["SQLX".to_string(), "SQL02".to_string()]).await;
        assert_eq!(groups.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_primary_skips_only_that_group() {
        let fake = ag1_fixture(
            FakeConnector::new()
                .unreachable("SQL09")
                .on("SQL02", QueryId::GroupListing, listing(&[("AG1", "SQL01"), ("AG2", "SQL09")])),
        );
        let (reader, _) = reader(fake);

        let groups = reader.read_seed("SQL02").await.unwrap();
        assert_eq!(groups.iter().map(|g| g.name.as_str()).collect::<Vec<_>>(), vec!["AG1"]);
    }

    #[tokio::test]
    async fn test_repeated_reads_are_identical() {
        let fake = ag1_fixture(FakeConnector::new().on("SQL02", QueryId::GroupListing, listing(&[("AG1", "SQL01")])));
        let (reader, _) = reader(fake);
        let seeds = vec!["SQL02".to_string()];

        let first = reader.read(&seeds).await;
        let second = reader.read(&seeds).await;
        assert_eq!(
            serde_json::to_vec(&first[0].databases).unwrap(),
            serde_json::to_vec(&second[0].databases).unwrap()
        );
        assert_eq!(
            serde_json::to_vec(&first[0].replicas).unwrap(),
            serde_json::to_vec(&second[0].replicas).unwrap()
        );
    }

    #[tokio::test]
    async fn test_duplicate_groups_across_seeds_are_merged() {
        let fake = ag1_fixture(
            FakeConnector::new()
                .on("SQL02", QueryId::GroupListing, listing(&[("AG1", "SQL01")]))
                .on("SQL03", QueryId::GroupListing, listing(&[("AG1", "SQL01")])),
        );
        let (reader, _) = reader(fake);

        let groups = reader.read(&["SQL02".to_string(), "SQL03".to_string()]).await;
        assert_eq!(groups.len(), 1);
    }
}
