//! Replication resume and log shrink.

use serde::Serialize;
use std::collections::BTreeSet;

use super::{AgError, AvailabilityGroupTopology};
use crate::sql::{Query, QueryExecutor};

/// Result of one per-database action.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseAction {
    pub database: String,
    pub server: String,
    pub ok: bool,
    pub detail: String,
}

impl DatabaseAction {
    fn done(database: &str, server: &str, detail: String) -> Self {
        Self {
            database: database.to_string(),
            server: server.to_string(),
            ok: true,
            detail,
        }
    }

    fn failed(database: &str, server: &str, err: &AgError) -> Self {
        Self {
            database: database.to_string(),
            server: server.to_string(),
            ok: false,
            detail: err.to_string(),
        }
    }
}

/// Resume data movement for each database on `server`.
///
/// A failing database is reported and the loop continues.
pub async fn resume_replication(
    executor: &QueryExecutor,
    server: &str,
    databases: &BTreeSet<String>,
) -> Vec<DatabaseAction> {
    let mut results = Vec::with_capacity(databases.len());
    for database in databases {
        let query = Query::resume_database(database);
        match executor.query_one(server, "master", &query).await {
            Ok(_) => {
                tracing::info!("Resumed replication of {} on {}", database, server);
                results.push(DatabaseAction::done(database, server, query.text));
            }
            Err(e) => {
                let err = AgError::from(e);
                tracing::error!("Resuming {} on {} failed: {}", database, server, err);
                results.push(DatabaseAction::failed(database, server, &err));
            }
        }
    }
    results
}

/// Shrinks transaction log files of group databases on the primary.
#[derive(Clone)]
pub struct LogShrinker {
    executor: QueryExecutor,
}

impl LogShrinker {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    /// Shrink every database of the group, or only `only` when given.
    pub async fn shrink(
        &self,
        topology: &AvailabilityGroupTopology,
        only: Option<&str>,
        target_size_mb: u32,
    ) -> Result<Vec<DatabaseAction>, AgError> {
        topology.validate()?;
        let server = topology.query_target();

        let databases: Vec<&String> = match only {
            Some(name) => {
                let found: Vec<_> = topology
                    .databases
                    .iter()
                    .filter(|d| d.eq_ignore_ascii_case(name))
                    .collect();
                if found.is_empty() {
                    tracing::warn!("{} is not a database of {}", name, topology.name);
                }
                found
            }
            None => topology.databases.iter().collect(),
        };

        let mut results = Vec::with_capacity(databases.len());
        for database in databases {
            match self.shrink_one(server, database, target_size_mb).await {
                Ok(action) => results.push(action),
                Err(e) => {
                    tracing::error!("Log shrink of {} aborted: {}", database, e);
                    results.push(DatabaseAction::failed(database, server, &e));
                }
            }
        }
        Ok(results)
    }

    /// An unresolvable log file name aborts this database; no name is guessed.
    async fn shrink_one(&self, server: &str, database: &str, target_size_mb: u32) -> Result<DatabaseAction, AgError> {
        let rows = self
            .executor
            .query_one(server, database, &Query::log_file_name())
            .await?;

        let logical_name = match rows.as_slice() {
            [row] => row.text("name").map(str::to_string),
            _ => None,
        }
        .ok_or_else(|| AgError::LogFileUnresolved {
            database: database.to_string(),
            server: server.to_string(),
        })?;

        self.executor
            .query_one(server, database, &Query::shrink_log_file(&logical_name, target_size_mb))
            .await?;

        tracing::info!(
            "Shrank log {} of {} on {} to {} MB",
            logical_name,
            database,
            server,
            target_size_mb
        );
        Ok(DatabaseAction::done(
            database,
            server,
            format!("shrank {} to {} MB", logical_name, target_size_mb),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ag::fixtures::three_node;
    use crate::ag::HealthState;
    use crate::sql::{QueryId, QueryOptions, SqlParam, SqlValue};
    use crate::testutil::{rows, FakeConnector};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_resume_continues_past_failures() {
        let fake = Arc::new(FakeConnector::new().fail_on(
            "B",
            QueryId::ResumeDatabase,
            "Orders",
        ));
        let executor = QueryExecutor::new(fake, QueryOptions::default());
        let dbs: BTreeSet<String> = ["Orders", "Sales"].iter().map(|s| s.to_string()).collect();

        let results = resume_replication(&executor, "B", &dbs).await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].ok);
        assert!(results[1].ok);
    }

    #[tokio::test]
    async fn test_shrink_uses_resolved_log_name() {
        let fake = Arc::new(FakeConnector::new().on_database(
            "ag1-listener",
            QueryId::LogFileName,
            "Orders",
            rows(vec![vec![("name", SqlValue::Text("Orders_log".to_string()))]]),
        ));
        let shrinker = LogShrinker::new(QueryExecutor::new(fake.clone(), QueryOptions::default()));

        let results = shrinker
            .shrink(&three_node(HealthState::Healthy, true), Some("orders"), 512)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].ok);

        let shrink = fake
            .calls()
            .into_iter()
            .find(|c| c.query == QueryId::ShrinkLogFile)
            .unwrap();
        assert_eq!(shrink.database, "Orders");
        assert_eq!(
            shrink.params,
            vec![SqlParam::Text("Orders_log".to_string()), SqlParam::Int(512)]
        );
    }

    #[tokio::test]
    async fn test_unresolved_log_name_aborts_without_shrinking() {
        let fake = Arc::new(FakeConnector::new());
        let shrinker = LogShrinker::new(QueryExecutor::new(fake.clone(), QueryOptions::default()));

        let results = shrinker
            .shrink(&three_node(HealthState::Healthy, true), None, 0)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.ok));
        assert!(results[0].detail.contains("cannot resolve the log file name"));
        assert!(fake.calls().iter().all(|c| c.query != QueryId::ShrinkLogFile));
    }
}
