//! Multi-target query execution.
//!
//! One connection per target, opened and closed inside the connector. Targets
//! are processed in input order; a failing target is reported and the batch
//! moves on.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::{Credential, Query, QueryOutput, Row, ServerAddress, ServerMessage, SqlError, SqlValue};

/// Column appended to every row naming the server it came from.
pub const SERVER_COLUMN: &str = "ServerInstance";

/// Opens a connection, runs one statement, and closes the connection.
#[async_trait]
pub trait SqlConnector: Send + Sync {
    async fn run(
        &self,
        server: &ServerAddress,
        database: &str,
        query: &Query,
        options: &QueryOptions,
    ) -> Result<QueryOutput, SqlError>;
}

/// Per-call executor options.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub multi_subnet_failover: bool,
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
    pub credential: Credential,
    /// Skip the [`SERVER_COLUMN`] augmentation.
    pub suppress_server_column: bool,
    /// Print informational server messages on stdout instead of the log.
    pub messages_to_stdout: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            multi_subnet_failover: true,
            command_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(15),
            credential: Credential::Integrated,
            suppress_server_column: false,
            messages_to_stdout: false,
        }
    }
}

/// How a batch of targets is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// One target at a time, in input order.
    #[default]
    Sequential,
    /// Up to N targets in flight; results still come back in input order.
    Bounded(usize),
}

/// What happened on one target.
#[derive(Debug, Clone)]
pub enum TargetResult {
    Rows(Vec<Row>),
    NoRecords,
    Failed(SqlError),
}

/// Per-target outcome of a batch.
#[derive(Debug, Clone)]
pub struct TargetOutcome {
    pub server: String,
    pub result: TargetResult,
    /// Non-zero server messages, surfaced as recoverable errors.
    pub errors: Vec<ServerMessage>,
}

impl TargetOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.result, TargetResult::Failed(_))
    }

    #[cfg(test)]
    pub fn rows(&self) -> &[Row] {
        match &self.result {
            TargetResult::Rows(rows) => rows,
            _ => &[],
        }
    }

    pub fn report(&self) -> TargetReport<'_> {
        let (status, rows, error) = match &self.result {
            TargetResult::Rows(rows) => ("rows", rows.as_slice(), None),
            TargetResult::NoRecords => ("no records", &[][..], None),
            TargetResult::Failed(e) => ("failed", &[][..], Some(e.to_string())),
        };
        TargetReport {
            server: &self.server,
            status,
            rows,
            error,
            messages: &self.errors,
        }
    }
}

/// Serializable view of a [`TargetOutcome`] for CLI output.
#[derive(Debug, Serialize)]
pub struct TargetReport<'a> {
    pub server: &'a str,
    pub status: &'static str,
    pub rows: &'a [Row],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "no_messages")]
    pub messages: &'a [ServerMessage],
}

fn no_messages(messages: &&[ServerMessage]) -> bool {
    messages.is_empty()
}

/// Runs statements against one or more servers through a [`SqlConnector`].
#[derive(Clone)]
pub struct QueryExecutor {
    connector: Arc<dyn SqlConnector>,
    options: QueryOptions,
    concurrency: Concurrency,
}

impl QueryExecutor {
    pub fn new(connector: Arc<dyn SqlConnector>, options: QueryOptions) -> Self {
        Self {
            connector,
            options,
            concurrency: Concurrency::Sequential,
        }
    }

    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Copy of this executor with different options.
    pub fn with_options(&self, options: QueryOptions) -> Self {
        Self {
            connector: self.connector.clone(),
            options,
            concurrency: self.concurrency,
        }
    }

    /// Run `query` against every server, returning one outcome per server in
    /// input order.
    pub async fn execute(&self, servers: &[String], database: &str, query: &Query) -> Vec<TargetOutcome> {
        match self.concurrency {
            Concurrency::Sequential => {
                let mut outcomes = Vec::with_capacity(servers.len());
                for server in servers {
                    outcomes.push(self.run_target(server, database, query).await);
                }
                outcomes
            }
            Concurrency::Bounded(limit) => self.execute_bounded(servers, database, query, limit).await,
        }
    }

    async fn execute_bounded(
        &self,
        servers: &[String],
        database: &str,
        query: &Query,
        limit: usize,
    ) -> Vec<TargetOutcome> {
        let semaphore = Arc::new(Semaphore::new(limit.max(1)));
        let mut handles = Vec::with_capacity(servers.len());

        for server in servers {
            let this = self.clone();
            let semaphore = semaphore.clone();
            let server = server.clone();
            let database = database.to_string();
            let query = query.clone();

            handles.push(tokio::spawn(async move {
                // Held until the target finishes
                let _permit = semaphore.acquire_owned().await;
                this.run_target(&server, &database, &query).await
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (handle, server) in handles.into_iter().zip(servers) {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!("Query task for {} aborted: {}", server, e);
                    outcomes.push(TargetOutcome {
                        server: server.clone(),
                        result: TargetResult::Failed(SqlError::Connection {
                            server: server.clone(),
                            reason: format!("task aborted: {}", e),
                        }),
                        errors: Vec::new(),
                    });
                }
            }
        }
        outcomes
    }

    async fn run_target(&self, server: &str, database: &str, query: &Query) -> TargetOutcome {
        let output = match server.parse::<ServerAddress>() {
            Ok(address) => {
                tracing::debug!(server = %address, query = ?query.id, "Running statement");
                self.connector.run(&address, database, query, &self.options).await
            }
            Err(e) => Err(e),
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("{}", e);
                return TargetOutcome {
                    server: server.to_string(),
                    result: TargetResult::Failed(e),
                    errors: Vec::new(),
                };
            }
        };

        let errors = self.route_messages(server, output.messages);

        let result = if output.rows.is_empty() {
            tracing::info!("No records returned from {}", server);
            TargetResult::NoRecords
        } else if self.options.suppress_server_column {
            TargetResult::Rows(output.rows)
        } else {
            TargetResult::Rows(
                output
                    .rows
                    .into_iter()
                    .map(|row| row.with(SERVER_COLUMN, SqlValue::Text(server.to_string())))
                    .collect(),
            )
        };

        TargetOutcome {
            server: server.to_string(),
            result,
            errors,
        }
    }

    /// Informational messages are logged (or printed); the rest are logged as
    /// errors and handed back.
    fn route_messages(&self, server: &str, messages: Vec<ServerMessage>) -> Vec<ServerMessage> {
        let mut errors = Vec::new();
        for msg in messages {
            if msg.is_informational() {
                if self.options.messages_to_stdout {
                    println!("{}", msg.message);
                } else {
                    tracing::info!("{}: {}", server, msg.message);
                }
            } else {
                tracing::error!(
                    "{}: Msg {}, Line {}: {}",
                    server,
                    msg.number,
                    msg.line,
                    msg.message
                );
                errors.push(msg);
            }
        }
        errors
    }

    /// Run against a single server and hand back its rows.
    ///
    /// "No records" becomes an empty vector; a failed target is an error.
    pub async fn query_one(&self, server: &str, database: &str, query: &Query) -> Result<Vec<Row>, SqlError> {
        let single = self.with_options(QueryOptions {
            suppress_server_column: true,
            ..self.options.clone()
        });
        let outcome = single.run_target(server, database, query).await;
        match outcome.result {
            TargetResult::Rows(rows) => Ok(rows),
            TargetResult::NoRecords => Ok(Vec::new()),
            TargetResult::Failed(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::QueryId;
    use crate::testutil::FakeConnector;

    fn one_row(name: &str) -> QueryOutput {
        QueryOutput::rows(vec![Row::new().with("name", SqlValue::Text(name.to_string()))])
    }

    fn servers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_unreachable_target_is_isolated() {
        let fake = FakeConnector::new()
            .on("sql01", QueryId::AdHoc, one_row("a"))
            .unreachable("sql02")
            .on("sql03", QueryId::AdHoc, one_row("c"));
        let executor = QueryExecutor::new(Arc::new(fake), QueryOptions::default());

        let query = Query::adhoc("SELECT name FROM sys.databases").unwrap();
        let outcomes = executor.execute(&servers(&["sql01", "sql02", "sql03"]), "master", &query).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes.iter().filter(|o| o.is_failed()).count(), 1);
        assert!(outcomes[1].is_failed());
        assert_eq!(outcomes[1].server, "sql02");
        assert_eq!(outcomes[0].rows()[0].text("name"), Some("a"));
        assert_eq!(outcomes[2].rows()[0].text("name"), Some("c"));
    }

    #[tokio::test]
    async fn test_rows_carry_server_column_unless_suppressed() {
        let fake = Arc::new(FakeConnector::new().on("sql01", QueryId::AdHoc, one_row("a")));
        let query = Query::adhoc("SELECT 1").unwrap();

        let executor = QueryExecutor::new(fake.clone(), QueryOptions::default());
        let outcomes = executor.execute(&servers(&["sql01"]), "master", &query).await;
        assert_eq!(outcomes[0].rows()[0].text(SERVER_COLUMN), Some("sql01"));

        let executor = QueryExecutor::new(
            fake,
            QueryOptions {
                suppress_server_column: true,
                ..QueryOptions::default()
            },
        );
        let outcomes = executor.execute(&servers(&["sql01"]), "master", &query).await;
        assert!(outcomes[0].rows()[0].get(SERVER_COLUMN).is_none());
    }

    #[tokio::test]
    async fn test_empty_result_reports_no_records() {
        let fake = FakeConnector::new().on("sql01", QueryId::AdHoc, QueryOutput::default());
        let executor = QueryExecutor::new(Arc::new(fake), QueryOptions::default());
        let query = Query::adhoc("SELECT 1 WHERE 1 = 0").unwrap();

        let outcomes = executor.execute(&servers(&["sql01"]), "master", &query).await;
        assert!(matches!(outcomes[0].result, TargetResult::NoRecords));
    }

    #[tokio::test]
    async fn test_error_messages_are_all_collected() {
        let output = QueryOutput {
            rows: vec![Row::new().with("x", SqlValue::Int(1))],
            messages: vec![
                ServerMessage::info("Changed database context to 'master'."),
                ServerMessage {
                    number: 50000,
                    line: 3,
                    message: "first".to_string(),
                },
                ServerMessage {
                    number: 229,
                    line: 7,
                    message: "permission denied".to_string(),
                },
            ],
        };
        let fake = FakeConnector::new().on("sql01", QueryId::AdHoc, output);
        let executor = QueryExecutor::new(Arc::new(fake), QueryOptions::default());
        let query = Query::adhoc("SELECT 1").unwrap();

        let outcomes = executor.execute(&servers(&["sql01"]), "master", &query).await;
        assert_eq!(outcomes[0].errors.len(), 2);
        assert_eq!(outcomes[0].errors[1].line, 7);
        assert_eq!(outcomes[0].rows().len(), 1);
    }

    #[tokio::test]
    async fn test_bounded_concurrency_keeps_input_order() {
        let fake = FakeConnector::new()
            .on("sql01", QueryId::AdHoc, one_row("a"))
            .on("sql02", QueryId::AdHoc, one_row("b"))
            .unreachable("sql03")
            .on("sql04", QueryId::AdHoc, one_row("d"));
        let executor = QueryExecutor::new(Arc::new(fake), QueryOptions::default())
            .with_concurrency(Concurrency::Bounded(2));
        let query = Query::adhoc("SELECT 1").unwrap();

        let outcomes = executor
            .execute(&servers(&["sql01", "sql02", "sql03", "sql04"]), "master", &query)
            .await;
        let order: Vec<_> = outcomes.iter().map(|o| o.server.as_str()).collect();
        assert_eq!(order, vec!["sql01", "sql02", "sql03", "sql04"]);
        assert!(outcomes[2].is_failed());
    }

    #[tokio::test]
    async fn test_invalid_address_fails_only_that_target() {
        let fake = FakeConnector::new().on("sql01", QueryId::AdHoc, one_row("a"));
        let executor = QueryExecutor::new(Arc::new(fake), QueryOptions::default());
        let query = Query::adhoc("SELECT 1").unwrap();

        let outcomes = executor.execute(&servers(&["bad host", "sql01"]), "master", &query).await;
        assert!(matches!(
            outcomes[0].result,
            TargetResult::Failed(SqlError::InvalidAddress(_))
        ));
        assert!(!outcomes[1].is_failed());
    }

    #[tokio::test]
    async fn test_query_one_propagates_failure() {
        let fake = FakeConnector::new().unreachable("sql09");
        let executor = QueryExecutor::new(Arc::new(fake), QueryOptions::default());
        let result = executor.query_one("sql09", "master", &Query::group_listing()).await;
        tokio_test::assert_err!(result);
    }
}
