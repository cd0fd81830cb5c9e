//! Shared test helpers, available to all `#[cfg(test)]` modules in the crate.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::cluster::{ClusterError, ClusterGroup, ClusterNode, ClusterPort, GroupState};
use crate::prompt::Confirm;
use crate::sql::{
    Query, QueryId, QueryOptions, QueryOutput, Row, ServerAddress, ServerMessage, SqlConnector, SqlError, SqlParam,
    SqlValue,
};

/// Build a result set from `(column, value)` pairs.
pub fn rows(data: Vec<Vec<(&str, SqlValue)>>) -> QueryOutput {
    QueryOutput::rows(
        data.into_iter()
            .map(|cols| cols.into_iter().fold(Row::new(), |row, (name, value)| row.with(name, value)))
            .collect(),
    )
}

/// One statement seen by [`FakeConnector`].
#[derive(Debug, Clone)]
pub struct Call {
    pub server: String,
    pub database: String,
    pub query: QueryId,
    pub text: String,
    pub params: Vec<SqlParam>,
}

struct Rule {
    server: String,
    query: Option<QueryId>,
    needle: Option<String>,
    database: Option<String>,
    response: Result<QueryOutput, SqlError>,
}

impl Rule {
    fn matches(&self, server: &str, database: &str, query: &Query) -> bool {
        if !self.server.eq_ignore_ascii_case(server) {
            return false;
        }
        if self.query.is_some_and(|id| id != query.id) {
            return false;
        }
        if let Some(db) = &self.database {
            if !db.eq_ignore_ascii_case(database) {
                return false;
            }
        }
        match &self.needle {
            Some(needle) => {
                query.text.contains(needle.as_str())
                    || query.params.iter().any(|p| match p {
                        SqlParam::Text(s) => s.eq_ignore_ascii_case(needle),
                        SqlParam::Int(_) => false,
                    })
            }
            None => true,
        }
    }
}

/// Scripted [`SqlConnector`]. The first matching rule answers; statements
/// nothing matches return no rows.
#[derive(Default)]
pub struct FakeConnector {
    rules: Vec<Rule>,
    calls: Mutex<Vec<Call>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(
        mut self,
        server: &str,
        query: Option<QueryId>,
        needle: Option<&str>,
        database: Option<&str>,
        response: Result<QueryOutput, SqlError>,
    ) -> Self {
        self.rules.push(Rule {
            server: server.to_string(),
            query,
            needle: needle.map(str::to_string),
            database: database.map(str::to_string),
            response,
        });
        self
    }

    pub fn on(self, server: &str, query: QueryId, output: QueryOutput) -> Self {
        self.rule(server, Some(query), None, None, Ok(output))
    }

    /// Answer only when a text parameter equals `needle` or the statement
    /// text contains it.
    pub fn on_param(self, server: &str, query: QueryId, needle: &str, output: QueryOutput) -> Self {
        self.rule(server, Some(query), Some(needle), None, Ok(output))
    }

    pub fn on_database(self, server: &str, query: QueryId, database: &str, output: QueryOutput) -> Self {
        self.rule(server, Some(query), None, Some(database), Ok(output))
    }

    /// Raise a server error for the matching statement.
    pub fn fail_on(self, server: &str, query: QueryId, needle: &str) -> Self {
        let err = SqlError::Execution {
            server: server.to_string(),
            message: ServerMessage {
                number: 50000,
                line: 1,
                message: format!("scripted failure for {}", needle),
            },
        };
        self.rule(server, Some(query), Some(needle), None, Err(err))
    }

    /// Every statement against `server` fails to connect.
    pub fn unreachable(self, server: &str) -> Self {
        let err = SqlError::Connection {
            server: server.to_string(),
            reason: "connection refused".to_string(),
        };
        self.rule(server, None, None, None, Err(err))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlConnector for FakeConnector {
    async fn run(
        &self,
        server: &ServerAddress,
        database: &str,
        query: &Query,
        _options: &QueryOptions,
    ) -> Result<QueryOutput, SqlError> {
        let server = server.to_string();
        self.calls.lock().unwrap().push(Call {
            server: server.clone(),
            database: database.to_string(),
            query: query.id,
            text: query.text.clone(),
            params: query.params.clone(),
        });

        self.rules
            .iter()
            .find(|r| r.matches(&server, database, query))
            .map(|r| r.response.clone())
            .unwrap_or_else(|| Ok(QueryOutput::default()))
    }
}

/// In-memory [`ClusterPort`] that records every call as a short string.
#[derive(Default)]
pub struct FakeCluster {
    groups: Mutex<Vec<ClusterGroup>>,
    nodes: Vec<ClusterNode>,
    failing_moves: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups(self, groups: Vec<ClusterGroup>) -> Self {
        *self.groups.lock().unwrap() = groups;
        self
    }

    pub fn with_nodes(mut self, names: &[&str]) -> Self {
        self.nodes = names
            .iter()
            .map(|name| ClusterNode {
                name: name.to_string(),
                state: "Up".to_string(),
                node_weight: 1,
            })
            .collect();
        self
    }

    pub fn failing_move(mut self, group: &str) -> Self {
        self.failing_moves.push(group.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ClusterPort for FakeCluster {
    async fn list_groups(&self, cluster: &str) -> Result<Vec<ClusterGroup>, ClusterError> {
        self.record(format!("list_groups {}", cluster));
        Ok(self.groups.lock().unwrap().clone())
    }

    async fn move_group(&self, cluster: &str, group: &str, node: &str) -> Result<ClusterGroup, ClusterError> {
        self.record(format!("move_group {} {}", group, node));
        if self.failing_moves.iter().any(|g| g == group) {
            return Err(ClusterError::Command {
                cluster: cluster.to_string(),
                message: format!("cannot move {}", group),
            });
        }

        let mut groups = self.groups.lock().unwrap();
        let entry = groups
            .iter_mut()
            .find(|g| g.name == group)
            .ok_or_else(|| ClusterError::Parse(format!("no group {}", group)))?;
        entry.owner_node = Some(node.to_string());
        entry.state = GroupState::Online;
        Ok(entry.clone())
    }

    async fn list_nodes(&self, cluster: &str) -> Result<Vec<ClusterNode>, ClusterError> {
        self.record(format!("list_nodes {}", cluster));
        Ok(self.nodes.clone())
    }

    async fn set_node_weight(&self, _cluster: &str, node: &str, weight: u32) -> Result<(), ClusterError> {
        self.record(format!("set_node_weight {} {}", node, weight));
        Ok(())
    }

    async fn stop_node(&self, _cluster: &str, node: &str) -> Result<(), ClusterError> {
        self.record(format!("stop_node {}", node));
        Ok(())
    }

    async fn start_node_fix_quorum(&self, _cluster: &str, node: &str) -> Result<(), ClusterError> {
        self.record(format!("start_node_fix_quorum {}", node));
        Ok(())
    }
}

/// [`Confirm`] with a fixed answer that remembers every prompt.
pub struct ScriptedConfirm {
    answer: bool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedConfirm {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Confirm for ScriptedConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answer
    }
}
