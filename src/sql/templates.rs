//! Fixed statement templates.
//!
//! Values travel as bound parameters (`@P1`, `@P2`, ...). Identifiers in DDL
//! cannot be bound, so they go through [`quote_ident`].

use serde::Serialize;

use super::SqlError;

/// Stable key for every statement the tool issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QueryId {
    AdHoc,
    GroupListing,
    GroupDetail,
    GroupReplicas,
    GroupDatabases,
    GroupListeners,
    DatabaseIdLookup,
    DatabaseReplicaStates,
    ReplicaStates,
    Failover,
    ForceFailover,
    ResumeDatabase,
    LogFileName,
    ShrinkLogFile,
    BackupHistory,
}

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
}

/// Statement text plus its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub id: QueryId,
    pub text: String,
    pub params: Vec<SqlParam>,
}

const GROUP_LISTING: &str = "\
SELECT ag.name AS ag_name, ags.primary_replica
FROM sys.availability_groups_cluster AS ag
JOIN sys.dm_hadr_availability_group_states AS ags ON ag.group_id = ags.group_id
ORDER BY ag.name";

const GROUP_DETAIL: &str = "\
SELECT CONVERT(nvarchar(36), ag.group_id) AS group_id,
       ags.primary_replica,
       ags.synchronization_health_desc
FROM sys.availability_groups AS ag
JOIN sys.dm_hadr_availability_group_states AS ags ON ag.group_id = ags.group_id
WHERE ag.name = @P1";

const GROUP_REPLICAS: &str = "\
SELECT ar.replica_server_name, ar.availability_mode_desc
FROM sys.availability_replicas AS ar
JOIN sys.availability_groups AS ag ON ar.group_id = ag.group_id
WHERE ag.name = @P1";

const GROUP_DATABASES: &str = "\
SELECT adc.database_name
FROM sys.availability_databases_cluster AS adc
JOIN sys.availability_groups AS ag ON adc.group_id = ag.group_id
WHERE ag.name = @P1";

const GROUP_LISTENERS: &str = "\
SELECT agl.dns_name
FROM sys.availability_group_listeners AS agl
JOIN sys.availability_groups AS ag ON agl.group_id = ag.group_id
WHERE ag.name = @P1";

const DATABASE_ID_LOOKUP: &str = "\
SELECT CONVERT(nvarchar(36), adc.group_database_id) AS group_database_id
FROM sys.availability_databases_cluster AS adc
WHERE adc.group_id = CONVERT(uniqueidentifier, @P1) AND adc.database_name = @P2";

const DATABASE_REPLICA_STATES: &str = "\
SELECT ar.replica_server_name,
       drs.synchronization_state_desc,
       drs.synchronization_health_desc,
       drs.is_suspended,
       drcs.is_failover_ready,
       CONVERT(bigint, ISNULL(drs.log_send_queue_size, 0)) AS log_send_queue_size,
       CONVERT(bigint, ISNULL(drs.log_send_rate, 0)) AS log_send_rate
FROM sys.dm_hadr_database_replica_states AS drs
JOIN sys.availability_replicas AS ar ON drs.replica_id = ar.replica_id
JOIN sys.dm_hadr_database_replica_cluster_states AS drcs
  ON drs.replica_id = drcs.replica_id AND drs.group_database_id = drcs.group_database_id
WHERE drs.group_database_id = CONVERT(uniqueidentifier, @P1)";

const REPLICA_STATES: &str = "\
SELECT ar.replica_server_name,
       ars.role_desc,
       ar.availability_mode_desc,
       ar.failover_mode_desc,
       ars.operational_state_desc,
       ars.connected_state_desc,
       ars.synchronization_health_desc
FROM sys.availability_replicas AS ar
JOIN sys.dm_hadr_availability_replica_states AS ars ON ar.replica_id = ars.replica_id
WHERE ar.group_id = CONVERT(uniqueidentifier, @P1)";

const LOG_FILE_NAME: &str = "\
SELECT name FROM sys.database_files WHERE type_desc = 'LOG'";

const SHRINK_LOG_FILE: &str = "DBCC SHRINKFILE (@P1, @P2) WITH NO_INFOMSGS";

const BACKUP_HISTORY: &str = "\
SELECT d.name AS database_name,
       CONVERT(varchar(33), MAX(CASE WHEN b.type = 'D' THEN b.backup_finish_date END), 126) AS last_full_backup,
       CONVERT(varchar(33), MAX(CASE WHEN b.type = 'L' THEN b.backup_finish_date END), 126) AS last_log_backup,
       d.recovery_model_desc
FROM sys.databases AS d
LEFT JOIN msdb.dbo.backupset AS b ON b.database_name = d.name
WHERE d.name <> 'tempdb'
GROUP BY d.name, d.recovery_model_desc
ORDER BY d.name";

/// Bracket-quote an identifier, doubling any closing bracket.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

impl Query {
    fn fixed(id: QueryId, text: &str, params: Vec<SqlParam>) -> Self {
        Self {
            id,
            text: text.to_string(),
            params,
        }
    }

    /// Operator-supplied text. Empty text is rejected.
    pub fn adhoc(text: &str) -> Result<Self, SqlError> {
        if text.trim().is_empty() {
            return Err(SqlError::EmptyQuery);
        }
        Ok(Self::fixed(QueryId::AdHoc, text, Vec::new()))
    }

    pub fn group_listing() -> Self {
        Self::fixed(QueryId::GroupListing, GROUP_LISTING, Vec::new())
    }

    pub fn group_detail(group: &str) -> Self {
        Self::fixed(QueryId::GroupDetail, GROUP_DETAIL, vec![text(group)])
    }

    pub fn group_replicas(group: &str) -> Self {
        Self::fixed(QueryId::GroupReplicas, GROUP_REPLICAS, vec![text(group)])
    }

    pub fn group_databases(group: &str) -> Self {
        Self::fixed(QueryId::GroupDatabases, GROUP_DATABASES, vec![text(group)])
    }

    pub fn group_listeners(group: &str) -> Self {
        Self::fixed(QueryId::GroupListeners, GROUP_LISTENERS, vec![text(group)])
    }

    pub fn database_id_lookup(group_id: &str, database: &str) -> Self {
        Self::fixed(
            QueryId::DatabaseIdLookup,
            DATABASE_ID_LOOKUP,
            vec![text(group_id), text(database)],
        )
    }

    pub fn database_replica_states(group_database_id: &str) -> Self {
        Self::fixed(
            QueryId::DatabaseReplicaStates,
            DATABASE_REPLICA_STATES,
            vec![text(group_database_id)],
        )
    }

    pub fn replica_states(group_id: &str) -> Self {
        Self::fixed(QueryId::ReplicaStates, REPLICA_STATES, vec![text(group_id)])
    }

    /// Planned failover without data loss; runs on the target secondary.
    pub fn failover(group: &str) -> Self {
        Self::fixed(
            QueryId::Failover,
            &format!("ALTER AVAILABILITY GROUP {} FAILOVER", quote_ident(group)),
            Vec::new(),
        )
    }

    /// Forced failover with possible data loss; runs on the target replica.
    pub fn force_failover(group: &str) -> Self {
        Self::fixed(
            QueryId::ForceFailover,
            &format!(
                "ALTER AVAILABILITY GROUP {} FORCE_FAILOVER_ALLOW_DATA_LOSS",
                quote_ident(group)
            ),
            Vec::new(),
        )
    }

    pub fn resume_database(database: &str) -> Self {
        Self::fixed(
            QueryId::ResumeDatabase,
            &format!("ALTER DATABASE {} SET HADR RESUME", quote_ident(database)),
            Vec::new(),
        )
    }

    /// Must run with the target database as connection context.
    pub fn log_file_name() -> Self {
        Self::fixed(QueryId::LogFileName, LOG_FILE_NAME, Vec::new())
    }

    pub fn shrink_log_file(logical_name: &str, target_size_mb: u32) -> Self {
        Self::fixed(
            QueryId::ShrinkLogFile,
            SHRINK_LOG_FILE,
            vec![text(logical_name), SqlParam::Int(target_size_mb as i64)],
        )
    }

    pub fn backup_history() -> Self {
        Self::fixed(QueryId::BackupHistory, BACKUP_HISTORY, Vec::new())
    }
}

fn text(value: &str) -> SqlParam {
    SqlParam::Text(value.to_string())
}
