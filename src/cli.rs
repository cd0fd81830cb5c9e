//! Command-line interface.

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::ag::{
    resume_replication, short_name, DatabaseStateReader, FailoverRequest, FailoverRunner, LogShrinker,
    ReplicaStateReader, TopologyReader,
};
use crate::cluster::{GroupRelocator, PowerShellCluster};
use crate::config::AppConfig;
use crate::prompt::{AssumeYes, Confirm, TerminalConfirm};
use crate::report::{
    backup_report, health_report, write_report, BackupPolicy, BackupReader, BACKUP_REPORT_PREFIX,
    HEALTH_REPORT_PREFIX,
};
use crate::sql::{Query, QueryExecutor, TdsConnector};
use crate::web::Server;

pub type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(name = "agwarden", version, about = "SQL Server Always On Availability Group administration")]
pub struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Connection settings; each overrides the matching `AGWARDEN_*` variable.
#[derive(Args, Debug)]
pub struct ConnectionArgs {
    /// SQL login name (integrated authentication when unset).
    #[arg(long, global = true, env = "AGWARDEN_SQL_USER")]
    pub sql_user: Option<String>,

    #[arg(long, global = true, env = "AGWARDEN_SQL_PASSWORD", hide_env_values = true)]
    pub sql_password: Option<String>,

    /// Per-statement timeout in seconds.
    #[arg(long, global = true)]
    pub command_timeout: Option<u64>,

    /// Per-connection-attempt timeout in seconds.
    #[arg(long, global = true)]
    pub connect_timeout: Option<u64>,

    /// Connect to the first resolved listener address only.
    #[arg(long, global = true)]
    pub no_multi_subnet_failover: bool,

    /// Query up to N servers at once (1 keeps them sequential).
    #[arg(long, global = true)]
    pub max_parallel: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a statement against one or more servers.
    Query {
        #[arg(short, long, value_delimiter = ',', required = true)]
        servers: Vec<String>,
        #[arg(short, long, default_value = "master")]
        database: String,
        /// Statement text.
        #[arg(short, long, conflicts_with = "input_file")]
        query: Option<String>,
        /// Read the statement from a file.
        #[arg(short, long)]
        input_file: Option<PathBuf>,
        /// Do not add the ServerInstance column.
        #[arg(long)]
        no_server_column: bool,
        /// Print informational server messages on stdout. The TDS connector
        /// does not surface PRINT or low-severity messages, so over a real
        /// connection this currently prints nothing.
        #[arg(long)]
        messages_to_stdout: bool,
    },
    /// Discover availability groups from seed servers or listeners.
    Topology {
        #[arg(required = true)]
        seeds: Vec<String>,
    },
    /// Replica states of every discovered group.
    Replicas {
        #[arg(required = true)]
        seeds: Vec<String>,
    },
    /// Database replication states of every discovered group.
    Databases {
        #[arg(required = true)]
        seeds: Vec<String>,
    },
    /// Fail availability groups over to a replica.
    Failover {
        #[arg(required = true)]
        seeds: Vec<String>,
        /// Replica to fail over to.
        #[arg(short, long)]
        target: String,
        /// Limit to these groups.
        #[arg(short, long, value_delimiter = ',')]
        group: Vec<String>,
        /// Allow data loss (asynchronous targets, unhealthy groups).
        #[arg(long)]
        force: bool,
        /// Together with --force: override quorum on the target's cluster.
        #[arg(long, requires = "force")]
        fix_quorum: bool,
        /// Move the cluster core group to the target afterwards.
        #[arg(long)]
        move_cluster_group: bool,
        /// Answer yes to every confirmation.
        #[arg(short, long)]
        yes: bool,
    },
    /// Move cluster resource groups to a node.
    MoveGroup {
        /// Cluster name or any of its nodes.
        #[arg(short, long)]
        cluster: String,
        #[arg(short, long)]
        node: String,
        /// Limit to these groups (all groups when omitted).
        #[arg(short, long, value_delimiter = ',')]
        group: Vec<String>,
    },
    /// Resume data movement on a replica.
    Resume {
        #[arg(short, long)]
        server: String,
        /// Databases to resume (every group database on the server when omitted).
        #[arg(short, long, value_delimiter = ',')]
        database: Vec<String>,
    },
    /// Shrink transaction logs of group databases on the primary.
    ShrinkLog {
        #[arg(required = true)]
        seeds: Vec<String>,
        #[arg(short, long)]
        group: Option<String>,
        #[arg(short, long)]
        database: Option<String>,
        /// Target log size in MB.
        #[arg(long, default_value_t = 0)]
        target_size_mb: u32,
    },
    /// Write the AG health report.
    Report {
        #[arg(required = true)]
        seeds: Vec<String>,
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        #[arg(long, default_value = HEALTH_REPORT_PREFIX)]
        prefix: String,
    },
    /// Write the backup status report.
    BackupReport {
        #[arg(short, long, value_delimiter = ',', required = true)]
        servers: Vec<String>,
        #[arg(long, default_value_t = 7)]
        max_full_age_days: i64,
        /// Also require log backups this recent for FULL recovery databases.
        #[arg(long)]
        max_log_age_minutes: Option<i64>,
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        #[arg(long, default_value = BACKUP_REPORT_PREFIX)]
        prefix: String,
    },
    /// Serve the read-only status view.
    Serve {
        #[arg(required = true)]
        seeds: Vec<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
}

impl ConnectionArgs {
    /// Layer the flags over the environment configuration.
    pub fn apply(&self, cfg: &mut AppConfig) {
        if let Some(user) = &self.sql_user {
            cfg.sql_user = Some(user.clone());
        }
        if let Some(password) = &self.sql_password {
            cfg.sql_password = Some(password.clone());
        }
        if let Some(secs) = self.command_timeout {
            cfg.command_timeout_secs = secs;
        }
        if let Some(secs) = self.connect_timeout {
            cfg.connect_timeout_secs = secs;
        }
        if self.no_multi_subnet_failover {
            cfg.multi_subnet_failover = false;
        }
        if let Some(n) = self.max_parallel {
            cfg.max_parallel = n.max(1);
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn executor(cfg: &AppConfig) -> QueryExecutor {
    QueryExecutor::new(Arc::new(TdsConnector::new()), cfg.query_options()).with_concurrency(cfg.concurrency())
}

#[derive(Serialize)]
struct GroupStates<T: Serialize> {
    group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    states: Option<Vec<T>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> GroupStates<T> {
    fn from_result<E: std::fmt::Display>(group: &str, result: Result<Vec<T>, E>) -> Self {
        match result {
            Ok(states) => Self {
                group: group.to_string(),
                states: Some(states),
                error: None,
            },
            Err(e) => {
                tracing::error!("{}: {}", group, e);
                Self {
                    group: group.to_string(),
                    states: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// Execute one subcommand.
pub async fn run(command: Command, cfg: AppConfig) -> CliResult {
    let exec = executor(&cfg);

    match command {
        Command::Query {
            servers,
            database,
            query,
            input_file,
            no_server_column,
            messages_to_stdout,
        } => {
            let text = match (query, input_file) {
                (Some(text), _) => text,
                (None, Some(path)) => tokio::fs::read_to_string(&path).await?,
                (None, None) => return Err("either --query or --input-file is required".into()),
            };
            let query = Query::adhoc(&text)?;
            let exec = exec.with_options(crate::sql::QueryOptions {
                suppress_server_column: no_server_column,
                messages_to_stdout,
                ..cfg.query_options()
            });

            let outcomes = exec.execute(&servers, &database, &query).await;
            let reports: Vec<_> = outcomes.iter().map(|o| o.report()).collect();
            print_json(&reports)?;

            let failed = outcomes.iter().filter(|o| o.is_failed()).count();
            if failed > 0 {
                return Err(format!("{} of {} targets failed", failed, outcomes.len()).into());
            }
        }

        Command::Topology { seeds } => {
            let groups = TopologyReader::new(exec).read(&seeds).await;
            print_json(&groups)?;
        }

        Command::Replicas { seeds } => {
            let groups = TopologyReader::new(exec.clone()).read(&seeds).await;
            let reader = ReplicaStateReader::new(exec);
            let mut out = Vec::with_capacity(groups.len());
            for topology in &groups {
                out.push(GroupStates::from_result(&topology.name, reader.read(topology).await));
            }
            print_json(&out)?;
        }

        Command::Databases { seeds } => {
            let groups = TopologyReader::new(exec.clone()).read(&seeds).await;
            let reader = DatabaseStateReader::new(exec);
            let mut out = Vec::with_capacity(groups.len());
            for topology in &groups {
                out.push(GroupStates::from_result(&topology.name, reader.read(topology).await));
            }
            print_json(&out)?;
        }

        Command::Failover {
            seeds,
            target,
            group,
            force,
            fix_quorum,
            move_cluster_group,
            yes,
        } => {
            let groups = TopologyReader::new(exec.clone()).read(&seeds).await;
            let requests: Vec<FailoverRequest> = groups
                .into_iter()
                .filter(|t| group.is_empty() || group.iter().any(|g| g.eq_ignore_ascii_case(&t.name)))
                .map(|topology| FailoverRequest {
                    topology,
                    target: target.clone(),
                    force,
                    fix_quorum,
                    move_cluster_group,
                })
                .collect();
            if requests.is_empty() {
                return Err("no matching availability groups found".into());
            }

            let confirm: Box<dyn Confirm> = if yes { Box::new(AssumeYes) } else { Box::new(TerminalConfirm) };
            let runner = FailoverRunner::new(exec, Arc::new(PowerShellCluster::default()), cfg.settle_interval());
            let batch = runner.run_batch(&requests, confirm.as_ref()).await;
            print_json(&batch)?;

            let failed = batch.results.iter().filter(|r| r.error.is_some()).count();
            if failed > 0 {
                return Err(format!("{} of {} failovers failed", failed, batch.results.len()).into());
            }
        }

        Command::MoveGroup { cluster, node, group } => {
            let relocator = GroupRelocator::new(Arc::new(PowerShellCluster::default()));
            let moves = relocator.relocate(&cluster, &node, &group).await?;
            print_json(&moves)?;
        }

        Command::Resume { server, database } => {
            let databases: BTreeSet<String> = if database.is_empty() {
                let wanted = short_name(&server);
                TopologyReader::new(exec.clone())
                    .read(std::slice::from_ref(&server))
                    .await
                    .into_iter()
                    .filter(|t| t.replicas.iter().any(|r| short_name(r) == wanted))
                    .flat_map(|t| t.databases)
                    .collect()
            } else {
                database.into_iter().collect()
            };
            if databases.is_empty() {
                return Err(format!("no availability group databases found on {}", server).into());
            }
            let results = resume_replication(&exec, &server, &databases).await;
            print_json(&results)?;
        }

        Command::ShrinkLog {
            seeds,
            group,
            database,
            target_size_mb,
        } => {
            let groups = TopologyReader::new(exec.clone()).read(&seeds).await;
            let shrinker = LogShrinker::new(exec);
            let mut out = Vec::new();
            for topology in groups
                .iter()
                .filter(|t| group.as_deref().map(|g| g.eq_ignore_ascii_case(&t.name)).unwrap_or(true))
            {
                let result = shrinker.shrink(topology, database.as_deref(), target_size_mb).await;
                out.push(GroupStates::from_result(&topology.name, result));
            }
            print_json(&out)?;
        }

        Command::Report {
            seeds,
            output_dir,
            prefix,
        } => {
            let groups = TopologyReader::new(exec.clone()).read(&seeds).await;
            let reader = DatabaseStateReader::new(exec);
            let mut states = Vec::new();
            for topology in &groups {
                match reader.read(topology).await {
                    Ok(mut s) => states.append(&mut s),
                    Err(e) => tracing::error!("{}: {}", topology.name, e),
                }
            }

            let dir = output_dir.unwrap_or_else(|| cfg.report_dir.clone());
            let path = write_report(&dir, &prefix, &health_report(&states), Local::now().date_naive())?;
            println!("{}", path.display());
        }

        Command::BackupReport {
            servers,
            max_full_age_days,
            max_log_age_minutes,
            output_dir,
            prefix,
        } => {
            let policy = BackupPolicy {
                max_full_age: chrono::Duration::days(max_full_age_days),
                max_log_age: max_log_age_minutes.map(chrono::Duration::minutes),
            };
            let now = Local::now();
            let snapshot = BackupReader::new(exec).read(&servers, &policy, now.naive_local()).await;

            let dir = output_dir.unwrap_or_else(|| cfg.report_dir.clone());
            let path = write_report(&dir, &prefix, &backup_report(&snapshot), now.date_naive())?;
            println!("{}", path.display());
        }

        Command::Serve { seeds, port } => {
            let mut cfg = cfg;
            if let Some(port) = port {
                cfg.http_port = port;
            }
            Server::new(cfg, exec, seeds).start().await?;
        }
    }

    Ok(())
}
