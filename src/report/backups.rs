//! Backup status per database, read from `msdb` backup history.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use super::Report;
use crate::sql::{Query, QueryExecutor, Row, TargetResult};

pub const BACKUP_REPORT_PREFIX: &str = "BackupStatus";

const COLUMNS: &[&str] = &[
    "Server",
    "Database",
    "Recovery Model",
    "Last Full Backup",
    "Last Log Backup",
    "Status",
];

/// Age limits for a database to count as protected.
#[derive(Debug, Clone, Copy)]
pub struct BackupPolicy {
    pub max_full_age: Duration,
    /// Checked only for databases in FULL recovery.
    pub max_log_age: Option<Duration>,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            max_full_age: Duration::days(7),
            max_log_age: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupStatus {
    pub server: String,
    pub database: String,
    pub recovery_model: Option<String>,
    pub last_full_backup: Option<NaiveDateTime>,
    pub last_log_backup: Option<NaiveDateTime>,
    pub at_risk: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A server whose history could not be read.
#[derive(Debug, Clone, Serialize)]
pub struct BackupReadFailure {
    pub server: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackupSnapshot {
    pub statuses: Vec<BackupStatus>,
    pub failures: Vec<BackupReadFailure>,
}

impl BackupPolicy {
    /// Why the database is unprotected at `now`, if it is.
    pub fn assess(&self, status: &BackupStatus, now: NaiveDateTime) -> Option<String> {
        let Some(full) = status.last_full_backup else {
            return Some("no full backup".to_string());
        };
        if now - full > self.max_full_age {
            return Some(format!("full backup older than {} days", self.max_full_age.num_days()));
        }

        let full_recovery = status
            .recovery_model
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case("FULL"))
            .unwrap_or(false);
        if let (Some(max_log_age), true) = (self.max_log_age, full_recovery) {
            match status.last_log_backup {
                None => return Some("no log backup".to_string()),
                Some(log) if now - log > max_log_age => {
                    return Some(format!("log backup older than {} minutes", max_log_age.num_minutes()));
                }
                Some(_) => {}
            }
        }
        None
    }
}

/// Reads backup history from every server.
#[derive(Clone)]
pub struct BackupReader {
    executor: QueryExecutor,
}

impl BackupReader {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    /// An unreachable server is recorded as a failure and the rest continue.
    pub async fn read(&self, servers: &[String], policy: &BackupPolicy, now: NaiveDateTime) -> BackupSnapshot {
        let mut snapshot = BackupSnapshot::default();
        let outcomes = self.executor.execute(servers, "msdb", &Query::backup_history()).await;

        for outcome in outcomes {
            match outcome.result {
                TargetResult::Rows(rows) => {
                    for row in &rows {
                        match status_from_row(&outcome.server, row) {
                            Some(mut status) => {
                                status.reason = policy.assess(&status, now);
                                status.at_risk = status.reason.is_some();
                                snapshot.statuses.push(status);
                            }
                            None => tracing::warn!("{}: backup row without a database name", outcome.server),
                        }
                    }
                }
                TargetResult::NoRecords => {}
                TargetResult::Failed(e) => snapshot.failures.push(BackupReadFailure {
                    server: outcome.server,
                    error: e.to_string(),
                }),
            }
        }

        let at_risk = snapshot.statuses.iter().filter(|s| s.at_risk).count();
        tracing::info!(
            "Backup status: {} databases, {} at risk, {} servers unreadable",
            snapshot.statuses.len(),
            at_risk,
            snapshot.failures.len()
        );
        snapshot
    }
}

fn status_from_row(server: &str, row: &Row) -> Option<BackupStatus> {
    Some(BackupStatus {
        server: server.to_string(),
        database: row.text("database_name")?.to_string(),
        recovery_model: row.text("recovery_model_desc").map(str::to_string),
        last_full_backup: row.text("last_full_backup").and_then(parse_db_time),
        last_log_backup: row.text("last_log_backup").and_then(parse_db_time),
        at_risk: false,
        reason: None,
    })
}

/// Parse a server timestamp (ISO 8601 style 126, or the plain datetime form).
fn parse_db_time(s: &str) -> Option<NaiveDateTime> {
    let formats = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    let s = s.trim();
    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    None
}

/// Grouped by server; at-risk databases and unreadable servers fail.
pub fn backup_report(snapshot: &BackupSnapshot) -> Report {
    let mut rows: Vec<(&str, &str, Vec<String>, bool)> = Vec::new();

    for s in &snapshot.statuses {
        rows.push((
            s.server.as_str(),
            s.database.as_str(),
            vec![
                s.server.clone(),
                s.database.clone(),
                s.recovery_model.clone().unwrap_or_default(),
                format_time(s.last_full_backup),
                format_time(s.last_log_backup),
                s.reason.clone().unwrap_or_else(|| "OK".to_string()),
            ],
            s.at_risk,
        ));
    }
    for f in &snapshot.failures {
        rows.push((
            f.server.as_str(),
            "",
            vec![f.server.clone(), String::new(), String::new(), String::new(), String::new(), f.error.clone()],
            true,
        ));
    }
    rows.sort_by(|a, b| (a.0.to_ascii_lowercase(), a.1).cmp(&(b.0.to_ascii_lowercase(), b.1)));

    let mut report = Report::new("Database Backup Status", COLUMNS);
    for (server, _, cells, failed) in rows {
        report.push(server, cells, failed);
    }
    report
}

fn format_time(t: Option<NaiveDateTime>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}
