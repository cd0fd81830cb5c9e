//! AG health report.

use super::Report;
use crate::ag::DatabaseReplicationState;

pub const HEALTH_REPORT_PREFIX: &str = "AGHealth";

const COLUMNS: &[&str] = &[
    "Availability Group",
    "Database",
    "Replica",
    "Synchronization State",
    "Health",
    "Suspended",
    "Failover Ready",
    "Log Send Queue (KB)",
    "Log Send Rate (KB/s)",
    "Estimated Catch-up",
];

/// One row per database state, grouped by availability group.
pub fn health_report(states: &[DatabaseReplicationState]) -> Report {
    let mut sorted: Vec<&DatabaseReplicationState> = states.iter().collect();
    sorted.sort_by(|a, b| {
        (a.group.as_str(), a.database.as_str(), a.replica.as_str()).cmp(&(
            b.group.as_str(),
            b.database.as_str(),
            b.replica.as_str(),
        ))
    });

    let mut report = Report::new("Availability Group Health", COLUMNS);
    for s in sorted {
        report.push(
            &s.group,
            vec![
                s.group.clone(),
                s.database.clone(),
                s.replica.clone(),
                format!("{:?}", s.synchronization_state),
                s.synchronization_health.to_string(),
                yes_no(s.is_suspended),
                yes_no(s.is_failover_ready),
                s.log_send_queue_size_kb.to_string(),
                s.log_send_rate_kb_per_sec.to_string(),
                s.estimated_catchup.to_string(),
            ],
            s.is_at_risk(),
        );
    }
    report
}

fn yes_no(flag: bool) -> String {
    if flag { "Yes" } else { "No" }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ag::{CatchupEstimate, HealthState, SynchronizationState};
    use std::time::Duration;

    fn state(group: &str, database: &str, health: HealthState, suspended: bool) -> DatabaseReplicationState {
        DatabaseReplicationState {
            group: group.to_string(),
            database: database.to_string(),
            replica: "SQL02".to_string(),
            synchronization_state: SynchronizationState::Synchronized,
            synchronization_health: health,
            is_failover_ready: true,
            is_suspended: suspended,
            log_send_queue_size_kb: 0,
            log_send_rate_kb_per_sec: 0,
            estimated_catchup: CatchupEstimate::Within(Duration::ZERO),
        }
    }

    #[test]
    fn test_unhealthy_or_suspended_rows_fail() {
        let report = health_report(&[
            state("AG2", "Sales", HealthState::Healthy, false),
            state("AG1", "Orders", HealthState::PartiallyHealthy, false),
            state("AG1", "Audit", HealthState::Healthy, true),
        ]);
        assert_eq!(report.failed_count(), 2);
        let groups: Vec<_> = report.rows.iter().map(|r| r.group.as_str()).collect();
        assert_eq!(groups, vec!["AG1", "AG1", "AG2"]);
        assert_eq!(report.rows[0].cells[1], "Audit");
        assert_eq!(report.rows[2].cells[9], "00:00:00");
    }

    #[test]
    fn test_all_healthy_has_no_failed_section() {
        let report = health_report(&[state("AG1", "Orders", HealthState::Healthy, false)]);
        let html = report.render().unwrap();
        assert!(!html.contains("<h2>Failed</h2>"));
        assert!(html.contains("Orders"));
    }
}
