//! Availability Group snapshot types.
//!
//! Every value here is a fresh snapshot built from one round of queries;
//! nothing is cached or mutated after construction.

use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::AgError;
use crate::sql::Row;

macro_rules! catalog_enum {
    ($name:ident { $($variant:ident => $($desc:literal)|+),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub enum $name {
            $($variant),+
        }

        impl FromStr for $name {
            type Err = AgError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($($desc)|+ => Ok($name::$variant),)+
                    _ => Err(AgError::UnexpectedValue {
                        field: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

catalog_enum!(HealthState {
    Healthy => "HEALTHY",
    PartiallyHealthy => "PARTIALLY_HEALTHY",
    NotHealthy => "NOT_HEALTHY",
});

// RESOLVING replicas are not primary, so they fold into Secondary.
catalog_enum!(ReplicaRole {
    Primary => "PRIMARY",
    Secondary => "SECONDARY" | "RESOLVING",
});

catalog_enum!(AvailabilityMode {
    Synchronous => "SYNCHRONOUS_COMMIT",
    Asynchronous => "ASYNCHRONOUS_COMMIT",
});

catalog_enum!(FailoverMode {
    Automatic => "AUTOMATIC",
    Manual => "MANUAL",
});

catalog_enum!(ConnectionState {
    Connected => "CONNECTED",
    Disconnected => "DISCONNECTED",
});

catalog_enum!(SynchronizationState {
    NotSynchronizing => "NOT SYNCHRONIZING" | "NOT_SYNCHRONIZING",
    Synchronizing => "SYNCHRONIZING",
    Synchronized => "SYNCHRONIZED",
    Reverting => "REVERTING",
    Initializing => "INITIALIZING",
});

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Healthy => "Healthy",
            HealthState::PartiallyHealthy => "PartiallyHealthy",
            HealthState::NotHealthy => "NotHealthy",
        };
        write!(f, "{}", s)
    }
}

/// Replica operational state, collapsed to two values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationalState {
    Online,
    Passive,
}

impl OperationalState {
    /// `ONLINE` is Online; every other description (or none) is Passive.
    pub fn from_desc(desc: Option<&str>) -> Self {
        match desc {
            Some(d) if d.trim().eq_ignore_ascii_case("ONLINE") => OperationalState::Online,
            _ => OperationalState::Passive,
        }
    }
}

/// One Availability Group as seen from its primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityGroupTopology {
    pub name: String,
    pub group_id: String,
    pub primary_replica: String,
    pub replicas: BTreeSet<String>,
    pub synchronous_replicas: BTreeSet<String>,
    pub asynchronous_replicas: BTreeSet<String>,
    pub databases: BTreeSet<String>,
    pub listener_dns_names: BTreeSet<String>,
    pub health_state: HealthState,
}

impl AvailabilityGroupTopology {
    /// Check the fields downstream stages rely on.
    pub fn validate(&self) -> Result<(), AgError> {
        let invalid = |reason: String| AgError::InvalidTopology {
            group: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("group name is empty".to_string()));
        }
        if self.group_id.trim().is_empty() {
            return Err(invalid("group id is empty".to_string()));
        }
        if self.replicas.is_empty() {
            return Err(invalid("replica list is empty".to_string()));
        }
        if self.replica(&self.primary_replica).is_none() {
            return Err(invalid(format!(
                "primary {} is not in the replica list",
                self.primary_replica
            )));
        }
        for replica in &self.replicas {
            let sync = self.synchronous_replicas.contains(replica);
            let async_ = self.asynchronous_replicas.contains(replica);
            if sync == async_ {
                return Err(invalid(format!(
                    "replica {} must be exactly one of synchronous or asynchronous",
                    replica
                )));
            }
        }
        if self.synchronous_replicas.len() + self.asynchronous_replicas.len() != self.replicas.len() {
            return Err(invalid("commit-mode partition names unknown replicas".to_string()));
        }
        Ok(())
    }

    /// Canonical replica name matching `name`, ignoring case and domain suffix.
    pub fn replica(&self, name: &str) -> Option<&str> {
        let wanted = short_name(name);
        self.replicas
            .iter()
            .find(|r| short_name(r) == wanted)
            .map(String::as_str)
    }

    pub fn is_primary(&self, name: &str) -> bool {
        short_name(&self.primary_replica) == short_name(name)
    }

    pub fn is_asynchronous(&self, name: &str) -> bool {
        self.replica(name)
            .map(|r| self.asynchronous_replicas.contains(r))
            .unwrap_or(false)
    }

    pub fn listener(&self) -> Option<&str> {
        self.listener_dns_names.iter().next().map(String::as_str)
    }

    /// Where state readers connect: the listener, or the primary when none
    /// is configured.
    pub fn query_target(&self) -> &str {
        self.listener().unwrap_or(&self.primary_replica)
    }
}

/// Upper-cased host name without domain suffix or instance.
pub fn short_name(name: &str) -> String {
    let host = name.split(['\\', ',']).next().unwrap_or(name);
    host.split('.').next().unwrap_or(host).trim().to_ascii_uppercase()
}

/// Cluster node (and computer) name hosting a replica: the replica name
/// without `\instance` or `,port`.
pub fn cluster_node_of(replica: &str) -> &str {
    replica.split(['\\', ',']).next().unwrap_or(replica).trim()
}

/// Per (group, replica) snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaState {
    pub group: String,
    pub replica: String,
    pub role: ReplicaRole,
    pub availability_mode: AvailabilityMode,
    pub failover_mode: FailoverMode,
    pub operational_state: OperationalState,
    pub connection_state: ConnectionState,
    pub synchronization_health: HealthState,
}

/// Time for a secondary to drain its log send queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CatchupEstimate {
    Within(Duration),
    /// Data is queued but nothing is being sent.
    Unbounded,
}

impl CatchupEstimate {
    pub fn compute(queue_size_kb: u64, send_rate_kb_per_sec: u64) -> Self {
        if queue_size_kb == 0 {
            return CatchupEstimate::Within(Duration::ZERO);
        }
        if send_rate_kb_per_sec == 0 {
            return CatchupEstimate::Unbounded;
        }
        // Quotients past what a Duration holds count as unbounded.
        Duration::try_from_secs_f64(queue_size_kb as f64 / send_rate_kb_per_sec as f64)
            .map(CatchupEstimate::Within)
            .unwrap_or(CatchupEstimate::Unbounded)
    }
}

impl fmt::Display for CatchupEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatchupEstimate::Unbounded => write!(f, "unbounded"),
            CatchupEstimate::Within(d) => {
                let secs = d.as_secs();
                write!(f, "{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
            }
        }
    }
}

/// Seconds as a number, `null` when unbounded.
impl Serialize for CatchupEstimate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CatchupEstimate::Within(d) => serializer.serialize_f64(d.as_secs_f64()),
            CatchupEstimate::Unbounded => serializer.serialize_none(),
        }
    }
}

/// Per (group, database, replica) snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseReplicationState {
    pub group: String,
    pub database: String,
    pub replica: String,
    pub synchronization_state: SynchronizationState,
    pub synchronization_health: HealthState,
    pub is_failover_ready: bool,
    pub is_suspended: bool,
    pub log_send_queue_size_kb: u64,
    pub log_send_rate_kb_per_sec: u64,
    pub estimated_catchup: CatchupEstimate,
}

impl DatabaseReplicationState {
    /// Unhealthy or suspended data movement.
    pub fn is_at_risk(&self) -> bool {
        self.synchronization_health != HealthState::Healthy || self.is_suspended
    }
}

/// Text column the caller cannot do without.
pub(crate) fn required_text(row: &Row, field: &'static str) -> Result<String, AgError> {
    row.text(field)
        .map(str::to_string)
        .ok_or(AgError::MissingField(field))
}

pub(crate) fn required_enum<T: FromStr<Err = AgError>>(row: &Row, field: &'static str) -> Result<T, AgError> {
    required_text(row, field)?.parse()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// `{primary: A, replicas: [A,B,C], sync: [A,B], async: [C]}`
    pub fn three_node(health: HealthState, listener: bool) -> AvailabilityGroupTopology {
        let set = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();
        AvailabilityGroupTopology {
            name: "AG1".to_string(),
            group_id: "6f1c2e4a-0000-4000-8000-000000000001".to_string(),
            primary_replica: "A".to_string(),
            replicas: set(&["A", "B", "C"]),
            synchronous_replicas: set(&["A", "B"]),
            asynchronous_replicas: set(&["C"]),
            databases: set(&["Orders", "Sales"]),
            listener_dns_names: if listener { set(&["ag1-listener"]) } else { BTreeSet::new() },
            health_state: health,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::three_node;
    use super::*;

    #[test]
    fn test_catalog_descriptions_parse() {
        assert_eq!("PARTIALLY_HEALTHY".parse::<HealthState>().unwrap(), HealthState::PartiallyHealthy);
        assert_eq!("resolving".parse::<ReplicaRole>().unwrap(), ReplicaRole::Secondary);
        assert_eq!(
            "NOT SYNCHRONIZING".parse::<SynchronizationState>().unwrap(),
            SynchronizationState::NotSynchronizing
        );
        assert!("SOMETIMES".parse::<AvailabilityMode>().is_err());
    }

    #[test]
    fn test_operational_state_collapses() {
        assert_eq!(OperationalState::from_desc(Some("ONLINE")), OperationalState::Online);
        assert_eq!(OperationalState::from_desc(Some("PENDING_FAILOVER")), OperationalState::Passive);
        assert_eq!(OperationalState::from_desc(None), OperationalState::Passive);
    }

    #[test]
    fn test_topology_partition_is_validated() {
        let good = three_node(HealthState::Healthy, true);
        assert!(good.validate().is_ok());

        let mut both = good.clone();
        both.asynchronous_replicas.insert("B".to_string());
        assert!(matches!(both.validate(), Err(AgError::InvalidTopology { .. })));

        let mut neither = good.clone();
        neither.synchronous_replicas.remove("B");
        assert!(neither.validate().is_err());

        let mut stray_primary = good;
        stray_primary.primary_replica = "Z".to_string();
        assert!(stray_primary.validate().is_err());
    }

    #[test]
    fn test_replica_matching_ignores_case_and_domain() {
        let topo = three_node(HealthState::Healthy, true);
        assert_eq!(topo.replica("c.corp.local"), Some("C"));
        assert!(topo.is_primary("a"));
        assert!(topo.is_asynchronous("C"));
        assert!(!topo.is_asynchronous("B"));
        assert_eq!(topo.replica("D"), None);
    }

    #[test]
    fn test_query_target_prefers_listener() {
        assert_eq!(three_node(HealthState::Healthy, true).query_target(), "ag1-listener");
        assert_eq!(three_node(HealthState::Healthy, false).query_target(), "A");
    }

    #[test]
    fn test_catchup_with_zero_rate_is_unbounded() {
        assert_eq!(CatchupEstimate::compute(2048, 0), CatchupEstimate::Unbounded);
        assert_eq!(CatchupEstimate::compute(0, 0), CatchupEstimate::Within(Duration::ZERO));
        assert_eq!(
            CatchupEstimate::compute(600, 10),
            CatchupEstimate::Within(Duration::from_secs(60))
        );
        assert_eq!(serde_json::to_string(&CatchupEstimate::Unbounded).unwrap(), "null");
        assert_eq!(CatchupEstimate::compute(7200, 1).to_string(), "02:00:00");
        assert_eq!(CatchupEstimate::compute(u64::MAX, 1), CatchupEstimate::Unbounded);
    }
}
