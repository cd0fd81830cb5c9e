//! HTTP request handlers.
//!
//! Every request re-reads topology and state from the seeds.

use super::AppState;
use crate::ag::{AvailabilityGroupTopology, DatabaseStateReader, ReplicaStateReader, TopologyReader};
use crate::report::health_report;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json},
};
use serde::Serialize;

/// Per-group entry of a state snapshot.
#[derive(Debug, Serialize)]
pub struct GroupSnapshot<T> {
    pub group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub states: Option<Vec<T>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn topologies(state: &AppState) -> Vec<AvailabilityGroupTopology> {
    TopologyReader::new(state.executor.clone()).read(&state.seeds).await
}

// ============================================================================
// Pages
// ============================================================================

pub async fn handle_health_page(State(state): State<AppState>) -> impl IntoResponse {
    let reader = DatabaseStateReader::new(state.executor.clone());
    let mut states = Vec::new();
    for topology in topologies(&state).await {
        match reader.read(&topology).await {
            Ok(mut s) => states.append(&mut s),
            Err(e) => tracing::error!("{}: {}", topology.name, e),
        }
    }

    match health_report(&states).render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API
// ============================================================================

pub async fn handle_topology(State(state): State<AppState>) -> impl IntoResponse {
    Json(topologies(&state).await)
}

pub async fn handle_replicas(State(state): State<AppState>) -> impl IntoResponse {
    let reader = ReplicaStateReader::new(state.executor.clone());
    let mut snapshots = Vec::new();
    for topology in topologies(&state).await {
        let result = reader.read(&topology).await;
        snapshots.push(snapshot(&topology, result.map_err(|e| e.to_string())));
    }
    Json(snapshots)
}

pub async fn handle_databases(State(state): State<AppState>) -> impl IntoResponse {
    let reader = DatabaseStateReader::new(state.executor.clone());
    let mut snapshots = Vec::new();
    for topology in topologies(&state).await {
        let result = reader.read(&topology).await;
        snapshots.push(snapshot(&topology, result.map_err(|e| e.to_string())));
    }
    Json(snapshots)
}

fn snapshot<T>(topology: &AvailabilityGroupTopology, result: Result<Vec<T>, String>) -> GroupSnapshot<T> {
    match result {
        Ok(states) => GroupSnapshot {
            group: topology.name.clone(),
            states: Some(states),
            error: None,
        },
        Err(error) => {
            tracing::error!("{}: {}", topology.name, error);
            GroupSnapshot {
                group: topology.name.clone(),
                states: None,
                error: Some(error),
            }
        }
    }
}
