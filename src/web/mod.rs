//! Read-only status web view.

mod handlers;

use crate::config::AppConfig;
use crate::sql::QueryExecutor;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub executor: QueryExecutor,
    /// Servers or listeners the topology is discovered from on every request.
    pub seeds: Arc<Vec<String>>,
}

/// Web server for the status view.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: AppConfig, executor: QueryExecutor, seeds: Vec<String>) -> Self {
        Self {
            state: AppState {
                config,
                executor,
                seeds: Arc::new(seeds),
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            // Live health report
            .route("/", get(handlers::handle_health_page))
            // JSON snapshots
            .route("/api/topology", get(handlers::handle_topology))
            .route("/api/replicas", get(handlers::handle_replicas))
            .route("/api/databases", get(handlers::handle_databases))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!(
            "Status view listening on {} for {} seed(s)",
            addr,
            self.state.seeds.len()
        );

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
