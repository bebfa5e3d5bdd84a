//! nodescale-api: the daemon's HTTP surface.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/deploy` | Request a full-fleet redeploy (body `{"jwt": "..."}`) |
//! | GET | `/api/v1/status` | Control state, nodes, membership, last snapshot, rollout |
//! | GET | `/api/v1/snapshot` | Last fleet snapshot only |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::watch;

use nodescale_core::{DeployTrigger, FleetSnapshot};
use nodescale_health::TokenSigner;
use nodescale_lifecycle::SharedRegistry;
use nodescale_metrics::FleetMetrics;
use nodescale_rollout::DeployOrchestrator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub trigger: DeployTrigger,
    pub signer: TokenSigner,
    pub registry: SharedRegistry,
    pub snapshots: watch::Receiver<Option<FleetSnapshot>>,
    pub metrics: Arc<FleetMetrics>,
    pub orchestrator: Arc<DeployOrchestrator>,
}

/// Build the complete router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/status", get(handlers::fleet_status))
        .route("/snapshot", get(handlers::last_snapshot))
        .with_state(state.clone());

    Router::new()
        .route("/deploy", post(handlers::request_deploy))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
        .nest("/api/v1", api_routes)
}
