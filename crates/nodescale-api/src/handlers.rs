//! HTTP handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use nodescale_core::{ControlState, FleetSnapshot, Node, NodeId};
use nodescale_rollout::RolloutStatus;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

#[derive(Debug, Deserialize)]
struct DeployRequest {
    jwt: String,
}

/// Everything an operator wants to see at a glance.
#[derive(Debug, Serialize)]
pub struct FleetStatus {
    pub control: ControlState,
    pub nodes: Vec<Node>,
    pub members: Vec<NodeId>,
    pub snapshot: Option<FleetSnapshot>,
    pub rollout: Option<RolloutStatus>,
}

// ── Deploy trigger ─────────────────────────────────────────────

/// POST /deploy
pub async fn request_deploy(State(state): State<ApiState>, body: Bytes) -> impl IntoResponse {
    let Ok(request) = serde_json::from_slice::<DeployRequest>(&body) else {
        warn!("deploy request without a token");
        return error_response("missing token", StatusCode::UNAUTHORIZED).into_response();
    };
    if let Err(e) = state.signer.verify(&request.jwt) {
        warn!(error = %e, "deploy request rejected");
        return error_response("invalid token", StatusCode::UNAUTHORIZED).into_response();
    }

    info!("deploy trigger accepted");
    state.trigger.request_deploy();
    (StatusCode::ACCEPTED, ApiResponse::ok("deploying")).into_response()
}

// ── Status ─────────────────────────────────────────────────────

/// GET /api/v1/status
pub async fn fleet_status(State(state): State<ApiState>) -> impl IntoResponse {
    let (control, nodes, members) = {
        let reg = state.registry.lock().await;
        (reg.control().clone(), reg.nodes(), reg.members().to_vec())
    };
    let snapshot = state.snapshots.borrow().clone();
    let rollout = state.orchestrator.status().await;

    ApiResponse::ok(FleetStatus {
        control,
        nodes,
        members,
        snapshot,
        rollout,
    })
}

/// GET /api/v1/snapshot
pub async fn last_snapshot(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.snapshots.borrow().clone();
    match snapshot {
        Some(snapshot) => ApiResponse::ok(snapshot).into_response(),
        None => error_response("no snapshot yet", StatusCode::NOT_FOUND).into_response(),
    }
}

// ── Metrics ────────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = nodescale_metrics::render_prometheus(&state.metrics.report());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
