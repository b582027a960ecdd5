use axum::{
    extract::{rejection::PathRejection, Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use delaydesk_core::ADDING_DELAY_MINUTES;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::{agent_auth_middleware, AgentClaims};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DelayEta {
    pub eta: i32,
}

/// Empty object when the delay was recorded without extending the order.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct AnnounceDelayResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DelayEta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignResponse {
    pub status: String,
    pub report_id: Uuid,
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct VendorDelayResponse {
    pub vendor_name: String,
    pub count: i64,
}

// ============================================================================
// Routes
// ============================================================================

pub fn routes(state: AppState) -> Router<AppState> {
    let agent_routes = Router::new()
        .route("/delay/assign", post(assign_delayed_order))
        .route_layer(axum::middleware::from_fn_with_state(state, agent_auth_middleware));

    Router::new()
        .route("/delay/announce/{order_id}", post(announce_delay))
        .route("/delay/report", get(delay_report))
        .merge(agent_routes)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /delay/announce/{order_id}
async fn announce_delay(
    State(state): State<AppState>,
    order_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<AnnounceDelayResponse>, AppError> {
    let Path(order_id) = order_id?;
    let delayed = state.desk.announce_delay(order_id).await?;

    let response = if delayed {
        AnnounceDelayResponse {
            data: Some(DelayEta { eta: ADDING_DELAY_MINUTES }),
            status: Some(true),
        }
    } else {
        AnnounceDelayResponse { data: None, status: None }
    };
    Ok(Json(response))
}

/// POST /delay/assign
/// Hand the caller the oldest escalated report
async fn assign_delayed_order(
    State(state): State<AppState>,
    Extension(claims): Extension<AgentClaims>,
) -> Result<Json<AssignResponse>, AppError> {
    let user_id = claims
        .user_id()
        .ok_or_else(|| AppError::AuthenticationError("Token subject is not a user id".to_string()))?;

    let agent = state.desk.agent_for_user(user_id).await?;
    let report = state.desk.assign(agent.id).await?;

    Ok(Json(AssignResponse {
        status: "assigned".to_string(),
        report_id: report.id,
        order_id: report.order_id,
    }))
}

/// GET /delay/report
/// Delay counts per vendor over the trailing week
async fn delay_report(State(state): State<AppState>) -> Result<Json<Vec<VendorDelayResponse>>, AppError> {
    let rows = state.desk.collect_report().await?;

    Ok(Json(
        rows.into_iter()
            .map(|row| VendorDelayResponse {
                vendor_name: row.vendor_name,
                count: row.delay_count,
            })
            .collect(),
    ))
}
