use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::routes::auth::AuthUser;
use crate::services::swaps::{SwapRequestView, SwapService, SwappableSlot};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/swappable-slots", get(get_swappable_slots))
        .route("/incoming-requests", get(get_incoming_requests))
        .route("/outgoing-requests", get(get_outgoing_requests))
        .route("/swap-request", post(create_swap_request))
        .route("/swap-response/:request_id", post(respond_to_swap_request))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSwapRequestBody {
    pub my_slot_id: String,
    pub their_slot_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SwapResponseBody {
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct SwappableSlotsResponse {
    pub count: usize,
    pub slots: Vec<SwappableSlot>,
}

#[derive(Debug, Serialize)]
pub struct SwapRequestListResponse {
    pub count: usize,
    pub requests: Vec<SwapRequestView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequestResponse<T: Serialize> {
    pub swap_request: T,
}

// ============================================================================
// Handlers
// ============================================================================

/// Other users' slots currently open to offers
async fn get_swappable_slots(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<SwappableSlotsResponse>> {
    let slots = SwapService::list_swappable_slots(&state, &user.id).await?;
    Ok(Json(SwappableSlotsResponse {
        count: slots.len(),
        slots,
    }))
}

/// Requests addressed to the caller, newest first
async fn get_incoming_requests(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<SwapRequestListResponse>> {
    let requests = SwapService::list_incoming(&state, &user.id).await?;
    Ok(Json(SwapRequestListResponse {
        count: requests.len(),
        requests,
    }))
}

/// Requests created by the caller, newest first
async fn get_outgoing_requests(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<SwapRequestListResponse>> {
    let requests = SwapService::list_outgoing(&state, &user.id).await?;
    Ok(Json(SwapRequestListResponse {
        count: requests.len(),
        requests,
    }))
}

/// Propose a swap of one of the caller's slots for another user's slot
async fn create_swap_request(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateSwapRequestBody>,
) -> AppResult<(StatusCode, Json<SwapRequestResponse<SwapRequestView>>)> {
    let swap_request =
        SwapService::create_swap_request(&state, &user.id, &body.my_slot_id, &body.their_slot_id)
            .await?;

    Ok((
        StatusCode::CREATED,
        Json(SwapRequestResponse { swap_request }),
    ))
}

/// Accept or reject a pending request addressed to the caller
async fn respond_to_swap_request(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(request_id): Path<String>,
    Json(body): Json<SwapResponseBody>,
) -> AppResult<Json<SwapRequestResponse<crate::db::models::SwapRequest>>> {
    let swap_request =
        SwapService::respond_to_swap_request(&state, &user.id, &request_id, body.accepted).await?;

    Ok(Json(SwapRequestResponse { swap_request }))
}
