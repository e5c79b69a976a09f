use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{Slot, SlotStatus};
use crate::db::SlotRepository;
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_my_events).post(create_event))
        .route("/:id", put(update_event).delete(delete_event))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: Option<SlotStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEventRequest {
    pub title: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: Option<SlotStatus>,
}

#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub count: usize,
    pub events: Vec<Slot>,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub event: Slot,
}

fn validate_title(title: &str) -> AppResult<&str> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }
    if title.len() > 100 {
        return Err(AppError::Validation(
            "Title cannot exceed 100 characters".to_string(),
        ));
    }
    Ok(title)
}

// ============================================================================
// Handlers
// ============================================================================

/// List the authenticated user's own slots, earliest first
async fn list_my_events(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<EventListResponse>> {
    let events = SlotRepository::find_by_owner(&state.db, &user.id).await?;
    Ok(Json(EventListResponse {
        count: events.len(),
        events,
    }))
}

/// Create a new slot owned by the caller
async fn create_event(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateEventRequest>,
) -> AppResult<(StatusCode, Json<EventResponse>)> {
    let title = validate_title(&body.title)?;

    if body.end_time <= body.start_time {
        return Err(AppError::Validation(
            "End time must be after start time".to_string(),
        ));
    }

    // SWAP_PENDING is reachable only through the swap coordinator.
    let status = body.status.unwrap_or(SlotStatus::Busy);
    if status == SlotStatus::SwapPending {
        return Err(AppError::InvalidOperation(
            "A slot cannot be created in the SWAP_PENDING state".to_string(),
        ));
    }

    let event = SlotRepository::create(
        &state.db,
        title,
        body.start_time.naive_utc(),
        body.end_time.naive_utc(),
        status,
        &user.id,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(EventResponse { event })))
}

/// Update one of the caller's slots.
///
/// Blocked entirely while the slot is SWAP_PENDING: that status is the lock
/// that keeps a slot stable for the lifetime of its negotiation.
async fn update_event(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateEventRequest>,
) -> AppResult<Json<EventResponse>> {
    let event = SlotRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;

    if event.user_id != user.id {
        return Err(AppError::Forbidden(
            "Not authorized to update this event".to_string(),
        ));
    }

    if event.status == SlotStatus::SwapPending {
        return Err(AppError::InvalidOperation(
            "Cannot update event while a swap is pending".to_string(),
        ));
    }

    if body.status == Some(SlotStatus::SwapPending) {
        return Err(AppError::InvalidOperation(
            "SWAP_PENDING can only be set by the swap process".to_string(),
        ));
    }

    let title = match &body.title {
        Some(t) => validate_title(t)?.to_string(),
        None => event.title.clone(),
    };
    let start_time = body.start_time.map(|t| t.naive_utc()).unwrap_or(event.start_time);
    let end_time = body.end_time.map(|t| t.naive_utc()).unwrap_or(event.end_time);
    let status = body.status.unwrap_or(event.status);

    if end_time <= start_time {
        return Err(AppError::Validation(
            "End time must be after start time".to_string(),
        ));
    }

    // Guarded write: a swap request committed between the read above and this
    // write flips the slot to SWAP_PENDING, and the stale edit must not land.
    let event = SlotRepository::update(
        &state.db,
        &event.id,
        &user.id,
        &title,
        start_time,
        end_time,
        status,
    )
    .await?
    .ok_or_else(|| {
        AppError::Conflict("The event entered a swap while it was being updated".to_string())
    })?;

    Ok(Json(EventResponse { event }))
}

/// Delete one of the caller's slots, unless a swap is pending on it
async fn delete_event(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let event = SlotRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;

    if event.user_id != user.id {
        return Err(AppError::Forbidden(
            "Not authorized to delete this event".to_string(),
        ));
    }

    if event.status == SlotStatus::SwapPending {
        return Err(AppError::InvalidOperation(
            "Cannot delete event while a swap is pending".to_string(),
        ));
    }

    // Same guard as update: the delete is refused if a swap locked the slot
    // after the read above.
    if !SlotRepository::delete(&state.db, &event.id, &user.id).await? {
        return Err(AppError::Conflict(
            "The event entered a swap while it was being deleted".to_string(),
        ));
    }

    Ok(Json(serde_json::json!({
        "message": "Event deleted successfully"
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::db::UserRepository;
    use crate::services::auth::AuthService;
    use crate::services::notifier::Notifier;

    async fn test_state() -> Arc<AppState> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let mut config = Config::default();
        config.jwt.secret = "test-secret".to_string();

        Arc::new(AppState {
            db: pool,
            config,
            notifier: Arc::new(Notifier::new()),
        })
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new().nest("/api/events", router()).with_state(state)
    }

    async fn make_user_token(state: &Arc<AppState>, email: &str) -> (String, String) {
        let user = UserRepository::create(&state.db, "Test", email, "hash")
            .await
            .unwrap();
        let token = AuthService::create_jwt(state, &user.id).unwrap();
        (user.id, token)
    }

    fn request(method: &str, uri: &str, token: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", token))
            .header("content-type", "application/json");
        match body {
            Some(v) => builder.body(Body::from(v.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_defaults_to_busy_and_lists_own_events() {
        let state = test_state().await;
        let (_user, token) = make_user_token(&state, "a@example.com").await;

        let response = app(state.clone())
            .oneshot(request(
                "POST",
                "/api/events",
                &token,
                Some(serde_json::json!({
                    "title": "Morning shift",
                    "startTime": "2026-01-10T10:00:00Z",
                    "endTime": "2026-01-10T11:00:00Z"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["event"]["status"], "BUSY");

        let response = app(state)
            .oneshot(request("GET", "/api/events", &token, None))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn end_before_start_is_rejected_on_create_and_update() {
        let state = test_state().await;
        let (_user, token) = make_user_token(&state, "a@example.com").await;

        let response = app(state.clone())
            .oneshot(request(
                "POST",
                "/api/events",
                &token,
                Some(serde_json::json!({
                    "title": "Backwards",
                    "startTime": "2026-01-10T11:00:00Z",
                    "endTime": "2026-01-10T10:00:00Z"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app(state.clone())
            .oneshot(request(
                "POST",
                "/api/events",
                &token,
                Some(serde_json::json!({
                    "title": "Fine",
                    "startTime": "2026-01-10T10:00:00Z",
                    "endTime": "2026-01-10T11:00:00Z"
                })),
            ))
            .await
            .unwrap();
        let id = body_json(response).await["event"]["id"].as_str().unwrap().to_string();

        // Moving the end before the (unchanged) start must fail too.
        let response = app(state)
            .oneshot(request(
                "PUT",
                &format!("/api/events/{}", id),
                &token,
                Some(serde_json::json!({"endTime": "2026-01-10T09:00:00Z"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn swap_pending_blocks_edit_delete_and_direct_transition() {
        let state = test_state().await;
        let (user, token) = make_user_token(&state, "a@example.com").await;

        let slot = SlotRepository::create(
            &state.db,
            "Locked",
            chrono::Utc::now().naive_utc(),
            chrono::Utc::now().naive_utc() + chrono::Duration::hours(1),
            SlotStatus::SwapPending,
            &user,
        )
        .await
        .unwrap();

        let response = app(state.clone())
            .oneshot(request(
                "PUT",
                &format!("/api/events/{}", slot.id),
                &token,
                Some(serde_json::json!({"title": "Renamed"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app(state.clone())
            .oneshot(request(
                "DELETE",
                &format!("/api/events/{}", slot.id),
                &token,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Direct transition into SWAP_PENDING on a free slot is also refused.
        let free = SlotRepository::create(
            &state.db,
            "Free",
            chrono::Utc::now().naive_utc(),
            chrono::Utc::now().naive_utc() + chrono::Duration::hours(1),
            SlotStatus::Swappable,
            &user,
        )
        .await
        .unwrap();

        let response = app(state)
            .oneshot(request(
                "PUT",
                &format!("/api/events/{}", free.id),
                &token,
                Some(serde_json::json!({"status": "SWAP_PENDING"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn only_the_owner_may_edit_or_delete() {
        let state = test_state().await;
        let (owner, _) = make_user_token(&state, "owner@example.com").await;
        let (_other, other_token) = make_user_token(&state, "other@example.com").await;

        let slot = SlotRepository::create(
            &state.db,
            "Mine",
            chrono::Utc::now().naive_utc(),
            chrono::Utc::now().naive_utc() + chrono::Duration::hours(1),
            SlotStatus::Busy,
            &owner,
        )
        .await
        .unwrap();

        let response = app(state.clone())
            .oneshot(request(
                "PUT",
                &format!("/api/events/{}", slot.id),
                &other_token,
                Some(serde_json::json!({"title": "Hijack"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app(state)
            .oneshot(request(
                "DELETE",
                &format!("/api/events/{}", slot.id),
                &other_token,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn owner_toggles_busy_and_swappable_freely() {
        let state = test_state().await;
        let (user, token) = make_user_token(&state, "a@example.com").await;

        let slot = SlotRepository::create(
            &state.db,
            "Toggle",
            chrono::Utc::now().naive_utc(),
            chrono::Utc::now().naive_utc() + chrono::Duration::hours(1),
            SlotStatus::Busy,
            &user,
        )
        .await
        .unwrap();

        for status in ["SWAPPABLE", "BUSY", "SWAPPABLE"] {
            let response = app(state.clone())
                .oneshot(request(
                    "PUT",
                    &format!("/api/events/{}", slot.id),
                    &token,
                    Some(serde_json::json!({"status": status})),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await["event"]["status"], status);
        }
    }
}
