use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{PublicUser, UserRepository};
use crate::error::{AppError, AppResult};
use crate::services::auth::AuthService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/me", get(me))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: PublicUser,
}

// ============================================================================
// Handlers
// ============================================================================

/// Register a new user and issue a token
async fn signup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }

    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("Valid email is required".to_string()));
    }

    if body.password.len() < 6 {
        return Err(AppError::Validation(
            "Password must be at least 6 characters".to_string(),
        ));
    }

    if UserRepository::find_by_email(&state.db, &email).await?.is_some() {
        return Err(AppError::BadRequest(
            "User already exists with this email".to_string(),
        ));
    }

    let password_hash = AuthService::hash_password(&body.password)?;
    let user = UserRepository::create(&state.db, name, &email, &password_hash).await?;

    tracing::info!(user_id = %user.id, "User registered");

    let token = AuthService::create_jwt(&state, &user.id)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    ))
}

/// Authenticate with email + password and issue a token
async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let email = body.email.trim().to_lowercase();

    // Same error for unknown email and wrong password.
    let user = UserRepository::find_by_email(&state.db, &email)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if !AuthService::verify_password(&body.password, &user.password_hash)? {
        return Err(AppError::Unauthorized);
    }

    let token = AuthService::create_jwt(&state, &user.id)?;

    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

/// Return the currently authenticated user
async fn me(AuthUser(user): AuthUser) -> AppResult<Json<MeResponse>> {
    Ok(Json(MeResponse { user: user.into() }))
}

// ============================================================================
// Auth Middleware / Extractor
// ============================================================================

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Extractor for authenticated user
pub struct AuthUser(pub crate::db::User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Extract Authorization header (Bearer token)
        let auth_header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::debug!("Missing or invalid Authorization header");
                AppError::Unauthorized
            })?;

        if !auth_header.to_ascii_lowercase().starts_with("bearer ") {
            tracing::debug!("Authorization header doesn't start with 'Bearer '");
            return Err(AppError::Unauthorized);
        }

        let token = auth_header[7..].trim();
        if token.is_empty() {
            return Err(AppError::Unauthorized);
        }

        let user = AuthService::get_user_from_token(state, token)
            .await
            .map_err(|e| {
                tracing::debug!("Failed to get user from token: {:?}", e);
                e
            })?;

        Ok(AuthUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::Config;
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
        Router::new().nest("/api/auth", router()).with_state(state)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn signup_then_login_roundtrip() {
        let state = test_state().await;

        let response = app(state.clone())
            .oneshot(post_json(
                "/api/auth/signup",
                serde_json::json!({"name": "Alice", "email": "alice@example.com", "password": "password123"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert!(body["token"].is_string());
        assert_eq!(body["user"]["email"], "alice@example.com");

        let response = app(state)
            .oneshot(post_json(
                "/api/auth/login",
                serde_json::json!({"email": "alice@example.com", "password": "password123"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let state = test_state().await;
        let payload = serde_json::json!({
            "name": "Alice", "email": "alice@example.com", "password": "password123"
        });

        let response = app(state.clone())
            .oneshot(post_json("/api/auth/signup", payload.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app(state)
            .oneshot(post_json("/api/auth/signup", payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let state = test_state().await;

        app(state.clone())
            .oneshot(post_json(
                "/api/auth/signup",
                serde_json::json!({"name": "Alice", "email": "alice@example.com", "password": "password123"}),
            ))
            .await
            .unwrap();

        let response = app(state)
            .oneshot(post_json(
                "/api/auth/login",
                serde_json::json!({"email": "alice@example.com", "password": "wrong-password"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn short_password_fails_validation() {
        let state = test_state().await;

        let response = app(state)
            .oneshot(post_json(
                "/api/auth/signup",
                serde_json::json!({"name": "Alice", "email": "alice@example.com", "password": "short"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn me_requires_a_valid_token() {
        let state = test_state().await;

        let response = app(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/auth/me")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/auth/me")
                    .header("authorization", "Bearer not-a-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
