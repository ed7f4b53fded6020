use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::{require_role, AnyUser, CurrentUser};
use crate::error::AppError;
use crate::models::user::{Role, User};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", post(register))
        .route("/users/me", get(me))
        .route("/users/push-token", post(push_token))
        .route("/users/:id/status", put(set_status))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Serialize)]
struct RegisterResponse {
    user: User,
    token: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }

    let (user, token) = state.users.register(
        payload.name,
        payload.phone.unwrap_or_default(),
        payload.role.unwrap_or(Role::Client),
    );

    info!(user_id = %user.id, role = ?user.role, "user registered");
    Ok(Json(RegisterResponse { user, token }))
}

/// Self status check. Deliberately reachable by suspended accounts so they
/// can learn they are suspended; every other route rejects them.
async fn me(AnyUser(user): AnyUser) -> Json<User> {
    Json(user)
}

#[derive(Deserialize)]
pub struct PushTokenRequest {
    pub push_token: String,
}

async fn push_token(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<PushTokenRequest>,
) -> Result<Json<User>, AppError> {
    if payload.push_token.trim().is_empty() {
        return Err(AppError::Validation("push_token is required".to_string()));
    }
    let user = state.users.set_push_token(user.id, payload.push_token)?;
    Ok(Json(user))
}

#[derive(Deserialize)]
pub struct SetStatusRequest {
    pub active: bool,
}

async fn set_status(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetStatusRequest>,
) -> Result<Json<User>, AppError> {
    require_role(&user, &[Role::Admin])?;
    if id == user.id {
        return Err(AppError::Validation(
            "you cannot change the status of your own account".to_string(),
        ));
    }
    let updated = state.users.set_active(id, payload.active)?;
    info!(user_id = %id, active = payload.active, by = %user.id, "account status changed");
    Ok(Json(updated))
}
