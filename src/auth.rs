use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::models::user::{Role, User};
use crate::state::AppState;

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    parts
        .headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))
}

fn resolve(state: &AppState, parts: &Parts) -> Result<User, AppError> {
    let token = bearer_token(parts)?;
    state
        .users
        .find_by_token(token)
        .ok_or_else(|| AppError::Unauthorized("invalid token".to_string()))
}

/// Authenticated caller with an active account. Suspended accounts are
/// blocked at this boundary.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = resolve(state, parts)?;
        if !user.active {
            return Err(AppError::Forbidden("account suspended".to_string()));
        }
        Ok(CurrentUser(user))
    }
}

/// Authenticated caller, suspended or not. Only the self-status route uses
/// this: a suspended user may still ask about their own account, everything
/// else goes through [`CurrentUser`].
pub struct AnyUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AnyUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(AnyUser(resolve(state, parts)?))
    }
}

/// Role gate for handlers: `require_role(&user, &[Role::Admin])?`.
pub fn require_role(user: &User, roles: &[Role]) -> Result<(), AppError> {
    if roles.contains(&user.role) {
        return Ok(());
    }
    Err(AppError::Forbidden(format!(
        "requires one of: {}",
        roles
            .iter()
            .map(|role| format!("{role:?}").to_lowercase())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

pub fn require_staff(user: &User) -> Result<(), AppError> {
    if user.role.is_staff() {
        return Ok(());
    }
    Err(AppError::Forbidden("staff role required".to_string()))
}
