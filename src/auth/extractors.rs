use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::{ApiError, AppError, ErrorKind};
use crate::state::AppState;

/// Bearer token checked against the stored session.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub token: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| {
            AppError::new(ErrorKind::Unauthenticated, "missing bearer token").at("AuthUser")
        })?;

        let session = state.users.authenticate(token).await?;
        Ok(AuthUser {
            user_id: session.user_id,
            token: session.token,
        })
    }
}

// Expect "Bearer <token>"
fn bearer_token(parts: &Parts) -> Option<&str> {
    let auth = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
