use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::extractors::AuthUser,
    error::{ApiError, ErrorKind},
    extract::{ValidJson, ValidPath},
    state::AppState,
    users::{
        dto::{
            ChangePasswordRequest, CreateUserRequest, ListQuery, LoginRequest, UpdateUserRequest,
            UserList,
        },
        repo_types::PublicUser,
    },
};

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/users", post(create_user))
}

/// Every handler here takes [`AuthUser`], so requests without a live session
/// are turned away before touching the service.
pub fn private_routes() -> Router<AppState> {
    Router::new()
        .route("/logout", get(logout))
        .route("/users", get(list_users).post(create_user))
        .route("/users/changePassword", put(change_password))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.users.login(payload).await.map_err(|e| match e.kind() {
        ErrorKind::WrongEmail | ErrorKind::WrongPassword => {
            ApiError::from(e).with_message("Email / password is wrong")
        }
        _ => ApiError::from(e),
    })?;

    let max_age = state.config.jwt.ttl_hours * 3600;
    let cookie = format!(
        "sessionId={}; Path=/; HttpOnly; Max-Age={max_age}",
        session.session_id
    );
    Ok(([(header::SET_COOKIE, cookie)], Json(session)))
}

#[instrument(skip(state, user))]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<StatusCode, ApiError> {
    state.users.logout(&user.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<CreateUserRequest>,
) -> Result<Json<PublicUser>, ApiError> {
    let user = state.users.create_user(payload).await?;
    Ok(Json(user.to_public()))
}

#[instrument(skip(state, user, payload), fields(user_id = user.user_id))]
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(payload): ValidJson<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .users
        .change_password(user.user_id, payload)
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::WrongPassword => ApiError::from(e).with_message("Wrong old password"),
            _ => ApiError::from(e),
        })?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, _user))]
pub async fn list_users(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<UserList>, ApiError> {
    let params = query.into_params();
    let (data, count) = state.users.list_users(&params).await?;
    Ok(Json(UserList { data, count }))
}

#[instrument(skip(state, _user))]
pub async fn get_user(
    State(state): State<AppState>,
    _user: AuthUser,
    ValidPath(id): ValidPath<i64>,
) -> Result<Json<PublicUser>, ApiError> {
    let user = state.users.get_user(id).await?;
    Ok(Json(user.to_public()))
}

#[instrument(skip(state, _user, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    _user: AuthUser,
    ValidPath(id): ValidPath<i64>,
    ValidJson(payload): ValidJson<UpdateUserRequest>,
) -> Result<Json<PublicUser>, ApiError> {
    let user = state.users.update_user(id, payload).await?;
    Ok(Json(user.to_public()))
}

#[instrument(skip(state, _user))]
pub async fn delete_user(
    State(state): State<AppState>,
    _user: AuthUser,
    ValidPath(id): ValidPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.users.delete_user(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
