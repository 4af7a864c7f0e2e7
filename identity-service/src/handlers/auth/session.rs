use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{LoginRequest, LogoutRequest, RefreshRequest, RevokedSessionsResponse, TokenResponse},
        MessageResponse,
    },
    middleware::AuthUser,
    models::UserResponse,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many login attempts", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let (_, tokens) = state
        .auth_service
        .login(&req.email, Password::new(req.password))
        .await?;
    Ok(Json(tokens))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed successfully", body = TokenResponse),
        (status = 401, description = "Invalid, expired or already used refresh token", body = ErrorResponse),
        (status = 503, description = "Refresh tokens are not enabled", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let tokens = state.auth_service.refresh(&req.refresh_token).await?;
    Ok(Json(tokens))
}

/// Revoke a refresh token
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out successfully", body = MessageResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 503, description = "Refresh tokens are not enabled", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .logout(user.user_id, &req.refresh_token)
        .await?;
    Ok(Json(MessageResponse::new("Logged out successfully")))
}

/// Revoke every refresh token of the caller
#[utoipa::path(
    post,
    path = "/auth/logout-all",
    responses(
        (status = 200, description = "All sessions revoked", body = RevokedSessionsResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 503, description = "Refresh tokens are not enabled", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout_all(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<RevokedSessionsResponse>, AppError> {
    let revoked = state.auth_service.logout_all(user.user_id).await?;
    Ok(Json(RevokedSessionsResponse { revoked }))
}

/// Current user profile
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Caller profile", body = UserResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 404, description = "User no longer exists", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.auth_service.me(user.user_id).await?;
    Ok(Json(user.sanitized()))
}
