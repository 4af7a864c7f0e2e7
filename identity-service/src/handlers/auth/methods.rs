use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::auth::AuthMethodResponse,
    middleware::AuthUser,
    AppState,
};

/// Authentication methods linked to the caller
#[utoipa::path(
    get,
    path = "/auth/methods",
    responses(
        (status = 200, description = "Linked methods, including the password when set", body = Vec<AuthMethodResponse>),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_auth_methods(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<AuthMethodResponse>>, AppError> {
    let methods = state.auth_service.list_auth_methods(user.user_id).await?;
    Ok(Json(methods))
}

/// Unlink a provider or remove the password
#[utoipa::path(
    delete,
    path = "/auth/methods/{provider}",
    params(
        ("provider" = String, Path, description = "`password`, `google` or `microsoft`")
    ),
    responses(
        (status = 204, description = "Method removed"),
        (status = 400, description = "Cannot remove the last authentication method", body = ErrorResponse),
        (status = 404, description = "Method not linked", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn unlink_auth_method(
    State(state): State<AppState>,
    user: AuthUser,
    Path(provider): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .auth_service
        .unlink_auth_method(user.user_id, &provider)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
