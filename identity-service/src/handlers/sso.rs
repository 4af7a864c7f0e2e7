use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::sso::{SsoConfigRequest, SsoConfigResponse},
    middleware::AuthUser,
    models::ProviderKind,
    services::{ServiceError, SsoSettings},
    utils::ValidatedJson,
    AppState,
};

fn provider_kind(provider: &str) -> Result<ProviderKind, AppError> {
    provider
        .parse()
        .map_err(|_| AppError::from(ServiceError::NotFound("Identity provider")))
}

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/sso/{provider}",
    params(
        ("org_id" = Uuid, Path, description = "Organization ID"),
        ("provider" = String, Path, description = "`google` or `microsoft`")
    ),
    responses(
        (status = 200, description = "SSO configuration", body = SsoConfigResponse),
        (status = 403, description = "Requires admin role", body = ErrorResponse),
        (status = 404, description = "Not configured", body = ErrorResponse)
    ),
    tag = "Federation",
    security(("bearer_auth" = []))
)]
pub async fn get_sso_config(
    State(state): State<AppState>,
    user: AuthUser,
    Path((org_id, provider)): Path<(Uuid, String)>,
) -> Result<Json<SsoConfigResponse>, AppError> {
    let config = state
        .org_service
        .get_sso_config(org_id, user.user_id, provider_kind(&provider)?)
        .await?;
    Ok(Json(config.into()))
}

/// Create or update the organization's client for a provider
#[utoipa::path(
    post,
    path = "/orgs/{org_id}/sso/{provider}",
    params(
        ("org_id" = Uuid, Path, description = "Organization ID"),
        ("provider" = String, Path, description = "`google` or `microsoft`")
    ),
    request_body = SsoConfigRequest,
    responses(
        (status = 200, description = "SSO configuration saved", body = SsoConfigResponse),
        (status = 400, description = "client_secret is required", body = ErrorResponse),
        (status = 403, description = "Requires admin role", body = ErrorResponse)
    ),
    tag = "Federation",
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state, user, req), fields(user_id = %user.user_id))]
pub async fn configure_sso(
    State(state): State<AppState>,
    user: AuthUser,
    Path((org_id, provider)): Path<(Uuid, String)>,
    ValidatedJson(req): ValidatedJson<SsoConfigRequest>,
) -> Result<Json<SsoConfigResponse>, AppError> {
    let settings = SsoSettings {
        client_id: req.client_id,
        client_secret: req.client_secret,
        tenant: req.tenant,
        enabled: req.enabled,
    };
    let config = state
        .org_service
        .configure_sso(org_id, user.user_id, provider_kind(&provider)?, settings)
        .await?;
    Ok(Json(config.into()))
}
