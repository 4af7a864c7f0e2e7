use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::invitation::{AcceptInvitationResponse, CreateInvitationRequest},
    middleware::AuthUser,
    services::INVITATIONS,
    utils::ValidatedJson,
    AppState,
};

/// Invite an email address to an organization
#[utoipa::path(
    post,
    path = "/orgs/{org_id}/invitations",
    params(("org_id" = Uuid, Path, description = "Organization ID")),
    request_body = CreateInvitationRequest,
    responses(
        (status = 201, description = "Invitation created", body = InvitationResponse),
        (status = 403, description = "Requires admin role", body = ErrorResponse),
        (status = 409, description = "Already a member", body = ErrorResponse),
        (status = 503, description = "Invitations are not enabled", body = ErrorResponse)
    ),
    tag = "Invitations",
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state, user, req), fields(user_id = %user.user_id))]
pub async fn create_invitation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(org_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<CreateInvitationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invitation = state
        .invitation_service
        .require(INVITATIONS)?
        .create(org_id, user.user_id, &req.email, req.role)
        .await?;
    Ok((StatusCode::CREATED, Json(invitation)))
}

/// Withdraw a pending invitation
#[utoipa::path(
    delete,
    path = "/orgs/{org_id}/invitations/{token}",
    params(
        ("org_id" = Uuid, Path, description = "Organization ID"),
        ("token" = String, Path, description = "Invitation token")
    ),
    responses(
        (status = 204, description = "Invitation revoked"),
        (status = 403, description = "Requires admin role", body = ErrorResponse),
        (status = 404, description = "Invitation not found", body = ErrorResponse)
    ),
    tag = "Invitations",
    security(("bearer_auth" = []))
)]
pub async fn revoke_invitation(
    State(state): State<AppState>,
    user: AuthUser,
    Path((org_id, token)): Path<(Uuid, String)>,
) -> Result<StatusCode, AppError> {
    state
        .invitation_service
        .require(INVITATIONS)?
        .revoke(org_id, user.user_id, &token)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Accept an invitation addressed to the caller's email
#[utoipa::path(
    post,
    path = "/invitations/{token}/accept",
    params(("token" = String, Path, description = "Invitation token")),
    responses(
        (status = 200, description = "Joined the organization", body = AcceptInvitationResponse),
        (status = 403, description = "Invitation was issued to a different email address", body = ErrorResponse),
        (status = 404, description = "Invitation not found or expired", body = ErrorResponse)
    ),
    tag = "Invitations",
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state, user, token), fields(user_id = %user.user_id))]
pub async fn accept_invitation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(token): Path<String>,
) -> Result<Json<AcceptInvitationResponse>, AppError> {
    let invitations = state.invitation_service.require(INVITATIONS)?;
    let caller = state.auth_service.me(user.user_id).await?;
    let membership = invitations.accept(&token, &caller).await?;
    Ok(Json(AcceptInvitationResponse { membership }))
}
