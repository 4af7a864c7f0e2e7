use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::org::{CreateOrganizationRequest, OrganizationResponse, UpdateMemberRoleRequest},
    middleware::AuthUser,
    models::{MemberSummary, Membership, OrganizationWithRole},
    utils::ValidatedJson,
    AppState,
};

/// Create an organization; the caller becomes its admin
#[utoipa::path(
    post,
    path = "/orgs",
    request_body = CreateOrganizationRequest,
    responses(
        (status = 201, description = "Organization created", body = OrganizationResponse),
        (status = 400, description = "Invalid slug", body = ErrorResponse),
        (status = 409, description = "Organization slug already exists", body = ErrorResponse)
    ),
    tag = "Organizations",
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state, user, req), fields(user_id = %user.user_id))]
pub async fn create_organization(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<CreateOrganizationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (organization, membership) = state
        .org_service
        .create_organization(user.user_id, &req.name, &req.slug)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(OrganizationResponse {
            organization,
            role: membership.role(),
        }),
    ))
}

/// Organizations the caller belongs to
#[utoipa::path(
    get,
    path = "/orgs",
    responses(
        (status = 200, description = "Organizations with the caller's role", body = Vec<OrganizationWithRole>)
    ),
    tag = "Organizations",
    security(("bearer_auth" = []))
)]
pub async fn list_organizations(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<OrganizationWithRole>>, AppError> {
    Ok(Json(state.org_service.list_organizations(user.user_id).await?))
}

#[utoipa::path(
    get,
    path = "/orgs/{org_id}",
    params(("org_id" = Uuid, Path, description = "Organization ID")),
    responses(
        (status = 200, description = "Organization", body = OrganizationResponse),
        (status = 403, description = "Not a member", body = ErrorResponse)
    ),
    tag = "Organizations",
    security(("bearer_auth" = []))
)]
pub async fn get_organization(
    State(state): State<AppState>,
    user: AuthUser,
    Path(org_id): Path<Uuid>,
) -> Result<Json<OrganizationResponse>, AppError> {
    let (organization, role) = state
        .org_service
        .get_organization(org_id, user.user_id)
        .await?;
    Ok(Json(OrganizationResponse { organization, role }))
}

/// Delete an organization with its memberships and SSO settings
#[utoipa::path(
    delete,
    path = "/orgs/{org_id}",
    params(("org_id" = Uuid, Path, description = "Organization ID")),
    responses(
        (status = 204, description = "Organization deleted"),
        (status = 403, description = "Requires admin role", body = ErrorResponse)
    ),
    tag = "Organizations",
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn delete_organization(
    State(state): State<AppState>,
    user: AuthUser,
    Path(org_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .org_service
        .delete_organization(org_id, user.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/members",
    params(("org_id" = Uuid, Path, description = "Organization ID")),
    responses(
        (status = 200, description = "Members", body = Vec<MemberSummary>),
        (status = 403, description = "Not a member", body = ErrorResponse)
    ),
    tag = "Organizations",
    security(("bearer_auth" = []))
)]
pub async fn list_members(
    State(state): State<AppState>,
    user: AuthUser,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Vec<MemberSummary>>, AppError> {
    Ok(Json(
        state.org_service.list_members(org_id, user.user_id).await?,
    ))
}

/// Change a member's role
#[utoipa::path(
    patch,
    path = "/orgs/{org_id}/members/{user_id}",
    params(
        ("org_id" = Uuid, Path, description = "Organization ID"),
        ("user_id" = Uuid, Path, description = "Member user ID")
    ),
    request_body = UpdateMemberRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = Membership),
        (status = 403, description = "Requires admin role", body = ErrorResponse),
        (status = 404, description = "Member not found", body = ErrorResponse),
        (status = 409, description = "Organization must keep at least one admin", body = ErrorResponse)
    ),
    tag = "Organizations",
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state, user, req), fields(actor_id = %user.user_id))]
pub async fn update_member_role(
    State(state): State<AppState>,
    user: AuthUser,
    Path((org_id, member_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(req): ValidatedJson<UpdateMemberRoleRequest>,
) -> Result<Json<Membership>, AppError> {
    let membership = state
        .org_service
        .update_member_role(org_id, user.user_id, member_id, req.role)
        .await?;
    Ok(Json(membership))
}

/// Remove a member, or leave the organization when `user_id` is the caller
#[utoipa::path(
    delete,
    path = "/orgs/{org_id}/members/{user_id}",
    params(
        ("org_id" = Uuid, Path, description = "Organization ID"),
        ("user_id" = Uuid, Path, description = "Member user ID")
    ),
    responses(
        (status = 204, description = "Member removed"),
        (status = 403, description = "Requires admin role", body = ErrorResponse),
        (status = 409, description = "Organization must keep at least one admin", body = ErrorResponse)
    ),
    tag = "Organizations",
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state, user), fields(actor_id = %user.user_id))]
pub async fn remove_member(
    State(state): State<AppState>,
    user: AuthUser,
    Path((org_id, member_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state
        .org_service
        .remove_member(org_id, user.user_id, member_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
