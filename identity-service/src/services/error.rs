use service_core::error::AppError;
use thiserror::Error;

use crate::models::Role;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(anyhow::Error),

    #[error("Ephemeral store error: {0}")]
    Ephemeral(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid organization slug: {0}")]
    InvalidSlug(String),

    #[error("Invalid OAuth state")]
    InvalidOAuthState,

    #[error("Identity provider denied the login: {0}")]
    ProviderDenied(String),

    #[error("Single sign-on is not available for this organization")]
    SsoUnavailable,

    #[error("Identity provider did not supply a usable email address")]
    MissingProviderEmail,

    #[error("Cannot remove the last authentication method")]
    LastAuthMethod,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Requires {0} role")]
    Forbidden(Role),

    #[error("Invitation was issued to a different email address")]
    InvitationEmailMismatch,

    #[error("Email already registered")]
    EmailAlreadyRegistered,

    #[error("Organization slug already exists")]
    SlugTaken,

    #[error("User is already a member of this organization")]
    AlreadyMember,

    #[error("Organization must keep at least one admin")]
    LastAdmin,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Invitation not found")]
    InvitationNotFound,

    #[error("Identity provider request failed: {0}")]
    Upstream(String),

    #[error("{0} is not enabled")]
    FeatureDisabled(&'static str),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(e),
            ServiceError::Ephemeral(e) => AppError::InternalError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::Validation(_)
            | ServiceError::InvalidSlug(_)
            | ServiceError::InvalidOAuthState
            | ServiceError::ProviderDenied(_)
            | ServiceError::SsoUnavailable
            | ServiceError::MissingProviderEmail
            | ServiceError::LastAuthMethod => AppError::BadRequest(anyhow::anyhow!(message)),
            ServiceError::Unauthenticated | ServiceError::InvalidToken => {
                AppError::Unauthorized(anyhow::anyhow!(message))
            }
            ServiceError::InvalidCredentials => AppError::AuthError(anyhow::anyhow!(message)),
            ServiceError::Forbidden(_) | ServiceError::InvitationEmailMismatch => {
                AppError::Forbidden(anyhow::anyhow!(message))
            }
            ServiceError::EmailAlreadyRegistered
            | ServiceError::SlugTaken
            | ServiceError::AlreadyMember
            | ServiceError::LastAdmin => AppError::Conflict(anyhow::anyhow!(message)),
            ServiceError::NotFound(_) | ServiceError::InvitationNotFound => {
                AppError::NotFound(anyhow::anyhow!(message))
            }
            ServiceError::Upstream(e) => {
                tracing::warn!(error = %e, "Identity provider call failed");
                AppError::BadGateway("identity provider unavailable".to_string())
            }
            ServiceError::FeatureDisabled(feature) => AppError::NotEnabled(feature.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::axum::{http::StatusCode, response::IntoResponse};

    fn status_of(err: ServiceError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn maps_taxonomy_to_status_codes() {
        assert_eq!(status_of(ServiceError::InvalidSlug("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(ServiceError::InvalidOAuthState), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(ServiceError::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(ServiceError::InvalidCredentials), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(ServiceError::InvalidToken), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(ServiceError::Forbidden(Role::Admin)), StatusCode::FORBIDDEN);
        assert_eq!(status_of(ServiceError::InvitationEmailMismatch), StatusCode::FORBIDDEN);
        assert_eq!(status_of(ServiceError::SlugTaken), StatusCode::CONFLICT);
        assert_eq!(status_of(ServiceError::LastAdmin), StatusCode::CONFLICT);
        assert_eq!(status_of(ServiceError::InvitationNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ServiceError::Upstream("timeout".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_of(ServiceError::FeatureDisabled("Invitations")),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn forbidden_names_required_role() {
        assert_eq!(ServiceError::Forbidden(Role::Editor).to_string(), "Requires editor role");
    }
}
