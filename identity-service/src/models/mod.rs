pub mod auth_method;
pub mod invitation;
pub mod membership;
pub mod organization;
pub mod refresh_token;
pub mod sso_config;
pub mod user;

pub use auth_method::{LinkedAuthMethod, ProviderKind, PASSWORD_METHOD};
pub use invitation::Invitation;
pub use membership::{
    leaves_organization_without_admin, MemberSummary, Membership, MembershipChange,
    OrganizationWithRole, Role,
};
pub use organization::{validate_slug, Organization};
pub use refresh_token::RefreshTokenRecord;
pub use sso_config::SsoConfig;
pub use user::{trim_email, User, UserResponse};
