pub mod auth;
pub mod database;
pub mod error;
pub mod feature;
pub mod invitation;
pub mod jwt;
pub mod mock_store;
pub mod oauth;
pub mod org;
pub mod redis;
pub mod refresh;

pub use auth::{AuthService, REFRESH_TOKENS};
pub use database::{CredentialStore, Database};
pub use error::ServiceError;
pub use feature::Feature;
pub use invitation::{InvitationService, INVITATIONS};
pub use jwt::{AccessTokenClaims, JwtService};
pub use mock_store::MockCredentialStore;
pub use oauth::{
    default_providers, FederationRegistry, FederationService, OAuthProvider, RemoteProfile,
};
pub use org::{OrganizationService, SsoSettings};
pub use redis::{EphemeralStore, MockEphemeralStore, RedisStore};
pub use refresh::RefreshTokenManager;
