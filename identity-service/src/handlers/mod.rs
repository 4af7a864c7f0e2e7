//! HTTP handlers for identity-service.

pub mod auth;
pub mod invitation;
pub mod metrics;
pub mod oauth;
pub mod org;
pub mod sso;

pub use auth::*;
pub use invitation::*;
pub use oauth::*;
pub use org::*;
pub use sso::*;
