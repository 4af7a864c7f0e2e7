//! User model - dashboard accounts, password or federated.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Emails are unique and case-sensitive as stored. Only surrounding
/// whitespace is dropped.
pub fn trim_email(email: &str) -> String {
    email.trim().to_string()
}

/// User entity. Users created through SSO carry no password hash.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, display_name: Option<String>, password_hash: Option<String>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            email,
            display_name,
            password_hash,
            created_utc: Utc::now(),
        }
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    /// Convert to sanitized response (no password hash).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self.clone())
    }
}

/// User response for API (without sensitive fields).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserResponse {
    pub user_id: Uuid,
    #[schema(example = "bob@acme.io")]
    pub email: String,
    #[schema(example = "Bob")]
    pub display_name: Option<String>,
    pub has_password: bool,
    pub created_utc: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            has_password: u.has_password(),
            user_id: u.user_id,
            email: u.email,
            display_name: u.display_name,
            created_utc: u.created_utc,
        }
    }
}
