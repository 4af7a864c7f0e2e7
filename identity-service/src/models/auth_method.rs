use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

/// Name of the synthetic method reported for users holding a password hash.
pub const PASSWORD_METHOD: &str = "password";

/// Third-party identity providers supported for federation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    Microsoft,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Google, ProviderKind::Microsoft];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::Microsoft => "microsoft",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "google" => Ok(ProviderKind::Google),
            "microsoft" => Ok(ProviderKind::Microsoft),
            _ => Err(format!("Unsupported provider: {}", s)),
        }
    }
}

/// A user's link to an external identity, unique per (user, provider).
#[derive(Debug, Clone, FromRow)]
pub struct LinkedAuthMethod {
    pub user_id: Uuid,
    pub provider_code: String,
    pub provider_subject: String,
    pub created_utc: DateTime<Utc>,
}

impl LinkedAuthMethod {
    pub fn new(user_id: Uuid, provider: ProviderKind, provider_subject: String) -> Self {
        Self {
            user_id,
            provider_code: provider.as_str().to_string(),
            provider_subject,
            created_utc: Utc::now(),
        }
    }
}
