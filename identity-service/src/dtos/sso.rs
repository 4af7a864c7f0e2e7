use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::SsoConfig;

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SsoConfigRequest {
    #[validate(length(min = 1, message = "client_id is required"))]
    pub client_id: String,
    /// Omit to keep the stored secret.
    pub client_secret: Option<String>,
    /// Microsoft directory (tenant) id or domain
    pub tenant: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// SSO settings as reported back to admins. The client secret is never returned.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SsoConfigResponse {
    pub org_id: Uuid,
    #[schema(example = "microsoft")]
    pub provider: String,
    pub client_id: String,
    pub client_secret_set: bool,
    pub tenant: Option<String>,
    pub enabled: bool,
    pub updated_utc: DateTime<Utc>,
}

impl From<SsoConfig> for SsoConfigResponse {
    fn from(c: SsoConfig) -> Self {
        Self {
            org_id: c.org_id,
            provider: c.provider_code,
            client_id: c.client_id,
            client_secret_set: !c.client_secret.is_empty(),
            tenant: c.tenant_qualifier,
            enabled: c.enabled_flag,
            updated_utc: c.updated_utc,
        }
    }
}
