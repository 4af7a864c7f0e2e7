use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-organization OAuth client settings for one provider.
///
/// `tenant_qualifier` narrows Microsoft logins to one directory; Google
/// ignores it.
#[derive(Debug, Clone, FromRow)]
pub struct SsoConfig {
    pub org_id: Uuid,
    pub provider_code: String,
    pub client_id: String,
    pub client_secret: String,
    pub tenant_qualifier: Option<String>,
    pub enabled_flag: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}
