use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity bound to an opaque refresh token. Stored in the ephemeral store
/// under the token's SHA-256 hash; expiry is the store TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub issued_utc: DateTime<Utc>,
    /// The user's revocation epoch when the token was issued. Logout-all bumps
    /// the epoch, which invalidates every record stamped with an older one.
    #[serde(default)]
    pub epoch: i64,
}

impl RefreshTokenRecord {
    pub fn new(
        user_id: Uuid,
        email: String,
        display_name: Option<String>,
        epoch: i64,
    ) -> Self {
        Self {
            user_id,
            email,
            display_name,
            issued_utc: Utc::now(),
            epoch,
        }
    }
}
