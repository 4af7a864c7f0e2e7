//! Invitation model - pending offers to join an organization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Role;

/// Pending invitation, keyed in the ephemeral store by the SHA-256 hash of
/// its opaque token. There is no accepted/expired state: acceptance deletes
/// the record and the store TTL expires it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub org_id: Uuid,
    pub email: String,
    pub role: Role,
    pub invited_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
}

impl Invitation {
    pub fn new(
        org_id: Uuid,
        email: String,
        role: Role,
        invited_by: Uuid,
        ttl: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            org_id,
            email,
            role,
            invited_by,
            created_utc: now,
            expires_utc: now + ttl,
        }
    }

    /// Invitations bind to the exact stored email.
    pub fn is_for(&self, email: &str) -> bool {
        self.email == email
    }
}
