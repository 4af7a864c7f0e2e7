//! Refresh token lifecycle: `issued -> rotated-away | revoked | expired`.
//!
//! Tokens are opaque; only their SHA-256 hash is stored, under
//! `refresh_token:<hash>` with the configured TTL. Each user has an index set
//! `refresh_tokens_by_user:<user_id>` listing live hashes so that logout-all
//! can find them.

use std::sync::Arc;
use uuid::Uuid;

use crate::models::RefreshTokenRecord;
use crate::utils::{generate_token, hash_token};

use super::{EphemeralStore, ServiceError};

const TOKEN_KEY_PREFIX: &str = "refresh_token:";
const USER_INDEX_PREFIX: &str = "refresh_tokens_by_user:";
const EPOCH_PREFIX: &str = "refresh_epoch:";

fn token_key(hash: &str) -> String {
    format!("{}{}", TOKEN_KEY_PREFIX, hash)
}

fn user_index_key(user_id: Uuid) -> String {
    format!("{}{}", USER_INDEX_PREFIX, user_id)
}

fn epoch_key(user_id: Uuid) -> String {
    format!("{}{}", EPOCH_PREFIX, user_id)
}

#[derive(Clone)]
pub struct RefreshTokenManager {
    store: Arc<dyn EphemeralStore>,
    ttl_seconds: u64,
}

impl RefreshTokenManager {
    pub fn new(store: Arc<dyn EphemeralStore>, expiry_days: i64) -> Self {
        Self {
            store,
            ttl_seconds: (expiry_days.max(1) as u64) * 24 * 60 * 60,
        }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    #[tracing::instrument(skip(self, email, display_name))]
    pub async fn issue(
        &self,
        user_id: Uuid,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<String, ServiceError> {
        let epoch = self.current_epoch(user_id).await?;
        let record = RefreshTokenRecord::new(
            user_id,
            email.to_string(),
            display_name.map(str::to_string),
            epoch,
        );
        self.store_record(&record).await
    }

    async fn current_epoch(&self, user_id: Uuid) -> Result<i64, ServiceError> {
        let value = self
            .store
            .get(&epoch_key(user_id))
            .await
            .map_err(ServiceError::Ephemeral)?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    async fn discard(&self, user_id: Uuid, hash: &str) -> Result<(), ServiceError> {
        self.store
            .delete(&token_key(hash))
            .await
            .map_err(ServiceError::Ephemeral)?;
        self.store
            .remove_from_set(&user_index_key(user_id), hash)
            .await
            .map_err(ServiceError::Ephemeral)
    }

    async fn store_record(&self, record: &RefreshTokenRecord) -> Result<String, ServiceError> {
        let token = generate_token();
        let hash = hash_token(&token);
        let payload = serde_json::to_string(record)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;

        self.store
            .set_ex(&token_key(&hash), &payload, self.ttl_seconds)
            .await
            .map_err(ServiceError::Ephemeral)?;
        self.store
            .add_to_set(&user_index_key(record.user_id), &hash, self.ttl_seconds)
            .await
            .map_err(ServiceError::Ephemeral)?;

        Ok(token)
    }

    /// Consume `token` and issue its successor for the same identity. The old
    /// record is taken atomically, so of two concurrent rotations only one
    /// succeeds and a replayed token is always rejected. A rotation that
    /// overlaps logout-all for the same user fails and leaves no live token.
    #[tracing::instrument(skip_all)]
    pub async fn rotate(&self, token: &str) -> Result<(String, RefreshTokenRecord), ServiceError> {
        let hash = hash_token(token);
        let payload = self
            .store
            .take(&token_key(&hash))
            .await
            .map_err(ServiceError::Ephemeral)?
            .ok_or(ServiceError::InvalidToken)?;

        let previous: RefreshTokenRecord = serde_json::from_str(&payload).map_err(|e| {
            tracing::warn!(error = %e, "Discarding unreadable refresh token record");
            ServiceError::InvalidToken
        })?;

        self.store
            .remove_from_set(&user_index_key(previous.user_id), &hash)
            .await
            .map_err(ServiceError::Ephemeral)?;

        let epoch = self.current_epoch(previous.user_id).await?;
        if previous.epoch != epoch {
            tracing::debug!(user_id = %previous.user_id, "Refresh token predates logout-all");
            return Err(ServiceError::InvalidToken);
        }

        let record = RefreshTokenRecord::new(
            previous.user_id,
            previous.email,
            previous.display_name,
            epoch,
        );
        let next = self.store_record(&record).await?;

        // Logout-all may have read the index before the successor was added.
        if self.current_epoch(record.user_id).await? != epoch {
            self.discard(record.user_id, &hash_token(&next)).await?;
            tracing::debug!(user_id = %record.user_id, "Rotation raced logout-all");
            return Err(ServiceError::InvalidToken);
        }

        tracing::debug!(user_id = %record.user_id, "Refresh token rotated");
        Ok((next, record))
    }

    /// Idempotent: unknown or already-revoked tokens succeed silently.
    #[tracing::instrument(skip_all)]
    pub async fn revoke(&self, token: &str) -> Result<(), ServiceError> {
        let hash = hash_token(token);
        let taken = self
            .store
            .take(&token_key(&hash))
            .await
            .map_err(ServiceError::Ephemeral)?;

        if let Some(record) = taken.and_then(|p| serde_json::from_str::<RefreshTokenRecord>(&p).ok())
        {
            self.store
                .remove_from_set(&user_index_key(record.user_id), &hash)
                .await
                .map_err(ServiceError::Ephemeral)?;
        }
        Ok(())
    }

    /// Revoke every live refresh token of `user_id`; returns how many were removed.
    #[tracing::instrument(skip(self))]
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<usize, ServiceError> {
        // The epoch moves before the index is read.
        self.store
            .incr(&epoch_key(user_id))
            .await
            .map_err(ServiceError::Ephemeral)?;

        let index = user_index_key(user_id);
        let hashes = self
            .store
            .set_members(&index)
            .await
            .map_err(ServiceError::Ephemeral)?;

        let mut revoked = 0;
        for hash in &hashes {
            if self
                .store
                .delete(&token_key(hash))
                .await
                .map_err(ServiceError::Ephemeral)?
            {
                revoked += 1;
            }
        }
        self.store
            .delete(&index)
            .await
            .map_err(ServiceError::Ephemeral)?;

        tracing::info!(user_id = %user_id, revoked, "Revoked all refresh tokens");
        Ok(revoked)
    }

    /// Resolve a token without consuming it.
    pub async fn lookup(&self, token: &str) -> Result<Option<RefreshTokenRecord>, ServiceError> {
        let payload = self
            .store
            .get(&token_key(&hash_token(token)))
            .await
            .map_err(ServiceError::Ephemeral)?;
        Ok(payload.and_then(|p| serde_json::from_str(&p).ok()))
    }
}
