//! Login state carried between the login redirect and the provider callback.
//!
//! The cookie value is `base64url(state:org_slug:code_verifier:expires).hmac`
//! where `hmac` is the hex HMAC-SHA256 of the encoded part. Neither the
//! state nor the PKCE verifier is ever kept server-side.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use secrecy::{ExposeSecret, Secret};
use service_core::utils::{sign, verify};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::services::ServiceError;
use crate::utils::generate_token;

const STATE_KEY_LABEL: &str = "oauth-state";

/// Key that seals login state cookies, derived from the token signing secret
/// so the two never share raw key material.
pub fn derive_state_key(signing_secret: &Secret<String>) -> Result<Secret<String>, ServiceError> {
    let key = sign(signing_secret.expose_secret().as_bytes(), STATE_KEY_LABEL)?;
    Ok(Secret::new(key))
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginState {
    pub state: String,
    pub org_slug: String,
    pub code_verifier: String,
    pub expires_at: i64,
}

impl LoginState {
    pub fn new(org_slug: &str, ttl_minutes: i64) -> Self {
        Self {
            state: generate_token(),
            org_slug: org_slug.to_string(),
            code_verifier: generate_token(),
            expires_at: Utc::now().timestamp() + ttl_minutes * 60,
        }
    }

    /// S256 PKCE challenge for `code_verifier`.
    pub fn code_challenge(&self) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(self.code_verifier.as_bytes()))
    }

    pub fn seal(&self, key: &[u8]) -> Result<String, ServiceError> {
        let payload = URL_SAFE_NO_PAD.encode(format!(
            "{}:{}:{}:{}",
            self.state, self.org_slug, self.code_verifier, self.expires_at
        ));
        let signature = sign(key, &payload)?;
        Ok(format!("{}.{}", payload, signature))
    }

    /// Any tampering, truncation or expiry is reported as `InvalidOAuthState`.
    pub fn open(sealed: &str, key: &[u8]) -> Result<Self, ServiceError> {
        let (payload, signature) = sealed
            .rsplit_once('.')
            .ok_or(ServiceError::InvalidOAuthState)?;
        if !verify(key, payload, signature)? {
            return Err(ServiceError::InvalidOAuthState);
        }

        let decoded = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or(ServiceError::InvalidOAuthState)?;
        let mut parts = decoded.splitn(4, ':');
        let (Some(state), Some(org_slug), Some(code_verifier), Some(expires_at)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ServiceError::InvalidOAuthState);
        };
        let expires_at: i64 = expires_at
            .parse()
            .map_err(|_| ServiceError::InvalidOAuthState)?;
        if expires_at < Utc::now().timestamp() {
            return Err(ServiceError::InvalidOAuthState);
        }

        Ok(Self {
            state: state.to_string(),
            org_slug: org_slug.to_string(),
            code_verifier: code_verifier.to_string(),
            expires_at,
        })
    }

    pub fn matches(&self, presented: &str) -> bool {
        let expected = self.state.as_bytes();
        let presented = presented.as_bytes();
        expected.len() == presented.len() && bool::from(expected.ct_eq(presented))
    }
}
