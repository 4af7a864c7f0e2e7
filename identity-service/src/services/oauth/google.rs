use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{ProviderKind, SsoConfig};
use crate::services::ServiceError;

use super::{exchange_at, fetch_json, OAuthProvider, RemoteProfile};

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: String,
    email: Option<String>,
    #[serde(default)]
    verified_email: bool,
    name: Option<String>,
}

impl GoogleUserInfo {
    /// Unverified addresses are dropped; the caller treats that as no email.
    fn into_profile(self) -> RemoteProfile {
        let email = if self.verified_email { self.email } else { None };
        RemoteProfile {
            subject: self.id,
            email,
            display_name: self.name,
        }
    }
}

#[derive(Clone)]
pub struct GoogleProvider {
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn authorization_url(
        &self,
        config: &SsoConfig,
        redirect_uri: &str,
        state: &str,
        code_challenge: &str,
    ) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope=openid%20email%20profile&state={}&code_challenge={}&code_challenge_method=S256&prompt=select_account",
            AUTHORIZE_URL,
            urlencoding::encode(&config.client_id),
            urlencoding::encode(redirect_uri),
            state,
            code_challenge
        )
    }

    async fn exchange_code(
        &self,
        config: &SsoConfig,
        redirect_uri: &str,
        code: &str,
        code_verifier: &str,
    ) -> Result<String, ServiceError> {
        exchange_at(&self.client, TOKEN_URL, config, redirect_uri, code, code_verifier).await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<RemoteProfile, ServiceError> {
        let info: GoogleUserInfo = fetch_json(&self.client, USERINFO_URL, access_token).await?;
        Ok(info.into_profile())
    }
}
