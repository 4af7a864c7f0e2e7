use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{ProviderKind, SsoConfig};
use crate::services::ServiceError;

use super::{exchange_at, fetch_json, OAuthProvider, RemoteProfile};

const LOGIN_BASE_URL: &str = "https://login.microsoftonline.com";
const GRAPH_ME_URL: &str = "https://graph.microsoft.com/v1.0/me";
const DEFAULT_TENANT: &str = "common";

fn tenant(config: &SsoConfig) -> &str {
    config
        .tenant_qualifier
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TENANT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    id: String,
    display_name: Option<String>,
    mail: Option<String>,
    user_principal_name: Option<String>,
}

impl GraphUser {
    /// Accounts without a mailbox have `mail: null`; the UPN is the fallback.
    fn into_profile(self) -> RemoteProfile {
        let email = self
            .mail
            .filter(|m| !m.is_empty())
            .or(self.user_principal_name.filter(|u| u.contains('@')));
        RemoteProfile {
            subject: self.id,
            email,
            display_name: self.display_name,
        }
    }
}

#[derive(Clone)]
pub struct MicrosoftProvider {
    client: reqwest::Client,
}

impl MicrosoftProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OAuthProvider for MicrosoftProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Microsoft
    }

    fn authorization_url(
        &self,
        config: &SsoConfig,
        redirect_uri: &str,
        state: &str,
        code_challenge: &str,
    ) -> String {
        format!(
            "{}/{}/oauth2/v2.0/authorize?client_id={}&redirect_uri={}&response_type=code&response_mode=query&scope=openid%20email%20profile%20User.Read&state={}&code_challenge={}&code_challenge_method=S256",
            LOGIN_BASE_URL,
            urlencoding::encode(tenant(config)),
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
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            LOGIN_BASE_URL,
            urlencoding::encode(tenant(config))
        );
        exchange_at(&self.client, &token_url, config, redirect_uri, code, code_verifier).await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<RemoteProfile, ServiceError> {
        let user: GraphUser = fetch_json(&self.client, GRAPH_ME_URL, access_token).await?;
        Ok(user.into_profile())
    }
}
