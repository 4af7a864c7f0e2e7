//! OAuth federation against per-organization Google and Microsoft clients.

pub mod google;
pub mod microsoft;
pub mod state;

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::OAuthConfig;
use crate::dtos::auth::OAuthCallbackQuery;
use crate::models::{trim_email, LinkedAuthMethod, ProviderKind, Role, SsoConfig, User};

use super::{CredentialStore, JwtService, ServiceError};

pub use google::GoogleProvider;
pub use microsoft::MicrosoftProvider;
pub use state::{derive_state_key, LoginState};

/// Identity asserted by a provider after a successful code exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteProfile {
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// One external identity provider. Implementations only speak the provider's
/// protocol; the shared flow lives in [`FederationService`].
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn authorization_url(
        &self,
        config: &SsoConfig,
        redirect_uri: &str,
        state: &str,
        code_challenge: &str,
    ) -> String;

    /// Exchange an authorization code for a provider access token.
    async fn exchange_code(
        &self,
        config: &SsoConfig,
        redirect_uri: &str,
        code: &str,
        code_verifier: &str,
    ) -> Result<String, ServiceError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<RemoteProfile, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
}

/// Authorization-code grant against a standard token endpoint.
pub(crate) async fn exchange_at(
    client: &reqwest::Client,
    token_url: &str,
    config: &SsoConfig,
    redirect_uri: &str,
    code: &str,
    code_verifier: &str,
) -> Result<String, ServiceError> {
    let response = client
        .post(token_url)
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("code", code),
            ("code_verifier", code_verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, provider = %config.provider_code, "Token exchange failed");
            ServiceError::Upstream("token exchange failed".to_string())
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::error!(%status, body = %body, provider = %config.provider_code, "Token endpoint error");
        return Err(ServiceError::Upstream(format!(
            "token endpoint returned {}",
            status
        )));
    }

    let token: TokenEndpointResponse = response.json().await.map_err(|e| {
        tracing::error!(error = %e, "Unreadable token endpoint response");
        ServiceError::Upstream("unreadable token response".to_string())
    })?;
    Ok(token.access_token)
}

/// GET a JSON profile document with a bearer token.
pub(crate) async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    access_token: &str,
) -> Result<T, ServiceError> {
    let response = client
        .get(url)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Profile request failed");
            ServiceError::Upstream("profile request failed".to_string())
        })?;

    if !response.status().is_success() {
        return Err(ServiceError::Upstream(format!(
            "profile endpoint returned {}",
            response.status()
        )));
    }

    response.json().await.map_err(|e| {
        tracing::error!(error = %e, "Unreadable profile response");
        ServiceError::Upstream("unreadable profile response".to_string())
    })
}

/// Where to send the browser and the cookie that must accompany it.
#[derive(Debug)]
pub struct LoginRedirect {
    pub authorization_url: String,
    pub state_cookie: String,
}

#[derive(Clone)]
pub struct FederationService {
    provider: Arc<dyn OAuthProvider>,
    store: Arc<dyn CredentialStore>,
    jwt: JwtService,
    state_key: Secret<String>,
    public_base_url: String,
    frontend_url: String,
    state_ttl_minutes: i64,
}

impl FederationService {
    pub fn new(
        provider: Arc<dyn OAuthProvider>,
        store: Arc<dyn CredentialStore>,
        jwt: JwtService,
        state_key: Secret<String>,
        config: &OAuthConfig,
    ) -> Self {
        Self {
            provider,
            store,
            jwt,
            state_key,
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            frontend_url: config.frontend_url.trim_end_matches('/').to_string(),
            state_ttl_minutes: config.state_ttl_minutes,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    pub fn cookie_name(&self) -> String {
        format!("oauth_state_{}", self.kind())
    }

    pub fn state_ttl_minutes(&self) -> i64 {
        self.state_ttl_minutes
    }

    pub fn redirect_uri(&self) -> String {
        format!("{}/auth/{}/callback", self.public_base_url, self.kind())
    }

    async fn enabled_config(&self, org_slug: &str) -> Result<SsoConfig, ServiceError> {
        let org = self
            .store
            .find_organization_by_slug(org_slug)
            .await?
            .ok_or(ServiceError::NotFound("Organization"))?;
        match self.store.find_sso_config(org.org_id, self.kind()).await? {
            Some(config) if config.enabled_flag => Ok(config),
            _ => Err(ServiceError::SsoUnavailable),
        }
    }

    #[tracing::instrument(skip(self), fields(provider = %self.kind()))]
    pub async fn begin_login(&self, org_slug: &str) -> Result<LoginRedirect, ServiceError> {
        let config = self.enabled_config(org_slug).await?;

        let login = LoginState::new(org_slug, self.state_ttl_minutes);
        let state_cookie = login.seal(self.state_key.expose_secret().as_bytes())?;
        let authorization_url = self.provider.authorization_url(
            &config,
            &self.redirect_uri(),
            &login.state,
            &login.code_challenge(),
        );

        Ok(LoginRedirect {
            authorization_url,
            state_cookie,
        })
    }

    /// Validates the callback and returns the dashboard URL carrying the new
    /// access token in its fragment. Nothing is written before the state has
    /// been verified.
    #[tracing::instrument(skip_all, fields(provider = %self.kind()))]
    pub async fn complete_login(
        &self,
        state_cookie: Option<&str>,
        params: &OAuthCallbackQuery,
    ) -> Result<String, ServiceError> {
        let login = LoginState::open(
            state_cookie.ok_or(ServiceError::InvalidOAuthState)?,
            self.state_key.expose_secret().as_bytes(),
        )?;
        if !params.state.as_deref().is_some_and(|s| login.matches(s)) {
            tracing::warn!("OAuth state mismatch");
            return Err(ServiceError::InvalidOAuthState);
        }

        if let Some(error) = &params.error {
            let reason = params.error_description.as_deref().unwrap_or(error);
            tracing::info!(error = %error, "Provider reported an error");
            return Err(ServiceError::ProviderDenied(reason.to_string()));
        }
        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ServiceError::Validation("Missing authorization code".to_string()))?;

        let config = self.enabled_config(&login.org_slug).await?;
        let provider_token = self
            .provider
            .exchange_code(&config, &self.redirect_uri(), code, &login.code_verifier)
            .await?;
        let profile = self.provider.fetch_profile(&provider_token).await?;
        let email = profile
            .email
            .as_deref()
            .map(trim_email)
            .filter(|e| !e.is_empty())
            .ok_or(ServiceError::MissingProviderEmail)?;

        let user = self
            .find_or_create_user(&email, profile.display_name.clone())
            .await?;
        if self
            .store
            .insert_membership_if_absent(config.org_id, user.user_id, Role::Viewer)
            .await?
        {
            tracing::info!(org_id = %config.org_id, user_id = %user.user_id, "Joined organization through SSO");
        }
        self.store
            .upsert_auth_method(&LinkedAuthMethod::new(
                user.user_id,
                self.kind(),
                profile.subject,
            ))
            .await?;

        let access_token = self.jwt.issue_access_token(
            user.user_id,
            &user.email,
            user.display_name.as_deref(),
        )?;
        tracing::info!(user_id = %user.user_id, "SSO login completed");

        Ok(format!(
            "{}/auth/callback#access_token={}&token_type=Bearer&expires_in={}",
            self.frontend_url,
            urlencoding::encode(&access_token),
            self.jwt.access_token_expiry_seconds()
        ))
    }

    async fn find_or_create_user(
        &self,
        email: &str,
        display_name: Option<String>,
    ) -> Result<User, ServiceError> {
        if let Some(user) = self.store.find_user_by_email(email).await? {
            return Ok(user);
        }

        let user = User::new(email.to_string(), display_name, None);
        match self.store.insert_user(&user).await {
            Ok(()) => {
                tracing::info!(user_id = %user.user_id, "User created through SSO");
                Ok(user)
            }
            // Lost a race with a concurrent first login for the same email.
            Err(ServiceError::EmailAlreadyRegistered) => self
                .store
                .find_user_by_email(email)
                .await?
                .ok_or(ServiceError::EmailAlreadyRegistered),
            Err(e) => Err(e),
        }
    }
}

/// Federation services by provider.
#[derive(Clone, Default)]
pub struct FederationRegistry {
    services: HashMap<ProviderKind, FederationService>,
}

impl FederationRegistry {
    pub fn new(services: impl IntoIterator<Item = FederationService>) -> Self {
        Self {
            services: services.into_iter().map(|s| (s.kind(), s)).collect(),
        }
    }

    pub fn get(&self, provider: &str) -> Result<&FederationService, ServiceError> {
        provider
            .parse::<ProviderKind>()
            .ok()
            .and_then(|kind| self.services.get(&kind))
            .ok_or(ServiceError::NotFound("Identity provider"))
    }
}

/// The production provider set sharing one HTTP client.
pub fn default_providers(client: reqwest::Client) -> Vec<Arc<dyn OAuthProvider>> {
    vec![
        Arc::new(GoogleProvider::new(client.clone())),
        Arc::new(MicrosoftProvider::new(client)),
    ]
}
