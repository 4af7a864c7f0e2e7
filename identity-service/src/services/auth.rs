use std::sync::Arc;
use uuid::Uuid;

use crate::dtos::auth::{AuthMethodResponse, TokenResponse};
use crate::models::{trim_email, ProviderKind, User, PASSWORD_METHOD};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

use super::{CredentialStore, Feature, JwtService, RefreshTokenManager, ServiceError};

pub const REFRESH_TOKENS: &str = "Refresh tokens";

/// Password accounts and sessions.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    jwt: JwtService,
    refresh: Feature<RefreshTokenManager>,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        jwt: JwtService,
        refresh: Feature<RefreshTokenManager>,
    ) -> Self {
        Self {
            store,
            jwt,
            refresh,
        }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    pub fn refresh_tokens(&self) -> &Feature<RefreshTokenManager> {
        &self.refresh
    }

    /// Access token plus, when the ephemeral store is configured, a refresh token.
    pub async fn issue_tokens(&self, user: &User) -> Result<TokenResponse, ServiceError> {
        let access_token = self.jwt.issue_access_token(
            user.user_id,
            &user.email,
            user.display_name.as_deref(),
        )?;
        let refresh_token = match self.refresh.as_option() {
            Some(manager) => Some(
                manager
                    .issue(user.user_id, &user.email, user.display_name.as_deref())
                    .await?,
            ),
            None => None,
        };
        Ok(TokenResponse::new(
            access_token,
            refresh_token,
            self.jwt.access_token_expiry_seconds(),
        ))
    }

    #[tracing::instrument(skip(self, password, display_name))]
    pub async fn register(
        &self,
        email: &str,
        password: Password,
        display_name: Option<String>,
    ) -> Result<(User, TokenResponse), ServiceError> {
        let email = trim_email(email);
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(ServiceError::EmailAlreadyRegistered);
        }

        let password_hash = hash_password(&password)?;
        let user = User::new(
            email,
            display_name.filter(|n| !n.trim().is_empty()),
            Some(password_hash.into_string()),
        );
        self.store.insert_user(&user).await?;

        tracing::info!(user_id = %user.user_id, "User registered");
        let tokens = self.issue_tokens(&user).await?;
        Ok((user, tokens))
    }

    /// Unknown accounts, SSO-only accounts and wrong passwords are
    /// indistinguishable to the caller.
    #[tracing::instrument(skip(self, password))]
    pub async fn login(
        &self,
        email: &str,
        password: Password,
    ) -> Result<(User, TokenResponse), ServiceError> {
        let user = self.store.find_user_by_email(&trim_email(email)).await?;
        let Some((user, hash)) = user.and_then(|u| {
            let hash = u.password_hash.clone()?;
            Some((u, PasswordHashString::new(hash)))
        }) else {
            crate::utils::password::verify_against_dummy(&password);
            tracing::debug!("Login rejected: no password account");
            return Err(ServiceError::InvalidCredentials);
        };

        if verify_password(&password, &hash).is_err() {
            tracing::debug!(user_id = %user.user_id, "Login rejected: wrong password");
            return Err(ServiceError::InvalidCredentials);
        }

        tracing::info!(user_id = %user.user_id, "User logged in");
        let tokens = self.issue_tokens(&user).await?;
        Ok((user, tokens))
    }

    /// Rotate `refresh_token`. Profile claims are re-read so a renamed user
    /// gets the current display name; a deleted user cannot refresh.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ServiceError> {
        let manager = self.refresh.require(REFRESH_TOKENS)?;
        let (next, record) = manager.rotate(refresh_token).await?;

        let Some(user) = self.store.find_user_by_id(record.user_id).await? else {
            manager.revoke(&next).await?;
            return Err(ServiceError::InvalidToken);
        };

        let access_token = self.jwt.issue_access_token(
            user.user_id,
            &user.email,
            user.display_name.as_deref(),
        )?;
        Ok(TokenResponse::new(
            access_token,
            Some(next),
            self.jwt.access_token_expiry_seconds(),
        ))
    }

    /// Revokes one refresh token. Tokens belonging to another user are left alone.
    #[tracing::instrument(skip(self, refresh_token))]
    pub async fn logout(&self, user_id: Uuid, refresh_token: &str) -> Result<(), ServiceError> {
        let manager = self.refresh.require(REFRESH_TOKENS)?;
        match manager.lookup(refresh_token).await? {
            Some(record) if record.user_id != user_id => {
                tracing::warn!(user_id = %user_id, "Logout with another user's refresh token");
                Ok(())
            }
            _ => manager.revoke(refresh_token).await,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn logout_all(&self, user_id: Uuid) -> Result<usize, ServiceError> {
        self.refresh.require(REFRESH_TOKENS)?.revoke_all(user_id).await
    }

    pub async fn me(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.store
            .find_user_by_id(user_id)
            .await?
            .ok_or(ServiceError::NotFound("User"))
    }

    /// Linked providers, with the password listed first when one is set.
    pub async fn list_auth_methods(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<AuthMethodResponse>, ServiceError> {
        let user = self.me(user_id).await?;
        let mut methods = Vec::new();
        if user.has_password() {
            methods.push(AuthMethodResponse {
                method: PASSWORD_METHOD.to_string(),
                provider_subject: None,
                linked_utc: None,
            });
        }
        methods.extend(
            self.store
                .list_auth_methods(user_id)
                .await?
                .into_iter()
                .map(|m| AuthMethodResponse {
                    method: m.provider_code,
                    provider_subject: Some(m.provider_subject),
                    linked_utc: Some(m.created_utc),
                }),
        );
        Ok(methods)
    }

    #[tracing::instrument(skip(self))]
    pub async fn unlink_auth_method(&self, user_id: Uuid, method: &str) -> Result<(), ServiceError> {
        let method = if method == PASSWORD_METHOD {
            PASSWORD_METHOD
        } else {
            method
                .parse::<ProviderKind>()
                .map_err(|_| ServiceError::NotFound("Authentication method"))?
                .as_str()
        };

        if !self.store.remove_auth_method(user_id, method).await? {
            return Err(ServiceError::NotFound("Authentication method"));
        }
        tracing::info!(user_id = %user_id, method, "Authentication method removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::models::LinkedAuthMethod;
    use crate::services::{MockCredentialStore, MockEphemeralStore};
    use secrecy::Secret;

    fn jwt() -> JwtService {
        JwtService::new(&JwtConfig {
            secret: Secret::new("0123456789abcdef0123456789abcdef".to_string()),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        })
        .unwrap()
    }

    fn service(with_refresh: bool) -> (Arc<MockCredentialStore>, AuthService) {
        let store = Arc::new(MockCredentialStore::new());
        let refresh = if with_refresh {
            Feature::Enabled(RefreshTokenManager::new(
                Arc::new(MockEphemeralStore::new()),
                7,
            ))
        } else {
            Feature::Disabled
        };
        (store.clone(), AuthService::new(store, jwt(), refresh))
    }

    fn pw(s: &str) -> Password {
        Password::new(s.to_string())
    }

    #[tokio::test]
    async fn register_then_login() {
        let (_, auth) = service(true);
        let (user, tokens) = auth
            .register("bob@acme.io", pw("correct-horse"), Some("Bob".into()))
            .await
            .unwrap();
        assert!(tokens.refresh_token.is_some());
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.expires_in, 900);

        let claims = auth.jwt().verify_access_token(&tokens.access_token).unwrap();
        assert_eq!(claims.user_id().unwrap(), user.user_id);
        assert_eq!(claims.name.as_deref(), Some("Bob"));

        let (again, _) = auth.login(" bob@acme.io ", pw("correct-horse")).await.unwrap();
        assert_eq!(again.user_id, user.user_id);
    }

    #[tokio::test]
    async fn emails_are_case_sensitive_as_stored() {
        let (store, auth) = service(false);
        let (upper, _) = auth
            .register("Bob@X.com", pw("correct-horse"), None)
            .await
            .unwrap();
        assert_eq!(upper.email, "Bob@X.com");
        assert_eq!(
            store.find_user_by_email("Bob@X.com").await.unwrap().unwrap().user_id,
            upper.user_id
        );

        let (lower, _) = auth
            .register("bob@x.com", pw("other-horse"), None)
            .await
            .unwrap();
        assert_ne!(lower.user_id, upper.user_id);
        assert_eq!(store.user_count(), 2);

        assert!(matches!(
            auth.login("BOB@X.COM", pw("correct-horse")).await,
            Err(ServiceError::InvalidCredentials)
        ));
        let (found, _) = auth.login("Bob@X.com", pw("correct-horse")).await.unwrap();
        assert_eq!(found.user_id, upper.user_id);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let (store, auth) = service(false);
        auth.register("bob@acme.io", pw("correct-horse"), None).await.unwrap();
        assert!(matches!(
            auth.register("bob@acme.io", pw("other-password"), None).await,
            Err(ServiceError::EmailAlreadyRegistered)
        ));
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn login_failures_are_uniform() {
        let (store, auth) = service(false);
        auth.register("bob@acme.io", pw("correct-horse"), None).await.unwrap();
        store
            .insert_user(&User::new("sso@acme.io".into(), None, None))
            .await
            .unwrap();

        for (email, password) in [
            ("bob@acme.io", "wrong-password"),
            ("nobody@acme.io", "correct-horse"),
            ("sso@acme.io", "anything-at-all"),
        ] {
            let err = auth.login(email, pw(password)).await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidCredentials));
        }
    }

    #[tokio::test]
    async fn refresh_without_store_is_disabled() {
        let (_, auth) = service(false);
        let (_, tokens) = auth
            .register("bob@acme.io", pw("correct-horse"), None)
            .await
            .unwrap();
        assert!(tokens.refresh_token.is_none());
        assert!(matches!(
            auth.refresh("anything").await,
            Err(ServiceError::FeatureDisabled(REFRESH_TOKENS))
        ));
    }

    #[tokio::test]
    async fn refresh_rotates_and_rejects_replay() {
        let (_, auth) = service(true);
        let (_, tokens) = auth
            .register("bob@acme.io", pw("correct-horse"), None)
            .await
            .unwrap();
        let first = tokens.refresh_token.unwrap();

        let rotated = auth.refresh(&first).await.unwrap();
        assert_ne!(rotated.refresh_token.as_deref(), Some(first.as_str()));
        assert!(matches!(
            auth.refresh(&first).await,
            Err(ServiceError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn logout_ignores_foreign_tokens() {
        let (_, auth) = service(true);
        let (bob, bob_tokens) = auth
            .register("bob@acme.io", pw("correct-horse"), None)
            .await
            .unwrap();
        let (eve, _) = auth
            .register("eve@acme.io", pw("correct-horse"), None)
            .await
            .unwrap();
        let bob_refresh = bob_tokens.refresh_token.unwrap();

        auth.logout(eve.user_id, &bob_refresh).await.unwrap();
        assert!(auth.refresh(&bob_refresh).await.is_ok());

        let (_, more) = auth.login("bob@acme.io", pw("correct-horse")).await.unwrap();
        auth.logout(bob.user_id, more.refresh_token.as_deref().unwrap())
            .await
            .unwrap();
        assert!(auth.refresh(more.refresh_token.as_deref().unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn password_is_listed_and_last_method_is_kept() {
        let (store, auth) = service(false);
        let (user, _) = auth
            .register("bob@acme.io", pw("correct-horse"), None)
            .await
            .unwrap();

        assert!(matches!(
            auth.unlink_auth_method(user.user_id, "password").await,
            Err(ServiceError::LastAuthMethod)
        ));
        assert!(matches!(
            auth.unlink_auth_method(user.user_id, "github").await,
            Err(ServiceError::NotFound(_))
        ));

        store
            .upsert_auth_method(&LinkedAuthMethod::new(
                user.user_id,
                ProviderKind::Google,
                "g-123".into(),
            ))
            .await
            .unwrap();
        let methods = auth.list_auth_methods(user.user_id).await.unwrap();
        let names: Vec<_> = methods.iter().map(|m| m.method.as_str()).collect();
        assert_eq!(names, vec!["password", "google"]);

        auth.unlink_auth_method(user.user_id, "password").await.unwrap();
        assert!(!auth.me(user.user_id).await.unwrap().has_password());
        assert!(matches!(
            auth.unlink_auth_method(user.user_id, "google").await,
            Err(ServiceError::LastAuthMethod)
        ));
    }
}
