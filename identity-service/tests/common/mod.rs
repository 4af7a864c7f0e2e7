//! Shared harness for identity-service integration tests.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot` on top of
//! the in-memory credential and ephemeral stores, so no Postgres or Redis is
//! needed. Identity providers are replaced with [`ScriptedProvider`].

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use identity_service::{
    build_router,
    config::{
        DatabaseConfig, Environment, IdentityConfig, InvitationConfig, JwtConfig, OAuthConfig,
        RateLimitConfig, RedisConfig, SecurityConfig,
    },
    models::{ProviderKind, SsoConfig},
    services::{
        CredentialStore, Database, EphemeralStore, MockCredentialStore, MockEphemeralStore,
        OAuthProvider, RemoteProfile, ServiceError,
    },
    AppState,
};
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::util::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "correct horse battery";

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "identity-service".to_string(),
        service_version: "0.1.0".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: Secret::new("postgres://localhost/identity_test".to_string()),
            max_connections: 1,
            min_connections: 1,
        },
        redis: Some(RedisConfig {
            url: Secret::new("redis://localhost:6379".to_string()),
        }),
        jwt: JwtConfig {
            secret: Secret::new("integration-test-secret-0123456789abcdef".to_string()),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        },
        invitation: InvitationConfig { expiry_days: 7 },
        oauth: OAuthConfig {
            public_base_url: "http://id.test".to_string(),
            frontend_url: "http://dash.test".to_string(),
            state_ttl_minutes: 10,
            http_timeout_seconds: 5,
            secure_cookies: false,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://dash.test".to_string()],
        },
        rate_limit: RateLimitConfig {
            login_attempts: 5,
            login_window_seconds: 900,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
    }
}

/// Identity provider whose token exchange and profile lookup are canned.
pub struct ScriptedProvider {
    kind: ProviderKind,
    profile: Mutex<RemoteProfile>,
    pub exchanged_codes: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            profile: Mutex::new(RemoteProfile {
                subject: "subject-1".to_string(),
                email: Some("carol@acme.io".to_string()),
                display_name: Some("Carol".to_string()),
            }),
            exchanged_codes: Mutex::new(Vec::new()),
        }
    }

    pub fn set_profile(&self, profile: RemoteProfile) {
        *self.profile.lock().unwrap() = profile;
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanged_codes.lock().unwrap().len()
    }
}

#[async_trait]
impl OAuthProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn authorization_url(
        &self,
        config: &SsoConfig,
        redirect_uri: &str,
        state: &str,
        code_challenge: &str,
    ) -> String {
        format!(
            "https://idp.test/{}/authorize?client_id={}&redirect_uri={}&state={}&code_challenge={}",
            self.kind.as_str(),
            config.client_id,
            urlencoding::encode(redirect_uri),
            state,
            code_challenge
        )
    }

    async fn exchange_code(
        &self,
        _config: &SsoConfig,
        _redirect_uri: &str,
        code: &str,
        _code_verifier: &str,
    ) -> Result<String, ServiceError> {
        self.exchanged_codes.lock().unwrap().push(code.to_string());
        Ok(format!("provider-token-{}", code))
    }

    async fn fetch_profile(&self, _access_token: &str) -> Result<RemoteProfile, ServiceError> {
        Ok(self.profile.lock().unwrap().clone())
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn error(&self) -> &str {
        self.body["error"].as_str().unwrap_or_default()
    }

    /// All `Set-Cookie` values.
    pub fn cookies(&self) -> Vec<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect()
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MockCredentialStore>,
    pub ephemeral: Option<Arc<MockEphemeralStore>>,
    pub google: Arc<ScriptedProvider>,
    pub microsoft: Arc<ScriptedProvider>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// No ephemeral store: refresh tokens and invitations are disabled.
    pub fn without_redis() -> Self {
        let mut config = test_config();
        config.redis = None;
        Self::with_config(config)
    }

    pub fn with_config(config: IdentityConfig) -> Self {
        let store = Arc::new(MockCredentialStore::new());
        let ephemeral = config
            .redis
            .as_ref()
            .map(|_| Arc::new(MockEphemeralStore::new()));
        let google = Arc::new(ScriptedProvider::new(ProviderKind::Google));
        let microsoft = Arc::new(ScriptedProvider::new(ProviderKind::Microsoft));
        let providers = vec![
            google.clone() as Arc<dyn OAuthProvider>,
            microsoft.clone() as Arc<dyn OAuthProvider>,
        ];

        let state = AppState::new(
            config,
            store.clone(),
            ephemeral
                .clone()
                .map(|e| e as Arc<dyn EphemeralStore>),
            providers,
            None,
        )
        .expect("failed to build app state");

        Self {
            router: build_router(state.clone()),
            state,
            store,
            ephemeral,
            google,
            microsoft,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, token: &str) -> TestResponse {
        self.request(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    /// Register with [`PASSWORD`] and return the token response body.
    pub async fn register(&self, email: &str) -> Value {
        let res = self
            .post(
                "/auth/register",
                None,
                json!({ "email": email, "password": PASSWORD }),
            )
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "register {}: {}", email, res.body);
        res.body
    }

    /// Register and return only the access token.
    pub async fn access_token(&self, email: &str) -> String {
        self.register(email).await["access_token"]
            .as_str()
            .unwrap()
            .to_string()
    }

    pub async fn user_id(&self, email: &str) -> Uuid {
        self.store
            .find_user_by_email(email)
            .await
            .unwrap()
            .expect("user exists")
            .user_id
    }

    pub async fn create_org(&self, token: &str, name: &str, slug: &str) -> Uuid {
        let res = self
            .post("/orgs", Some(token), json!({ "name": name, "slug": slug }))
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "create org: {}", res.body);
        res.body["org_id"].as_str().unwrap().parse().unwrap()
    }

    /// Invite `email` and return the invitation token.
    pub async fn invite(&self, token: &str, org_id: Uuid, email: &str, role: &str) -> String {
        let res = self
            .post(
                &format!("/orgs/{}/invitations", org_id),
                Some(token),
                json!({ "email": email, "role": role }),
            )
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "invite: {}", res.body);
        res.body["token"].as_str().unwrap().to_string()
    }

    pub async fn configure_sso(&self, token: &str, org_id: Uuid, provider: &str, enabled: bool) {
        let res = self
            .post(
                &format!("/orgs/{}/sso/{}", org_id, provider),
                Some(token),
                json!({
                    "client_id": format!("{}-client", provider),
                    "client_secret": "s3cret",
                    "enabled": enabled
                }),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "configure sso: {}", res.body);
    }
}

/// Database URL for the Postgres-backed tests. Those tests are skipped
/// when `TEST_DATABASE_URL` is unset.
pub fn test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok()
}

/// Connect to the test database and apply migrations.
pub async fn create_test_database() -> Option<Database> {
    let Some(url) = test_database_url() else {
        eprintln!("TEST_DATABASE_URL not set; skipping Postgres test");
        return None;
    };
    let config = DatabaseConfig {
        url: Secret::new(url),
        max_connections: 5,
        min_connections: 1,
    };
    Some(
        Database::connect(&config)
            .await
            .expect("Failed to connect to test database"),
    )
}
