pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use metrics_exporter_prometheus::PrometheusHandle;
use service_core::axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{Environment, IdentityConfig, OAuthConfig};
use crate::services::oauth::derive_state_key;
use crate::services::{
    AuthService, CredentialStore, EphemeralStore, Feature, FederationRegistry, FederationService,
    InvitationService, JwtService, OAuthProvider, OrganizationService, RefreshTokenManager,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::registration::register,
        handlers::auth::session::login,
        handlers::auth::session::refresh,
        handlers::auth::session::logout,
        handlers::auth::session::logout_all,
        handlers::auth::session::me,
        handlers::auth::methods::list_auth_methods,
        handlers::auth::methods::unlink_auth_method,
        handlers::oauth::oauth_login,
        handlers::oauth::oauth_callback,
        handlers::org::create_organization,
        handlers::org::list_organizations,
        handlers::org::get_organization,
        handlers::org::delete_organization,
        handlers::org::list_members,
        handlers::org::update_member_role,
        handlers::org::remove_member,
        handlers::invitation::create_invitation,
        handlers::invitation::revoke_invitation,
        handlers::invitation::accept_invitation,
        handlers::sso::get_sso_config,
        handlers::sso::configure_sso,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::LoginRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::LogoutRequest,
            dtos::auth::TokenResponse,
            dtos::auth::AuthMethodResponse,
            dtos::auth::RevokedSessionsResponse,
            dtos::org::CreateOrganizationRequest,
            dtos::org::UpdateMemberRoleRequest,
            dtos::org::OrganizationResponse,
            dtos::invitation::CreateInvitationRequest,
            dtos::invitation::InvitationResponse,
            dtos::invitation::AcceptInvitationResponse,
            dtos::sso::SsoConfigRequest,
            dtos::sso::SsoConfigResponse,
            models::Role,
            models::ProviderKind,
            models::Organization,
            models::OrganizationWithRole,
            models::Membership,
            models::MemberSummary,
            models::UserResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Password accounts and token management"),
        (name = "Federation", description = "Per-organization Google and Microsoft sign-in"),
        (name = "Organizations", description = "Organizations, members and roles"),
        (name = "Invitations", description = "Invite users into an organization"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub store: Arc<dyn CredentialStore>,
    /// `None` when Redis is not configured or was unreachable at startup.
    pub ephemeral: Option<Arc<dyn EphemeralStore>>,
    pub jwt: JwtService,
    pub auth_service: AuthService,
    pub org_service: OrganizationService,
    pub invitation_service: Feature<InvitationService>,
    pub federation: FederationRegistry,
    pub login_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire every service from configuration and the already-connected stores.
    pub fn new(
        config: IdentityConfig,
        store: Arc<dyn CredentialStore>,
        ephemeral: Option<Arc<dyn EphemeralStore>>,
        providers: Vec<Arc<dyn OAuthProvider>>,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Result<Self, anyhow::Error> {
        let jwt = JwtService::new(&config.jwt)?;

        let refresh = Feature::from_option(ephemeral.clone().map(|e| {
            RefreshTokenManager::new(e, config.jwt.refresh_token_expiry_days)
        }));
        let auth_service = AuthService::new(store.clone(), jwt.clone(), refresh);
        let org_service = OrganizationService::new(store.clone());
        let invitation_service = Feature::from_option(ephemeral.clone().map(|e| {
            InvitationService::new(e, org_service.clone(), config.invitation.expiry_days)
        }));

        let state_key = derive_state_key(&config.jwt.secret)?;
        let federation = FederationRegistry::new(providers.into_iter().map(|provider| {
            FederationService::new(
                provider,
                store.clone(),
                jwt.clone(),
                state_key.clone(),
                &config.oauth,
            )
        }));

        let login_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        );
        let ip_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        );

        if !auth_service.refresh_tokens().is_enabled() {
            tracing::warn!("Ephemeral store unavailable: refresh tokens and invitations disabled");
        }

        Ok(Self {
            config,
            store,
            ephemeral,
            jwt,
            auth_service,
            org_service,
            invitation_service,
            federation,
            login_rate_limiter,
            ip_rate_limiter,
            metrics_handle,
        })
    }
}

/// Shared client for identity provider calls.
pub fn oauth_http_client(config: &OAuthConfig) -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_seconds))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))
}

fn cors_layer(config: &IdentityConfig) -> CorsLayer {
    let origins = config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(origin) => Some(origin),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

pub fn build_router(state: AppState) -> Router {
    // Password login is brute-forceable; it gets its own tighter limiter
    let login_route = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let protected_routes = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/logout-all", post(handlers::auth::logout_all))
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/methods", get(handlers::auth::list_auth_methods))
        .route(
            "/auth/methods/:provider",
            delete(handlers::auth::unlink_auth_method),
        )
        .route(
            "/orgs",
            post(handlers::org::create_organization).get(handlers::org::list_organizations),
        )
        .route(
            "/orgs/:org_id",
            get(handlers::org::get_organization).delete(handlers::org::delete_organization),
        )
        .route("/orgs/:org_id/members", get(handlers::org::list_members))
        .route(
            "/orgs/:org_id/members/:user_id",
            service_core::axum::routing::patch(handlers::org::update_member_role)
                .delete(handlers::org::remove_member),
        )
        .route(
            "/orgs/:org_id/invitations",
            post(handlers::invitation::create_invitation),
        )
        .route(
            "/orgs/:org_id/invitations/:token",
            delete(handlers::invitation::revoke_invitation),
        )
        .route(
            "/invitations/:token/accept",
            post(handlers::invitation::accept_invitation),
        )
        .route(
            "/orgs/:org_id/sso/:provider",
            get(handlers::sso::get_sso_config).post(handlers::sso::configure_sso),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics));

    if state.config.environment == Environment::Dev {
        app = app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    app.route("/auth/register", post(handlers::auth::register))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/:provider/login", get(handlers::oauth::oauth_login))
        .route(
            "/auth/:provider/callback",
            get(handlers::oauth::oauth_callback),
        )
        .merge(login_route)
        .merge(protected_routes)
        .with_state(state.clone())
        // Global IP rate limiting
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(from_fn(metrics_middleware))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config))
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Database health check failed");
        AppError::ServiceUnavailable
    })?;

    let redis = match &state.ephemeral {
        Some(store) => {
            store.health_check().await.map_err(|e| {
                tracing::error!(error = %e, "Redis health check failed");
                AppError::ServiceUnavailable
            })?;
            "up"
        }
        None => "disabled",
    };

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "postgres": "up",
            "redis": redis
        }
    })))
}
