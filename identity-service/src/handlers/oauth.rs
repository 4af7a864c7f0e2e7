use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use service_core::error::AppError;

use crate::{
    dtos::auth::{OAuthCallbackQuery, OAuthLoginQuery},
    AppState,
};

/// The state cookie is scoped to the callback path of its provider.
fn cookie_path(provider: &str) -> String {
    format!("/auth/{}/callback", provider)
}

/// Start an SSO login for an organization
#[utoipa::path(
    get,
    path = "/auth/{provider}/login",
    params(
        ("provider" = String, Path, description = "`google` or `microsoft`"),
        OAuthLoginQuery
    ),
    responses(
        (status = 307, description = "Redirect to the identity provider"),
        (status = 400, description = "SSO is not configured or disabled for this organization", body = ErrorResponse),
        (status = 404, description = "Unknown organization or provider", body = ErrorResponse)
    ),
    tag = "Federation"
)]
pub async fn oauth_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthLoginQuery>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AppError> {
    let federation = state.federation.get(&provider)?;
    let redirect = federation.begin_login(&query.org).await?;

    let cookie = Cookie::build((federation.cookie_name(), redirect.state_cookie))
        .path(cookie_path(federation.kind().as_str()))
        .http_only(true)
        .secure(state.config.oauth.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::minutes(federation.state_ttl_minutes()))
        .build();

    Ok((
        jar.add(cookie),
        Redirect::temporary(&redirect.authorization_url),
    ))
}

/// Provider callback; redirects to the dashboard with the access token in the URL fragment
#[utoipa::path(
    get,
    path = "/auth/{provider}/callback",
    params(
        ("provider" = String, Path, description = "`google` or `microsoft`"),
        OAuthCallbackQuery
    ),
    responses(
        (status = 303, description = "Redirect to the dashboard"),
        (status = 400, description = "Invalid state or provider error", body = ErrorResponse),
        (status = 502, description = "Identity provider unavailable", body = ErrorResponse)
    ),
    tag = "Federation"
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<OAuthCallbackQuery>,
    jar: CookieJar,
) -> impl IntoResponse {
    let federation = match state.federation.get(&provider) {
        Ok(federation) => federation,
        Err(e) => return (jar, Err(AppError::from(e))),
    };

    let cookie_name = federation.cookie_name();
    let state_cookie = jar.get(&cookie_name).map(|c| c.value().to_string());
    let outcome = federation
        .complete_login(state_cookie.as_deref(), &params)
        .await
        .map(|target| Redirect::to(&target))
        .map_err(AppError::from);

    // Single use, whatever the outcome.
    let jar = jar.remove(
        Cookie::build((cookie_name, ""))
            .path(cookie_path(federation.kind().as_str()))
            .build(),
    );
    (jar, outcome)
}
