mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::{TestApp, TestResponse};
use identity_service::services::RemoteProfile;
use uuid::Uuid;

/// Admin `alice` owns `acme` with Google SSO configured.
async fn app_with_sso(enabled: bool) -> (TestApp, String, Uuid) {
    let app = TestApp::new();
    let alice = app.access_token("alice@acme.io").await;
    let org_id = app.create_org(&alice, "Acme", "acme").await;
    app.configure_sso(&alice, org_id, "google", enabled).await;
    (app, alice, org_id)
}

async fn begin(app: &TestApp, provider: &str, org: &str) -> TestResponse {
    app.request(
        Method::GET,
        &format!("/auth/{}/login?org={}", provider, org),
        None,
        None,
    )
    .await
}

/// `name=value` of the state cookie set by the login redirect.
fn state_cookie(res: &TestResponse) -> String {
    res.cookies()
        .iter()
        .find(|c| c.starts_with("oauth_state_"))
        .and_then(|c| c.split(';').next())
        .expect("state cookie")
        .to_string()
}

fn state_param(res: &TestResponse) -> String {
    let location = res.header("location").expect("location header");
    location
        .split("state=")
        .nth(1)
        .and_then(|rest| rest.split('&').next())
        .expect("state parameter")
        .to_string()
}

async fn callback(app: &TestApp, provider: &str, query: &str, cookie: Option<&str>) -> TestResponse {
    let mut builder = Request::builder().uri(format!("/auth/{}/callback?{}", provider, query));
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    app.send(builder.body(Body::empty()).unwrap()).await
}

fn clears_state_cookie(res: &TestResponse, provider: &str) -> bool {
    let name = format!("oauth_state_{}=", provider);
    res.cookies()
        .iter()
        .any(|c| c.starts_with(&name) && c.contains("Max-Age=0"))
}

#[tokio::test]
async fn login_redirects_to_provider_with_pkce() {
    let (app, _, _) = app_with_sso(true).await;

    let res = begin(&app, "google", "acme").await;
    assert_eq!(res.status, StatusCode::TEMPORARY_REDIRECT);

    let location = res.header("location").unwrap();
    assert!(location.starts_with("https://idp.test/google/authorize"));
    assert!(location.contains("client_id=google-client"));
    assert!(location.contains(&*urlencoding::encode("http://id.test/auth/google/callback")));
    assert!(location.contains("code_challenge="));

    let cookie = res
        .cookies()
        .into_iter()
        .find(|c| c.starts_with("oauth_state_google="))
        .unwrap();
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/auth/google/callback"));
}

#[tokio::test]
async fn disabled_or_missing_sso_does_not_redirect() {
    let (app, alice, _) = app_with_sso(false).await;

    let res = begin(&app, "google", "acme").await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.header("location").is_none());
    assert!(res.cookies().is_empty());

    // Microsoft was never configured for acme.
    let res = begin(&app, "microsoft", "acme").await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.header("location").is_none());

    let res = begin(&app, "google", "no-such-org").await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let res = begin(&app, "github", "acme").await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    // Sanity: the admin still sees the stored, disabled configuration.
    let org_id = app.get("/orgs", &alice).await.body[0]["org_id"]
        .as_str()
        .unwrap()
        .to_string();
    let res = app.get(&format!("/orgs/{}/sso/google", org_id), &alice).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["enabled"], false);
    assert_eq!(res.body["client_secret_set"], true);
}

#[tokio::test]
async fn callback_signs_in_and_joins_organization() {
    let (app, _, org_id) = app_with_sso(true).await;

    let login = begin(&app, "google", "acme").await;
    let cookie = state_cookie(&login);
    let state = state_param(&login);

    let res = callback(
        &app,
        "google",
        &format!("code=auth-code-1&state={}", state),
        Some(&cookie),
    )
    .await;
    assert_eq!(res.status, StatusCode::SEE_OTHER);
    assert!(clears_state_cookie(&res, "google"));

    let location = res.header("location").unwrap();
    let fragment = location
        .strip_prefix("http://dash.test/auth/callback#")
        .expect("dashboard callback with fragment");
    assert!(fragment.contains("token_type=Bearer"));
    assert!(!fragment.contains("refresh_token"));
    let token = fragment
        .split('&')
        .find_map(|kv| kv.strip_prefix("access_token="))
        .unwrap()
        .to_string();

    assert_eq!(*app.google.exchanged_codes.lock().unwrap(), vec!["auth-code-1"]);

    let me = app.get("/auth/me", &token).await;
    assert_eq!(me.body["email"], "carol@acme.io");
    assert_eq!(me.body["has_password"], false);

    let res = app.get(&format!("/orgs/{}", org_id), &token).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["role"], "viewer");

    let res = app.get("/auth/methods", &token).await;
    assert_eq!(res.body[0]["method"], "google");
    assert_eq!(res.body[0]["provider_subject"], "subject-1");
}

#[tokio::test]
async fn state_mismatch_is_rejected_without_side_effects() {
    let (app, _, _) = app_with_sso(true).await;
    let users_before = app.store.user_count();
    let memberships_before = app.store.membership_count();

    let login = begin(&app, "google", "acme").await;
    let cookie = state_cookie(&login);

    let res = callback(&app, "google", "code=abc&state=forged", Some(&cookie)).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.header("location").is_none());
    assert!(clears_state_cookie(&res, "google"));

    let res = callback(
        &app,
        "google",
        &format!("code=abc&state={}", state_param(&login)),
        None,
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    assert_eq!(app.google.exchange_count(), 0);
    assert_eq!(app.store.user_count(), users_before);
    assert_eq!(app.store.membership_count(), memberships_before);
    assert_eq!(app.store.auth_method_count(), 0);
}

#[tokio::test]
async fn provider_error_is_reported() {
    let (app, _, _) = app_with_sso(true).await;
    let login = begin(&app, "google", "acme").await;

    let res = callback(
        &app,
        "google",
        &format!(
            "error=access_denied&error_description=User%20cancelled&state={}",
            state_param(&login)
        ),
        Some(&state_cookie(&login)),
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.error().contains("User cancelled"));
    assert_eq!(app.google.exchange_count(), 0);
}

#[tokio::test]
async fn sso_links_existing_password_account() {
    let (app, alice, org_id) = app_with_sso(true).await;
    app.google.set_profile(RemoteProfile {
        subject: "alice-google".to_string(),
        email: Some("alice@acme.io".to_string()),
        display_name: Some("Alice".to_string()),
    });

    let login = begin(&app, "google", "acme").await;
    let res = callback(
        &app,
        "google",
        &format!("code=c&state={}", state_param(&login)),
        Some(&state_cookie(&login)),
    )
    .await;
    assert_eq!(res.status, StatusCode::SEE_OTHER);
    assert_eq!(app.store.user_count(), 1);

    let methods = app.get("/auth/methods", &alice).await;
    let names: Vec<_> = methods
        .body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["method"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["password", "google"]);

    // Existing admin keeps the admin role.
    let res = app.get(&format!("/orgs/{}", org_id), &alice).await;
    assert_eq!(res.body["role"], "admin");
}

#[tokio::test]
async fn profile_without_email_is_rejected() {
    let (app, _, _) = app_with_sso(true).await;
    app.google.set_profile(RemoteProfile {
        subject: "anonymous".to_string(),
        email: None,
        display_name: None,
    });
    let users_before = app.store.user_count();

    let login = begin(&app, "google", "acme").await;
    let res = callback(
        &app,
        "google",
        &format!("code=c&state={}", state_param(&login)),
        Some(&state_cookie(&login)),
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.user_count(), users_before);
}

#[tokio::test]
async fn sso_configuration_requires_admin() {
    let (app, _, org_id) = app_with_sso(true).await;
    let outsider = app.access_token("eve@evil.io").await;

    let res = app
        .get(&format!("/orgs/{}/sso/google", org_id), &outsider)
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = app
        .post(
            &format!("/orgs/{}/sso/google", org_id),
            Some(&outsider),
            serde_json::json!({ "client_id": "hijack", "client_secret": "x" }),
        )
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}
