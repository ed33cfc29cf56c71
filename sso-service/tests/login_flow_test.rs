//! Browser login flows: trusted-header mode, logout rules, the
//! insufficient-privileges path and the full deferred CAS scenario.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::{TestApp, body_text, clears_session_cookie, location, session_cookie, test_config};
use sso_service::config::AuthMode;
use sso_service::models::Person;
use sso_service::services::{MockDirectory, SessionData, SessionStore, TicketStore};

fn header_request(uri: &str, remote_user: Option<&str>, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(remote_user) = remote_user {
        builder = builder.header("x-remote-user", remote_user);
    }
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn missing_header_yields_the_misconfigured_notice() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;

    let response = app.get("/login").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(session_cookie(&response).is_none());
    assert_eq!(app.sessions.session_count(), 0);

    let body = body_text(response).await;
    assert!(body.starts_with("MISCONFIGURED"));
}

#[tokio::test]
async fn an_empty_header_counts_as_missing() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;

    let response = app
        .request(header_request("/login", Some(""), None))
        .await;
    assert!(body_text(response).await.starts_with("MISCONFIGURED"));
}

#[tokio::test]
async fn a_known_principal_logs_in_and_redirects() {
    let directory = MockDirectory::new().with_person(Person::provisioned("alice", None));
    let app = TestApp::spawn_with(
        test_config(AuthMode::Header),
        directory,
        std::sync::Arc::new(sso_service::services::NoopHooks),
    )
    .await;

    let response = app
        .request(header_request("/login", Some("alice"), None))
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/"));

    let cookie = session_cookie(&response).expect("login must establish a session");
    let session_id = cookie.split('=').nth(1).unwrap();
    let session = app.sessions.load(session_id).await.unwrap().unwrap();
    assert_eq!(session.user.as_ref().unwrap().username, "alice");
}

#[tokio::test]
async fn an_unresolvable_principal_gets_the_insufficient_page() {
    // No directory entry, no provisioning
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;

    let response = app
        .request(header_request("/login", Some("mallory"), None))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(clears_session_cookie(&response));
    assert_eq!(app.sessions.session_count(), 0);

    let body = body_text(response).await;
    assert!(body.contains("Insufficient privileges"));
}

#[tokio::test]
async fn logout_without_a_session_bounces_to_the_root() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;

    let response = app.get("/logout").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/"));
}

#[tokio::test]
async fn logout_destroys_the_session_and_honors_the_configured_exit() {
    let mut config = test_config(AuthMode::Header);
    config.after_logout_url = Some("https://campus.example/logout".to_string());
    let app = TestApp::spawn(config).await;

    let mut data = SessionData::default();
    data.user = Some(Person::provisioned("alice", None));
    app.sessions.save("sid-logout", &data).await.unwrap();

    let response = app
        .request(header_request("/logout", None, Some("sso_session=sid-logout")))
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response).as_deref(),
        Some("https://campus.example/logout")
    );
    assert!(clears_session_cookie(&response));
    assert_eq!(app.sessions.session_count(), 0);
}

#[tokio::test]
async fn cas_mode_logout_leaves_via_the_cas_server() {
    let app = TestApp::spawn(test_config(AuthMode::Cas)).await;

    let mut data = SessionData::default();
    data.user = Some(Person::provisioned("alice", None));
    app.sessions.save("sid-cas", &data).await.unwrap();

    let response = app
        .request(header_request("/logout", None, Some("sso_session=sid-cas")))
        .await;

    assert_eq!(
        location(&response).as_deref(),
        Some("https://cas.example.edu/cas/logout")
    );
}

#[tokio::test]
async fn cas_mode_login_redirects_to_the_external_server() {
    let app = TestApp::spawn(test_config(AuthMode::Cas)).await;

    let response = app.get("/login").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response).as_deref(),
        Some("https://cas.example.edu/cas/login?service=http%3A%2F%2Flocalhost%3A8080%2Flogin")
    );
}

#[tokio::test]
async fn a_session_with_an_assertion_resolves_without_the_external_round_trip() {
    let directory = MockDirectory::new().with_person(Person::provisioned("alice", None));
    let app = TestApp::spawn_with(
        test_config(AuthMode::Cas),
        directory,
        std::sync::Arc::new(sso_service::services::NoopHooks),
    )
    .await;

    let mut data = SessionData::default();
    data.cas_assertion = Some("alice".to_string());
    app.sessions.save("sid-assert", &data).await.unwrap();

    // Any request re-resolves the assertion into a user.
    let response = app
        .request(header_request("/health", None, Some("sso_session=sid-assert")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let session = app.sessions.load("sid-assert").await.unwrap().unwrap();
    assert_eq!(session.user.as_ref().unwrap().username, "alice");
}

#[tokio::test]
async fn a_stale_assertion_destroys_the_session_instead_of_failing_the_request() {
    // "ghost" resolves to nothing and provisioning is off.
    let app = TestApp::spawn(test_config(AuthMode::Cas)).await;

    let mut data = SessionData::default();
    data.cas_assertion = Some("ghost".to_string());
    app.sessions.save("sid-ghost", &data).await.unwrap();

    let response = app
        .request(header_request("/health", None, Some("sso_session=sid-ghost")))
        .await;

    // The request itself still succeeds, anonymously.
    assert_eq!(response.status(), StatusCode::OK);
    assert!(clears_session_cookie(&response));
    assert_eq!(app.sessions.session_count(), 0);
}

#[tokio::test]
async fn a_relying_service_login_completes_across_the_deferred_redirect() {
    let directory = MockDirectory::new().with_person(Person::provisioned("alice", None));
    let app = TestApp::spawn_with(
        test_config(AuthMode::Header),
        directory,
        std::sync::Arc::new(sso_service::services::NoopHooks),
    )
    .await;

    // 1. The relying service sends the browser to /cas/login first.
    let response = app
        .get("/cas/login?service=https://good.example/app")
        .await;
    assert_eq!(location(&response).as_deref(), Some("/login"));
    let cookie = session_cookie(&response).expect("pending login must mint a session");

    // 2. The proxy supplies the identity on /login.
    let response = app
        .request(header_request("/login", Some("alice"), Some(&cookie)))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/"));

    // 3. The next request completes the deferred relying-service login.
    let response = app
        .request(header_request("/health", None, Some(&cookie)))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let location = location(&response).unwrap();
    let ticket = location
        .strip_prefix("https://good.example/app?ticket=")
        .expect("deferred redirect must return to the service");
    assert_eq!(
        app.tickets.get(ticket).await.unwrap().as_deref(),
        Some("alice")
    );

    // The pending marker is consumed; subsequent requests pass through.
    let response = app
        .request(header_request("/health", None, Some(&cookie)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn a_disabled_broker_serves_health_only() {
    let mut config = test_config(AuthMode::Header);
    config.disabled = true;
    let app = TestApp::spawn(config).await;

    assert_eq!(app.get("/health").await.status(), StatusCode::OK);
    assert_eq!(
        app.get("/login").await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.get("/cas/validate?ticket=x").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn hardcoded_admins_carry_the_override_into_the_session() {
    let mut config = test_config(AuthMode::Header);
    config.hardcoded_users = vec![sso_service::config::HardcodedUser {
        username: "root".to_string(),
        email: None,
        first_name: None,
        last_name: None,
        admin: false,
    }];
    config.admin_username = Some("root".to_string());
    let app = TestApp::spawn(config).await;

    let response = app
        .request(header_request("/login", Some("root"), None))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let cookie = session_cookie(&response).unwrap();
    let session_id = cookie.split('=').nth(1).unwrap();
    let session = app.sessions.load(session_id).await.unwrap().unwrap();
    assert!(session.user.as_ref().unwrap().permissions.admin);
}
