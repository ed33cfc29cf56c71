//! CAS server endpoints: allowlist enforcement, ticket issuance and the
//! two validation responses.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::{TestApp, body_text, location, session_cookie, test_config};
use sso_service::config::AuthMode;
use sso_service::models::Person;
use sso_service::services::{SessionData, SessionStore, TicketStore};
use std::sync::atomic::Ordering;

async fn seeded_session(app: &TestApp, username: &str) -> String {
    let mut data = SessionData::default();
    data.user = Some(Person::provisioned(username, None));
    app.sessions
        .save("test-session", &data)
        .await
        .expect("Failed to seed session");
    format!("sso_session=test-session")
}

#[tokio::test]
async fn login_rejects_a_service_off_the_allowlist() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;

    let response = app
        .get("/cas/login?service=https://evil.example/steal")
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response).await, "invalid service");
}

#[tokio::test]
async fn login_rejects_a_missing_service() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;

    let response = app.get("/cas/login").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn an_allowlist_entry_admits_by_prefix() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;
    let cookie = seeded_session(&app, "alice").await;

    let response = app
        .request(
            Request::builder()
                .uri("/cas/login?service=https://good.example/cb")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn authenticated_login_issues_a_ticket_and_redirects() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;
    let cookie = seeded_session(&app, "alice").await;

    let response = app
        .request(
            Request::builder()
                .uri("/cas/login?service=https://good.example/app")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = location(&response).expect("redirect must carry a location");
    let ticket = location
        .strip_prefix("https://good.example/app?ticket=")
        .expect("redirect must return to the service with a ticket");
    assert!(ticket.starts_with("ST-"));

    // The ticket maps back to the session's principal.
    let principal = app.tickets.get(ticket).await.unwrap();
    assert_eq!(principal.as_deref(), Some("alice"));

    // And the session remembers the grant.
    let session = app
        .sessions
        .load("test-session")
        .await
        .unwrap()
        .expect("session must survive");
    assert_eq!(
        session.cas_tickets.get("https://good.example/app").unwrap(),
        ticket
    );
}

#[tokio::test]
async fn unauthenticated_login_defers_and_sends_the_browser_to_local_login() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;

    let response = app
        .get("/cas/login?service=https://good.example/app")
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/login"));

    let cookie = session_cookie(&response).expect("a session must be minted");
    let session_id = cookie.split('=').nth(1).unwrap();
    let session = app.sessions.load(session_id).await.unwrap().unwrap();
    assert_eq!(
        session.cas_login_for_service.as_deref(),
        Some("https://good.example/app")
    );
}

#[tokio::test]
async fn service_parameter_is_accepted_in_a_post_body() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;

    let response = app
        .request(
            Request::builder()
                .method("POST")
                .uri("/cas/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("service=https%3A%2F%2Fgood.example%2Fapp"))
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/login"));
}

#[tokio::test]
async fn cas_logout_redirects_to_local_logout() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;

    let response = app.get("/cas/logout").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/logout"));
}

#[tokio::test]
async fn validate_answers_yes_for_a_known_ticket() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;
    app.tickets.put("ST-known", "alice").await.unwrap();

    let response = app.get("/cas/validate?ticket=ST-known").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "yes\n");
}

#[tokio::test]
async fn validate_answers_no_for_an_unknown_ticket() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;

    let response = app.get("/cas/validate?ticket=ST-unknown").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "no\n");
}

#[tokio::test]
async fn validate_answers_500_no_when_the_store_is_down() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;
    app.tickets.fail_all.store(true, Ordering::SeqCst);

    let response = app.get("/cas/validate?ticket=ST-any").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "no");
}

#[tokio::test]
async fn validate_reads_the_ticket_from_a_post_body() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;
    app.tickets.put("ST-posted", "alice").await.unwrap();

    let response = app
        .request(
            Request::builder()
                .method("POST")
                .uri("/cas/validate")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("ticket=ST-posted"))
                .unwrap(),
        )
        .await;

    assert_eq!(body_text(response).await, "yes\n");
}

#[tokio::test]
async fn service_validate_wraps_the_principal_in_a_success_envelope() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;
    app.tickets.put("ST-bob", "bob").await.unwrap();

    let response = app.get("/cas/serviceValidate?ticket=ST-bob").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/xml; charset=utf-8"
    );

    let body = body_text(response).await;
    assert!(body.contains("<cas:authenticationSuccess>"));
    assert!(body.contains("<cas:user>bob</cas:user>"));
}

#[tokio::test]
async fn service_validate_escapes_the_principal() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;
    app.tickets.put("ST-x", "b<ob>&co").await.unwrap();

    let body = body_text(app.get("/cas/serviceValidate?ticket=ST-x").await).await;
    assert!(body.contains("<cas:user>b&lt;ob&gt;&amp;co</cas:user>"));
}

#[tokio::test]
async fn service_validate_reports_an_unknown_ticket_as_invalid() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;

    let body = body_text(app.get("/cas/serviceValidate?ticket=ST-gone").await).await;
    assert!(body.contains("cas:authenticationFailure code=\"INVALID_TICKET\""));
    assert!(body.contains("ST-gone"));
}

#[tokio::test]
async fn service_validate_stays_protocol_conformant_when_the_store_is_down() {
    let app = TestApp::spawn(test_config(AuthMode::Header)).await;
    app.tickets.fail_all.store(true, Ordering::SeqCst);

    let response = app.get("/cas/serviceValidate?ticket=ST-any").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_text(response).await;
    assert!(body.contains("cas:authenticationFailure code=\"INVALID_TICKET\""));
}
