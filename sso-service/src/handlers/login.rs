//! Local login and logout.
//!
//! `/login` is the single entry point for both deployment modes: trusting
//! the edge proxy's `X-Remote-User` header, or driving the redirect dance
//! against an external CAS server. Both end in the identity resolver.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use service_core::error::AppError;

use crate::AppState;
use crate::config::AuthMode;
use crate::middleware::{destroy_session, load_session, persist_session};
use crate::services::{PrincipalSource, SessionData};

/// Header the authenticating proxy injects. Fixed by convention.
pub const REMOTE_USER_HEADER: &str = "x-remote-user";

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    /// Service ticket appended by the external CAS server on return.
    pub ticket: Option<String>,
}

/// Authenticate the browser session.
#[utoipa::path(
    get,
    path = "/login",
    params(("ticket" = Option<String>, Query, description = "CAS service ticket (cas mode only)")),
    responses(
        (status = 302, description = "Authenticated; redirecting to the post-login destination"),
        (status = 200, description = "Diagnostic page: proxy misconfigured or insufficient privileges"),
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Result<Response, AppError> {
    match state.config.auth_mode {
        AuthMode::Header => header_login(state, jar, headers).await,
        AuthMode::Cas => cas_login(state, jar, query).await,
    }
}

async fn header_login(
    state: AppState,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let principal = headers
        .get(REMOTE_USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if principal.is_empty() {
        // The edge proxy always supplies the header in production; answer
        // with the diagnostic rather than an error so dev setups can see
        // what is going on. No session mutation.
        return Ok(state.pages.misconfigured_notice().into_response());
    }

    let (session_id, data) = load_session(&state, &jar).await.map_err(AppError::from)?;
    establish(
        state,
        jar,
        session_id,
        data,
        principal.to_string(),
        PrincipalSource::TrustedHeader,
    )
    .await
}

async fn cas_login(state: AppState, jar: CookieJar, query: LoginQuery) -> Result<Response, AppError> {
    let (session_id, mut data) = load_session(&state, &jar).await.map_err(AppError::from)?;

    // An assertion already in the session short-circuits the external
    // round trip.
    if let Some(assertion) = data.cas_assertion.clone().filter(|a| !a.is_empty()) {
        return establish(state, jar, session_id, data, assertion, PrincipalSource::Cas).await;
    }

    let Some(ticket) = query.ticket.filter(|t| !t.is_empty()) else {
        return Ok(Redirect::to(&state.cas_client.login_url()).into_response());
    };

    match state.cas_client.validate_ticket(&ticket).await {
        Ok(principal) => {
            data.cas_assertion = Some(principal.clone());
            establish(state, jar, session_id, data, principal, PrincipalSource::Cas).await
        }
        Err(e) => {
            tracing::error!(error = %e, "CAS ticket validation failed");
            let jar = destroy_session(&state, jar, session_id.as_deref())
                .await
                .map_err(AppError::from)?;
            Ok((jar, Html(state.pages.insufficient_page())).into_response())
        }
    }
}

/// Run the resolver and attach the result to the session. Resolver errors
/// destroy the session and render the insufficient-privileges page with an
/// anonymous context; they never surface as HTTP errors.
async fn establish(
    state: AppState,
    jar: CookieJar,
    session_id: Option<String>,
    mut data: SessionData,
    principal: String,
    source: PrincipalSource,
) -> Result<Response, AppError> {
    match state.resolver.resolve(&principal, source).await {
        Ok(Some(user)) => {
            tracing::info!(username = %user.username, "User logged in");
            data.user = Some(user);
            let (jar, _) = persist_session(&state, jar, session_id, &data)
                .await
                .map_err(AppError::from)?;
            Ok((jar, Redirect::to(&state.config.after_login_url)).into_response())
        }
        Ok(None) => {
            // Empty principal: not authenticated, not an error.
            Ok(Redirect::to(&state.config.after_login_url).into_response())
        }
        Err(e) => {
            tracing::error!(principal = %principal, error = %e, "Identity resolution failed");
            let jar = destroy_session(&state, jar, session_id.as_deref())
                .await
                .map_err(AppError::from)?;
            Ok((jar, Html(state.pages.insufficient_page())).into_response())
        }
    }
}

/// Destroy the session and leave via the configured exit.
#[utoipa::path(
    get,
    path = "/logout",
    responses((status = 302, description = "Session destroyed; redirecting")),
    tag = "Authentication"
)]
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> Result<Response, AppError> {
    let (session_id, _) = load_session(&state, &jar).await.map_err(AppError::from)?;

    let Some(session_id) = session_id else {
        return Ok(Redirect::to("/").into_response());
    };

    let jar = destroy_session(&state, jar, Some(&session_id))
        .await
        .map_err(AppError::from)?;

    let destination = match state.config.auth_mode {
        AuthMode::Cas => state.cas_client.logout_url(),
        // The original header-mode flow hung when no after-logout URL was
        // configured; we fall back to the site root instead.
        AuthMode::Header => state
            .config
            .after_logout_url
            .clone()
            .unwrap_or_else(|| "/".to_string()),
    };

    Ok((jar, Redirect::to(&destination)).into_response())
}
