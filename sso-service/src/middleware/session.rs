//! Session plumbing.
//!
//! Sessions are loaded per request from the session store via the cookie
//! and written back explicitly; no middleware auto-saves. Two app-wide
//! layers sit on top: re-resolving a CAS assertion that has no user yet,
//! and completing a deferred relying-service login once the session
//! authenticates.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::AppState;
use crate::handlers::cas_server::service_redirect_url;
use crate::services::{
    PrincipalSource, SESSION_COOKIE, ServiceError, SessionData, new_session_id, new_ticket_id,
};

/// Load the session referenced by the request cookie. A missing cookie or
/// an expired document yields a fresh default.
pub async fn load_session(
    state: &AppState,
    jar: &CookieJar,
) -> Result<(Option<String>, SessionData), ServiceError> {
    match jar.get(SESSION_COOKIE) {
        Some(cookie) => {
            let session_id = cookie.value().to_string();
            let data = state.sessions.load(&session_id).await?.unwrap_or_default();
            Ok((Some(session_id), data))
        }
        None => Ok((None, SessionData::default())),
    }
}

/// Write the session back, minting an id and cookie on first use.
pub async fn persist_session(
    state: &AppState,
    jar: CookieJar,
    session_id: Option<String>,
    data: &SessionData,
) -> Result<(CookieJar, String), ServiceError> {
    let session_id = session_id.unwrap_or_else(new_session_id);
    state.sessions.save(&session_id, data).await?;

    let jar = jar.add(
        Cookie::build((SESSION_COOKIE, session_id.clone()))
            .path("/")
            .http_only(true)
            .secure(true)
            .build(),
    );
    Ok((jar, session_id))
}

/// Drop the stored session document and clear the cookie.
pub async fn destroy_session(
    state: &AppState,
    jar: CookieJar,
    session_id: Option<&str>,
) -> Result<CookieJar, ServiceError> {
    if let Some(session_id) = session_id {
        state.sessions.destroy(session_id).await?;
    }
    Ok(jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build()))
}

/// Re-run identity resolution for sessions that carry a CAS assertion but
/// no resolved user yet. A resolver failure destroys the session (forcing
/// re-authentication) instead of failing the request.
pub async fn resolve_assertion_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Response {
    let (session_id, mut data) = match load_session(&state, &jar).await {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!(error = %e, "Session store unavailable; continuing anonymously");
            return next.run(req).await;
        }
    };

    if data.user.is_some() {
        return next.run(req).await;
    }

    let Some(assertion) = data.cas_assertion.clone() else {
        return next.run(req).await;
    };

    match state
        .resolver
        .resolve(&assertion, PrincipalSource::Cas)
        .await
    {
        Ok(Some(user)) => {
            data.user = Some(user);
            if let Some(session_id) = &session_id {
                if let Err(e) = state.sessions.save(session_id, &data).await {
                    tracing::error!(error = %e, "Failed to save re-resolved session");
                }
            }
            next.run(req).await
        }
        Ok(None) => next.run(req).await,
        Err(e) => {
            tracing::warn!(
                principal = %assertion,
                error = %e,
                "Destroying session: CAS assertion no longer resolves"
            );
            if let Some(session_id) = &session_id {
                if let Err(e) = state.sessions.destroy(session_id).await {
                    tracing::error!(error = %e, "Failed to destroy session");
                }
            }
            let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build());
            let response = next.run(req).await;
            (jar, response).into_response()
        }
    }
}

/// Complete a relying-service login that started before this session was
/// authenticated: issue the ticket and send the browser back to the
/// service.
pub async fn deferred_cas_redirect_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Response {
    let (session_id, mut data) = match load_session(&state, &jar).await {
        Ok(loaded) => loaded,
        Err(_) => return next.run(req).await,
    };

    let (Some(session_id), Some(service)) = (session_id, data.cas_login_for_service.clone())
    else {
        return next.run(req).await;
    };

    let Some(user) = data.user.clone() else {
        return next.run(req).await;
    };

    let ticket = new_ticket_id();
    match state.tickets.put(&ticket, &user.username).await {
        Ok(()) => {
            data.cas_tickets.insert(service.clone(), ticket.clone());
            data.cas_ticket = Some(ticket.clone());
            data.cas_login_for_service = None;
            if let Err(e) = state.sessions.save(&session_id, &data).await {
                tracing::error!(error = %e, "Failed to save session after deferred ticket issue");
                return next.run(req).await;
            }
            tracing::info!(username = %user.username, service = %service, "Completing deferred CAS login");
            Redirect::to(&service_redirect_url(&service, &ticket)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to store deferred CAS ticket");
            next.run(req).await
        }
    }
}
