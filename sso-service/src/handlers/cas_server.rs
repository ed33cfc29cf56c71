//! CAS server endpoints for relying applications.
//!
//! Issues opaque service tickets to allowlisted relying services and
//! answers the two validation endpoints. Validation answers are always
//! protocol-conformant, even when the ticket store is down.

use axum::{
    extract::{RawQuery, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::AppState;
use crate::middleware::{load_session, persist_session};
use crate::services::new_ticket_id;

const CAS_XMLNS: &str = "http://www.yale.edu/tp/cas";

/// Entry point for relying services.
#[utoipa::path(
    get,
    path = "/cas/login",
    params(("service" = String, Query, description = "Relying service callback URL")),
    responses(
        (status = 302, description = "Redirect to the service with a ticket, or to /login first"),
        (status = 403, description = "Service URL is not allowlisted"),
    ),
    tag = "CAS Server"
)]
pub async fn cas_login(
    State(state): State<AppState>,
    jar: CookieJar,
    RawQuery(query): RawQuery,
    body: String,
) -> Result<Response, AppError> {
    let Some(service) = param(query.as_deref(), &body, "service") else {
        return Ok((StatusCode::FORBIDDEN, "invalid service").into_response());
    };

    if !service_allowed(&state, &service) {
        tracing::warn!(service = %service, "Rejected CAS login for non-allowlisted service");
        return Ok((StatusCode::FORBIDDEN, "invalid service").into_response());
    }

    let (session_id, mut data) = load_session(&state, &jar).await.map_err(AppError::from)?;

    match data.user.clone() {
        Some(user) => {
            let ticket = new_ticket_id();
            state
                .tickets
                .put(&ticket, &user.username)
                .await
                .map_err(AppError::from)?;
            data.cas_tickets.insert(service.clone(), ticket.clone());
            let (jar, _) = persist_session(&state, jar, session_id, &data)
                .await
                .map_err(AppError::from)?;

            tracing::info!(username = %user.username, service = %service, "Issued CAS ticket");
            Ok((jar, Redirect::to(&service_redirect_url(&service, &ticket))).into_response())
        }
        None => {
            // Remember what the relying service wanted and authenticate
            // locally first; the deferred-redirect middleware finishes the
            // job once the session has a user.
            data.cas_login_for_service = Some(service);
            let (jar, _) = persist_session(&state, jar, session_id, &data)
                .await
                .map_err(AppError::from)?;
            Ok((jar, Redirect::to("/login")).into_response())
        }
    }
}

#[utoipa::path(
    get,
    path = "/cas/logout",
    responses((status = 302, description = "Redirect to local logout")),
    tag = "CAS Server"
)]
pub async fn cas_logout() -> Redirect {
    Redirect::to("/logout")
}

/// CAS 1.0 plain-text validation. Cannot reveal the principal.
#[utoipa::path(
    get,
    path = "/cas/validate",
    params(("ticket" = String, Query, description = "Service ticket to check")),
    responses(
        (status = 200, description = "Body `yes` or `no`", body = String),
        (status = 500, description = "Ticket store failure, body `no`", body = String),
    ),
    tag = "CAS Server"
)]
pub async fn cas_validate(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: String,
) -> Response {
    let ticket = param(query.as_deref(), &body, "ticket").unwrap_or_default();

    match state.tickets.get(&ticket).await {
        Ok(Some(_)) => (StatusCode::OK, "yes\n").into_response(),
        Ok(None) => (StatusCode::OK, "no\n").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Ticket store failure during /cas/validate");
            (StatusCode::INTERNAL_SERVER_ERROR, "no").into_response()
        }
    }
}

/// CAS 2.0 XML validation.
#[utoipa::path(
    get,
    path = "/cas/serviceValidate",
    params(("ticket" = String, Query, description = "Service ticket to check")),
    responses(
        (status = 200, description = "cas:serviceResponse envelope", body = String, content_type = "text/xml"),
    ),
    tag = "CAS Server"
)]
pub async fn cas_service_validate(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: String,
) -> Response {
    let ticket = param(query.as_deref(), &body, "ticket").unwrap_or_default();

    let envelope = match state.tickets.get(&ticket).await {
        Ok(Some(principal)) => success_envelope(&principal),
        Ok(None) => failure_envelope(&ticket),
        Err(e) => {
            // Relying parties parse the envelope, not the status line.
            tracing::error!(error = %e, "Ticket store failure during /cas/serviceValidate");
            failure_envelope(&ticket)
        }
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
        envelope,
    )
        .into_response()
}

fn service_allowed(state: &AppState, service: &str) -> bool {
    state
        .config
        .cas_server
        .services
        .iter()
        .any(|prefix| service.starts_with(prefix))
}

/// Redirect target for a ticket grant: `service?ticket=<id>`, appending
/// with `&` when the service URL already carries a query.
pub fn service_redirect_url(service: &str, ticket: &str) -> String {
    let separator = if service.contains('?') { '&' } else { '?' };
    format!(
        "{service}{separator}ticket={}",
        urlencoding::encode(ticket)
    )
}

/// Read a parameter from the query string, falling back to an urlencoded
/// body (the endpoints accept GET and POST).
fn param(query: Option<&str>, body: &str, key: &str) -> Option<String> {
    let lookup = |raw: &str| -> Option<String> {
        serde_urlencoded::from_str::<Vec<(String, String)>>(raw)
            .ok()?
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .filter(|v| !v.is_empty())
    };
    query.and_then(lookup).or_else(|| lookup(body))
}

fn success_envelope(principal: &str) -> String {
    format!(
        "<cas:serviceResponse xmlns:cas=\"{CAS_XMLNS}\">\n  \
         <cas:authenticationSuccess>\n    \
         <cas:user>{}</cas:user>\n  \
         </cas:authenticationSuccess>\n\
         </cas:serviceResponse>\n",
        xml_escape(principal)
    )
}

fn failure_envelope(ticket: &str) -> String {
    format!(
        "<cas:serviceResponse xmlns:cas=\"{CAS_XMLNS}\">\n  \
         <cas:authenticationFailure code=\"INVALID_TICKET\">Ticket {} not recognized</cas:authenticationFailure>\n\
         </cas:serviceResponse>\n",
        xml_escape(ticket)
    )
}

fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
