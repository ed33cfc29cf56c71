pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::ip_rate_limit_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::SsoConfig;
use crate::handlers::PageRenderer;
use crate::services::{CasClient, Directory, IdentityResolver, SessionStore, TicketStore};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::login::login,
        handlers::login::logout,
        handlers::cas_server::cas_login,
        handlers::cas_server::cas_logout,
        handlers::cas_server::cas_validate,
        handlers::cas_server::cas_service_validate,
    ),
    components(schemas(models::Person, models::Permissions)),
    tags(
        (name = "Authentication", description = "Browser session login and logout"),
        (name = "CAS Server", description = "Ticket issuance and validation for relying services"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: SsoConfig,
    pub directory: Arc<dyn Directory>,
    pub tickets: Arc<dyn TicketStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub resolver: IdentityResolver,
    pub cas_client: CasClient,
    pub pages: Arc<dyn PageRenderer>,
    pub login_rate_limiter: service_core::middleware::rate_limit::IpRateLimiter,
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let mut app = Router::new().route("/health", get(health_check));

    // Swagger UI in dev; prod keeps the machine-readable document only.
    match state.config.environment {
        config::Environment::Dev => {
            app = app
                .merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
        }
        config::Environment::Prod => {
            app = app.route(
                "/.well-known/openapi.json",
                get(|| async { axum::Json(ApiDoc::openapi()) }),
            );
        }
    }

    if state.config.disabled {
        tracing::warn!("SSO broker is disabled; serving health and docs only");
        return Ok(finish_router(app, state));
    }

    // Login gets its own IP rate limit
    let login_limiter = state.login_rate_limiter.clone();
    let login_route = Router::new()
        .route("/login", get(handlers::login::login))
        .layer(from_fn_with_state(login_limiter, ip_rate_limit_middleware));

    let app = app
        .merge(login_route)
        .route("/logout", get(handlers::login::logout))
        .route(
            "/cas/login",
            get(handlers::cas_server::cas_login).post(handlers::cas_server::cas_login),
        )
        .route("/cas/logout", get(handlers::cas_server::cas_logout))
        .route(
            "/cas/validate",
            get(handlers::cas_server::cas_validate).post(handlers::cas_server::cas_validate),
        )
        .route(
            "/cas/serviceValidate",
            get(handlers::cas_server::cas_service_validate)
                .post(handlers::cas_server::cas_service_validate),
        )
        // Deferred relying-service redirect, then assertion re-resolution
        // outermost of the two: a request is re-resolved before the
        // deferred redirect can fire.
        .layer(from_fn_with_state(
            state.clone(),
            middleware::deferred_cas_redirect_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::resolve_assertion_middleware,
        ));

    Ok(finish_router(app, state))
}

fn finish_router(app: Router<AppState>, state: AppState) -> Router {
    app.with_state(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "A backing store is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<axum::Json<serde_json::Value>, AppError> {
    state.directory.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Directory health check failed");
        AppError::from(e)
    })?;

    state.tickets.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Ticket store health check failed");
        AppError::from(e)
    })?;

    Ok(axum::Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "directory": "up",
            "tickets": "up"
        }
    })))
}
