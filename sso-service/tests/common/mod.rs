//! Test helpers for the SSO broker integration tests.
//!
//! Everything runs in-process against the router with mock stores; no
//! Postgres, Redis or external CAS server is required.

#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use http_body_util::BodyExt;
use sso_service::{
    AppState, build_router,
    config::{
        AuthMode, CasClientConfig, CasServerConfig, DatabaseConfig, Environment,
        ProvisioningConfig, RateLimitConfig, RedisConfig, SsoConfig,
    },
    handlers::StaticPages,
    services::{
        CasClient, IdentityResolver, MemorySessionStore, MemoryTicketStore, MockDirectory,
        NoopHooks, ProvisionHooks, SESSION_COOKIE,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub directory: Arc<MockDirectory>,
    pub tickets: Arc<MemoryTicketStore>,
    pub sessions: Arc<MemorySessionStore>,
}

impl TestApp {
    pub async fn spawn(config: SsoConfig) -> Self {
        Self::spawn_with(config, MockDirectory::new(), Arc::new(NoopHooks)).await
    }

    pub async fn spawn_with(
        config: SsoConfig,
        directory: MockDirectory,
        hooks: Arc<dyn ProvisionHooks>,
    ) -> Self {
        let directory = Arc::new(directory);
        let tickets = Arc::new(MemoryTicketStore::new(Duration::from_secs(
            config.ticket_ttl_seconds,
        )));
        let sessions = Arc::new(MemorySessionStore::new(Duration::from_secs(
            config.session_ttl_seconds,
        )));

        let resolver =
            IdentityResolver::new(directory.clone(), hooks, config.resolver_options());

        let state = AppState {
            config: config.clone(),
            directory: directory.clone(),
            tickets: tickets.clone(),
            sessions: sessions.clone(),
            resolver,
            cas_client: CasClient::new(&config.cas_client),
            pages: Arc::new(StaticPages),
            login_rate_limiter: service_core::middleware::rate_limit::create_ip_rate_limiter(
                1000, 60,
            ),
        };

        let router = build_router(state.clone())
            .await
            .expect("Failed to build router");

        TestApp {
            router,
            state,
            directory,
            tickets,
            sessions,
        }
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("Failed to build request"),
        )
        .await
    }
}

/// Baseline configuration for tests; individual tests override fields.
pub fn test_config(auth_mode: AuthMode) -> SsoConfig {
    SsoConfig {
        common: service_core::config::Config {
            port: 8080,
            shutdown_grace_seconds: 0,
        },
        environment: Environment::Prod,
        service_name: "sso-service-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        disabled: false,
        auth_mode,
        database: DatabaseConfig {
            url: "postgres://localhost/sso_test".to_string(),
            max_connections: 5,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://localhost:6379".to_string(),
        },
        cas_client: CasClientConfig {
            host: "https://cas.example.edu".to_string(),
            login_path: "/cas/login".to_string(),
            logout_path: "/cas/logout".to_string(),
            service_validate_path: "/cas/serviceValidate".to_string(),
            callback_url: "http://localhost:8080/login".to_string(),
        },
        cas_server: CasServerConfig {
            services: vec!["https://good.example".to_string()],
        },
        provisioning: ProvisioningConfig {
            create_person: false,
            group_name: None,
            group_permissions: vec![],
        },
        hardcoded_users: vec![],
        admin_username: None,
        after_login_url: "/".to_string(),
        after_logout_url: None,
        ticket_ttl_seconds: 300,
        session_ttl_seconds: 86400,
        rate_limit: RateLimitConfig {
            login_attempts: 1000,
            login_window_seconds: 60,
        },
    }
}

/// Pull the session cookie pair (`name=value`) out of a response, ignoring
/// the empty value a destroy writes.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .find(|pair| {
            pair.strip_prefix(&format!("{SESSION_COOKIE}="))
                .is_some_and(|v| !v.is_empty())
        })
        .map(|pair| pair.to_string())
}

/// Whether the response clears the session cookie.
pub fn clears_session_cookie(response: &Response<Body>) -> bool {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| {
            value
                .split(';')
                .next()
                .is_some_and(|pair| pair == format!("{SESSION_COOKIE}="))
        })
}

pub fn location(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("Body is not UTF-8")
}
