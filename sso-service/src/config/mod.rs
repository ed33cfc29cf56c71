use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

use crate::models::{Permissions, Person};
use crate::services::resolver::{CreatePersonPolicy, GroupPolicy, ResolverOptions};

#[derive(Debug, Clone, Deserialize)]
pub struct SsoConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// When true only health and docs routes are mounted.
    pub disabled: bool,
    pub auth_mode: AuthMode,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub cas_client: CasClientConfig,
    pub cas_server: CasServerConfig,
    pub provisioning: ProvisioningConfig,
    pub hardcoded_users: Vec<HardcodedUser>,
    /// Principal granted the session-scoped admin override.
    pub admin_username: Option<String>,
    pub after_login_url: String,
    pub after_logout_url: Option<String>,
    pub ticket_ttl_seconds: u64,
    pub session_ttl_seconds: u64,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

/// Which flow authenticates `/login`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Trust the `X-Remote-User` header injected by the edge proxy.
    Header,
    /// Redirect to an external CAS server and validate its tickets.
    Cas,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CasClientConfig {
    pub host: String,
    pub login_path: String,
    pub logout_path: String,
    pub service_validate_path: String,
    /// Our own `/login` URL as the external CAS server should see it.
    pub callback_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CasServerConfig {
    /// Allowlisted relying-service URL prefixes.
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningConfig {
    /// Create a person record on first successful external login.
    pub create_person: bool,
    pub group_name: Option<String>,
    pub group_permissions: Vec<String>,
}

/// A user defined in configuration rather than the directory.
#[derive(Debug, Clone, Deserialize)]
pub struct HardcodedUser {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
}

impl SsoConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = SsoConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("sso-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            disabled: get_env("DISABLED", Some("false"), is_prod)?
                .parse()
                .unwrap_or(false),
            auth_mode: get_env("AUTH_MODE", Some("header"), is_prod)?
                .parse()
                .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: get_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?
                    .parse()
                    .unwrap_or(10),
                min_connections: get_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?
                    .parse()
                    .unwrap_or(1),
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            cas_client: CasClientConfig {
                host: get_env("CAS_CLIENT_HOST", Some("https://localhost:8443"), is_prod)?,
                login_path: get_env("CAS_CLIENT_LOGIN_PATH", Some("/cas/login"), is_prod)?,
                logout_path: get_env("CAS_CLIENT_LOGOUT_PATH", Some("/cas/logout"), is_prod)?,
                service_validate_path: get_env(
                    "CAS_CLIENT_SERVICE_VALIDATE_PATH",
                    Some("/cas/serviceValidate"),
                    is_prod,
                )?,
                callback_url: get_env(
                    "CALLBACK_URL",
                    Some("http://localhost:8080/login"),
                    is_prod,
                )?,
            },
            cas_server: CasServerConfig {
                services: split_list(&get_env("CAS_SERVER_SERVICES", Some(""), is_prod)?),
            },
            provisioning: ProvisioningConfig {
                create_person: get_env("CREATE_PERSON", Some("false"), is_prod)?
                    .parse()
                    .unwrap_or(false),
                group_name: env::var("CREATE_PERSON_GROUP_NAME").ok().filter(|s| !s.is_empty()),
                group_permissions: split_list(
                    &env::var("CREATE_PERSON_GROUP_PERMISSIONS").unwrap_or_default(),
                ),
            },
            hardcoded_users: {
                let raw = env::var("HARDCODED_USERS").unwrap_or_else(|_| "[]".to_string());
                serde_json::from_str(&raw).map_err(|e| {
                    AppError::ConfigError(anyhow::anyhow!("HARDCODED_USERS is not valid JSON: {e}"))
                })?
            },
            admin_username: env::var("ADMIN_USERNAME").ok().filter(|s| !s.is_empty()),
            after_login_url: get_env("AFTER_LOGIN_URL", Some("/"), is_prod)?,
            after_logout_url: env::var("AFTER_LOGOUT_URL").ok().filter(|s| !s.is_empty()),
            ticket_ttl_seconds: get_env("TICKET_TTL_SECONDS", Some("300"), is_prod)?
                .parse()
                .unwrap_or(300),
            session_ttl_seconds: get_env("SESSION_TTL_SECONDS", Some("86400"), is_prod)?
                .parse()
                .unwrap_or(86400),
            rate_limit: RateLimitConfig {
                login_attempts: get_env("RATE_LIMIT_LOGIN_ATTEMPTS", Some("20"), is_prod)?
                    .parse()
                    .unwrap_or(20),
                login_window_seconds: get_env(
                    "RATE_LIMIT_LOGIN_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(60),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.ticket_ttl_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TICKET_TTL_SECONDS must be positive"
            )));
        }

        if self.session_ttl_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_TTL_SECONDS must be positive"
            )));
        }

        if self.auth_mode == AuthMode::Cas {
            if self.cas_client.host.is_empty() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "CAS_CLIENT_HOST is required in cas mode"
                )));
            }
            if self.cas_client.callback_url.is_empty() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "CALLBACK_URL is required in cas mode"
                )));
            }
        }

        for prefix in &self.cas_server.services {
            if !prefix.starts_with("http://") && !prefix.starts_with("https://") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "CAS_SERVER_SERVICES entries must be absolute URL prefixes, got '{prefix}'"
                )));
            }
        }

        if self.environment == Environment::Prod && self.provisioning.create_person {
            // Provisioning every externally asserted principal is a wide
            // door; make sure prod deployments opted into a group policy.
            if self.provisioning.group_name.is_none() {
                tracing::warn!(
                    "CREATE_PERSON is enabled in production without CREATE_PERSON_GROUP_NAME"
                );
            }
        }

        Ok(())
    }

    /// Materialize the hardcoded-user configuration into person records.
    pub fn hardcoded_people(&self) -> Vec<Person> {
        self.hardcoded_users
            .iter()
            .map(|user| {
                let mut person = Person::provisioned(&user.username, None);
                person.id = user.username.clone();
                person.email = user.email.clone();
                if let Some(first_name) = &user.first_name {
                    person.first_name = first_name.clone();
                }
                if let Some(last_name) = &user.last_name {
                    person.last_name = last_name.clone();
                }
                person.permissions.admin = user.admin;
                person.hardcoded = true;
                person.persisted = false;
                person.created_utc = None;
                person
            })
            .collect()
    }

    /// Resolver options derived from this configuration.
    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            hardcoded_users: self.hardcoded_people(),
            create_person: self.provisioning.create_person.then(|| CreatePersonPolicy {
                group: self.provisioning.group_name.as_ref().map(|name| GroupPolicy {
                    name: name.clone(),
                    permissions: Permissions::from_names(&self.provisioning.group_permissions),
                }),
            }),
            admin_username: self.admin_username.clone(),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "header" => Ok(AuthMode::Header),
            "cas" => Ok(AuthMode::Cas),
            _ => Err(format!("Invalid auth mode: {}", s)),
        }
    }
}
