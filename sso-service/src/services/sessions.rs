//! Server-side sessions.
//!
//! The browser carries only an opaque session id in an HttpOnly cookie; the
//! session document itself is a JSON value in the cache with a TTL. Each
//! request loads its own copy - concurrent requests never share an instance.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use redis::{Client, aio::ConnectionManager};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RedisConfig;
use crate::models::Person;
use crate::services::ServiceError;

pub const SESSION_COOKIE: &str = "sso_session";

const SESSION_KEY_PREFIX: &str = "session:";

/// Generate a fresh opaque session id.
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Everything the broker keeps per browser session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    /// The resolved local user, including any session-scoped admin override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Person>,
    /// Principal asserted by the external CAS server, pending or past
    /// resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cas_assertion: Option<String>,
    /// Relying service waiting for a ticket once this session authenticates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cas_login_for_service: Option<String>,
    /// Last ticket issued by the deferred-redirect step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cas_ticket: Option<String>,
    /// Tickets issued to this session, keyed by relying service URL.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub cas_tickets: HashMap<String, String>,
}

impl SessionData {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, ServiceError>;
    async fn save(&self, session_id: &str, data: &SessionData) -> Result<(), ServiceError>;
    async fn destroy(&self, session_id: &str) -> Result<(), ServiceError>;
}

/// Redis-backed session store.
#[derive(Clone)]
pub struct RedisSessionStore {
    manager: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisSessionStore {
    pub async fn new(config: &RedisConfig, ttl_seconds: u64) -> Result<Self, ServiceError> {
        tracing::info!(url = %config.url, "Connecting to Redis for the session store");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            ServiceError::Cache(e)
        })?;

        Ok(Self {
            manager,
            ttl_seconds,
        })
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, ServiceError> {
        let mut conn = self.manager.clone();
        let key = format!("{SESSION_KEY_PREFIX}{session_id}");

        let raw: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
        match raw {
            Some(raw) => {
                let data = serde_json::from_str(&raw)
                    .map_err(|e| ServiceError::Storage(format!("corrupt session document: {e}")))?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, session_id: &str, data: &SessionData) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        let key = format!("{SESSION_KEY_PREFIX}{session_id}");
        let raw = serde_json::to_string(data)
            .map_err(|e| ServiceError::Storage(format!("unserializable session: {e}")))?;

        redis::cmd("SET")
            .arg(&key)
            .arg(raw)
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn destroy(&self, session_id: &str) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        let key = format!("{SESSION_KEY_PREFIX}{session_id}");
        redis::cmd("DEL")
            .arg(&key)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

/// In-memory session store for tests and single-node dev.
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, (SessionData, Instant)>>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn session_count(&self) -> usize {
        self.entries
            .lock()
            .expect("session store mutex poisoned")
            .len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, ServiceError> {
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| ServiceError::Storage(format!("session store mutex poisoned: {e}")))?;
        match entries.get(session_id) {
            Some((data, expires_at)) if *expires_at > now => Ok(Some(data.clone())),
            Some(_) => {
                entries.remove(session_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, session_id: &str, data: &SessionData) -> Result<(), ServiceError> {
        self.entries
            .lock()
            .map_err(|e| ServiceError::Storage(format!("session store mutex poisoned: {e}")))?
            .insert(
                session_id.to_string(),
                (data.clone(), Instant::now() + self.ttl),
            );
        Ok(())
    }

    async fn destroy(&self, session_id: &str) -> Result<(), ServiceError> {
        self.entries
            .lock()
            .map_err(|e| ServiceError::Storage(format!("session store mutex poisoned: {e}")))?
            .remove(session_id);
        Ok(())
    }
}
