//! Ticket store - opaque service tickets mapped to the principal that
//! earned them, with cache-governed expiry.
//!
//! Tickets are deliberately not invalidated on read; relying services may
//! look one up more than once within the TTL. See DESIGN.md.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use redis::{Client, aio::ConnectionManager};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::RedisConfig;
use crate::services::ServiceError;

const TICKET_KEY_PREFIX: &str = "cas_ticket:";

/// Generate a fresh opaque ticket id: 32 random bytes, base64url.
pub fn new_ticket_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("ST-{}", URL_SAFE_NO_PAD.encode(bytes))
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn put(&self, ticket: &str, principal: &str) -> Result<(), ServiceError>;

    /// Look a ticket up. An unknown or expired ticket is `Ok(None)`, not an
    /// error.
    async fn get(&self, ticket: &str) -> Result<Option<String>, ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;
}

/// Redis-backed ticket store.
#[derive(Clone)]
pub struct RedisTicketStore {
    manager: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisTicketStore {
    pub async fn new(config: &RedisConfig, ttl_seconds: u64) -> Result<Self, ServiceError> {
        tracing::info!(url = %config.url, "Connecting to Redis for the ticket store");
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
impl TicketStore for RedisTicketStore {
    async fn put(&self, ticket: &str, principal: &str) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        let key = format!("{TICKET_KEY_PREFIX}{ticket}");

        redis::cmd("SET")
            .arg(&key)
            .arg(principal)
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, ticket: &str) -> Result<Option<String>, ServiceError> {
        let mut conn = self.manager.clone();
        let key = format!("{TICKET_KEY_PREFIX}{ticket}");

        let principal: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
        Ok(principal)
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

/// In-memory ticket store with real expiry, for tests and single-node dev.
pub struct MemoryTicketStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    ttl: Duration,
    pub fail_all: AtomicBool,
}

impl MemoryTicketStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            fail_all: AtomicBool::new(false),
        }
    }

    fn check_failure(&self) -> Result<(), ServiceError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(ServiceError::Storage(
                "mock ticket store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn put(&self, ticket: &str, principal: &str) -> Result<(), ServiceError> {
        self.check_failure()?;
        self.entries
            .lock()
            .map_err(|e| ServiceError::Storage(format!("ticket store mutex poisoned: {e}")))?
            .insert(
                ticket.to_string(),
                (principal.to_string(), Instant::now() + self.ttl),
            );
        Ok(())
    }

    async fn get(&self, ticket: &str) -> Result<Option<String>, ServiceError> {
        self.check_failure()?;
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| ServiceError::Storage(format!("ticket store mutex poisoned: {e}")))?;
        match entries.get(ticket) {
            Some((principal, expires_at)) if *expires_at > now => Ok(Some(principal.clone())),
            Some(_) => {
                entries.remove(ticket);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        self.check_failure()
    }
}
