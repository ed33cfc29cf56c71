//! Directory access for person and group records.
//!
//! The persisted user store is an external collaborator; the broker only
//! touches it through this narrow interface. Single-statement atomicity is
//! all the contract guarantees - the find-or-create sequence above it is
//! deliberately not transactional.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::models::{Group, Permissions, Person};
use crate::services::ServiceError;

#[async_trait]
pub trait Directory: Send + Sync {
    /// Look up a person record by exact username. Only records of type
    /// `person` are considered.
    async fn find_person(&self, username: &str) -> Result<Option<Person>, ServiceError>;

    /// Insert a freshly provisioned person record.
    async fn insert_person(&self, person: &Person) -> Result<(), ServiceError>;

    /// Find a group by name, creating it with the given permission set if
    /// absent. Idempotent per name.
    async fn ensure_group(
        &self,
        name: &str,
        permissions: &Permissions,
    ) -> Result<Group, ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;
}

/// Create a PostgreSQL connection pool for the directory.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await?;

    tracing::info!("Successfully connected to PostgreSQL");

    Ok(pool)
}

/// Run directory migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running directory migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Directory migrations completed");
    Ok(())
}

#[derive(sqlx::FromRow)]
struct PersonRow {
    person_id: String,
    username: String,
    email: Option<String>,
    first_name: String,
    last_name: String,
    group_ids: Vec<String>,
    permissions: Json<Permissions>,
    can_login: bool,
    created_utc: chrono::DateTime<chrono::Utc>,
}

impl From<PersonRow> for Person {
    fn from(row: PersonRow) -> Self {
        Person {
            id: row.person_id,
            username: row.username,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            group_ids: row.group_ids,
            permissions: row.permissions.0,
            hardcoded: false,
            persisted: true,
            login: row.can_login,
            created_utc: Some(row.created_utc),
        }
    }
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    group_id: String,
    group_name: String,
    permissions: Json<Permissions>,
    created_utc: chrono::DateTime<chrono::Utc>,
}

impl From<GroupRow> for Group {
    fn from(row: GroupRow) -> Self {
        Group {
            id: row.group_id,
            name: row.group_name,
            permissions: row.permissions.0,
            created_utc: Some(row.created_utc),
        }
    }
}

/// PostgreSQL-backed directory.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn find_person(&self, username: &str) -> Result<Option<Person>, ServiceError> {
        let row = sqlx::query_as::<_, PersonRow>(
            "SELECT person_id, username, email, first_name, last_name, group_ids, permissions, can_login, created_utc \
             FROM people WHERE record_type = 'person' AND username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Person::from))
    }

    async fn insert_person(&self, person: &Person) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO people (person_id, record_type, username, email, first_name, last_name, group_ids, permissions, can_login, created_utc)
            VALUES ($1, 'person', $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&person.id)
        .bind(&person.username)
        .bind(&person.email)
        .bind(&person.first_name)
        .bind(&person.last_name)
        .bind(&person.group_ids)
        .bind(Json(&person.permissions))
        .bind(person.login)
        .bind(person.created_utc.unwrap_or_else(chrono::Utc::now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_group(
        &self,
        name: &str,
        permissions: &Permissions,
    ) -> Result<Group, ServiceError> {
        if let Some(row) = sqlx::query_as::<_, GroupRow>(
            "SELECT group_id, group_name, permissions, created_utc FROM groups WHERE group_name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(row.into());
        }

        let group = Group::new(name, permissions.clone());
        sqlx::query(
            r#"
            INSERT INTO groups (group_id, group_name, permissions, created_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (group_name) DO NOTHING
            "#,
        )
        .bind(&group.id)
        .bind(&group.name)
        .bind(Json(&group.permissions))
        .bind(group.created_utc.unwrap_or_else(chrono::Utc::now))
        .execute(&self.pool)
        .await?;

        // Re-read: a racing insert may have won the conflict.
        let row = sqlx::query_as::<_, GroupRow>(
            "SELECT group_id, group_name, permissions, created_utc FROM groups WHERE group_name = $1",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-memory directory for tests.
pub struct MockDirectory {
    pub people: Mutex<HashMap<String, Person>>,
    pub groups: Mutex<HashMap<String, Group>>,
    /// When set, every call fails - lets tests prove a path never touches
    /// the store.
    pub fail_all: AtomicBool,
}

impl Default for MockDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDirectory {
    pub fn new() -> Self {
        Self {
            people: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
            fail_all: AtomicBool::new(false),
        }
    }

    pub fn with_person(self, person: Person) -> Self {
        self.people
            .lock()
            .expect("mock directory mutex poisoned")
            .insert(person.username.clone(), person);
        self
    }

    pub fn person_count(&self) -> usize {
        self.people
            .lock()
            .expect("mock directory mutex poisoned")
            .len()
    }

    fn check_failure(&self) -> Result<(), ServiceError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(ServiceError::Storage(
                "mock directory unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Directory for MockDirectory {
    async fn find_person(&self, username: &str) -> Result<Option<Person>, ServiceError> {
        self.check_failure()?;
        let people = self
            .people
            .lock()
            .map_err(|e| ServiceError::Storage(format!("mock directory mutex poisoned: {e}")))?;
        Ok(people.get(username).cloned())
    }

    async fn insert_person(&self, person: &Person) -> Result<(), ServiceError> {
        self.check_failure()?;
        self.people
            .lock()
            .map_err(|e| ServiceError::Storage(format!("mock directory mutex poisoned: {e}")))?
            .insert(person.username.clone(), person.clone());
        Ok(())
    }

    async fn ensure_group(
        &self,
        name: &str,
        permissions: &Permissions,
    ) -> Result<Group, ServiceError> {
        self.check_failure()?;
        let mut groups = self
            .groups
            .lock()
            .map_err(|e| ServiceError::Storage(format!("mock directory mutex poisoned: {e}")))?;
        let group = groups
            .entry(name.to_string())
            .or_insert_with(|| Group::new(name, permissions.clone()));
        Ok(group.clone())
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        self.check_failure()
    }
}
