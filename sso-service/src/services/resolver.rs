//! Identity resolution - turning an externally asserted principal into a
//! local user record.
//!
//! The pipeline short-circuits in a fixed order: hardcoded users, then the
//! directory, then (policy permitting) provisioning. The post-resolve hook
//! and the admin override run for every resolved user regardless of where
//! it came from.

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{Permissions, Person};
use crate::services::directory::Directory;
use crate::services::error::ServiceError;

/// Where the principal assertion came from. CAS assertions may carry an
/// email address, so hardcoded lookup matches on either field there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalSource {
    TrustedHeader,
    Cas,
}

/// Extension seams around user provisioning. The default implementation
/// does nothing; deployments supply their own to enrich draft records or
/// veto creation.
#[async_trait]
pub trait ProvisionHooks: Send + Sync {
    async fn before_create_person(
        &self,
        _principal: &str,
        _draft: &mut Person,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn after_create_person(
        &self,
        _principal: &str,
        _saved: &Person,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Runs after resolution for every user, persisted or hardcoded.
    async fn after_resolve(&self, _user: &mut Person) -> Result<(), ServiceError> {
        Ok(())
    }
}

pub struct NoopHooks;

#[async_trait]
impl ProvisionHooks for NoopHooks {}

/// Group to attach to auto-provisioned people.
#[derive(Debug, Clone)]
pub struct GroupPolicy {
    pub name: String,
    pub permissions: Permissions,
}

/// Auto-provisioning policy. Present means first logins create a person.
#[derive(Debug, Clone, Default)]
pub struct CreatePersonPolicy {
    pub group: Option<GroupPolicy>,
}

#[derive(Clone, Default)]
pub struct ResolverOptions {
    /// Users from static configuration; matched before the directory is
    /// consulted and never written to it.
    pub hardcoded_users: Vec<Person>,
    pub create_person: Option<CreatePersonPolicy>,
    /// Principal granted the session-scoped admin override.
    pub admin_username: Option<String>,
}

#[derive(Clone)]
pub struct IdentityResolver {
    directory: Arc<dyn Directory>,
    hooks: Arc<dyn ProvisionHooks>,
    options: ResolverOptions,
}

impl IdentityResolver {
    pub fn new(
        directory: Arc<dyn Directory>,
        hooks: Arc<dyn ProvisionHooks>,
        options: ResolverOptions,
    ) -> Self {
        Self {
            directory,
            hooks,
            options,
        }
    }

    /// Resolve a principal to a local user.
    ///
    /// An empty principal is not an error - it resolves to `None` (not
    /// authenticated). Every other failure propagates unmodified; there are
    /// no retries.
    pub async fn resolve(
        &self,
        principal: &str,
        source: PrincipalSource,
    ) -> Result<Option<Person>, ServiceError> {
        if principal.is_empty() {
            return Ok(None);
        }

        let mut user = self.find_or_create(principal, source).await?;

        self.hooks.after_resolve(&mut user).await?;

        if self
            .options
            .admin_username
            .as_deref()
            .is_some_and(|admin| admin == user.username)
        {
            // Session-scoped only; never written back to the directory.
            user.permissions.admin = true;
        }

        Ok(Some(user))
    }

    async fn find_or_create(
        &self,
        principal: &str,
        source: PrincipalSource,
    ) -> Result<Person, ServiceError> {
        if let Some(hardcoded) = self.find_hardcoded(principal, source) {
            return Ok(hardcoded);
        }

        if let Some(mut person) = self.directory.find_person(principal).await? {
            person.hardcoded = false;
            person.persisted = true;
            return Ok(person);
        }

        let Some(policy) = &self.options.create_person else {
            return Err(ServiceError::NotLocalUser(principal.to_string()));
        };

        let group = match &policy.group {
            Some(group_policy) => Some(
                self.directory
                    .ensure_group(&group_policy.name, &group_policy.permissions)
                    .await?,
            ),
            None => None,
        };

        let mut draft = Person::provisioned(principal, group.as_ref().map(|g| g.id.as_str()));

        self.hooks
            .before_create_person(principal, &mut draft)
            .await?;
        self.directory.insert_person(&draft).await?;
        self.hooks.after_create_person(principal, &draft).await?;

        tracing::info!(username = %draft.username, "Provisioned new person on first login");

        Ok(draft)
    }

    fn find_hardcoded(&self, principal: &str, source: PrincipalSource) -> Option<Person> {
        let hit = self.options.hardcoded_users.iter().find(|user| {
            user.username == principal
                || (source == PrincipalSource::Cas && user.email.as_deref() == Some(principal))
        })?;

        let mut user = hit.clone();
        // Usernames are unique within the hardcoded list, so they double as
        // record ids.
        user.id = user.username.clone();
        user.hardcoded = true;
        user.persisted = false;
        Some(user)
    }
}
