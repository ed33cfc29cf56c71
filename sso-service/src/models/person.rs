//! Person model - local user records resolved from external principals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use utoipa::ToSchema;
use uuid::Uuid;

/// Named permission set attached to a person or group.
///
/// `admin` is the only permission the broker itself interprets; everything
/// else is an opaque grant carried for the hosting application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Permissions {
    #[serde(default)]
    pub admin: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub grants: BTreeSet<String>,
}

impl Permissions {
    /// Build a permission set from configured names. The name `admin` maps
    /// to the admin flag, anything else becomes an opaque grant.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut permissions = Permissions::default();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if name == "admin" {
                permissions.admin = true;
            } else {
                permissions.grants.insert(name.to_string());
            }
        }
        permissions
    }
}

/// A local user record.
///
/// Two provenances exist: hardcoded users come from static configuration and
/// are never written to the directory (`id` is their username); persisted
/// users live in the directory's `people` collection. The `admin` permission
/// may additionally be overridden per-session for the configured admin
/// principal - that override is never written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Person {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub group_ids: Vec<String>,
    #[serde(default)]
    pub permissions: Permissions,
    /// From static configuration rather than the directory.
    #[serde(default)]
    pub hardcoded: bool,
    /// Backed by a directory record.
    #[serde(default)]
    pub persisted: bool,
    /// Whether the account may log in at all.
    #[serde(default)]
    pub login: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_utc: Option<DateTime<Utc>>,
}

impl Person {
    /// Draft a directory-backed person for a principal seen for the first
    /// time. The placeholder names split the principal after its first
    /// character; richer identity data is not available at provisioning
    /// time.
    pub fn provisioned(principal: &str, group_id: Option<&str>) -> Self {
        let mut chars = principal.chars();
        let first_name = chars.next().map(String::from).unwrap_or_default();
        let last_name: String = chars.collect();

        Self {
            id: Uuid::new_v4().to_string(),
            username: principal.to_string(),
            email: None,
            first_name,
            last_name,
            group_ids: group_id.map(|id| vec![id.to_string()]).unwrap_or_default(),
            permissions: Permissions::default(),
            hardcoded: false,
            persisted: true,
            login: true,
            created_utc: Some(Utc::now()),
        }
    }
}
