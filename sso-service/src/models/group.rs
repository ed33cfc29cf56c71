//! Group model - lazily created permission groups for provisioned people.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Permissions;

/// A named group with an attached permission set. Groups are created with
/// ensure-exists semantics when a provisioning policy names one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_utc: Option<DateTime<Utc>>,
}

impl Group {
    pub fn new(name: &str, permissions: Permissions) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            permissions,
            created_utc: Some(Utc::now()),
        }
    }
}
