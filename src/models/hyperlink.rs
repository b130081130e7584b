use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::Auditable;
use crate::authz::{ResourceType, Scoped};
use crate::errors::AppError;
use crate::utils::{parse_opt_uuid, parse_uuid};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HyperLink {
    pub id: Uuid,
    pub server_id: Uuid,
    pub url: String,
    pub is_enabled: bool,
    pub created_by: Option<Uuid>,
    /// Department of the parent server
    pub department_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for HyperLink {
    fn resource_type() -> ResourceType {
        ResourceType::HyperLink
    }

    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn snapshot_repr(&self) -> String {
        self.url.clone()
    }

    fn excluded_fields() -> &'static [&'static str] {
        &["created_at", "updated_at", "department_id"]
    }
}

impl Scoped for HyperLink {
    fn department_id(&self) -> Option<Uuid> {
        self.department_id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbHyperLink {
    pub id: String,
    pub server_id: String,
    pub url: String,
    pub is_enabled: bool,
    pub created_by: Option<String>,
    pub department_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const HYPERLINK_COLUMNS: &str =
    "l.id, l.server_id, l.url, l.is_enabled, l.created_by, s.department_id, l.created_at, l.updated_at";

impl TryFrom<DbHyperLink> for HyperLink {
    type Error = AppError;

    fn try_from(value: DbHyperLink) -> Result<Self, Self::Error> {
        Ok(HyperLink {
            id: parse_uuid(&value.id)?,
            server_id: parse_uuid(&value.server_id)?,
            url: value.url,
            is_enabled: value.is_enabled,
            created_by: parse_opt_uuid(value.created_by.as_deref())?,
            department_id: parse_opt_uuid(value.department_id.as_deref())?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct HyperLinkCreateRequest {
    pub server_id: Uuid,
    #[schema(example = "https://intranet.example.com")]
    pub url: String,
    #[serde(default = "enabled_by_default")]
    pub is_enabled: bool,
}

/// Only the URL and the enabled flag are editable after creation.
#[derive(Debug, Deserialize, ToSchema)]
pub struct HyperLinkUpdateRequest {
    pub url: Option<String>,
    pub is_enabled: Option<bool>,
}
