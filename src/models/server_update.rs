use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::Auditable;
use crate::authz::{ResourceType, Scoped};
use crate::errors::AppError;
use crate::utils::{parse_opt_uuid, parse_uuid};

/// A maintenance entry recorded against a server.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServerUpdate {
    pub id: Uuid,
    pub server_id: Uuid,
    pub update_type: String,
    pub notes: String,
    pub updated_by: Option<Uuid>,
    pub update_time: DateTime<Utc>,
    /// Department of the parent server
    pub department_id: Option<Uuid>,
}

impl Auditable for ServerUpdate {
    fn resource_type() -> ResourceType {
        ResourceType::ServerUpdate
    }

    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn snapshot_repr(&self) -> String {
        format!("{} @ {}", self.update_type, self.update_time.format("%Y-%m-%d %H:%M"))
    }

    fn excluded_fields() -> &'static [&'static str] {
        &["department_id"]
    }
}

impl Scoped for ServerUpdate {
    fn department_id(&self) -> Option<Uuid> {
        self.department_id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbServerUpdate {
    pub id: String,
    pub server_id: String,
    pub update_type: String,
    pub notes: String,
    pub updated_by: Option<String>,
    pub update_time: DateTime<Utc>,
    pub department_id: Option<String>,
}

pub const SERVER_UPDATE_COLUMNS: &str =
    "u.id, u.server_id, u.update_type, u.notes, u.updated_by, u.update_time, s.department_id";

impl TryFrom<DbServerUpdate> for ServerUpdate {
    type Error = AppError;

    fn try_from(value: DbServerUpdate) -> Result<Self, Self::Error> {
        Ok(ServerUpdate {
            id: parse_uuid(&value.id)?,
            server_id: parse_uuid(&value.server_id)?,
            update_type: value.update_type,
            notes: value.notes,
            updated_by: parse_opt_uuid(value.updated_by.as_deref())?,
            update_time: value.update_time,
            department_id: parse_opt_uuid(value.department_id.as_deref())?,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ServerUpdateCreateRequest {
    #[schema(example = "Security patch")]
    pub update_type: String,
    #[serde(default)]
    pub notes: String,
    /// Defaults to now
    pub update_time: Option<DateTime<Utc>>,
}
