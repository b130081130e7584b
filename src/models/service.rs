use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::Auditable;
use crate::authz::{ResourceType, Scoped};
use crate::errors::AppError;
use crate::utils::{parse_opt_uuid, parse_uuid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Service {
    pub id: Uuid,
    pub server_id: Uuid,
    pub name: String,
    pub port: Option<u16>,
    pub status: ServiceStatus,
    pub last_restart: Option<DateTime<Utc>>,
    /// Department of the parent server
    pub department_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for Service {
    fn resource_type() -> ResourceType {
        ResourceType::Service
    }

    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn snapshot_repr(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.name, port),
            None => self.name.clone(),
        }
    }

    fn excluded_fields() -> &'static [&'static str] {
        &["created_at", "updated_at", "department_id"]
    }
}

impl Scoped for Service {
    fn department_id(&self) -> Option<Uuid> {
        self.department_id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbService {
    pub id: String,
    pub server_id: String,
    pub name: String,
    pub port: Option<i64>,
    pub status: ServiceStatus,
    pub last_restart: Option<DateTime<Utc>>,
    pub department_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const SERVICE_COLUMNS: &str =
    "sv.id, sv.server_id, sv.name, sv.port, sv.status, sv.last_restart, s.department_id, sv.created_at, sv.updated_at";

impl TryFrom<DbService> for Service {
    type Error = AppError;

    fn try_from(value: DbService) -> Result<Self, Self::Error> {
        let port = value
            .port
            .map(u16::try_from)
            .transpose()
            .map_err(|_| AppError::internal(format!("service {} has an invalid port", value.id)))?;

        Ok(Service {
            id: parse_uuid(&value.id)?,
            server_id: parse_uuid(&value.server_id)?,
            name: value.name,
            port,
            status: value.status,
            last_restart: value.last_restart,
            department_id: parse_opt_uuid(value.department_id.as_deref())?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ServiceCreateRequest {
    pub server_id: Uuid,
    #[schema(example = "nginx")]
    pub name: String,
    #[schema(example = 443)]
    pub port: Option<u16>,
    #[serde(default)]
    pub status: ServiceStatus,
    pub last_restart: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ServiceUpdateRequest {
    pub server_id: Option<Uuid>,
    pub name: Option<String>,
    pub port: Option<u16>,
    pub status: Option<ServiceStatus>,
    pub last_restart: Option<DateTime<Utc>>,
}
