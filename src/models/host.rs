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
pub enum HostStatus {
    #[default]
    Online,
    Offline,
}

/// A Hyper-V host carrying virtual machines.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Host {
    pub id: Uuid,
    pub hostname: String,
    pub ip_address: String,
    pub status: HostStatus,
    pub total_cpu: String,
    pub total_ram: String,
    pub hyperv_version: String,
    pub department_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for Host {
    fn resource_type() -> ResourceType {
        ResourceType::Host
    }

    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn snapshot_repr(&self) -> String {
        format!("{} ({})", self.hostname, self.ip_address)
    }
}

impl Scoped for Host {
    fn department_id(&self) -> Option<Uuid> {
        self.department_id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbHost {
    pub id: String,
    pub hostname: String,
    pub ip_address: String,
    pub status: HostStatus,
    pub total_cpu: String,
    pub total_ram: String,
    pub hyperv_version: String,
    pub department_id: Option<String>,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const HOST_COLUMNS: &str = "h.id, h.hostname, h.ip_address, h.status, h.total_cpu, h.total_ram, h.hyperv_version, h.department_id, h.owner_id, h.created_at, h.updated_at";

impl TryFrom<DbHost> for Host {
    type Error = AppError;

    fn try_from(value: DbHost) -> Result<Self, Self::Error> {
        Ok(Host {
            id: parse_uuid(&value.id)?,
            hostname: value.hostname,
            ip_address: value.ip_address,
            status: value.status,
            total_cpu: value.total_cpu,
            total_ram: value.total_ram,
            hyperv_version: value.hyperv_version,
            department_id: parse_opt_uuid(value.department_id.as_deref())?,
            owner_id: parse_opt_uuid(value.owner_id.as_deref())?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct HostCreateRequest {
    #[schema(example = "hv-01")]
    pub hostname: String,
    #[schema(example = "10.0.1.5")]
    pub ip_address: String,
    #[serde(default)]
    pub status: HostStatus,
    #[serde(default)]
    pub total_cpu: String,
    #[serde(default)]
    pub total_ram: String,
    #[serde(default)]
    pub hyperv_version: String,
    pub department_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct HostUpdateRequest {
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub status: Option<HostStatus>,
    pub total_cpu: Option<String>,
    pub total_ram: Option<String>,
    pub hyperv_version: Option<String>,
    pub department_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
}
