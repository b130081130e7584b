use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::audit::Auditable;
use crate::authz::{ResourceType, Scoped};
use crate::errors::AppError;
use crate::utils::{parse_opt_uuid, parse_uuid};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub ip_address: String,
    pub os: String,
    pub cpu: String,
    pub memory: String,
    pub disk: String,
    pub location: String,
    pub department_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for Server {
    fn resource_type() -> ResourceType {
        ResourceType::Server
    }

    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn snapshot_repr(&self) -> String {
        format!("{} ({})", self.name, self.ip_address)
    }
}

impl Scoped for Server {
    fn department_id(&self) -> Option<Uuid> {
        self.department_id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbServer {
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub os: String,
    pub cpu: String,
    pub memory: String,
    pub disk: String,
    pub location: String,
    pub department_id: Option<String>,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const SERVER_COLUMNS: &str =
    "s.id, s.name, s.ip_address, s.os, s.cpu, s.memory, s.disk, s.location, s.department_id, s.owner_id, s.created_at, s.updated_at";

impl TryFrom<DbServer> for Server {
    type Error = AppError;

    fn try_from(value: DbServer) -> Result<Self, Self::Error> {
        Ok(Server {
            id: parse_uuid(&value.id)?,
            name: value.name,
            ip_address: value.ip_address,
            os: value.os,
            cpu: value.cpu,
            memory: value.memory,
            disk: value.disk,
            location: value.location,
            department_id: parse_opt_uuid(value.department_id.as_deref())?,
            owner_id: parse_opt_uuid(value.owner_id.as_deref())?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ServerCreateRequest {
    #[schema(example = "web-01")]
    pub name: String,
    #[schema(example = "10.0.0.10")]
    pub ip_address: String,
    #[schema(example = "Ubuntu 22.04")]
    pub os: String,
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub memory: String,
    #[serde(default)]
    pub disk: String,
    #[serde(default)]
    pub location: String,
    pub department_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ServerUpdateRequest {
    pub name: Option<String>,
    pub ip_address: Option<String>,
    pub os: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub disk: Option<String>,
    pub location: Option<String>,
    pub department_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
}

pub const PAGE_SIZES: [u32; 4] = [10, 25, 50, 100];
pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ServerListQuery {
    /// 1-based page number
    pub page: Option<u32>,
    /// One of 10, 25, 50, 100
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ServerPage {
    pub items: Vec<Server>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub total_pages: u32,
}
