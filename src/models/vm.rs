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
pub enum VmStatus {
    #[default]
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VirtualMachine {
    pub id: Uuid,
    pub host_id: Uuid,
    pub name: String,
    /// Hypervisor-side identifier
    pub vm_id: String,
    pub guest_os: String,
    pub status: VmStatus,
    pub assigned_cpu: String,
    pub assigned_ram: String,
    pub ip_address: Option<String>,
    /// Department of the parent host
    pub department_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for VirtualMachine {
    fn resource_type() -> ResourceType {
        ResourceType::VirtualMachine
    }

    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn snapshot_repr(&self) -> String {
        self.name.clone()
    }

    fn excluded_fields() -> &'static [&'static str] {
        &["created_at", "updated_at", "department_id"]
    }
}

impl Scoped for VirtualMachine {
    fn department_id(&self) -> Option<Uuid> {
        self.department_id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbVirtualMachine {
    pub id: String,
    pub host_id: String,
    pub name: String,
    pub vm_id: String,
    pub guest_os: String,
    pub status: VmStatus,
    pub assigned_cpu: String,
    pub assigned_ram: String,
    pub ip_address: Option<String>,
    pub department_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const VM_COLUMNS: &str = "vm.id, vm.host_id, vm.name, vm.vm_id, vm.guest_os, vm.status, vm.assigned_cpu, vm.assigned_ram, vm.ip_address, h.department_id, vm.created_at, vm.updated_at";

impl TryFrom<DbVirtualMachine> for VirtualMachine {
    type Error = AppError;

    fn try_from(value: DbVirtualMachine) -> Result<Self, Self::Error> {
        Ok(VirtualMachine {
            id: parse_uuid(&value.id)?,
            host_id: parse_uuid(&value.host_id)?,
            name: value.name,
            vm_id: value.vm_id,
            guest_os: value.guest_os,
            status: value.status,
            assigned_cpu: value.assigned_cpu,
            assigned_ram: value.assigned_ram,
            ip_address: value.ip_address,
            department_id: parse_opt_uuid(value.department_id.as_deref())?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VirtualMachineCreateRequest {
    pub host_id: Uuid,
    #[schema(example = "build-agent-3")]
    pub name: String,
    #[serde(default)]
    pub vm_id: String,
    #[schema(example = "Windows Server 2022")]
    pub guest_os: String,
    #[serde(default)]
    pub status: VmStatus,
    #[serde(default)]
    pub assigned_cpu: String,
    #[serde(default)]
    pub assigned_ram: String,
    pub ip_address: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VirtualMachineUpdateRequest {
    pub host_id: Option<Uuid>,
    pub name: Option<String>,
    pub vm_id: Option<String>,
    pub guest_os: Option<String>,
    pub status: Option<VmStatus>,
    pub assigned_cpu: Option<String>,
    pub assigned_ram: Option<String>,
    pub ip_address: Option<String>,
}
