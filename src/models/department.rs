use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::Auditable;
use crate::authz::{ResourceType, Scoped};
use crate::errors::AppError;
use crate::utils::parse_uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for Department {
    fn resource_type() -> ResourceType {
        ResourceType::Department
    }

    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn snapshot_repr(&self) -> String {
        self.name.clone()
    }
}

impl Scoped for Department {
    fn department_id(&self) -> Option<Uuid> {
        Some(self.id)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbDepartment {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbDepartment> for Department {
    type Error = AppError;

    fn try_from(value: DbDepartment) -> Result<Self, Self::Error> {
        Ok(Department {
            id: parse_uuid(&value.id)?,
            name: value.name,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DepartmentRequest {
    #[schema(example = "Infrastructure")]
    pub name: String,
}
