use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::Auditable;
use crate::authz::{Identity, ResourceType, Role};
use crate::errors::AppError;
use crate::utils::parse_uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_superuser: bool,
    pub is_active: bool,
    pub groups: Vec<Role>,
    pub department_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for User {
    fn resource_type() -> ResourceType {
        ResourceType::User
    }

    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn snapshot_repr(&self) -> String {
        self.username.clone()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub is_superuser: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const USER_COLUMNS: &str =
    "id, username, email, first_name, last_name, password_hash, is_superuser, is_active, created_at, updated_at";

impl User {
    pub fn from_db(value: DbUser, groups: Vec<Role>, department_ids: Vec<Uuid>) -> Result<Self, AppError> {
        Ok(User {
            id: parse_uuid(&value.id)?,
            username: value.username,
            email: value.email,
            first_name: value.first_name,
            last_name: value.last_name,
            is_superuser: value.is_superuser,
            is_active: value.is_active,
            groups,
            department_ids,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "alice")]
    pub username: String,
    #[schema(example = "alice@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "alice")]
    pub username: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

/// Who the caller is, and who they are acting as.
#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    /// The principal whose permissions apply to this request
    pub user: User,
    pub identity: Identity,
    pub is_impersonating: bool,
    /// The real (original) principal while impersonating
    pub impersonator: Option<User>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserCreateRequest {
    #[schema(example = "bob")]
    pub username: String,
    #[schema(example = "bob@example.com")]
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub groups: Vec<Role>,
    #[serde(default)]
    pub department_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserUpdateRequest {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
    pub groups: Option<Vec<Role>>,
    pub department_ids: Option<Vec<Uuid>>,
}
