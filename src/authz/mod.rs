//! Authorization module - department-scoped policy engine
//!
//! This module implements the access rules shared by every inventory endpoint:
//! - Identity resolution (superuser flag, effective role, department set)
//! - The policy evaluator deciding allow/deny per operation
//! - Collection scopes used to narrow list and detail queries
//! - Admin impersonation sessions

mod evaluator;
mod identity;
pub mod impersonation;
mod principal;
mod scope;

pub use evaluator::{validate_assignment, DepartmentPolicy, PolicyEvaluator};
pub use identity::{resolve, Identity};
pub use impersonation::{ImpersonationState, SessionStore};
pub use principal::{Principal, ResourceContext};
pub use scope::{Scope, Scoped};

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthzError {
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{field}: {message}")]
    IntegrityViolation { field: String, message: String },
}

/// Effective access tier.
///
/// Variants are declared in precedence order, so `Ord` picks the strongest
/// role when a principal belongs to several role groups.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
pub enum Role {
    None,
    Viewer,
    Manager,
    Admin,
}

impl Role {
    /// Role groups a principal can be a member of.
    pub const GROUPS: [Role; 3] = [Role::Admin, Role::Manager, Role::Viewer];

    pub fn group_name(self) -> Option<&'static str> {
        match self {
            Role::Admin => Some("Admin"),
            Role::Manager => Some("Manager"),
            Role::Viewer => Some("Viewer"),
            Role::None => None,
        }
    }

    pub fn from_group_name(name: &str) -> Option<Self> {
        match name {
            "Admin" => Some(Role::Admin),
            "Manager" => Some(Role::Manager),
            "Viewer" => Some(Role::Viewer),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.group_name().unwrap_or("None"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    List,
    View,
    Create,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::List,
        Action::View,
        Action::Create,
        Action::Update,
        Action::Delete,
    ];
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::List => "list",
            Action::View => "view",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Department,
    User,
    Server,
    ServerUpdate,
    Service,
    HyperLink,
    Host,
    VirtualMachine,
    SslCertificate,
    AuditLog,
}

impl ResourceType {
    pub const ALL: [ResourceType; 10] = [
        ResourceType::Department,
        ResourceType::User,
        ResourceType::Server,
        ResourceType::ServerUpdate,
        ResourceType::Service,
        ResourceType::HyperLink,
        ResourceType::Host,
        ResourceType::VirtualMachine,
        ResourceType::SslCertificate,
        ResourceType::AuditLog,
    ];

    /// Inventory records that belong to a department directly or through a parent.
    pub const INVENTORY: [ResourceType; 7] = [
        ResourceType::Server,
        ResourceType::ServerUpdate,
        ResourceType::Service,
        ResourceType::HyperLink,
        ResourceType::Host,
        ResourceType::VirtualMachine,
        ResourceType::SslCertificate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Department => "department",
            ResourceType::User => "user",
            ResourceType::Server => "server",
            ResourceType::ServerUpdate => "server_update",
            ResourceType::Service => "service",
            ResourceType::HyperLink => "hyperlink",
            ResourceType::Host => "host",
            ResourceType::VirtualMachine => "virtual_machine",
            ResourceType::SslCertificate => "ssl_certificate",
            ResourceType::AuditLog => "audit_log",
        }
    }

    /// Roles (besides Admin) that may attempt `action` on this type.
    pub fn default_roles(self, action: Action) -> &'static [Role] {
        const READERS: &[Role] = &[Role::Manager, Role::Viewer];
        const EDITORS: &[Role] = &[Role::Manager];
        const ADMIN_ONLY: &[Role] = &[];

        match (self, action) {
            (ResourceType::User | ResourceType::AuditLog, _) => ADMIN_ONLY,
            (ResourceType::Department, Action::List | Action::View) => READERS,
            (ResourceType::Department, _) => ADMIN_ONLY,
            (_, Action::List | Action::View) => READERS,
            (_, _) => EDITORS,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation exposed by an endpoint: what it does, on which type, and who may try it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub resource_type: ResourceType,
    pub action: Action,
    pub allowed_roles: &'static [Role],
}

impl Operation {
    pub fn new(resource_type: ResourceType, action: Action) -> Self {
        Self {
            resource_type,
            action,
            allowed_roles: resource_type.default_roles(action),
        }
    }

    pub fn with_allowed_roles(mut self, roles: &'static [Role]) -> Self {
        self.allowed_roles = roles;
        self
    }
}
