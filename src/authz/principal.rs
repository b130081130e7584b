use std::collections::BTreeSet;
use uuid::Uuid;

use super::{ResourceType, Role};

/// Principal represents an authenticated user with the memberships the policy needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    pub is_superuser: bool,
    /// Role groups the user belongs to (never contains `Role::None`)
    pub groups: BTreeSet<Role>,
    pub department_ids: BTreeSet<Uuid>,
}

impl Principal {
    pub fn new(user_id: Uuid, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            is_superuser: false,
            groups: BTreeSet::new(),
            department_ids: BTreeSet::new(),
        }
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = Role>) -> Self {
        self.groups = groups.into_iter().filter(|role| *role != Role::None).collect();
        self
    }

    pub fn with_departments(mut self, departments: impl IntoIterator<Item = Uuid>) -> Self {
        self.department_ids = departments.into_iter().collect();
        self
    }

    pub fn in_group(&self, role: Role) -> bool {
        self.groups.contains(&role)
    }

    /// Superusers and Admin group members cannot be impersonated.
    pub fn is_admin(&self) -> bool {
        self.is_superuser || self.in_group(Role::Admin)
    }
}

/// Resource context for instance-level checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceContext {
    pub resource_type: ResourceType,
    pub resource_id: Option<Uuid>,
    /// Effective department, resolved through the parent chain where needed
    pub department_id: Option<Uuid>,
}

impl ResourceContext {
    pub fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            resource_id: None,
            department_id: None,
        }
    }

    pub fn with_resource(mut self, resource_id: Uuid) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    pub fn with_department(mut self, department_id: Option<Uuid>) -> Self {
        self.department_id = department_id;
        self
    }
}
