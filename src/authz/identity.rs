use std::collections::BTreeSet;

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{Principal, Role};

/// Resolved view of a principal, computed once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Identity {
    pub user_id: Uuid,
    pub is_superuser: bool,
    pub role: Role,
    pub department_ids: BTreeSet<Uuid>,
}

impl Identity {
    /// Superusers and Admins bypass every departmental check.
    pub fn is_admin(&self) -> bool {
        self.is_superuser || self.role == Role::Admin
    }

    pub fn in_department(&self, department_id: Uuid) -> bool {
        self.department_ids.contains(&department_id)
    }
}

pub fn resolve(principal: &Principal) -> Identity {
    let role = if principal.is_superuser {
        Role::Admin
    } else {
        principal.groups.iter().copied().max().unwrap_or(Role::None)
    };

    Identity {
        user_id: principal.user_id,
        is_superuser: principal.is_superuser,
        role,
        department_ids: principal.department_ids.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superuser_resolves_to_admin_without_groups() {
        let principal = Principal::new(Uuid::new_v4(), "root").superuser();
        let identity = resolve(&principal);
        assert!(identity.is_superuser);
        assert_eq!(identity.role, Role::Admin);
        assert!(identity.is_admin());
    }

    #[test]
    fn multiple_groups_resolve_by_precedence() {
        let principal = Principal::new(Uuid::new_v4(), "mixed")
            .with_groups([Role::Viewer, Role::Manager]);
        assert_eq!(resolve(&principal).role, Role::Manager);

        let principal = Principal::new(Uuid::new_v4(), "mixed")
            .with_groups([Role::Viewer, Role::Admin, Role::Manager]);
        assert_eq!(resolve(&principal).role, Role::Admin);
    }

    #[test]
    fn no_groups_resolves_to_none() {
        let dept = Uuid::new_v4();
        let principal = Principal::new(Uuid::new_v4(), "nobody").with_departments([dept]);
        let identity = resolve(&principal);
        assert_eq!(identity.role, Role::None);
        assert!(identity.in_department(dept));
        assert!(!identity.is_admin());
    }

    #[test]
    fn resolve_is_idempotent() {
        let principal = Principal::new(Uuid::new_v4(), "viewer")
            .with_groups([Role::Viewer])
            .with_departments([Uuid::new_v4(), Uuid::new_v4()]);
        assert_eq!(resolve(&principal), resolve(&principal));
    }
}
