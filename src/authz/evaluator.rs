use uuid::Uuid;

use super::principal::ResourceContext;
use super::{Action, AuthzError, Identity, Operation, ResourceType, Role, Scope};

/// Policy evaluator trait for pluggable authorization logic
pub trait PolicyEvaluator: Send + Sync {
    /// Check if the identity may perform the operation, optionally on a concrete instance
    fn can(&self, identity: &Identity, op: &Operation, instance: Option<&ResourceContext>) -> bool;

    /// Visibility scope for collection queries over `resource_type`
    fn scope(&self, identity: &Identity, resource_type: ResourceType) -> Scope;

    fn authorize(
        &self,
        identity: &Identity,
        op: &Operation,
        instance: Option<&ResourceContext>,
    ) -> Result<(), AuthzError> {
        if self.can(identity, op, instance) {
            Ok(())
        } else {
            Err(AuthzError::Forbidden(denial_message(op)))
        }
    }
}

/// Default department-scoped policy
///
/// Evaluation order:
/// 1. superuser / Admin -> allow
/// 2. role not declared by the operation -> deny
/// 3. create without an instance -> Manager only
/// 4. instance -> department must be in scope; Manager edits, Viewer reads
/// 5. list without an instance -> Manager or Viewer
/// 6. deny
#[derive(Debug, Clone, Default)]
pub struct DepartmentPolicy;

impl DepartmentPolicy {
    pub fn new() -> Self {
        Self
    }

    fn instance_allows(identity: &Identity, action: Action, ctx: &ResourceContext) -> bool {
        let Some(department_id) = ctx.department_id else {
            return false;
        };
        if !identity.in_department(department_id) {
            return false;
        }

        match identity.role {
            // Managers never delete
            Role::Manager => action != Action::Delete,
            Role::Viewer => matches!(action, Action::View | Action::List),
            Role::Admin | Role::None => false,
        }
    }
}

impl PolicyEvaluator for DepartmentPolicy {
    fn can(&self, identity: &Identity, op: &Operation, instance: Option<&ResourceContext>) -> bool {
        // 1. Admins bypass all checks
        if identity.is_admin() {
            tracing::debug!(
                user_id = %identity.user_id,
                action = %op.action,
                resource = %op.resource_type,
                "admin bypass"
            );
            return true;
        }

        // 2. Operation-declared roles
        if !op.allowed_roles.contains(&identity.role) {
            tracing::debug!(
                user_id = %identity.user_id,
                role = %identity.role,
                action = %op.action,
                resource = %op.resource_type,
                "role not allowed for operation"
            );
            return false;
        }

        let allowed = match (instance, op.action) {
            // 3. Prospective create, department validated at commit time
            (None, Action::Create) => identity.role == Role::Manager,
            // 4. Concrete instance
            (Some(ctx), action) => Self::instance_allows(identity, action, ctx),
            // 5. Collection access, narrowed by the scope afterwards
            (None, Action::List) => matches!(identity.role, Role::Manager | Role::Viewer),
            // 6. Deny
            (None, _) => false,
        };

        tracing::debug!(
            user_id = %identity.user_id,
            role = %identity.role,
            action = %op.action,
            resource = %op.resource_type,
            department_id = ?instance.and_then(|ctx| ctx.department_id),
            allowed,
            "policy decision"
        );
        allowed
    }

    fn scope(&self, identity: &Identity, _resource_type: ResourceType) -> Scope {
        Scope::for_identity(identity)
    }
}

/// Checks that a record being created or moved lands inside the caller's departments.
///
/// `field` names the input that carried the department (or parent record) so the
/// error can be reported against it.
pub fn validate_assignment(
    identity: &Identity,
    department_id: Option<Uuid>,
    field: &str,
) -> Result<(), AuthzError> {
    if identity.is_admin() {
        return Ok(());
    }

    match department_id {
        Some(department_id) if identity.in_department(department_id) => Ok(()),
        Some(_) => Err(AuthzError::IntegrityViolation {
            field: field.to_string(),
            message: format!("You can only assign a {field} within your departments"),
        }),
        None => Err(AuthzError::IntegrityViolation {
            field: field.to_string(),
            message: format!("A {field} belonging to one of your departments is required"),
        }),
    }
}

fn denial_message(op: &Operation) -> String {
    format!(
        "You do not have permission to {} this {}.",
        op.action,
        op.resource_type.as_str().replace('_', " ")
    )
}
