use std::collections::BTreeSet;

use uuid::Uuid;

use super::{Identity, Role};

/// Records that can be attributed to a department.
pub trait Scoped {
    fn department_id(&self) -> Option<Uuid>;
}

/// Visibility predicate for collection queries.
///
/// `db::scope` renders the same predicate as SQL on each resource type's join path,
/// so the in-memory `filter` is only needed for already-narrowed result sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Departments(BTreeSet<Uuid>),
    Nothing,
}

impl Scope {
    pub fn for_identity(identity: &Identity) -> Self {
        if identity.is_admin() {
            return Scope::All;
        }
        match identity.role {
            Role::Manager | Role::Viewer => Scope::Departments(identity.department_ids.clone()),
            Role::Admin | Role::None => Scope::Nothing,
        }
    }

    /// Whether a record with the given effective department is visible.
    pub fn allows(&self, department_id: Option<Uuid>) -> bool {
        match self {
            Scope::All => true,
            Scope::Departments(ids) => department_id.is_some_and(|id| ids.contains(&id)),
            Scope::Nothing => false,
        }
    }

    pub fn filter<T: Scoped>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items
            .into_iter()
            .filter(|item| self.allows(item.department_id()))
            .collect()
    }
}
