//! SQL rendering of collection scopes
//!
//! Every inventory record reaches its department through a fixed join path. Queries
//! over a resource type select `FROM <path.from>` and narrow with [`push_scope`] on
//! `path.department_column`.

use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::authz::{ResourceType, Scope};
use crate::errors::AppResult;
use crate::utils::parse_opt_uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinPath {
    /// FROM clause, including joins up to the department owner
    pub from: &'static str,
    /// Alias of the resource's own table
    pub alias: &'static str,
    pub department_column: &'static str,
}

pub fn join_path(resource_type: ResourceType) -> Option<JoinPath> {
    let path = match resource_type {
        ResourceType::Department => JoinPath {
            from: "departments d",
            alias: "d",
            department_column: "d.id",
        },
        ResourceType::Server => JoinPath {
            from: "servers s",
            alias: "s",
            department_column: "s.department_id",
        },
        ResourceType::Host => JoinPath {
            from: "hosts h",
            alias: "h",
            department_column: "h.department_id",
        },
        ResourceType::VirtualMachine => JoinPath {
            from: "virtual_machines vm JOIN hosts h ON h.id = vm.host_id",
            alias: "vm",
            department_column: "h.department_id",
        },
        ResourceType::Service => JoinPath {
            from: "services sv JOIN servers s ON s.id = sv.server_id",
            alias: "sv",
            department_column: "s.department_id",
        },
        ResourceType::HyperLink => JoinPath {
            from: "hyperlinks l JOIN servers s ON s.id = l.server_id",
            alias: "l",
            department_column: "s.department_id",
        },
        ResourceType::ServerUpdate => JoinPath {
            from: "server_updates u JOIN servers s ON s.id = u.server_id",
            alias: "u",
            department_column: "s.department_id",
        },
        ResourceType::SslCertificate => JoinPath {
            from: "ssl_certificates c JOIN hyperlinks l ON l.id = c.hyperlink_id JOIN servers s ON s.id = l.server_id",
            alias: "c",
            department_column: "s.department_id",
        },
        ResourceType::User | ResourceType::AuditLog => return None,
    };
    Some(path)
}

/// Appends ` AND <column> IN (...)` for the scope. Expects a preceding WHERE clause.
pub fn push_scope(qb: &mut QueryBuilder<'_, Sqlite>, scope: &Scope, column: &str) {
    match scope {
        Scope::All => {}
        Scope::Departments(ids) if !ids.is_empty() => {
            qb.push(" AND ").push(column).push(" IN (");
            let mut separated = qb.separated(", ");
            for id in ids {
                separated.push_bind(id.to_string());
            }
            separated.push_unseparated(")");
        }
        Scope::Departments(_) | Scope::Nothing => {
            qb.push(" AND 1 = 0");
        }
    }
}

/// Resolves the effective department of a record through its join path.
///
/// Returns `None` when the record does not exist and `Some(None)` for unscoped records.
pub async fn effective_department(
    pool: &SqlitePool,
    resource_type: ResourceType,
    id: Uuid,
) -> AppResult<Option<Option<Uuid>>> {
    let Some(path) = join_path(resource_type) else {
        return Ok(None);
    };

    let sql = format!(
        "SELECT {} FROM {} WHERE {}.id = ?",
        path.department_column, path.from, path.alias
    );
    let row: Option<(Option<String>,)> = sqlx::query_as(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|(department_id,)| parse_opt_uuid(department_id.as_deref()))
        .transpose()
}
