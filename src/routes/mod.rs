use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{validate_assignment, Action, Operation, ResourceContext, ResourceType, Scoped};
use crate::db::scope::{effective_department, join_path, push_scope};
use crate::errors::{AppError, AppResult};
use crate::session::CurrentUser;

pub mod audit_log;
pub mod auth;
pub mod dashboard;
pub mod departments;
pub mod health;
pub mod hosts;
pub mod hyperlinks;
pub mod server_updates;
pub mod servers;
pub mod services;
pub mod ssl_certificates;
pub mod users;
pub mod vms;

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

fn display_name(resource_type: ResourceType) -> String {
    resource_type.as_str().replace('_', " ")
}

/// Checks an operation against a concrete record, returning its effective department.
///
/// Missing records are reported as not found before any policy decision is made.
pub(crate) async fn authorize_instance(
    state: &AppState,
    user: &CurrentUser,
    resource_type: ResourceType,
    action: Action,
    id: Uuid,
) -> AppResult<Option<Uuid>> {
    let department_id = effective_department(&state.pool, resource_type, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("{} not found", display_name(resource_type))))?;

    let ctx = ResourceContext::new(resource_type)
        .with_resource(id)
        .with_department(department_id);
    state
        .policy
        .authorize(&user.identity, &Operation::new(resource_type, action), Some(&ctx))?;

    Ok(department_id)
}

pub(crate) fn authorize(
    state: &AppState,
    user: &CurrentUser,
    resource_type: ResourceType,
    action: Action,
) -> AppResult<()> {
    state
        .policy
        .authorize(&user.identity, &Operation::new(resource_type, action), None)?;
    Ok(())
}

/// Validates that a parent record exists and lies within the caller's departments.
pub(crate) async fn check_parent(
    state: &AppState,
    user: &CurrentUser,
    parent_type: ResourceType,
    parent_id: Uuid,
    field: &str,
) -> AppResult<Option<Uuid>> {
    let department_id = effective_department(&state.pool, parent_type, parent_id)
        .await?
        .ok_or_else(|| AppError::integrity(field, format!("{} does not exist", display_name(parent_type))))?;
    validate_assignment(&user.identity, department_id, field)?;
    Ok(department_id)
}

/// Lists records of a type visible to the caller, optionally narrowed to one parent.
pub(crate) async fn fetch_scoped<R, T>(
    state: &AppState,
    user: &CurrentUser,
    resource_type: ResourceType,
    columns: &str,
    parent: Option<(&str, Uuid)>,
    order_by: &str,
) -> AppResult<Vec<T>>
where
    R: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    T: TryFrom<R, Error = AppError> + Scoped,
{
    let path = join_path(resource_type)
        .ok_or_else(|| AppError::internal(format!("{resource_type} has no department path")))?;
    let scope = state.policy.scope(&user.identity, resource_type);

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {columns} FROM {} WHERE 1 = 1", path.from));
    if let Some((column, id)) = parent {
        qb.push(format!(" AND {column} = ")).push_bind(id.to_string());
    }
    push_scope(&mut qb, &scope, path.department_column);
    qb.push(format!(" ORDER BY {order_by}"));

    let rows = qb.build_query_as::<R>().fetch_all(&state.pool).await?;
    let items = rows.into_iter().map(T::try_from).collect::<AppResult<Vec<T>>>()?;
    Ok(scope.filter(items))
}

/// Loads one record by id through the type's join path, without scope narrowing.
pub(crate) async fn fetch_by_id<R, T>(
    conn: &mut SqliteConnection,
    resource_type: ResourceType,
    columns: &str,
    id: Uuid,
) -> AppResult<T>
where
    R: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    T: TryFrom<R, Error = AppError>,
{
    let path = join_path(resource_type)
        .ok_or_else(|| AppError::internal(format!("{resource_type} has no department path")))?;

    let row = sqlx::query_as::<_, R>(&format!(
        "SELECT {columns} FROM {} WHERE {}.id = ?",
        path.from, path.alias
    ))
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found(format!("{} not found", display_name(resource_type))))?;

    T::try_from(row)
}

pub(crate) async fn ensure_owner(state: &AppState, owner_id: Option<Uuid>) -> AppResult<()> {
    let Some(owner_id) = owner_id else {
        return Ok(());
    };
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
        .bind(owner_id.to_string())
        .fetch_optional(&state.pool)
        .await?;
    if exists.is_none() {
        return Err(AppError::bad_field("owner_id", "owner does not exist"));
    }
    Ok(())
}

/// Maps foreign key failures on user-supplied references to a field error.
pub(crate) fn reference_error(err: sqlx::Error, field: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            AppError::bad_field(field, format!("referenced {field} does not exist"))
        }
        _ => AppError::Database(err),
    }
}
