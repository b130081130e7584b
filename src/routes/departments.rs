use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{self, AuditAction};
use crate::authz::{Action, ResourceType};
use crate::db;
use crate::errors::{AppError, AppResult};
use crate::extract::ValidatedJson;
use crate::models::department::{DbDepartment, Department, DepartmentRequest};
use crate::routes::{authorize, authorize_instance, fetch_by_id, fetch_scoped};
use crate::session::CurrentUser;
use crate::utils::utc_now;

const DEPARTMENT_COLUMNS: &str = "d.id, d.name, d.created_at, d.updated_at";

fn validated_name(payload: &DepartmentRequest) -> AppResult<&str> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_field("name", "name must not be empty"));
    }
    Ok(name)
}

#[utoipa::path(
    get,
    path = "/departments",
    tag = "Departments",
    responses((status = 200, description = "Departments visible to the caller", body = [Department]))
)]
pub async fn list_departments(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<Department>>> {
    authorize(&state, &user, ResourceType::Department, Action::List)?;
    let departments = fetch_scoped::<DbDepartment, Department>(
        &state,
        &user,
        ResourceType::Department,
        DEPARTMENT_COLUMNS,
        None,
        "d.name",
    )
    .await?;
    Ok(Json(departments))
}

#[utoipa::path(
    get,
    path = "/departments/{id}",
    tag = "Departments",
    params(("id" = Uuid, Path, description = "Department id")),
    responses((status = 200, description = "Department detail", body = Department))
)]
pub async fn get_department(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Department>> {
    authorize_instance(&state, &user, ResourceType::Department, Action::View, id).await?;
    let mut conn = state.pool.acquire().await?;
    let department = fetch_by_id::<DbDepartment, Department>(&mut conn, ResourceType::Department, DEPARTMENT_COLUMNS, id).await?;
    Ok(Json(department))
}

#[utoipa::path(
    post,
    path = "/departments",
    tag = "Departments",
    request_body = DepartmentRequest,
    responses(
        (status = 201, description = "Department created", body = Department),
        (status = 409, description = "Name already in use")
    )
)]
pub async fn create_department(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<DepartmentRequest>,
) -> AppResult<(StatusCode, Json<Department>)> {
    authorize(&state, &user, ResourceType::Department, Action::Create)?;
    let name = validated_name(&payload)?;

    let id = Uuid::new_v4();
    let now = utc_now();

    let mut tx = db::begin_write(&state.pool).await?;
    sqlx::query("INSERT INTO departments (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
        .bind(id.to_string())
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|err| AppError::unique_violation(err, "department name already in use"))?;

    let department = fetch_by_id::<DbDepartment, Department>(&mut tx, ResourceType::Department, DEPARTMENT_COLUMNS, id).await?;
    audit::record(&mut tx, &user.audit_context(), AuditAction::Create, None, Some(&department)).await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(department)))
}

#[utoipa::path(
    put,
    path = "/departments/{id}",
    tag = "Departments",
    params(("id" = Uuid, Path, description = "Department id")),
    request_body = DepartmentRequest,
    responses((status = 200, description = "Department updated", body = Department))
)]
pub async fn update_department(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<DepartmentRequest>,
) -> AppResult<Json<Department>> {
    authorize_instance(&state, &user, ResourceType::Department, Action::Update, id).await?;
    let name = validated_name(&payload)?;

    let mut tx = db::begin_write(&state.pool).await?;
    let old = fetch_by_id::<DbDepartment, Department>(&mut tx, ResourceType::Department, DEPARTMENT_COLUMNS, id).await?;

    sqlx::query("UPDATE departments SET name = ?, updated_at = ? WHERE id = ?")
        .bind(name)
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|err| AppError::unique_violation(err, "department name already in use"))?;

    let new = fetch_by_id::<DbDepartment, Department>(&mut tx, ResourceType::Department, DEPARTMENT_COLUMNS, id).await?;
    audit::record(&mut tx, &user.audit_context(), AuditAction::Update, Some(&old), Some(&new)).await?;
    tx.commit().await?;

    Ok(Json(new))
}

#[utoipa::path(
    delete,
    path = "/departments/{id}",
    tag = "Departments",
    params(("id" = Uuid, Path, description = "Department id")),
    responses((status = 204, description = "Department deleted; its records become unassigned"))
)]
pub async fn delete_department(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize_instance(&state, &user, ResourceType::Department, Action::Delete, id).await?;

    let mut tx = db::begin_write(&state.pool).await?;
    let old = fetch_by_id::<DbDepartment, Department>(&mut tx, ResourceType::Department, DEPARTMENT_COLUMNS, id).await?;

    sqlx::query("DELETE FROM departments WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

    audit::record(&mut tx, &user.audit_context(), AuditAction::Delete, Some(&old), None).await?;
    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}
