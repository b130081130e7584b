use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{self, AuditAction};
use crate::authz::{Action, ResourceType};
use crate::db;
use crate::errors::AppResult;
use crate::extract::ValidatedJson;
use crate::models::service::{DbService, Service, ServiceCreateRequest, ServiceUpdateRequest, SERVICE_COLUMNS};
use crate::routes::{authorize, authorize_instance, check_parent, fetch_by_id, fetch_scoped};
use crate::session::CurrentUser;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/services",
    tag = "Services",
    responses((status = 200, description = "Services visible to the caller", body = [Service]))
)]
pub async fn list_services(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<Service>>> {
    authorize(&state, &user, ResourceType::Service, Action::List)?;
    let services = fetch_scoped::<DbService, Service>(
        &state,
        &user,
        ResourceType::Service,
        SERVICE_COLUMNS,
        None,
        "s.name, sv.name",
    )
    .await?;
    Ok(Json(services))
}

#[utoipa::path(
    get,
    path = "/services/{id}",
    tag = "Services",
    params(("id" = Uuid, Path, description = "Service id")),
    responses((status = 200, description = "Service detail", body = Service))
)]
pub async fn get_service(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Service>> {
    authorize_instance(&state, &user, ResourceType::Service, Action::View, id).await?;
    let mut conn = state.pool.acquire().await?;
    let service = fetch_by_id::<DbService, Service>(&mut conn, ResourceType::Service, SERVICE_COLUMNS, id).await?;
    Ok(Json(service))
}

#[utoipa::path(
    post,
    path = "/services",
    tag = "Services",
    request_body = ServiceCreateRequest,
    responses(
        (status = 201, description = "Service created", body = Service),
        (status = 422, description = "Server outside the caller's departments")
    )
)]
pub async fn create_service(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<ServiceCreateRequest>,
) -> AppResult<(StatusCode, Json<Service>)> {
    authorize(&state, &user, ResourceType::Service, Action::Create)?;
    check_parent(&state, &user, ResourceType::Server, payload.server_id, "server").await?;

    let id = Uuid::new_v4();
    let now = utc_now();

    let mut tx = db::begin_write(&state.pool).await?;
    sqlx::query(
        "INSERT INTO services (id, server_id, name, port, status, last_restart, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(payload.server_id.to_string())
    .bind(&payload.name)
    .bind(payload.port.map(i64::from))
    .bind(payload.status)
    .bind(payload.last_restart)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let service = fetch_by_id::<DbService, Service>(&mut tx, ResourceType::Service, SERVICE_COLUMNS, id).await?;
    audit::record(&mut tx, &user.audit_context(), AuditAction::Create, None, Some(&service)).await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(service)))
}

#[utoipa::path(
    put,
    path = "/services/{id}",
    tag = "Services",
    params(("id" = Uuid, Path, description = "Service id")),
    request_body = ServiceUpdateRequest,
    responses((status = 200, description = "Service updated", body = Service))
)]
pub async fn update_service(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<ServiceUpdateRequest>,
) -> AppResult<Json<Service>> {
    authorize_instance(&state, &user, ResourceType::Service, Action::Update, id).await?;

    let mut tx = db::begin_write(&state.pool).await?;
    let old = fetch_by_id::<DbService, Service>(&mut tx, ResourceType::Service, SERVICE_COLUMNS, id).await?;

    if let Some(server_id) = payload.server_id.filter(|server_id| *server_id != old.server_id) {
        check_parent(&state, &user, ResourceType::Server, server_id, "server").await?;
    }

    let mut service = old.clone();
    if let Some(server_id) = payload.server_id {
        service.server_id = server_id;
    }
    if let Some(name) = payload.name {
        service.name = name;
    }
    if payload.port.is_some() {
        service.port = payload.port;
    }
    if let Some(status) = payload.status {
        service.status = status;
    }
    if payload.last_restart.is_some() {
        service.last_restart = payload.last_restart;
    }

    sqlx::query(
        "UPDATE services SET server_id = ?, name = ?, port = ?, status = ?, last_restart = ?, updated_at = ? WHERE id = ?",
    )
    .bind(service.server_id.to_string())
    .bind(&service.name)
    .bind(service.port.map(i64::from))
    .bind(service.status)
    .bind(service.last_restart)
    .bind(utc_now())
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    let new = fetch_by_id::<DbService, Service>(&mut tx, ResourceType::Service, SERVICE_COLUMNS, id).await?;
    audit::record(&mut tx, &user.audit_context(), AuditAction::Update, Some(&old), Some(&new)).await?;
    tx.commit().await?;

    Ok(Json(new))
}

#[utoipa::path(
    delete,
    path = "/services/{id}",
    tag = "Services",
    params(("id" = Uuid, Path, description = "Service id")),
    responses((status = 204, description = "Service deleted"))
)]
pub async fn delete_service(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize_instance(&state, &user, ResourceType::Service, Action::Delete, id).await?;

    let mut tx = db::begin_write(&state.pool).await?;
    let old = fetch_by_id::<DbService, Service>(&mut tx, ResourceType::Service, SERVICE_COLUMNS, id).await?;

    sqlx::query("DELETE FROM services WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

    audit::record(&mut tx, &user.audit_context(), AuditAction::Delete, Some(&old), None).await?;
    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}
