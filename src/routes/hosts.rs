use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{self, AuditAction};
use crate::authz::{validate_assignment, Action, ResourceType};
use crate::db;
use crate::errors::AppResult;
use crate::extract::ValidatedJson;
use crate::models::host::{DbHost, Host, HostCreateRequest, HostUpdateRequest, HOST_COLUMNS};
use crate::models::vm::{DbVirtualMachine, VirtualMachine, VM_COLUMNS};
use crate::routes::{authorize, authorize_instance, ensure_owner, fetch_by_id, fetch_scoped, reference_error};
use crate::session::CurrentUser;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/hosts",
    tag = "Hosts",
    responses((status = 200, description = "Hosts visible to the caller", body = [Host]))
)]
pub async fn list_hosts(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<Host>>> {
    authorize(&state, &user, ResourceType::Host, Action::List)?;
    let hosts =
        fetch_scoped::<DbHost, Host>(&state, &user, ResourceType::Host, HOST_COLUMNS, None, "h.hostname").await?;
    Ok(Json(hosts))
}

#[utoipa::path(
    get,
    path = "/hosts/{id}",
    tag = "Hosts",
    params(("id" = Uuid, Path, description = "Host id")),
    responses((status = 200, description = "Host detail", body = Host))
)]
pub async fn get_host(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Host>> {
    authorize_instance(&state, &user, ResourceType::Host, Action::View, id).await?;
    let mut conn = state.pool.acquire().await?;
    let host = fetch_by_id::<DbHost, Host>(&mut conn, ResourceType::Host, HOST_COLUMNS, id).await?;
    Ok(Json(host))
}

#[utoipa::path(
    get,
    path = "/hosts/{id}/vms",
    tag = "Hosts",
    params(("id" = Uuid, Path, description = "Host id")),
    responses((status = 200, description = "Virtual machines running on the host", body = [VirtualMachine]))
)]
pub async fn list_host_vms(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<VirtualMachine>>> {
    authorize_instance(&state, &user, ResourceType::Host, Action::View, id).await?;
    authorize(&state, &user, ResourceType::VirtualMachine, Action::List)?;

    let vms = fetch_scoped::<DbVirtualMachine, VirtualMachine>(
        &state,
        &user,
        ResourceType::VirtualMachine,
        VM_COLUMNS,
        Some(("vm.host_id", id)),
        "vm.name",
    )
    .await?;
    Ok(Json(vms))
}

#[utoipa::path(
    post,
    path = "/hosts",
    tag = "Hosts",
    request_body = HostCreateRequest,
    responses(
        (status = 201, description = "Host created", body = Host),
        (status = 422, description = "Department outside the caller's departments")
    )
)]
pub async fn create_host(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<HostCreateRequest>,
) -> AppResult<(StatusCode, Json<Host>)> {
    authorize(&state, &user, ResourceType::Host, Action::Create)?;
    validate_assignment(&user.identity, payload.department_id, "department")?;
    ensure_owner(&state, payload.owner_id).await?;

    let id = Uuid::new_v4();
    let now = utc_now();

    let mut tx = db::begin_write(&state.pool).await?;
    sqlx::query(
        "INSERT INTO hosts (id, hostname, ip_address, status, total_cpu, total_ram, hyperv_version, department_id, owner_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&payload.hostname)
    .bind(&payload.ip_address)
    .bind(payload.status)
    .bind(&payload.total_cpu)
    .bind(&payload.total_ram)
    .bind(&payload.hyperv_version)
    .bind(payload.department_id.map(|id| id.to_string()))
    .bind(payload.owner_id.map(|id| id.to_string()))
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|err| reference_error(err, "department_id"))?;

    let host = fetch_by_id::<DbHost, Host>(&mut tx, ResourceType::Host, HOST_COLUMNS, id).await?;
    audit::record(&mut tx, &user.audit_context(), AuditAction::Create, None, Some(&host)).await?;
    tx.commit().await?;

    tracing::info!(host_id = %host.id, hostname = %host.hostname, "host created");

    Ok((StatusCode::CREATED, Json(host)))
}

#[utoipa::path(
    put,
    path = "/hosts/{id}",
    tag = "Hosts",
    params(("id" = Uuid, Path, description = "Host id")),
    request_body = HostUpdateRequest,
    responses((status = 200, description = "Host updated", body = Host))
)]
pub async fn update_host(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<HostUpdateRequest>,
) -> AppResult<Json<Host>> {
    let current_department = authorize_instance(&state, &user, ResourceType::Host, Action::Update, id).await?;
    if payload.department_id.is_some() && payload.department_id != current_department {
        validate_assignment(&user.identity, payload.department_id, "department")?;
    }
    ensure_owner(&state, payload.owner_id).await?;

    let mut tx = db::begin_write(&state.pool).await?;
    let old = fetch_by_id::<DbHost, Host>(&mut tx, ResourceType::Host, HOST_COLUMNS, id).await?;

    let mut host = old.clone();
    if let Some(hostname) = payload.hostname {
        host.hostname = hostname;
    }
    if let Some(ip_address) = payload.ip_address {
        host.ip_address = ip_address;
    }
    if let Some(status) = payload.status {
        host.status = status;
    }
    if let Some(total_cpu) = payload.total_cpu {
        host.total_cpu = total_cpu;
    }
    if let Some(total_ram) = payload.total_ram {
        host.total_ram = total_ram;
    }
    if let Some(hyperv_version) = payload.hyperv_version {
        host.hyperv_version = hyperv_version;
    }
    if payload.department_id.is_some() {
        host.department_id = payload.department_id;
    }
    if payload.owner_id.is_some() {
        host.owner_id = payload.owner_id;
    }

    sqlx::query(
        "UPDATE hosts SET hostname = ?, ip_address = ?, status = ?, total_cpu = ?, total_ram = ?, hyperv_version = ?, department_id = ?, owner_id = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&host.hostname)
    .bind(&host.ip_address)
    .bind(host.status)
    .bind(&host.total_cpu)
    .bind(&host.total_ram)
    .bind(&host.hyperv_version)
    .bind(host.department_id.map(|id| id.to_string()))
    .bind(host.owner_id.map(|id| id.to_string()))
    .bind(utc_now())
    .bind(id.to_string())
    .execute(&mut *tx)
    .await
    .map_err(|err| reference_error(err, "department_id"))?;

    let new = fetch_by_id::<DbHost, Host>(&mut tx, ResourceType::Host, HOST_COLUMNS, id).await?;
    audit::record(&mut tx, &user.audit_context(), AuditAction::Update, Some(&old), Some(&new)).await?;
    tx.commit().await?;

    Ok(Json(new))
}

#[utoipa::path(
    delete,
    path = "/hosts/{id}",
    tag = "Hosts",
    params(("id" = Uuid, Path, description = "Host id")),
    responses((status = 204, description = "Host and its virtual machines deleted"))
)]
pub async fn delete_host(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize_instance(&state, &user, ResourceType::Host, Action::Delete, id).await?;

    let mut tx = db::begin_write(&state.pool).await?;
    let old = fetch_by_id::<DbHost, Host>(&mut tx, ResourceType::Host, HOST_COLUMNS, id).await?;

    sqlx::query("DELETE FROM hosts WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

    audit::record(&mut tx, &user.audit_context(), AuditAction::Delete, Some(&old), None).await?;
    tx.commit().await?;

    tracing::info!(host_id = %id, "host deleted");

    Ok(StatusCode::NO_CONTENT)
}
