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
use crate::models::vm::{
    DbVirtualMachine, VirtualMachine, VirtualMachineCreateRequest, VirtualMachineUpdateRequest, VM_COLUMNS,
};
use crate::routes::{authorize, authorize_instance, check_parent, fetch_by_id, fetch_scoped};
use crate::session::CurrentUser;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/vms",
    tag = "Virtual Machines",
    responses((status = 200, description = "Virtual machines visible to the caller", body = [VirtualMachine]))
)]
pub async fn list_vms(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<VirtualMachine>>> {
    authorize(&state, &user, ResourceType::VirtualMachine, Action::List)?;
    let vms = fetch_scoped::<DbVirtualMachine, VirtualMachine>(
        &state,
        &user,
        ResourceType::VirtualMachine,
        VM_COLUMNS,
        None,
        "h.hostname, vm.name",
    )
    .await?;
    Ok(Json(vms))
}

#[utoipa::path(
    get,
    path = "/vms/{id}",
    tag = "Virtual Machines",
    params(("id" = Uuid, Path, description = "Virtual machine id")),
    responses((status = 200, description = "Virtual machine detail", body = VirtualMachine))
)]
pub async fn get_vm(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<VirtualMachine>> {
    authorize_instance(&state, &user, ResourceType::VirtualMachine, Action::View, id).await?;
    let mut conn = state.pool.acquire().await?;
    let vm = fetch_by_id::<DbVirtualMachine, VirtualMachine>(&mut conn, ResourceType::VirtualMachine, VM_COLUMNS, id)
        .await?;
    Ok(Json(vm))
}

#[utoipa::path(
    post,
    path = "/vms",
    tag = "Virtual Machines",
    request_body = VirtualMachineCreateRequest,
    responses(
        (status = 201, description = "Virtual machine created", body = VirtualMachine),
        (status = 422, description = "Host outside the caller's departments")
    )
)]
pub async fn create_vm(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<VirtualMachineCreateRequest>,
) -> AppResult<(StatusCode, Json<VirtualMachine>)> {
    authorize(&state, &user, ResourceType::VirtualMachine, Action::Create)?;
    check_parent(&state, &user, ResourceType::Host, payload.host_id, "host").await?;

    let id = Uuid::new_v4();
    let now = utc_now();

    let mut tx = db::begin_write(&state.pool).await?;
    sqlx::query(
        "INSERT INTO virtual_machines (id, host_id, name, vm_id, guest_os, status, assigned_cpu, assigned_ram, ip_address, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(payload.host_id.to_string())
    .bind(&payload.name)
    .bind(&payload.vm_id)
    .bind(&payload.guest_os)
    .bind(payload.status)
    .bind(&payload.assigned_cpu)
    .bind(&payload.assigned_ram)
    .bind(&payload.ip_address)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let vm =
        fetch_by_id::<DbVirtualMachine, VirtualMachine>(&mut tx, ResourceType::VirtualMachine, VM_COLUMNS, id).await?;
    audit::record(&mut tx, &user.audit_context(), AuditAction::Create, None, Some(&vm)).await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(vm)))
}

#[utoipa::path(
    put,
    path = "/vms/{id}",
    tag = "Virtual Machines",
    params(("id" = Uuid, Path, description = "Virtual machine id")),
    request_body = VirtualMachineUpdateRequest,
    responses((status = 200, description = "Virtual machine updated", body = VirtualMachine))
)]
pub async fn update_vm(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<VirtualMachineUpdateRequest>,
) -> AppResult<Json<VirtualMachine>> {
    authorize_instance(&state, &user, ResourceType::VirtualMachine, Action::Update, id).await?;

    let mut tx = db::begin_write(&state.pool).await?;
    let old =
        fetch_by_id::<DbVirtualMachine, VirtualMachine>(&mut tx, ResourceType::VirtualMachine, VM_COLUMNS, id).await?;

    if let Some(host_id) = payload.host_id.filter(|host_id| *host_id != old.host_id) {
        check_parent(&state, &user, ResourceType::Host, host_id, "host").await?;
    }

    let mut vm = old.clone();
    if let Some(host_id) = payload.host_id {
        vm.host_id = host_id;
    }
    if let Some(name) = payload.name {
        vm.name = name;
    }
    if let Some(vm_id) = payload.vm_id {
        vm.vm_id = vm_id;
    }
    if let Some(guest_os) = payload.guest_os {
        vm.guest_os = guest_os;
    }
    if let Some(status) = payload.status {
        vm.status = status;
    }
    if let Some(assigned_cpu) = payload.assigned_cpu {
        vm.assigned_cpu = assigned_cpu;
    }
    if let Some(assigned_ram) = payload.assigned_ram {
        vm.assigned_ram = assigned_ram;
    }
    if payload.ip_address.is_some() {
        vm.ip_address = payload.ip_address;
    }

    sqlx::query(
        "UPDATE virtual_machines SET host_id = ?, name = ?, vm_id = ?, guest_os = ?, status = ?, assigned_cpu = ?, assigned_ram = ?, ip_address = ?, updated_at = ? WHERE id = ?",
    )
    .bind(vm.host_id.to_string())
    .bind(&vm.name)
    .bind(&vm.vm_id)
    .bind(&vm.guest_os)
    .bind(vm.status)
    .bind(&vm.assigned_cpu)
    .bind(&vm.assigned_ram)
    .bind(&vm.ip_address)
    .bind(utc_now())
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    let new =
        fetch_by_id::<DbVirtualMachine, VirtualMachine>(&mut tx, ResourceType::VirtualMachine, VM_COLUMNS, id).await?;
    audit::record(&mut tx, &user.audit_context(), AuditAction::Update, Some(&old), Some(&new)).await?;
    tx.commit().await?;

    Ok(Json(new))
}

#[utoipa::path(
    delete,
    path = "/vms/{id}",
    tag = "Virtual Machines",
    params(("id" = Uuid, Path, description = "Virtual machine id")),
    responses((status = 204, description = "Virtual machine deleted"))
)]
pub async fn delete_vm(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize_instance(&state, &user, ResourceType::VirtualMachine, Action::Delete, id).await?;

    let mut tx = db::begin_write(&state.pool).await?;
    let old =
        fetch_by_id::<DbVirtualMachine, VirtualMachine>(&mut tx, ResourceType::VirtualMachine, VM_COLUMNS, id).await?;

    sqlx::query("DELETE FROM virtual_machines WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

    audit::record(&mut tx, &user.audit_context(), AuditAction::Delete, Some(&old), None).await?;
    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}
