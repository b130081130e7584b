use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{self, AuditAction};
use crate::authz::{validate_assignment, Action, ResourceType};
use crate::db::{self, scope::push_scope};
use crate::errors::{AppError, AppResult};
use crate::extract::ValidatedJson;
use crate::models::server::{
    DbServer, Server, ServerCreateRequest, ServerListQuery, ServerPage, ServerUpdateRequest,
    DEFAULT_PAGE_SIZE, PAGE_SIZES, SERVER_COLUMNS,
};
use crate::routes::{authorize, authorize_instance, ensure_owner, fetch_by_id, reference_error};
use crate::session::CurrentUser;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/servers",
    tag = "Servers",
    params(ServerListQuery),
    responses((status = 200, description = "Page of servers visible to the caller", body = ServerPage))
)]
pub async fn list_servers(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ServerListQuery>,
) -> AppResult<Json<ServerPage>> {
    authorize(&state, &user, ResourceType::Server, Action::List)?;

    let per_page = query.per_page.unwrap_or(DEFAULT_PAGE_SIZE);
    if !PAGE_SIZES.contains(&per_page) {
        return Err(AppError::bad_field("per_page", "per_page must be one of 10, 25, 50, 100"));
    }
    let page = query.page.unwrap_or(1).max(1);
    let scope = state.policy.scope(&user.identity, ResourceType::Server);

    let mut count: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(1) FROM servers s WHERE 1 = 1");
    push_scope(&mut count, &scope, "s.department_id");
    let total = count.build_query_scalar::<i64>().fetch_one(&state.pool).await?;

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {SERVER_COLUMNS} FROM servers s WHERE 1 = 1"));
    push_scope(&mut qb, &scope, "s.department_id");
    qb.push(" ORDER BY s.name, s.id LIMIT ")
        .push_bind(i64::from(per_page))
        .push(" OFFSET ")
        .push_bind(i64::from(page - 1) * i64::from(per_page));

    let items = qb
        .build_query_as::<DbServer>()
        .fetch_all(&state.pool)
        .await?
        .into_iter()
        .map(Server::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let total_pages = ((total + i64::from(per_page) - 1) / i64::from(per_page)) as u32;

    Ok(Json(ServerPage {
        items,
        page,
        per_page,
        total,
        total_pages,
    }))
}

#[utoipa::path(
    get,
    path = "/servers/{id}",
    tag = "Servers",
    params(("id" = Uuid, Path, description = "Server id")),
    responses((status = 200, description = "Server detail", body = Server))
)]
pub async fn get_server(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Server>> {
    authorize_instance(&state, &user, ResourceType::Server, Action::View, id).await?;
    let mut conn = state.pool.acquire().await?;
    let server = fetch_by_id::<DbServer, Server>(&mut conn, ResourceType::Server, SERVER_COLUMNS, id).await?;
    Ok(Json(server))
}

#[utoipa::path(
    post,
    path = "/servers",
    tag = "Servers",
    request_body = ServerCreateRequest,
    responses(
        (status = 201, description = "Server created", body = Server),
        (status = 422, description = "Department outside the caller's departments")
    )
)]
pub async fn create_server(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<ServerCreateRequest>,
) -> AppResult<(StatusCode, Json<Server>)> {
    authorize(&state, &user, ResourceType::Server, Action::Create)?;
    validate_assignment(&user.identity, payload.department_id, "department")?;
    ensure_owner(&state, payload.owner_id).await?;

    let id = Uuid::new_v4();
    let now = utc_now();

    let mut tx = db::begin_write(&state.pool).await?;
    sqlx::query(
        "INSERT INTO servers (id, name, ip_address, os, cpu, memory, disk, location, department_id, owner_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&payload.name)
    .bind(&payload.ip_address)
    .bind(&payload.os)
    .bind(&payload.cpu)
    .bind(&payload.memory)
    .bind(&payload.disk)
    .bind(&payload.location)
    .bind(payload.department_id.map(|id| id.to_string()))
    .bind(payload.owner_id.map(|id| id.to_string()))
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|err| reference_error(err, "department_id"))?;

    let server = fetch_by_id::<DbServer, Server>(&mut tx, ResourceType::Server, SERVER_COLUMNS, id).await?;
    audit::record(&mut tx, &user.audit_context(), AuditAction::Create, None, Some(&server)).await?;
    tx.commit().await?;

    tracing::info!(server_id = %server.id, name = %server.name, "server created");

    Ok((StatusCode::CREATED, Json(server)))
}

#[utoipa::path(
    put,
    path = "/servers/{id}",
    tag = "Servers",
    params(("id" = Uuid, Path, description = "Server id")),
    request_body = ServerUpdateRequest,
    responses((status = 200, description = "Server updated", body = Server))
)]
pub async fn update_server(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<ServerUpdateRequest>,
) -> AppResult<Json<Server>> {
    let current_department = authorize_instance(&state, &user, ResourceType::Server, Action::Update, id).await?;
    if payload.department_id.is_some() && payload.department_id != current_department {
        validate_assignment(&user.identity, payload.department_id, "department")?;
    }
    ensure_owner(&state, payload.owner_id).await?;

    let mut tx = db::begin_write(&state.pool).await?;
    let old = fetch_by_id::<DbServer, Server>(&mut tx, ResourceType::Server, SERVER_COLUMNS, id).await?;

    let mut server = old.clone();
    if let Some(name) = payload.name {
        server.name = name;
    }
    if let Some(ip_address) = payload.ip_address {
        server.ip_address = ip_address;
    }
    if let Some(os) = payload.os {
        server.os = os;
    }
    if let Some(cpu) = payload.cpu {
        server.cpu = cpu;
    }
    if let Some(memory) = payload.memory {
        server.memory = memory;
    }
    if let Some(disk) = payload.disk {
        server.disk = disk;
    }
    if let Some(location) = payload.location {
        server.location = location;
    }
    if payload.department_id.is_some() {
        server.department_id = payload.department_id;
    }
    if payload.owner_id.is_some() {
        server.owner_id = payload.owner_id;
    }

    sqlx::query(
        "UPDATE servers SET name = ?, ip_address = ?, os = ?, cpu = ?, memory = ?, disk = ?, location = ?, department_id = ?, owner_id = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&server.name)
    .bind(&server.ip_address)
    .bind(&server.os)
    .bind(&server.cpu)
    .bind(&server.memory)
    .bind(&server.disk)
    .bind(&server.location)
    .bind(server.department_id.map(|id| id.to_string()))
    .bind(server.owner_id.map(|id| id.to_string()))
    .bind(utc_now())
    .bind(id.to_string())
    .execute(&mut *tx)
    .await
    .map_err(|err| reference_error(err, "department_id"))?;

    let new = fetch_by_id::<DbServer, Server>(&mut tx, ResourceType::Server, SERVER_COLUMNS, id).await?;
    audit::record(&mut tx, &user.audit_context(), AuditAction::Update, Some(&old), Some(&new)).await?;
    tx.commit().await?;

    Ok(Json(new))
}

#[utoipa::path(
    delete,
    path = "/servers/{id}",
    tag = "Servers",
    params(("id" = Uuid, Path, description = "Server id")),
    responses((status = 204, description = "Server deleted"))
)]
pub async fn delete_server(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize_instance(&state, &user, ResourceType::Server, Action::Delete, id).await?;

    let mut tx = db::begin_write(&state.pool).await?;
    let old = fetch_by_id::<DbServer, Server>(&mut tx, ResourceType::Server, SERVER_COLUMNS, id).await?;

    sqlx::query("DELETE FROM servers WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

    audit::record(&mut tx, &user.audit_context(), AuditAction::Delete, Some(&old), None).await?;
    tx.commit().await?;

    tracing::info!(server_id = %id, "server deleted");

    Ok(StatusCode::NO_CONTENT)
}
