use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{self, AuditAction};
use crate::authz::{Action, ResourceType};
use crate::db::{self, scope::effective_department};
use crate::errors::{AppError, AppResult};
use crate::extract::ValidatedJson;
use crate::models::server_update::{
    DbServerUpdate, ServerUpdate, ServerUpdateCreateRequest, SERVER_UPDATE_COLUMNS,
};
use crate::routes::{authorize, authorize_instance, check_parent, fetch_by_id, fetch_scoped};
use crate::session::CurrentUser;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/servers/{id}/updates",
    tag = "Servers",
    params(("id" = Uuid, Path, description = "Server id")),
    responses((status = 200, description = "Maintenance history of the server", body = [ServerUpdate]))
)]
pub async fn list_server_updates(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(server_id): Path<Uuid>,
) -> AppResult<Json<Vec<ServerUpdate>>> {
    authorize_instance(&state, &user, ResourceType::Server, Action::View, server_id).await?;
    authorize(&state, &user, ResourceType::ServerUpdate, Action::List)?;

    let updates = fetch_scoped::<DbServerUpdate, ServerUpdate>(
        &state,
        &user,
        ResourceType::ServerUpdate,
        SERVER_UPDATE_COLUMNS,
        Some(("u.server_id", server_id)),
        "u.update_time DESC",
    )
    .await?;
    Ok(Json(updates))
}

#[utoipa::path(
    post,
    path = "/servers/{id}/updates",
    tag = "Servers",
    params(("id" = Uuid, Path, description = "Server id")),
    request_body = ServerUpdateCreateRequest,
    responses(
        (status = 201, description = "Update recorded", body = ServerUpdate),
        (status = 404, description = "Server not found"),
        (status = 422, description = "Server outside the caller's departments")
    )
)]
pub async fn create_server_update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(server_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<ServerUpdateCreateRequest>,
) -> AppResult<(StatusCode, Json<ServerUpdate>)> {
    authorize(&state, &user, ResourceType::ServerUpdate, Action::Create)?;
    // path parameter, so absence is a 404
    if effective_department(&state.pool, ResourceType::Server, server_id).await?.is_none() {
        return Err(AppError::not_found("server not found"));
    }
    check_parent(&state, &user, ResourceType::Server, server_id, "server").await?;

    let id = Uuid::new_v4();
    let mut tx = db::begin_write(&state.pool).await?;
    sqlx::query(
        "INSERT INTO server_updates (id, server_id, update_type, notes, updated_by, update_time) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(server_id.to_string())
    .bind(&payload.update_type)
    .bind(&payload.notes)
    .bind(user.user_id().to_string())
    .bind(payload.update_time.unwrap_or_else(utc_now))
    .execute(&mut *tx)
    .await?;

    let update = fetch_by_id::<DbServerUpdate, ServerUpdate>(
        &mut tx,
        ResourceType::ServerUpdate,
        SERVER_UPDATE_COLUMNS,
        id,
    )
    .await?;
    audit::record(&mut tx, &user.audit_context(), AuditAction::Create, None, Some(&update)).await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(update)))
}
