use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{self, AuditAction};
use crate::authz::{Action, Operation, ResourceContext, ResourceType};
use crate::db::{self, scope::effective_department};
use crate::errors::{AppError, AppResult};
use crate::extract::ValidatedJson;
use crate::models::hyperlink::{
    DbHyperLink, HyperLink, HyperLinkCreateRequest, HyperLinkUpdateRequest, HYPERLINK_COLUMNS,
};
use crate::models::ssl_certificate::SslCertificate;
use crate::routes::{authorize, authorize_instance, check_parent, fetch_by_id, fetch_scoped};
use crate::session::CurrentUser;
use crate::ssl;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/hyperlinks",
    tag = "Hyperlinks",
    responses((status = 200, description = "Hyperlinks visible to the caller", body = [HyperLink]))
)]
pub async fn list_hyperlinks(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<HyperLink>>> {
    authorize(&state, &user, ResourceType::HyperLink, Action::List)?;
    let links = fetch_scoped::<DbHyperLink, HyperLink>(
        &state,
        &user,
        ResourceType::HyperLink,
        HYPERLINK_COLUMNS,
        None,
        "l.url",
    )
    .await?;
    Ok(Json(links))
}

#[utoipa::path(
    get,
    path = "/hyperlinks/{id}",
    tag = "Hyperlinks",
    params(("id" = Uuid, Path, description = "Hyperlink id")),
    responses((status = 200, description = "Hyperlink detail", body = HyperLink))
)]
pub async fn get_hyperlink(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<HyperLink>> {
    authorize_instance(&state, &user, ResourceType::HyperLink, Action::View, id).await?;
    let mut conn = state.pool.acquire().await?;
    let link = fetch_by_id::<DbHyperLink, HyperLink>(&mut conn, ResourceType::HyperLink, HYPERLINK_COLUMNS, id).await?;
    Ok(Json(link))
}

#[utoipa::path(
    post,
    path = "/hyperlinks",
    tag = "Hyperlinks",
    request_body = HyperLinkCreateRequest,
    responses(
        (status = 201, description = "Hyperlink created", body = HyperLink),
        (status = 422, description = "Server outside the caller's departments")
    )
)]
pub async fn create_hyperlink(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<HyperLinkCreateRequest>,
) -> AppResult<(StatusCode, Json<HyperLink>)> {
    authorize(&state, &user, ResourceType::HyperLink, Action::Create)?;
    check_parent(&state, &user, ResourceType::Server, payload.server_id, "server").await?;

    let url = payload.url.trim();
    if url.is_empty() {
        return Err(AppError::bad_field("url", "url must not be empty"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();

    let mut tx = db::begin_write(&state.pool).await?;
    sqlx::query(
        "INSERT INTO hyperlinks (id, server_id, url, is_enabled, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(payload.server_id.to_string())
    .bind(url)
    .bind(payload.is_enabled)
    .bind(user.user_id().to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let link = fetch_by_id::<DbHyperLink, HyperLink>(&mut tx, ResourceType::HyperLink, HYPERLINK_COLUMNS, id).await?;
    audit::record(&mut tx, &user.audit_context(), AuditAction::Create, None, Some(&link)).await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(link)))
}

#[utoipa::path(
    put,
    path = "/hyperlinks/{id}",
    tag = "Hyperlinks",
    params(("id" = Uuid, Path, description = "Hyperlink id")),
    request_body = HyperLinkUpdateRequest,
    responses((status = 200, description = "Hyperlink updated", body = HyperLink))
)]
pub async fn update_hyperlink(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<HyperLinkUpdateRequest>,
) -> AppResult<Json<HyperLink>> {
    authorize_instance(&state, &user, ResourceType::HyperLink, Action::Update, id).await?;

    let mut tx = db::begin_write(&state.pool).await?;
    let old = fetch_by_id::<DbHyperLink, HyperLink>(&mut tx, ResourceType::HyperLink, HYPERLINK_COLUMNS, id).await?;

    let mut link = old.clone();
    if let Some(url) = payload.url {
        let url = url.trim();
        if url.is_empty() {
            return Err(AppError::bad_field("url", "url must not be empty"));
        }
        link.url = url.to_string();
    }
    if let Some(is_enabled) = payload.is_enabled {
        link.is_enabled = is_enabled;
    }

    sqlx::query("UPDATE hyperlinks SET url = ?, is_enabled = ?, updated_at = ? WHERE id = ?")
        .bind(&link.url)
        .bind(link.is_enabled)
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

    let new = fetch_by_id::<DbHyperLink, HyperLink>(&mut tx, ResourceType::HyperLink, HYPERLINK_COLUMNS, id).await?;
    audit::record(&mut tx, &user.audit_context(), AuditAction::Update, Some(&old), Some(&new)).await?;
    tx.commit().await?;

    Ok(Json(new))
}

#[utoipa::path(
    delete,
    path = "/hyperlinks/{id}",
    tag = "Hyperlinks",
    params(("id" = Uuid, Path, description = "Hyperlink id")),
    responses((status = 204, description = "Hyperlink and its certificate deleted"))
)]
pub async fn delete_hyperlink(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize_instance(&state, &user, ResourceType::HyperLink, Action::Delete, id).await?;

    let mut tx = db::begin_write(&state.pool).await?;
    let old = fetch_by_id::<DbHyperLink, HyperLink>(&mut tx, ResourceType::HyperLink, HYPERLINK_COLUMNS, id).await?;

    sqlx::query("DELETE FROM hyperlinks WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

    audit::record(&mut tx, &user.audit_context(), AuditAction::Delete, Some(&old), None).await?;
    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Probes the hyperlink's certificate now. Requires update rights on certificates
/// of the hyperlink's department.
#[utoipa::path(
    post,
    path = "/hyperlinks/{id}/check-ssl",
    tag = "Hyperlinks",
    params(("id" = Uuid, Path, description = "Hyperlink id")),
    responses(
        (status = 200, description = "Certificate refreshed", body = SslCertificate),
        (status = 422, description = "URL unreachable or certificate unreadable")
    )
)]
pub async fn check_ssl(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SslCertificate>> {
    let department_id = effective_department(&state.pool, ResourceType::HyperLink, id)
        .await?
        .ok_or_else(|| AppError::not_found("hyperlink not found"))?;

    let ctx = ResourceContext::new(ResourceType::SslCertificate).with_department(department_id);
    state.policy.authorize(
        &user.identity,
        &Operation::new(ResourceType::SslCertificate, Action::Update),
        Some(&ctx),
    )?;

    let mut conn = state.pool.acquire().await?;
    let link = fetch_by_id::<DbHyperLink, HyperLink>(&mut conn, ResourceType::HyperLink, HYPERLINK_COLUMNS, id).await?;
    drop(conn);

    let certificate = ssl::check_one(&state.pool, state.probe.as_ref(), &link, &user.audit_context()).await?;
    Ok(Json(certificate))
}
