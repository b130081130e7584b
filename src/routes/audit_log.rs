use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{self, AuditAction, AuditLogEntry, ChainReport, DbAuditLogEntry, AUDIT_COLUMNS};
use crate::authz::{Action, ResourceType};
use crate::errors::{AppError, AppResult};
use crate::routes::authorize;
use crate::session::CurrentUser;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditLogQuery {
    /// CREATE, UPDATE, DELETE, LOGIN or LOGOUT
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub actor_id: Option<Uuid>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Newest entries first.
#[utoipa::path(
    get,
    path = "/audit-log",
    tag = "Audit Log",
    params(AuditLogQuery),
    responses(
        (status = 200, description = "Audit entries", body = [AuditLogEntry]),
        (status = 403, description = "Admin only")
    )
)]
pub async fn list_entries(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<AuditLogQuery>,
) -> AppResult<Json<Vec<AuditLogEntry>>> {
    authorize(&state, &user, ResourceType::AuditLog, Action::List)?;

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(AppError::bad_field("limit", format!("limit must be between 1 and {MAX_LIMIT}")));
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {AUDIT_COLUMNS} FROM audit_log WHERE 1 = 1"));
    if let Some(action) = query.action.as_deref() {
        let action = AuditAction::parse(action)
            .ok_or_else(|| AppError::bad_field("action", format!("unknown audit action: {action}")))?;
        qb.push(" AND action = ").push_bind(action.as_str());
    }
    if let Some(resource_type) = query.resource_type {
        qb.push(" AND resource_type = ").push_bind(resource_type);
    }
    if let Some(actor_id) = query.actor_id {
        qb.push(" AND actor_id = ").push_bind(actor_id.to_string());
    }
    qb.push(" ORDER BY seq DESC LIMIT ")
        .push_bind(i64::from(limit))
        .push(" OFFSET ")
        .push_bind(i64::from(query.offset.unwrap_or(0)));

    let entries = qb
        .build_query_as::<DbAuditLogEntry>()
        .fetch_all(&state.pool)
        .await?
        .into_iter()
        .map(AuditLogEntry::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(entries))
}

#[utoipa::path(
    get,
    path = "/audit-log/verify",
    tag = "Audit Log",
    responses(
        (status = 200, description = "Hash chain verification result", body = ChainReport),
        (status = 403, description = "Admin only")
    )
)]
pub async fn verify(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<ChainReport>> {
    authorize(&state, &user, ResourceType::AuditLog, Action::View)?;
    let report = audit::verify_chain(&state.pool).await?;
    Ok(Json(report))
}
