use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};
use utoipa::ToSchema;

use crate::app::AppState;
use crate::authz::{ResourceType, Role};
use crate::db::scope::{join_path, push_scope};
use crate::errors::{AppError, AppResult};
use crate::session::CurrentUser;

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardSummary {
    pub role: Role,
    pub is_superuser: bool,
    pub department_count: usize,
    pub servers: i64,
    pub server_updates: i64,
    pub services: i64,
    pub hyperlinks: i64,
    pub hosts: i64,
    pub virtual_machines: i64,
    pub ssl_certificates: i64,
}

async fn scoped_count(state: &AppState, user: &CurrentUser, resource_type: ResourceType) -> AppResult<i64> {
    let path = join_path(resource_type)
        .ok_or_else(|| AppError::internal(format!("{resource_type} has no department path")))?;
    let scope = state.policy.scope(&user.identity, resource_type);

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT COUNT(1) FROM {} WHERE 1 = 1", path.from));
    push_scope(&mut qb, &scope, path.department_column);
    Ok(qb.build_query_scalar::<i64>().fetch_one(&state.pool).await?)
}

/// Inventory counts within the caller's scope. Every signed-in user may call it.
#[utoipa::path(
    get,
    path = "/dashboard",
    tag = "Dashboard",
    responses((status = 200, description = "Scoped inventory counts", body = DashboardSummary))
)]
pub async fn dashboard(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<DashboardSummary>> {
    Ok(Json(DashboardSummary {
        role: user.identity.role,
        is_superuser: user.identity.is_superuser,
        department_count: user.identity.department_ids.len(),
        servers: scoped_count(&state, &user, ResourceType::Server).await?,
        server_updates: scoped_count(&state, &user, ResourceType::ServerUpdate).await?,
        services: scoped_count(&state, &user, ResourceType::Service).await?,
        hyperlinks: scoped_count(&state, &user, ResourceType::HyperLink).await?,
        hosts: scoped_count(&state, &user, ResourceType::Host).await?,
        virtual_machines: scoped_count(&state, &user, ResourceType::VirtualMachine).await?,
        ssl_certificates: scoped_count(&state, &user, ResourceType::SslCertificate).await?,
    }))
}
