use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{self, AuditAction};
use crate::authz::{impersonation, Action, ResourceType};
use crate::db::{self, users};
use crate::errors::{AppError, AppResult};
use crate::extract::ValidatedJson;
use crate::models::user::{DbUser, MeResponse, User, UserCreateRequest, UserUpdateRequest, USER_COLUMNS};
use crate::routes::authorize;
use crate::session::CurrentUser;
use crate::utils::{hash_password, utc_now};

#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    responses((status = 200, description = "All users", body = [User]))
)]
pub async fn list_users(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<User>>> {
    authorize(&state, &user, ResourceType::User, Action::List)?;

    let rows = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY username"))
        .fetch_all(&state.pool)
        .await?;

    let mut conn = state.pool.acquire().await?;
    let mut result = Vec::with_capacity(rows.len());
    for row in rows {
        result.push(users::load_user(&mut conn, row).await?);
    }
    Ok(Json(result))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "User detail", body = User))
)]
pub async fn get_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<User>> {
    authorize(&state, &user, ResourceType::User, Action::View)?;
    Ok(Json(users::fetch_user(&state.pool, id).await?))
}

#[utoipa::path(
    post,
    path = "/users",
    tag = "Users",
    request_body = UserCreateRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Username already in use")
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<UserCreateRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    authorize(&state, &user, ResourceType::User, Action::Create)?;

    let username = payload.username.trim();
    if username.is_empty() {
        return Err(AppError::bad_field("username", "username must not be empty"));
    }
    let password_hash = hash_password(&payload.password)?;
    let id = Uuid::new_v4();

    let mut tx = db::begin_write(&state.pool).await?;
    users::insert_user(
        &mut tx,
        id,
        username,
        &payload.email,
        &payload.first_name,
        &payload.last_name,
        &password_hash,
        payload.is_superuser,
    )
    .await?;
    users::set_groups(&mut tx, id, &payload.groups).await?;
    users::set_departments(&mut tx, id, &payload.department_ids).await?;

    let created = load_in_tx(&mut tx, id).await?;
    audit::record(&mut tx, &user.audit_context(), AuditAction::Create, None, Some(&created)).await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UserUpdateRequest,
    responses((status = 200, description = "User updated", body = User))
)]
pub async fn update_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<UserUpdateRequest>,
) -> AppResult<Json<User>> {
    authorize(&state, &user, ResourceType::User, Action::Update)?;

    let mut tx = db::begin_write(&state.pool).await?;
    let old = load_in_tx(&mut tx, id).await?;

    let password_hash = payload.password.as_deref().map(hash_password).transpose()?;

    sqlx::query(
        r#"
        UPDATE users SET
            email = COALESCE(?, email),
            first_name = COALESCE(?, first_name),
            last_name = COALESCE(?, last_name),
            password_hash = COALESCE(?, password_hash),
            is_active = COALESCE(?, is_active),
            is_superuser = COALESCE(?, is_superuser),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&payload.email)
    .bind(&payload.first_name)
    .bind(&payload.last_name)
    .bind(&password_hash)
    .bind(payload.is_active)
    .bind(payload.is_superuser)
    .bind(utc_now())
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    if let Some(groups) = payload.groups.as_deref() {
        users::set_groups(&mut tx, id, groups).await?;
    }
    if let Some(department_ids) = payload.department_ids.as_deref() {
        users::set_departments(&mut tx, id, department_ids).await?;
    }

    let new = load_in_tx(&mut tx, id).await?;
    audit::record(&mut tx, &user.audit_context(), AuditAction::Update, Some(&old), Some(&new)).await?;
    tx.commit().await?;

    Ok(Json(new))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 204, description = "User deleted"))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&state, &user, ResourceType::User, Action::Delete)?;
    if id == user.real_user_id() {
        return Err(AppError::invalid_state("You cannot delete your own account."));
    }

    let mut tx = db::begin_write(&state.pool).await?;
    let old = load_in_tx(&mut tx, id).await?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

    audit::record(&mut tx, &user.audit_context(), AuditAction::Delete, Some(&old), None).await?;
    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/users/{id}/impersonate",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User to act as")),
    responses(
        (status = 200, description = "Now acting as the user", body = MeResponse),
        (status = 403, description = "Caller is not an admin, or target is an admin"),
        (status = 404, description = "User not found")
    )
)]
pub async fn impersonate_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MeResponse>> {
    let target = users::load_principal(&state.pool, id).await?;
    let markers =
        impersonation::begin(state.sessions.as_ref(), user.session_id, &user.identity, target.as_ref()).await?;

    let acting = users::fetch_user(&state.pool, markers.impersonated_principal_id).await?;
    let identity = crate::authz::resolve(&users::principal_of(&acting));
    let impersonator = users::fetch_user(&state.pool, markers.original_principal_id).await?;

    Ok(Json(MeResponse {
        user: acting,
        identity,
        is_impersonating: true,
        impersonator: Some(impersonator),
    }))
}

async fn load_in_tx(conn: &mut sqlx::SqliteConnection, id: Uuid) -> AppResult<User> {
    let db_user = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    users::load_user(conn, db_user).await
}
