use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use crate::app::AppState;
use crate::audit::{self, client_ip, AuditAction, AuditContext};
use crate::authz::impersonation;
use crate::db::{self, sessions, users};
use crate::errors::{AppError, AppResult};
use crate::extract::ValidatedJson;
use crate::models::user::{AuthResponse, LoginRequest, MeResponse, RegisterRequest};
use crate::routes::MessageResponse;
use crate::session::CurrentUser;
use crate::utils::{hash_password, verify_password};

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 409, description = "Username already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(payload): ValidatedJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let username = payload.username.trim();
    if username.is_empty() {
        return Err(AppError::bad_field("username", "username must not be empty"));
    }

    let password_hash = hash_password(&payload.password)?;
    let user_id = uuid::Uuid::new_v4();

    let mut tx = db::begin_write(&state.pool).await?;
    users::insert_user(
        &mut tx,
        user_id,
        username,
        &payload.email,
        &payload.first_name,
        &payload.last_name,
        &password_hash,
        false,
    )
    .await?;

    let db_user = sqlx::query_as::<_, crate::models::user::DbUser>(&format!(
        "SELECT {} FROM users WHERE id = ?",
        crate::models::user::USER_COLUMNS
    ))
    .bind(user_id.to_string())
    .fetch_one(&mut *tx)
    .await?;
    let user = users::load_user(&mut tx, db_user).await?;

    let ctx = AuditContext::default().with_ip(client_ip(&headers));
    audit::record(&mut tx, &ctx, AuditAction::Create, None, Some(&user)).await?;
    tx.commit().await?;

    let session_id = sessions::create(&state.pool, user.id).await?;
    let token = state.jwt.encode(user.id, session_id)?;

    tracing::info!(user_id = %user.id, username = %user.username, "user registered");

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(payload): ValidatedJson<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let db_user = users::fetch_db_user_by_username(&state.pool, &payload.username)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    let password_ok = verify_password(&payload.password, &db_user.password_hash)?;
    if !password_ok {
        tracing::info!(username = %payload.username, "failed login attempt");
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let mut conn = state.pool.acquire().await?;
    let user = users::load_user(&mut conn, db_user).await?;
    drop(conn);

    let session_id = sessions::create(&state.pool, user.id).await?;
    let token = state.jwt.encode(user.id, session_id)?;

    let ctx = AuditContext::for_actor(user.id).with_ip(client_ip(&headers));
    audit::record_best_effort(&state.pool, &ctx, AuditAction::Login, &user).await;

    Ok(Json(AuthResponse { token, user }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current user", body = MeResponse))
)]
pub async fn me(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<MeResponse>> {
    me_response(&state, &user).await.map(Json)
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Session ended", body = MessageResponse))
)]
pub async fn logout(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<MessageResponse>> {
    sessions::delete(&state.pool, user.session_id).await?;

    let real = users::fetch_user(&state.pool, user.real_user_id()).await?;
    let ctx = AuditContext::for_actor(real.id).with_ip(user.ip_address.clone());
    audit::record_best_effort(&state.pool, &ctx, AuditAction::Logout, &real).await;

    Ok(Json(MessageResponse::new("Logged out")))
}

#[utoipa::path(
    post,
    path = "/auth/stop-impersonating",
    tag = "Auth",
    responses(
        (status = 200, description = "Back to the original user", body = MeResponse),
        (status = 409, description = "Not impersonating anyone")
    )
)]
pub async fn stop_impersonating(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<MeResponse>> {
    let ended = impersonation::end(state.sessions.as_ref(), user.session_id).await?;

    let original = users::fetch_user(&state.pool, ended.original_principal_id).await?;
    let identity = crate::authz::resolve(&users::principal_of(&original));

    Ok(Json(MeResponse {
        user: original,
        identity,
        is_impersonating: false,
        impersonator: None,
    }))
}

pub(crate) async fn me_response(state: &AppState, user: &CurrentUser) -> AppResult<MeResponse> {
    let acting = users::fetch_user(&state.pool, user.user_id()).await?;
    let impersonator = match user.impersonator_id {
        Some(id) => Some(users::fetch_user(&state.pool, id).await?),
        None => None,
    };

    Ok(MeResponse {
        user: acting,
        identity: user.identity.clone(),
        is_impersonating: user.is_impersonating(),
        impersonator,
    })
}
