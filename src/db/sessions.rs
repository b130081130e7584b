use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::authz::{ImpersonationState, SessionStore};
use crate::errors::AppResult;
use crate::utils::{parse_opt_uuid, parse_uuid, utc_now};

#[derive(Debug, Clone, FromRow)]
struct DbSession {
    user_id: String,
    original_user_id: Option<String>,
    impersonated_user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub impersonation: Option<ImpersonationState>,
}

pub async fn create(pool: &SqlitePool, user_id: Uuid) -> AppResult<Uuid> {
    let session_id = Uuid::new_v4();
    sqlx::query("INSERT INTO sessions (id, user_id, created_at) VALUES (?, ?, ?)")
        .bind(session_id.to_string())
        .bind(user_id.to_string())
        .bind(utc_now())
        .execute(pool)
        .await?;
    Ok(session_id)
}

pub async fn find(pool: &SqlitePool, session_id: Uuid) -> AppResult<Option<Session>> {
    let row = sqlx::query_as::<_, DbSession>(
        "SELECT user_id, original_user_id, impersonated_user_id FROM sessions WHERE id = ?",
    )
    .bind(session_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let original = parse_opt_uuid(row.original_user_id.as_deref())?;
    let impersonated = parse_opt_uuid(row.impersonated_user_id.as_deref())?;
    let impersonation = match (original, impersonated) {
        (Some(original_principal_id), Some(impersonated_principal_id)) => Some(ImpersonationState {
            original_principal_id,
            impersonated_principal_id,
        }),
        _ => None,
    };

    Ok(Some(Session {
        id: session_id,
        user_id: parse_uuid(&row.user_id)?,
        impersonation,
    }))
}

pub async fn delete(pool: &SqlitePool, session_id: Uuid) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(session_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Impersonation markers stored on the `sessions` row.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn impersonation(&self, session_id: Uuid) -> AppResult<Option<ImpersonationState>> {
        Ok(find(&self.pool, session_id).await?.and_then(|session| session.impersonation))
    }

    async fn set_impersonation(&self, session_id: Uuid, state: &ImpersonationState) -> AppResult<()> {
        sqlx::query("UPDATE sessions SET original_user_id = ?, impersonated_user_id = ? WHERE id = ?")
            .bind(state.original_principal_id.to_string())
            .bind(state.impersonated_principal_id.to_string())
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_impersonation(&self, session_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE sessions SET original_user_id = NULL, impersonated_user_id = NULL WHERE id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
