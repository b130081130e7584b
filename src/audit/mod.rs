use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db;
use crate::errors::{AppError, AppResult};

pub mod auditable;
pub use auditable::Auditable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    Logout,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "CREATE" => Some(AuditAction::Create),
            "UPDATE" => Some(AuditAction::Update),
            "DELETE" => Some(AuditAction::Delete),
            "LOGIN" => Some(AuditAction::Login),
            "LOGOUT" => Some(AuditAction::Logout),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who performed a change and from where.
///
/// Built per request from the resolved session and handed to [`record`] explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub actor_id: Option<Uuid>,
    /// Set when the actor is being impersonated by this (original) principal
    pub impersonator_id: Option<Uuid>,
    pub ip_address: Option<String>,
}

impl AuditContext {
    /// Context for changes made by background jobs.
    pub fn system() -> Self {
        Self::default()
    }

    pub fn for_actor(actor_id: Uuid) -> Self {
        Self {
            actor_id: Some(actor_id),
            ..Self::default()
        }
    }

    pub fn with_impersonator(mut self, impersonator_id: Option<Uuid>) -> Self {
        self.impersonator_id = impersonator_id;
        self
    }

    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }
}

/// Extract the client address from proxy headers
pub fn client_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FieldChange {
    #[schema(value_type = Object)]
    pub old: Value,
    #[schema(value_type = Object)]
    pub new: Value,
}

/// Per-field differences between two serialized snapshots.
///
/// Creates report every field with a null `old`, deletes every field with a null
/// `new`, updates only the fields whose value changed.
pub fn field_changes(
    old: Option<&Value>,
    new: Option<&Value>,
    excluded: &[&str],
) -> BTreeMap<String, FieldChange> {
    let empty = serde_json::Map::new();
    let old_map = old.and_then(Value::as_object).unwrap_or(&empty);
    let new_map = new.and_then(Value::as_object).unwrap_or(&empty);
    let is_update = old.is_some() && new.is_some();

    let mut changes = BTreeMap::new();
    for key in old_map.keys().chain(new_map.keys()) {
        if excluded.contains(&key.as_str()) || changes.contains_key(key) {
            continue;
        }
        let old_value = old_map.get(key).cloned().unwrap_or(Value::Null);
        let new_value = new_map.get(key).cloned().unwrap_or(Value::Null);
        if is_update && old_value == new_value {
            continue;
        }
        changes.insert(
            key.clone(),
            FieldChange {
                old: old_value,
                new: new_value,
            },
        );
    }
    changes
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditLogEntry {
    pub seq: i64,
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub impersonator_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Uuid,
    pub snapshot_repr: String,
    pub field_changes: BTreeMap<String, FieldChange>,
    pub prev_hash: Option<String>,
    pub hash: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbAuditLogEntry {
    pub seq: i64,
    pub id: String,
    pub occurred_at: String,
    pub actor_id: Option<String>,
    pub impersonator_id: Option<String>,
    pub ip_address: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub snapshot_repr: String,
    pub field_changes: String,
    pub prev_hash: Option<String>,
    pub hash: String,
}

impl DbAuditLogEntry {
    fn hash_input(&self) -> HashInput<'_> {
        HashInput {
            id: &self.id,
            occurred_at: &self.occurred_at,
            actor_id: self.actor_id.as_deref(),
            impersonator_id: self.impersonator_id.as_deref(),
            ip_address: self.ip_address.as_deref(),
            action: &self.action,
            resource_type: &self.resource_type,
            resource_id: &self.resource_id,
            snapshot_repr: &self.snapshot_repr,
            field_changes: &self.field_changes,
        }
    }
}

impl TryFrom<DbAuditLogEntry> for AuditLogEntry {
    type Error = AppError;

    fn try_from(value: DbAuditLogEntry) -> Result<Self, Self::Error> {
        let parse_uuid = |s: &str| {
            Uuid::parse_str(s).map_err(|e| AppError::internal(format!("invalid uuid in audit log: {e}")))
        };

        Ok(AuditLogEntry {
            seq: value.seq,
            id: parse_uuid(&value.id)?,
            occurred_at: DateTime::parse_from_rfc3339(&value.occurred_at)
                .map_err(|e| AppError::internal(format!("invalid audit timestamp: {e}")))?
                .with_timezone(&Utc),
            actor_id: value.actor_id.as_deref().map(parse_uuid).transpose()?,
            impersonator_id: value.impersonator_id.as_deref().map(parse_uuid).transpose()?,
            ip_address: value.ip_address,
            action: AuditAction::parse(&value.action)
                .ok_or_else(|| AppError::internal(format!("invalid audit action: {}", value.action)))?,
            resource_type: value.resource_type,
            resource_id: parse_uuid(&value.resource_id)?,
            snapshot_repr: value.snapshot_repr,
            field_changes: serde_json::from_str(&value.field_changes)
                .map_err(|e| AppError::internal(format!("invalid audit field changes: {e}")))?,
            prev_hash: value.prev_hash,
            hash: value.hash,
        })
    }
}

pub const AUDIT_COLUMNS: &str = "seq, id, occurred_at, actor_id, impersonator_id, ip_address, action, resource_type, resource_id, snapshot_repr, field_changes, prev_hash, hash";

/// Exactly the stored text of an entry, in a fixed field order.
#[derive(Serialize)]
struct HashInput<'a> {
    id: &'a str,
    occurred_at: &'a str,
    actor_id: Option<&'a str>,
    impersonator_id: Option<&'a str>,
    ip_address: Option<&'a str>,
    action: &'a str,
    resource_type: &'a str,
    resource_id: &'a str,
    snapshot_repr: &'a str,
    field_changes: &'a str,
}

fn chain_hash(prev_hash: Option<&str>, input: &HashInput<'_>) -> AppResult<String> {
    let payload = serde_json::to_string(input)
        .map_err(|e| AppError::internal(format!("failed to encode audit entry: {e}")))?;

    // SHA256(prev_hash || payload)
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Appends an audit entry for a change to `old`/`new`.
///
/// Runs on the caller's connection so that it commits or rolls back together with
/// the mutation it describes.
pub async fn record<T: Auditable>(
    conn: &mut SqliteConnection,
    ctx: &AuditContext,
    action: AuditAction,
    old: Option<&T>,
    new: Option<&T>,
) -> AppResult<AuditLogEntry> {
    let subject = new
        .or(old)
        .ok_or_else(|| AppError::internal("audit entry without a subject"))?;

    let to_value = |entity: &T| {
        serde_json::to_value(entity)
            .map_err(|e| AppError::internal(format!("failed to snapshot entity: {e}")))
    };
    let old_value = old.map(to_value).transpose()?;
    let new_value = new.map(to_value).transpose()?;

    let changes = match action {
        AuditAction::Create | AuditAction::Update | AuditAction::Delete => {
            field_changes(old_value.as_ref(), new_value.as_ref(), T::excluded_fields())
        }
        AuditAction::Login | AuditAction::Logout => BTreeMap::new(),
    };

    append(
        conn,
        ctx,
        action,
        T::resource_type().as_str(),
        subject.resource_id(),
        subject.snapshot_repr(),
        &changes,
    )
    .await
}

async fn append(
    conn: &mut SqliteConnection,
    ctx: &AuditContext,
    action: AuditAction,
    resource_type: &str,
    resource_id: Uuid,
    snapshot_repr: String,
    changes: &BTreeMap<String, FieldChange>,
) -> AppResult<AuditLogEntry> {
    let row = DbAuditLogEntry {
        seq: 0,
        id: Uuid::new_v4().to_string(),
        occurred_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        actor_id: ctx.actor_id.map(|id| id.to_string()),
        impersonator_id: ctx.impersonator_id.map(|id| id.to_string()),
        ip_address: ctx.ip_address.clone(),
        action: action.as_str().to_string(),
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        snapshot_repr,
        field_changes: serde_json::to_string(changes)
            .map_err(|e| AppError::internal(format!("failed to encode field changes: {e}")))?,
        prev_hash: None,
        hash: String::new(),
    };

    let prev_hash: Option<String> =
        sqlx::query_scalar("SELECT hash FROM audit_log ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&mut *conn)
            .await?;
    let hash = chain_hash(prev_hash.as_deref(), &row.hash_input())?;

    let seq: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO audit_log (id, occurred_at, actor_id, impersonator_id, ip_address, action, resource_type, resource_id, snapshot_repr, field_changes, prev_hash, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING seq
        "#,
    )
    .bind(&row.id)
    .bind(&row.occurred_at)
    .bind(&row.actor_id)
    .bind(&row.impersonator_id)
    .bind(&row.ip_address)
    .bind(&row.action)
    .bind(&row.resource_type)
    .bind(&row.resource_id)
    .bind(&row.snapshot_repr)
    .bind(&row.field_changes)
    .bind(&prev_hash)
    .bind(&hash)
    .fetch_one(&mut *conn)
    .await?;

    tracing::debug!(seq, action = %action, resource_type, resource_id = %resource_id, "audit entry appended");

    AuditLogEntry::try_from(DbAuditLogEntry {
        seq,
        prev_hash,
        hash,
        ..row
    })
}

/// Records a session event (login/logout) outside any mutation.
///
/// Failures are logged and swallowed so they never fail the request.
pub async fn record_best_effort<T: Auditable>(
    pool: &SqlitePool,
    ctx: &AuditContext,
    action: AuditAction,
    subject: &T,
) {
    let result = async {
        let mut tx = db::begin_write(pool).await?;
        record(&mut tx, ctx, action, None, Some(subject)).await?;
        tx.commit().await?;
        Ok::<_, AppError>(())
    }
    .await;

    if let Err(e) = result {
        tracing::error!(
            action = %action,
            resource_id = %subject.resource_id(),
            error = %e,
            "Failed to save audit log entry"
        );
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChainReport {
    pub entries: u64,
    pub valid: bool,
    /// Sequence number of the first entry whose link does not verify
    pub first_broken_seq: Option<i64>,
}

/// Recomputes the hash chain from the first entry.
pub async fn verify_chain(pool: &SqlitePool) -> AppResult<ChainReport> {
    let rows = sqlx::query_as::<_, DbAuditLogEntry>(&format!(
        "SELECT {AUDIT_COLUMNS} FROM audit_log ORDER BY seq ASC"
    ))
    .fetch_all(pool)
    .await?;

    let mut previous: Option<String> = None;
    for row in &rows {
        let expected = chain_hash(previous.as_deref(), &row.hash_input())?;
        if row.prev_hash != previous || row.hash != expected {
            tracing::warn!(seq = row.seq, "audit chain broken");
            return Ok(ChainReport {
                entries: rows.len() as u64,
                valid: false,
                first_broken_seq: Some(row.seq),
            });
        }
        previous = Some(row.hash.clone());
    }

    Ok(ChainReport {
        entries: rows.len() as u64,
        valid: true,
        first_broken_seq: None,
    })
}
