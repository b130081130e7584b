use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tokio::task::JoinHandle;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{normalize_url, CertificateProbe, ExpiryNotice, Notifier, ProbeResult, SslSettings};
use crate::audit::{self, AuditAction, AuditContext};
use crate::db;
use crate::errors::{AppError, AppResult};
use crate::models::hyperlink::HyperLink;
use crate::models::ssl_certificate::{
    DbSslCertificate, NotificationStatus, SslCertificate, SSL_CERTIFICATE_COLUMNS,
};
use crate::utils::{parse_opt_uuid, parse_uuid};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckSummary {
    pub updated: u32,
    pub skipped: u32,
    pub errors: u32,
}

async fn certificate_for_hyperlink(
    conn: &mut SqliteConnection,
    hyperlink_id: Uuid,
) -> AppResult<Option<SslCertificate>> {
    let row = sqlx::query_as::<_, DbSslCertificate>(&format!(
        "SELECT {SSL_CERTIFICATE_COLUMNS} FROM ssl_certificates c JOIN hyperlinks l ON l.id = c.hyperlink_id JOIN servers s ON s.id = l.server_id WHERE c.hyperlink_id = ?"
    ))
    .bind(hyperlink_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;
    row.map(SslCertificate::try_from).transpose()
}

/// Creates or refreshes the certificate of a hyperlink and records the change.
async fn upsert_certificate(
    pool: &SqlitePool,
    ctx: &AuditContext,
    hyperlink_id: Uuid,
    result: &ProbeResult,
    now: DateTime<Utc>,
) -> AppResult<SslCertificate> {
    let notification_status = match result.expiry_date {
        Some(expiry) if expiry > now => NotificationStatus::Pending,
        _ => NotificationStatus::Expired,
    };

    let mut tx = db::begin_write(pool).await?;
    let old = certificate_for_hyperlink(&mut tx, hyperlink_id).await?;

    sqlx::query(
        r#"
        INSERT INTO ssl_certificates (id, hyperlink_id, expiry_date, last_checked, notification_status, issuer, subject, is_valid)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(hyperlink_id) DO UPDATE SET
            expiry_date = excluded.expiry_date,
            last_checked = excluded.last_checked,
            notification_status = excluded.notification_status,
            issuer = excluded.issuer,
            subject = excluded.subject,
            is_valid = excluded.is_valid
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(hyperlink_id.to_string())
    .bind(result.expiry_date)
    .bind(now)
    .bind(notification_status)
    .bind(result.issuer.clone().unwrap_or_default())
    .bind(result.subject.clone().unwrap_or_default())
    .bind(result.is_valid)
    .execute(&mut *tx)
    .await?;

    let new = certificate_for_hyperlink(&mut tx, hyperlink_id)
        .await?
        .ok_or_else(|| AppError::internal("certificate vanished after upsert"))?;

    let action = if old.is_some() {
        AuditAction::Update
    } else {
        AuditAction::Create
    };
    audit::record(&mut tx, ctx, action, old.as_ref(), Some(&new)).await?;
    tx.commit().await?;

    Ok(new)
}

/// Probes one hyperlink on demand.
pub async fn check_one(
    pool: &SqlitePool,
    probe: &dyn CertificateProbe,
    hyperlink: &HyperLink,
    ctx: &AuditContext,
) -> AppResult<SslCertificate> {
    let url = normalize_url(&hyperlink.url);

    if !probe.is_reachable(&url).await {
        return Err(AppError::integrity("url", format!("URL {url} is not accessible")));
    }

    let result = probe.probe(&url).await.map_err(|err| {
        tracing::warn!(url = %url, error = %err, "certificate probe failed");
        AppError::integrity("url", format!("Could not retrieve SSL certificate information for {url}"))
    })?;

    if result.expiry_date.is_none() {
        return Err(AppError::integrity(
            "url",
            format!("Could not retrieve SSL certificate information for {url}"),
        ));
    }

    upsert_certificate(pool, ctx, hyperlink.id, &result, Utc::now()).await
}

/// Probes every enabled hyperlink. Failures are counted, never fatal to the batch.
pub async fn check_all(pool: &SqlitePool, probe: &dyn CertificateProbe, ctx: &AuditContext) -> AppResult<CheckSummary> {
    let links: Vec<(String, String)> =
        sqlx::query_as("SELECT id, url FROM hyperlinks WHERE is_enabled = 1 ORDER BY created_at")
            .fetch_all(pool)
            .await?;

    let mut summary = CheckSummary::default();
    for (id, raw_url) in links {
        let url = normalize_url(&raw_url);

        if !probe.is_reachable(&url).await {
            tracing::warn!(url = %url, "URL is not accessible");
            summary.skipped += 1;
            continue;
        }

        let outcome = async {
            let hyperlink_id = parse_uuid(&id)?;
            let result = probe.probe(&url).await?;
            upsert_certificate(pool, ctx, hyperlink_id, &result, Utc::now()).await?;
            Ok::<_, anyhow::Error>(())
        }
        .await;

        match outcome {
            Ok(()) => summary.updated += 1,
            Err(err) => {
                tracing::error!(url = %url, error = %err, "error checking SSL certificate");
                summary.errors += 1;
            }
        }
    }

    tracing::info!(
        updated = summary.updated,
        skipped = summary.skipped,
        errors = summary.errors,
        "SSL certificate check finished"
    );
    Ok(summary)
}

#[derive(Debug, sqlx::FromRow)]
struct NoticeTarget {
    server_name: String,
    owner_id: Option<String>,
    department_id: Option<String>,
}

/// Server owner first, then Admin/Manager members of the server's department.
async fn notification_recipients(pool: &SqlitePool, certificate: &SslCertificate) -> AppResult<(String, Vec<String>)> {
    let target = sqlx::query_as::<_, NoticeTarget>(
        "SELECT name AS server_name, owner_id, department_id FROM servers WHERE id = ?",
    )
    .bind(certificate.server_id.to_string())
    .fetch_one(pool)
    .await?;

    let mut recipients: Vec<String> = Vec::new();

    if let Some(owner_id) = parse_opt_uuid(target.owner_id.as_deref())? {
        let email: Option<String> =
            sqlx::query_scalar("SELECT email FROM users WHERE id = ? AND is_active = 1 AND email <> ''")
                .bind(owner_id.to_string())
                .fetch_optional(pool)
                .await?;
        recipients.extend(email);
    }

    if let Some(department_id) = parse_opt_uuid(target.department_id.as_deref())? {
        let emails: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT u.email
            FROM users u
            JOIN user_departments ud ON ud.user_id = u.id
            JOIN user_groups g ON g.user_id = u.id
            WHERE ud.department_id = ?
              AND g.group_name IN ('Admin', 'Manager')
              AND u.is_active = 1
              AND u.email <> ''
            ORDER BY u.username
            "#,
        )
        .bind(department_id.to_string())
        .fetch_all(pool)
        .await?;

        for email in emails {
            if !recipients.contains(&email) {
                recipients.push(email);
            }
        }
    }

    Ok((target.server_name, recipients))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NotificationSummary {
    pub sent: u32,
    pub skipped: u32,
    pub errors: u32,
}

/// Sends notices for pending certificates expiring `d` days from `now`, for each
/// configured offset. A failing certificate is logged and counted, the rest still go out.
pub async fn send_expiry_notifications(
    pool: &SqlitePool,
    notifier: &dyn Notifier,
    notification_days: &[i64],
    now: DateTime<Utc>,
) -> AppResult<NotificationSummary> {
    let rows = sqlx::query_as::<_, DbSslCertificate>(&format!(
        "SELECT {SSL_CERTIFICATE_COLUMNS} FROM ssl_certificates c JOIN hyperlinks l ON l.id = c.hyperlink_id JOIN servers s ON s.id = l.server_id WHERE c.notification_status = 'pending' AND c.expiry_date IS NOT NULL"
    ))
    .fetch_all(pool)
    .await?;

    let mut summary = NotificationSummary::default();
    let mut pending = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id.clone();
        match SslCertificate::try_from(row) {
            Ok(certificate) => pending.push(certificate),
            Err(err) => {
                tracing::error!(certificate_id = %id, error = %err, "unreadable SSL certificate row");
                summary.errors += 1;
            }
        }
    }

    for &days in notification_days {
        let window_start = now + Duration::days(days);
        let window_end = window_start + Duration::days(1);

        for certificate in pending.iter_mut() {
            let Some(expiry_date) = certificate.expiry_date else {
                continue;
            };
            if certificate.notification_status != NotificationStatus::Pending
                || expiry_date < window_start
                || expiry_date >= window_end
            {
                continue;
            }

            let outcome = notify_one(pool, notifier, certificate, days, expiry_date).await;
            match outcome {
                Ok(true) => {
                    certificate.notification_status = NotificationStatus::Notified;
                    summary.sent += 1;
                }
                Ok(false) => summary.skipped += 1,
                Err(err) => {
                    tracing::error!(certificate_id = %certificate.id, error = %err, "error sending SSL notification");
                    summary.errors += 1;
                }
            }
        }
    }

    tracing::info!(
        sent = summary.sent,
        skipped = summary.skipped,
        errors = summary.errors,
        "SSL expiry notifications finished"
    );
    Ok(summary)
}

/// Sends one notice and marks the certificate notified. `Ok(false)` when nobody is
/// there to receive it.
async fn notify_one(
    pool: &SqlitePool,
    notifier: &dyn Notifier,
    certificate: &SslCertificate,
    days: i64,
    expiry_date: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let (server_name, recipients) = notification_recipients(pool, certificate).await?;
    if recipients.is_empty() {
        tracing::warn!(certificate_id = %certificate.id, url = %certificate.url, "no recipients for SSL notification");
        return Ok(false);
    }

    let notice = ExpiryNotice {
        certificate_id: certificate.id,
        server_name,
        url: certificate.url.clone(),
        days,
        expiry_date,
        issuer: certificate.issuer.clone(),
        recipients,
    };
    notifier.send(&notice).await?;

    sqlx::query("UPDATE ssl_certificates SET notification_status = ? WHERE id = ?")
        .bind(NotificationStatus::Notified)
        .bind(certificate.id.to_string())
        .execute(pool)
        .await?;
    Ok(true)
}

/// Marks pending/notified certificates past expiry as expired and invalid.
pub async fn mark_expired(pool: &SqlitePool, now: DateTime<Utc>) -> AppResult<u32> {
    let candidates: Vec<(String, DateTime<Utc>)> = sqlx::query_as(
        "SELECT id, expiry_date FROM ssl_certificates WHERE notification_status IN ('pending', 'notified') AND expiry_date IS NOT NULL",
    )
    .fetch_all(pool)
    .await?;

    let mut tx = db::begin_write(pool).await?;
    let mut expired = 0;
    for (id, expiry_date) in candidates {
        if expiry_date >= now {
            continue;
        }
        sqlx::query("UPDATE ssl_certificates SET notification_status = ?, is_valid = 0 WHERE id = ?")
            .bind(NotificationStatus::Expired)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        expired += 1;
    }
    tx.commit().await?;

    tracing::info!(expired, "expired SSL certificates updated");
    Ok(expired)
}

/// Runs check, notify and expire on a fixed interval until the runtime shuts down.
pub fn spawn_scheduler(
    pool: SqlitePool,
    probe: Arc<dyn CertificateProbe>,
    notifier: Arc<dyn Notifier>,
    settings: SslSettings,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(settings.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let ctx = AuditContext::system();

            if let Err(err) = check_all(&pool, probe.as_ref(), &ctx).await {
                tracing::error!(error = %err, "scheduled SSL check failed");
            }
            if let Err(err) =
                send_expiry_notifications(&pool, notifier.as_ref(), &settings.notification_days, Utc::now()).await
            {
                tracing::error!(error = %err, "scheduled SSL notifications failed");
            }
            if let Err(err) = mark_expired(&pool, Utc::now()).await {
                tracing::error!(error = %err, "scheduled SSL expiry update failed");
            }
        }
    })
}
