mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};

use server_inventory::audit::AuditContext;
use server_inventory::authz::Role;
use server_inventory::ssl::{self, CertificateProbe, CheckSummary, ExpiryNotice, Notifier, ProbeResult};

/// Probe answering from a fixed table. Unknown URLs are unreachable.
#[derive(Default)]
struct TableProbe {
    answers: HashMap<String, Option<DateTime<Utc>>>,
}

impl TableProbe {
    fn with(mut self, url: &str, expiry: Option<DateTime<Utc>>) -> Self {
        self.answers.insert(url.to_string(), expiry);
        self
    }
}

#[async_trait]
impl CertificateProbe for TableProbe {
    async fn is_reachable(&self, url: &str) -> bool {
        self.answers.contains_key(url)
    }

    async fn probe(&self, url: &str) -> anyhow::Result<ProbeResult> {
        match self.answers.get(url) {
            Some(Some(expiry)) => Ok(ProbeResult {
                expiry_date: Some(*expiry),
                issuer: Some("Test CA".to_string()),
                subject: Some(url.to_string()),
                is_valid: *expiry > Utc::now(),
            }),
            _ => anyhow::bail!("handshake failed for {url}"),
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<ExpiryNotice>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notice: &ExpiryNotice) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

#[tokio::test]
async fn batch_check_counts_failures_without_aborting() -> Result<()> {
    let in_90_days = Utc::now() + Duration::days(90);
    let probe = TableProbe::default()
        .with("https://good.example.com", Some(in_90_days))
        .with("https://broken.example.com", None);
    let app = common::spawn_with_probe(Arc::new(probe)).await?;

    let server = app.server("web-01", None).await?;
    let good = app.hyperlink(server, "good.example.com").await?;
    app.hyperlink(server, "https://broken.example.com").await?;
    app.hyperlink(server, "https://offline.example.com").await?;
    let disabled = app.hyperlink(server, "https://disabled.example.com").await?;
    sqlx::query("UPDATE hyperlinks SET is_enabled = 0 WHERE id = ?")
        .bind(disabled.to_string())
        .execute(&app.pool)
        .await?;

    app.user("admin", &[Role::Admin], &[]).await?;
    let token = app.login("admin").await?;
    let (status, body) = app.request("POST", "/ssl-certificates/run-check", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    let summary: CheckSummary = serde_json::from_value(body)?;
    assert_eq!(summary, CheckSummary { updated: 1, skipped: 1, errors: 1 });

    let (status, expiry): (String, DateTime<Utc>) = sqlx::query_as(
        "SELECT notification_status, expiry_date FROM ssl_certificates WHERE hyperlink_id = ?",
    )
    .bind(good.to_string())
    .fetch_one(&app.pool)
    .await?;
    assert_eq!(status, "pending");
    assert_eq!(expiry.timestamp(), in_90_days.timestamp());

    let created: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM audit_log WHERE resource_type = 'ssl_certificate' AND action = 'CREATE'",
    )
    .fetch_one(&app.pool)
    .await?;
    assert_eq!(created, 1);

    Ok(())
}

#[tokio::test]
async fn run_check_is_admin_only() -> Result<()> {
    let app = common::spawn().await?;
    let x = app.department("X").await?;
    app.user("mgr", &[Role::Manager], &[x]).await?;
    let token = app.login("mgr").await?;

    let (status, _) = app.request("POST", "/ssl-certificates/run-check", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn on_demand_check_reports_unreachable_urls_against_the_url_field() -> Result<()> {
    let expiry = Utc::now() + Duration::days(20);
    let probe = TableProbe::default().with("https://intranet.example.com", Some(expiry));
    let app = common::spawn_with_probe(Arc::new(probe)).await?;

    let x = app.department("X").await?;
    app.user("mgr", &[Role::Manager], &[x]).await?;
    let server = app.server("web-01", Some(x)).await?;
    let reachable = app.hyperlink(server, "https://intranet.example.com").await?;
    let unreachable = app.hyperlink(server, "https://gone.example.com").await?;
    let token = app.login("mgr").await?;

    let (status, body) = app
        .request("POST", &format!("/hyperlinks/{reachable}/check-ssl"), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "warning");
    assert_eq!(body["days_until_expiry"], 19);
    assert_eq!(body["issuer"], "Test CA");

    let (status, body) = app
        .request("POST", &format!("/hyperlinks/{unreachable}/check-ssl"), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["field"], "url");

    // a second check updates the same row
    let (status, _) = app
        .request("POST", &format!("/hyperlinks/{reachable}/check-ssl"), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM ssl_certificates").fetch_one(&app.pool).await?;
    assert_eq!(rows, 1);

    Ok(())
}

#[tokio::test]
async fn notifications_go_to_owner_and_department_leads_once() -> Result<()> {
    let app = common::spawn().await?;
    let x = app.department("X").await?;
    let owner = app.user("owner", &[Role::Viewer], &[x]).await?;
    app.user("lead", &[Role::Manager], &[x]).await?;
    app.user("boss", &[Role::Admin], &[x]).await?;
    app.user("reader", &[Role::Viewer], &[x]).await?;

    let now = Utc::now();
    let server = app.server_owned_by("web-01", Some(x), Some(owner)).await?;
    let due = app.hyperlink(server, "https://due.example.com").await?;
    let later = app.hyperlink(server, "https://later.example.com").await?;
    let due_cert = app.certificate(due, now + Duration::days(7) + Duration::hours(2), "pending").await?;
    app.certificate(later, now + Duration::days(9) + Duration::hours(2), "pending").await?;

    let notifier = RecordingNotifier::default();
    let summary = ssl::send_expiry_notifications(&app.pool, &notifier, &[30, 14, 7, 3, 1], now).await?;
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.errors, 0);

    {
        let notices = notifier.sent.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].certificate_id, due_cert);
        assert_eq!(notices[0].days, 7);
        assert_eq!(notices[0].server_name, "web-01");
        assert_eq!(
            notices[0].recipients,
            vec![
                "owner@example.com".to_string(),
                "boss@example.com".to_string(),
                "lead@example.com".to_string(),
            ]
        );
    }

    let status: String = sqlx::query_scalar("SELECT notification_status FROM ssl_certificates WHERE id = ?")
        .bind(due_cert.to_string())
        .fetch_one(&app.pool)
        .await?;
    assert_eq!(status, "notified");

    // already notified
    let summary = ssl::send_expiry_notifications(&app.pool, &notifier, &[7], now).await?;
    assert_eq!(summary.sent, 0);

    Ok(())
}

#[tokio::test]
async fn a_broken_certificate_does_not_stop_the_notification_batch() -> Result<()> {
    let app = common::spawn().await?;
    let x = app.department("X").await?;
    let owner = app.user("owner", &[Role::Viewer], &[x]).await?;

    let now = Utc::now();
    let broken_server = app.server_owned_by("broken", None, Some(owner)).await?;
    let healthy_server = app.server_owned_by("healthy", None, Some(owner)).await?;
    let broken_link = app.hyperlink(broken_server, "https://broken.example.com").await?;
    let healthy_link = app.hyperlink(healthy_server, "https://healthy.example.com").await?;
    let broken_cert = app.certificate(broken_link, now + Duration::days(7) + Duration::hours(2), "pending").await?;
    let healthy_cert = app.certificate(healthy_link, now + Duration::days(7) + Duration::hours(2), "pending").await?;

    // an owner id that no longer parses
    let mut conn = app.pool.acquire().await?;
    sqlx::query("PRAGMA foreign_keys = OFF").execute(&mut *conn).await?;
    sqlx::query("UPDATE servers SET owner_id = 'not-a-uuid' WHERE id = ?")
        .bind(broken_server.to_string())
        .execute(&mut *conn)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
    drop(conn);

    let notifier = RecordingNotifier::default();
    let summary = ssl::send_expiry_notifications(&app.pool, &notifier, &[7], now).await?;
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.errors, 1);

    {
        let notices = notifier.sent.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].certificate_id, healthy_cert);
    }

    for (cert, expected) in [(healthy_cert, "notified"), (broken_cert, "pending")] {
        let status: String = sqlx::query_scalar("SELECT notification_status FROM ssl_certificates WHERE id = ?")
            .bind(cert.to_string())
            .fetch_one(&app.pool)
            .await?;
        assert_eq!(status, expected);
    }

    Ok(())
}

#[tokio::test]
async fn certificates_without_recipients_stay_pending() -> Result<()> {
    let app = common::spawn().await?;
    let now = Utc::now();
    let server = app.server("orphan", None).await?;
    let link = app.hyperlink(server, "https://orphan.example.com").await?;
    let cert = app.certificate(link, now + Duration::days(3) + Duration::hours(1), "pending").await?;

    let notifier = RecordingNotifier::default();
    let summary = ssl::send_expiry_notifications(&app.pool, &notifier, &[3], now).await?;
    assert_eq!(summary.sent, 0);
    assert_eq!(summary.skipped, 1);
    assert!(notifier.sent.lock().unwrap().is_empty());

    let status: String = sqlx::query_scalar("SELECT notification_status FROM ssl_certificates WHERE id = ?")
        .bind(cert.to_string())
        .fetch_one(&app.pool)
        .await?;
    assert_eq!(status, "pending");

    Ok(())
}

#[tokio::test]
async fn expired_certificates_are_flagged() -> Result<()> {
    let app = common::spawn().await?;
    let now = Utc::now();
    let server = app.server("web-01", None).await?;
    let past = app.hyperlink(server, "https://past.example.com").await?;
    let notified = app.hyperlink(server, "https://notified.example.com").await?;
    let future = app.hyperlink(server, "https://future.example.com").await?;
    let past_cert = app.certificate(past, now - Duration::hours(1), "pending").await?;
    let notified_cert = app.certificate(notified, now - Duration::days(2), "notified").await?;
    let future_cert = app.certificate(future, now + Duration::days(40), "pending").await?;

    let expired = ssl::mark_expired(&app.pool, now).await?;
    assert_eq!(expired, 2);

    for (id, status, valid) in [
        (past_cert, "expired", false),
        (notified_cert, "expired", false),
        (future_cert, "pending", true),
    ] {
        let row: (String, bool) =
            sqlx::query_as("SELECT notification_status, is_valid FROM ssl_certificates WHERE id = ?")
                .bind(id.to_string())
                .fetch_one(&app.pool)
                .await?;
        assert_eq!(row, (status.to_string(), valid));
    }

    // scheduled runs use the system context
    let summary = ssl::check_all(&app.pool, &ssl::DisabledProbe, &AuditContext::system()).await?;
    assert_eq!(summary, CheckSummary { updated: 0, skipped: 3, errors: 0 });

    Ok(())
}
