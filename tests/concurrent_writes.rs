mod common;

use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use server_inventory::audit;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_updates_all_commit_with_their_audit_entries() -> Result<()> {
    let app = common::spawn().await?;
    app.superuser("root").await?;
    let token = app.login("root").await?;

    let mut servers = Vec::new();
    for n in 0..16 {
        servers.push(app.server(&format!("srv-{n:02}"), None).await?);
    }

    let app = Arc::new(app);
    let token = Arc::new(token);
    let mut handles = Vec::new();
    for server in servers.iter().copied() {
        let app = Arc::clone(&app);
        let token = Arc::clone(&token);
        handles.push(tokio::spawn(async move {
            app.request(
                "PUT",
                &format!("/servers/{server}"),
                Some(token.as_str()),
                Some(json!({ "os": "debian" })),
            )
            .await
        }));
    }

    for handle in handles {
        let (status, body) = handle.await??;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    let updated: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM servers WHERE os = 'debian'")
        .fetch_one(&app.pool)
        .await?;
    assert_eq!(updated, 16);

    let entries: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM audit_log WHERE action = 'UPDATE' AND resource_type = 'server'")
            .fetch_one(&app.pool)
            .await?;
    assert_eq!(entries, 16);

    let report = audit::verify_chain(&app.pool).await?;
    assert!(report.valid);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_deletes_all_commit() -> Result<()> {
    let app = common::spawn().await?;
    app.superuser("root").await?;
    let token = app.login("root").await?;

    let mut servers = Vec::new();
    for n in 0..12 {
        servers.push(app.server(&format!("old-{n:02}"), None).await?);
    }

    let app = Arc::new(app);
    let token = Arc::new(token);
    let mut handles = Vec::new();
    for server in servers.iter().copied() {
        let app = Arc::clone(&app);
        let token = Arc::clone(&token);
        handles.push(tokio::spawn(async move {
            app.request("DELETE", &format!("/servers/{server}"), Some(token.as_str()), None)
                .await
        }));
    }

    for handle in handles {
        let (status, body) = handle.await??;
        assert!(status.is_success(), "{status}: {body}");
    }

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM servers")
        .fetch_one(&app.pool)
        .await?;
    assert_eq!(remaining, 0);

    let report = audit::verify_chain(&app.pool).await?;
    assert!(report.valid);

    Ok(())
}
