mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use server_inventory::authz::Role;

#[tokio::test]
async fn hosts_and_virtual_machines_flow() -> Result<()> {
    let app = common::spawn().await?;
    let x = app.department("X").await?;
    let y = app.department("Y").await?;
    app.user("mgr", &[Role::Manager], &[x]).await?;
    app.user("other", &[Role::Manager], &[y]).await?;
    let token = app.login("mgr").await?;

    let (status, host) = app
        .request(
            "POST",
            "/hosts",
            Some(&token),
            Some(json!({ "hostname": "hv-01", "ip_address": "10.0.1.5", "department_id": x })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{host}");
    let host_id = host["id"].as_str().unwrap_or_default().to_string();
    assert_eq!(host["status"], "online");

    let (status, vm) = app
        .request(
            "POST",
            "/vms",
            Some(&token),
            Some(json!({ "host_id": host_id, "name": "build-01", "guest_os": "Windows Server 2022" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{vm}");
    assert_eq!(vm["department_id"], x.to_string());
    let vm_id = vm["id"].as_str().unwrap_or_default().to_string();

    let (status, vms) = app.request("GET", &format!("/hosts/{host_id}/vms"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(vms.as_array().map(Vec::len), Some(1));

    let (status, vm) = app
        .request("PUT", &format!("/vms/{vm_id}"), Some(&token), Some(json!({ "status": "stopped" })))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(vm["status"], "stopped");

    // a manager of another department sees none of it
    let token = app.login("other").await?;
    let (status, _) = app.request("GET", &format!("/hosts/{host_id}/vms"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (_, vms) = app.request("GET", "/vms", Some(&token), None).await?;
    assert_eq!(vms, json!([]));
    let (status, body) = app
        .request(
            "POST",
            "/vms",
            Some(&token),
            Some(json!({ "host_id": host_id, "name": "sneaky", "guest_os": "linux" })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["field"], "host");

    Ok(())
}

#[tokio::test]
async fn server_updates_are_recorded_by_the_caller() -> Result<()> {
    let app = common::spawn().await?;
    let x = app.department("X").await?;
    let manager = app.user("mgr", &[Role::Manager], &[x]).await?;
    let server = app.server("web-01", Some(x)).await?;
    let token = app.login("mgr").await?;

    let (status, update) = app
        .request(
            "POST",
            &format!("/servers/{server}/updates"),
            Some(&token),
            Some(json!({ "update_type": "Security patch", "notes": "kernel" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{update}");
    assert_eq!(update["updated_by"], manager.to_string());

    let (status, updates) = app
        .request("GET", &format!("/servers/{server}/updates"), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updates[0]["update_type"], "Security patch");

    Ok(())
}

#[tokio::test]
async fn server_update_on_a_missing_server_is_not_found() -> Result<()> {
    let app = common::spawn().await?;
    let x = app.department("X").await?;
    let y = app.department("Y").await?;
    app.user("mgr", &[Role::Manager], &[x]).await?;
    let foreign = app.server("db-01", Some(y)).await?;
    let token = app.login("mgr").await?;
    let payload = json!({ "update_type": "Reboot" });

    let (status, _) = app
        .request(
            "POST",
            &format!("/servers/{}/updates", Uuid::new_v4()),
            Some(&token),
            Some(payload.clone()),
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // an existing server outside the caller's departments is still a field error
    let (status, body) = app
        .request("POST", &format!("/servers/{foreign}/updates"), Some(&token), Some(payload))
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["field"], "server");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM server_updates")
        .fetch_one(&app.pool)
        .await?;
    assert_eq!(count, 0);

    Ok(())
}

#[tokio::test]
async fn hyperlinks_are_created_by_the_caller_and_editable() -> Result<()> {
    let app = common::spawn().await?;
    let x = app.department("X").await?;
    let manager = app.user("mgr", &[Role::Manager], &[x]).await?;
    let server = app.server("web-01", Some(x)).await?;
    let token = app.login("mgr").await?;

    let (status, link) = app
        .request(
            "POST",
            "/hyperlinks",
            Some(&token),
            Some(json!({ "server_id": server, "url": "https://intranet.example.com" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{link}");
    assert_eq!(link["created_by"], manager.to_string());
    assert_eq!(link["is_enabled"], true);
    let link_id = link["id"].as_str().unwrap_or_default().to_string();

    let (status, link) = app
        .request("PUT", &format!("/hyperlinks/{link_id}"), Some(&token), Some(json!({ "is_enabled": false })))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(link["is_enabled"], false);

    let (status, body) = app
        .request("PUT", &format!("/hyperlinks/{link_id}"), Some(&token), Some(json!({ "url": "  " })))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "url");

    Ok(())
}
