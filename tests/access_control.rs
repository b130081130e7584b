mod common;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use server_inventory::authz::Role;

fn ids(values: &Value) -> Vec<String> {
    values
        .as_array()
        .map(|items| items.iter().filter_map(|v| v["id"].as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn manager_cannot_create_server_in_foreign_department() -> Result<()> {
    let app = common::spawn().await?;
    let x = app.department("X").await?;
    let y = app.department("Y").await?;
    app.user("mgr", &[Role::Manager], &[x]).await?;
    let token = app.login("mgr").await?;

    let (status, body) = app
        .request(
            "POST",
            "/servers",
            Some(&token),
            Some(json!({ "name": "web-01", "ip_address": "10.0.0.5", "os": "linux", "department_id": y })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert_eq!(body["field"], "department");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM servers").fetch_one(&app.pool).await?;
    assert_eq!(count, 0);

    let (status, body) = app
        .request(
            "POST",
            "/servers",
            Some(&token),
            Some(json!({ "name": "web-01", "ip_address": "10.0.0.5", "os": "linux", "department_id": x })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["department_id"], x.to_string());

    Ok(())
}

#[tokio::test]
async fn manager_edits_own_department_but_never_deletes() -> Result<()> {
    let app = common::spawn().await?;
    let x = app.department("X").await?;
    let y = app.department("Y").await?;
    app.user("mgr", &[Role::Manager], &[x]).await?;
    let own = app.server("own", Some(x)).await?;
    let foreign = app.server("foreign", Some(y)).await?;
    let token = app.login("mgr").await?;

    let (status, body) = app
        .request("PUT", &format!("/servers/{own}"), Some(&token), Some(json!({ "os": "debian" })))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["os"], "debian");

    let (status, _) = app
        .request("PUT", &format!("/servers/{foreign}"), Some(&token), Some(json!({ "os": "debian" })))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.request("DELETE", &format!("/servers/{own}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // moving a server out of the manager's departments is an assignment violation
    let (status, body) = app
        .request("PUT", &format!("/servers/{own}"), Some(&token), Some(json!({ "department_id": y })))
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["field"], "department");

    Ok(())
}

#[tokio::test]
async fn viewer_sees_only_own_certificates_and_cannot_delete() -> Result<()> {
    let app = common::spawn().await?;
    let x = app.department("X").await?;
    let y = app.department("Y").await?;
    app.user("viewer", &[Role::Viewer], &[x]).await?;

    let server_x = app.server("x-web", Some(x)).await?;
    let server_y = app.server("y-web", Some(y)).await?;
    let link_x = app.hyperlink(server_x, "https://x.example.com").await?;
    let link_y = app.hyperlink(server_y, "https://y.example.com").await?;
    let cert_x = app.certificate(link_x, Utc::now() + Duration::days(90), "pending").await?;
    let cert_y = app.certificate(link_y, Utc::now() + Duration::days(3), "pending").await?;

    let token = app.login("viewer").await?;
    let (status, body) = app.request("GET", "/ssl-certificates", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    let visible: Vec<String> = ["critical", "warning", "valid", "expired", "unknown"]
        .iter()
        .flat_map(|bucket| ids(&body[*bucket]))
        .collect();
    assert_eq!(visible, vec![cert_x.to_string()]);
    assert_eq!(ids(&body["valid"]), vec![cert_x.to_string()]);

    let (status, _) = app.request("GET", &format!("/ssl-certificates/{cert_y}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.request("DELETE", &format!("/hyperlinks/{link_x}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.request("DELETE", &format!("/servers/{server_x}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request("POST", &format!("/hyperlinks/{link_x}/check-ssl"), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn viewer_cannot_create_anything() -> Result<()> {
    let app = common::spawn().await?;
    let x = app.department("X").await?;
    app.user("viewer", &[Role::Viewer], &[x]).await?;
    let server = app.server("x-web", Some(x)).await?;
    let token = app.login("viewer").await?;

    let (status, _) = app
        .request(
            "POST",
            "/servers",
            Some(&token),
            Some(json!({ "name": "web", "ip_address": "10.0.0.5", "os": "linux", "department_id": x })),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request("POST", "/services", Some(&token), Some(json!({ "server_id": server, "name": "nginx" })))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(
            "POST",
            &format!("/servers/{server}/updates"),
            Some(&token),
            Some(json!({ "update_type": "patch" })),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn child_records_follow_the_parent_department() -> Result<()> {
    let app = common::spawn().await?;
    let x = app.department("X").await?;
    let y = app.department("Y").await?;
    app.user("mgr", &[Role::Manager], &[x]).await?;
    let own = app.server("own", Some(x)).await?;
    let foreign = app.server("foreign", Some(y)).await?;
    let token = app.login("mgr").await?;

    let (status, body) = app
        .request(
            "POST",
            "/services",
            Some(&token),
            Some(json!({ "server_id": foreign, "name": "nginx", "port": 443 })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["field"], "server");

    let (status, body) = app
        .request(
            "POST",
            "/services",
            Some(&token),
            Some(json!({ "server_id": own, "name": "nginx", "port": 443 })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["department_id"], x.to_string());
    let service_id = body["id"].as_str().unwrap_or_default().to_string();

    // re-parenting onto a foreign server is rejected
    let (status, body) = app
        .request(
            "PUT",
            &format!("/services/{service_id}"),
            Some(&token),
            Some(json!({ "server_id": foreign })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["field"], "server");

    let (status, body) = app
        .request(
            "POST",
            "/services",
            Some(&token),
            Some(json!({ "server_id": Uuid::new_v4(), "name": "ghost" })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["field"], "server");

    let (status, body) = app.request("GET", "/services", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec![service_id]);

    Ok(())
}

#[tokio::test]
async fn lists_are_narrowed_to_the_caller_scope() -> Result<()> {
    let app = common::spawn().await?;
    let x = app.department("X").await?;
    let y = app.department("Y").await?;
    app.user("mgr", &[Role::Manager], &[x]).await?;
    app.user("admin", &[Role::Admin], &[]).await?;
    app.user("nobody", &[], &[x]).await?;
    let in_x = app.server("a-x", Some(x)).await?;
    app.server("b-y", Some(y)).await?;
    app.server("c-none", None).await?;

    let token = app.login("mgr").await?;
    let (status, body) = app.request("GET", "/servers", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body["items"]), vec![in_x.to_string()]);
    assert_eq!(body["total"], 1);

    let token = app.login("admin").await?;
    let (_, body) = app.request("GET", "/servers", Some(&token), None).await?;
    assert_eq!(body["total"], 3);

    let (_, body) = app.request("GET", "/dashboard", Some(&token), None).await?;
    assert_eq!(body["servers"], 3);
    assert_eq!(body["role"], "Admin");

    // role None is authenticated but may not list
    let token = app.login("nobody").await?;
    let (status, _) = app.request("GET", "/servers", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = app.request("GET", "/dashboard", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["servers"], 0);

    Ok(())
}

#[tokio::test]
async fn missing_records_are_not_found_before_policy() -> Result<()> {
    let app = common::spawn().await?;
    let x = app.department("X").await?;
    app.user("viewer", &[Role::Viewer], &[x]).await?;
    let token = app.login("viewer").await?;

    let (status, body) = app
        .request("GET", &format!("/servers/{}", Uuid::new_v4()), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");

    let (status, _) = app
        .request("DELETE", &format!("/hosts/{}", Uuid::new_v4()), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn server_pagination_validates_page_size() -> Result<()> {
    let app = common::spawn().await?;
    app.user("admin", &[Role::Admin], &[]).await?;
    for i in 0..12 {
        app.server(&format!("srv-{i:02}"), None).await?;
    }
    let token = app.login("admin").await?;

    let (status, body) = app.request("GET", "/servers?per_page=7", Some(&token), None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "per_page");

    let (status, body) = app.request("GET", "/servers?page=2&per_page=10", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 12);
    assert_eq!(body["total_pages"], 2);
    assert_eq!(body["items"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["items"][0]["name"], "srv-10");

    Ok(())
}

#[tokio::test]
async fn departments_and_users_are_admin_managed() -> Result<()> {
    let app = common::spawn().await?;
    let x = app.department("X").await?;
    app.user("mgr", &[Role::Manager], &[x]).await?;
    app.user("admin", &[Role::Admin], &[]).await?;

    let token = app.login("mgr").await?;
    let (status, _) = app.request("POST", "/departments", Some(&token), Some(json!({ "name": "Z" }))).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.request("GET", "/users", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = app.request("GET", "/departments", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec![x.to_string()]);

    let token = app.login("admin").await?;
    let (status, _) = app.request("POST", "/departments", Some(&token), Some(json!({ "name": "X" }))).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .request(
            "POST",
            "/users",
            Some(&token),
            Some(json!({
                "username": "new-viewer",
                "email": "nv@example.com",
                "password": "password123",
                "groups": ["Viewer"],
                "department_ids": [x]
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["groups"], json!(["Viewer"]));

    Ok(())
}

#[tokio::test]
async fn requests_without_a_valid_token_are_rejected() -> Result<()> {
    let app = common::spawn().await?;

    let (status, _) = app.request("GET", "/servers", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.request("GET", "/servers", Some("not-a-jwt"), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}
