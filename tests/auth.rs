mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use server_inventory::authz::Role;

#[tokio::test]
async fn registration_yields_a_user_without_role() -> Result<()> {
    let app = common::spawn().await?;

    let (status, body) = app
        .request(
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": "alice", "email": "alice@example.com", "password": "password123" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let token = body["token"].as_str().unwrap_or_default().to_string();
    assert!(body["user"].get("password_hash").is_none());

    let (status, me) = app.request("GET", "/auth/me", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["identity"]["role"], "None");
    assert_eq!(me["is_impersonating"], false);

    // authenticated, but role None may not list inventory
    let (status, _) = app.request("GET", "/hosts", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": "alice", "email": "other@example.com", "password": "password123" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    Ok(())
}

#[tokio::test]
async fn registration_validates_input() -> Result<()> {
    let app = common::spawn().await?;

    let (status, body) = app
        .request(
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": "bob", "email": "bob@example.com", "password": "short" })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "password");

    let (status, body) = app
        .request(
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": "bob", "email": 42, "password": "password123" })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "email");

    Ok(())
}

#[tokio::test]
async fn login_rejects_bad_credentials_and_inactive_users() -> Result<()> {
    let app = common::spawn().await?;
    let id = app.user("carol", &[Role::Viewer], &[]).await?;

    let (status, _) = app
        .request("POST", "/auth/login", None, Some(json!({ "username": "carol", "password": "wrong-password" })))
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = app.login("carol").await?;

    sqlx::query("UPDATE users SET is_active = 0 WHERE id = ?")
        .bind(id.to_string())
        .execute(&app.pool)
        .await?;

    let (status, _) = app
        .request("POST", "/auth/login", None, Some(json!({ "username": "carol", "password": common::PASSWORD })))
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // existing sessions stop working too
    let (status, _) = app.request("GET", "/auth/me", Some(&token), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn admin_cannot_delete_themselves() -> Result<()> {
    let app = common::spawn().await?;
    let admin = app.user("admin", &[Role::Admin], &[]).await?;
    let token = app.login("admin").await?;

    let (status, _) = app.request("DELETE", &format!("/users/{admin}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    Ok(())
}
