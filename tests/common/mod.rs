#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use server_inventory::authz::Role;
use server_inventory::db::users;
use server_inventory::jwt::JwtConfig;
use server_inventory::ssl::CertificateProbe;
use server_inventory::utils::hash_password;
use server_inventory::{router, AppState};

pub const PASSWORD: &str = "password123";

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    // keeps the database file alive for the test
    _dir: TempDir,
}

pub async fn spawn() -> Result<TestApp> {
    spawn_with(|state| state).await
}

pub async fn spawn_with_probe(probe: Arc<dyn CertificateProbe>) -> Result<TestApp> {
    spawn_with(move |state| state.with_probe(probe)).await
}

async fn spawn_with(configure: impl FnOnce(AppState) -> AppState) -> Result<TestApp> {
    let dir = tempfile::tempdir().context("failed to create tempdir")?;
    let pool = test_pool(&dir).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let state = configure(AppState::new(pool.clone(), JwtConfig::from_env()?));
    let app = router(state)?;

    Ok(TestApp { app, pool, _dir: dir })
}

/// A migrated SQLite database in a temp file.
pub async fn test_pool(dir: &TempDir) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator =
        sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;
    Ok(pool)
}

impl TestApp {
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        self.request_with_headers(method, uri, token, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let resp = self.app.clone().oneshot(req).await?;
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .with_context(|| format!("non-JSON body: {}", String::from_utf8_lossy(&bytes)))?
        };
        Ok((status, value))
    }

    pub async fn login(&self, username: &str) -> Result<String> {
        let (status, body) = self
            .request(
                "POST",
                "/auth/login",
                None,
                Some(serde_json::json!({ "username": username, "password": PASSWORD })),
            )
            .await?;
        assert_eq!(status, StatusCode::OK, "login failed for {username}: {body}");
        body["token"].as_str().map(str::to_string).context("missing token")
    }

    pub async fn department(&self, name: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query("INSERT INTO departments (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(id.to_string())
            .bind(name)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn user(&self, username: &str, roles: &[Role], departments: &[Uuid]) -> Result<Uuid> {
        self.insert_user(username, roles, departments, false).await
    }

    pub async fn superuser(&self, username: &str) -> Result<Uuid> {
        self.insert_user(username, &[], &[], true).await
    }

    async fn insert_user(&self, username: &str, roles: &[Role], departments: &[Uuid], is_superuser: bool) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let hash = hash_password(PASSWORD)?;
        let email = format!("{username}@example.com");

        let mut conn = self.pool.acquire().await?;
        users::insert_user(&mut conn, id, username, &email, "", "", &hash, is_superuser).await?;
        for role in roles {
            users::add_group(&mut conn, id, *role).await?;
        }
        for department_id in departments {
            users::add_department(&mut conn, id, *department_id).await?;
        }
        Ok(id)
    }

    pub async fn server(&self, name: &str, department_id: Option<Uuid>) -> Result<Uuid> {
        self.server_owned_by(name, department_id, None).await
    }

    pub async fn server_owned_by(&self, name: &str, department_id: Option<Uuid>, owner_id: Option<Uuid>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO servers (id, name, ip_address, os, department_id, owner_id, created_at, updated_at) VALUES (?, ?, '10.0.0.1', 'linux', ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(name)
        .bind(department_id.map(|id| id.to_string()))
        .bind(owner_id.map(|id| id.to_string()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn hyperlink(&self, server_id: Uuid, url: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO hyperlinks (id, server_id, url, is_enabled, created_at, updated_at) VALUES (?, ?, ?, 1, ?, ?)",
        )
        .bind(id.to_string())
        .bind(server_id.to_string())
        .bind(url)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn certificate(&self, hyperlink_id: Uuid, expiry_date: DateTime<Utc>, notification_status: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO ssl_certificates (id, hyperlink_id, expiry_date, last_checked, notification_status, is_valid) VALUES (?, ?, ?, ?, ?, 1)",
        )
        .bind(id.to_string())
        .bind(hyperlink_id.to_string())
        .bind(expiry_date)
        .bind(Utc::now())
        .bind(notification_status)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }
}
