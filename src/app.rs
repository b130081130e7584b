use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{DepartmentPolicy, PolicyEvaluator, SessionStore};
use crate::db::sessions::SqliteSessionStore;
use crate::docs;
use crate::errors::AppError;
use crate::jwt::JwtConfig;
use crate::routes::{
    audit_log, auth, dashboard, departments, health, hosts, hyperlinks, server_updates, servers, services,
    ssl_certificates, users, vms,
};
use crate::ssl::{CertificateProbe, DisabledProbe};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub policy: Arc<dyn PolicyEvaluator>,
    pub sessions: Arc<dyn SessionStore>,
    pub probe: Arc<dyn CertificateProbe>,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig) -> Self {
        Self {
            sessions: Arc::new(SqliteSessionStore::new(pool.clone())),
            pool,
            jwt: Arc::new(jwt),
            policy: Arc::new(DepartmentPolicy::new()),
            probe: Arc::new(DisabledProbe),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn CertificateProbe>) -> Self {
        self.probe = probe;
        self
    }
}

/// Listening port from `APP_PORT`, 8000 when unset or invalid.
pub fn app_port() -> u16 {
    std::env::var("APP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000)
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    router(AppState::new(pool, jwt_config))
}

/// Full HTTP surface over an already-built state.
pub fn router(state: AppState) -> Result<Router, AppError> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout))
        .route("/stop-impersonating", post(auth::stop_impersonating));

    let department_routes = Router::new()
        .route("/", get(departments::list_departments).post(departments::create_department))
        .route(
            "/:id",
            get(departments::get_department)
                .put(departments::update_department)
                .delete(departments::delete_department),
        );

    let user_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route("/:id", get(users::get_user).put(users::update_user).delete(users::delete_user))
        .route("/:id/impersonate", post(users::impersonate_user));

    let server_routes = Router::new()
        .route("/", get(servers::list_servers).post(servers::create_server))
        .route(
            "/:id",
            get(servers::get_server).put(servers::update_server).delete(servers::delete_server),
        )
        .route(
            "/:id/updates",
            get(server_updates::list_server_updates).post(server_updates::create_server_update),
        );

    let service_routes = Router::new()
        .route("/", get(services::list_services).post(services::create_service))
        .route(
            "/:id",
            get(services::get_service).put(services::update_service).delete(services::delete_service),
        );

    let hyperlink_routes = Router::new()
        .route("/", get(hyperlinks::list_hyperlinks).post(hyperlinks::create_hyperlink))
        .route(
            "/:id",
            get(hyperlinks::get_hyperlink)
                .put(hyperlinks::update_hyperlink)
                .delete(hyperlinks::delete_hyperlink),
        )
        .route("/:id/check-ssl", post(hyperlinks::check_ssl));

    let host_routes = Router::new()
        .route("/", get(hosts::list_hosts).post(hosts::create_host))
        .route("/:id", get(hosts::get_host).put(hosts::update_host).delete(hosts::delete_host))
        .route("/:id/vms", get(hosts::list_host_vms));

    let vm_routes = Router::new()
        .route("/", get(vms::list_vms).post(vms::create_vm))
        .route("/:id", get(vms::get_vm).put(vms::update_vm).delete(vms::delete_vm));

    let certificate_routes = Router::new()
        .route("/", get(ssl_certificates::list_certificates))
        .route("/run-check", post(ssl_certificates::run_check))
        .route("/:id", get(ssl_certificates::get_certificate));

    let audit_routes = Router::new()
        .route("/", get(audit_log::list_entries))
        .route("/verify", get(audit_log::verify));

    let api = Router::new()
        .route("/api/health", get(health::health))
        .route("/dashboard", get(dashboard::dashboard))
        .nest("/auth", auth_routes)
        .nest("/departments", department_routes)
        .nest("/users", user_routes)
        .nest("/servers", server_routes)
        .nest("/services", service_routes)
        .nest("/hyperlinks", hyperlink_routes)
        .nest("/hosts", host_routes)
        .nest("/vms", vm_routes)
        .nest("/ssl-certificates", certificate_routes)
        .nest("/audit-log", audit_routes)
        .with_state(state);

    let router = api
        .merge(docs::swagger_routes(docs::build_openapi(app_port())?)?)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
