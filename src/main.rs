use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use server_inventory::app::{app_port, router, AppState};
use server_inventory::db;
use server_inventory::jwt::JwtConfig;
use server_inventory::ssl::{self, DisabledProbe, LogNotifier, SslSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let pool = db::init().await?;
    let jwt_config = JwtConfig::from_env()?;
    let ssl_settings = SslSettings::from_env()?;

    let state = AppState::new(pool.clone(), jwt_config);
    let app = router(state)?;

    if ssl_settings.scheduler_enabled {
        tracing::info!(
            interval_secs = ssl_settings.check_interval.as_secs(),
            notification_days = ?ssl_settings.notification_days,
            "starting SSL scheduler"
        );
        ssl::spawn_scheduler(pool, Arc::new(DisabledProbe), Arc::new(LogNotifier), ssl_settings);
    } else {
        tracing::info!("SSL scheduler disabled");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], app_port()));

    match (std::env::var("TLS_CERT_PATH"), std::env::var("TLS_KEY_PATH")) {
        (Ok(cert_path), Ok(key_path)) => {
            let config = RustlsConfig::from_pem_file(&cert_path, &key_path)
                .await
                .with_context(|| format!("failed to load TLS certificate from {cert_path}"))?;

            tracing::info!("listening on https://{}", addr);
            axum_server::bind_rustls(addr, config)
                .serve(app.into_make_service())
                .await?;
        }
        _ => {
            tracing::info!("listening on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app.into_make_service()).await?;
        }
    }

    Ok(())
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
