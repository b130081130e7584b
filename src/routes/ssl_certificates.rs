use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{Action, Operation, ResourceType};
use crate::errors::AppResult;
use crate::models::ssl_certificate::{
    CertificateGroups, DbSslCertificate, SslCertificate, SSL_CERTIFICATE_COLUMNS,
};
use crate::routes::{authorize, authorize_instance, fetch_by_id, fetch_scoped};
use crate::session::CurrentUser;
use crate::ssl::{self, CheckSummary};

/// Certificates visible to the caller, bucketed by expiry status.
#[utoipa::path(
    get,
    path = "/ssl-certificates",
    tag = "SSL Certificates",
    responses((status = 200, description = "Certificates grouped by status", body = CertificateGroups))
)]
pub async fn list_certificates(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<CertificateGroups>> {
    authorize(&state, &user, ResourceType::SslCertificate, Action::List)?;
    let certificates = fetch_scoped::<DbSslCertificate, SslCertificate>(
        &state,
        &user,
        ResourceType::SslCertificate,
        SSL_CERTIFICATE_COLUMNS,
        None,
        "c.expiry_date IS NULL, c.expiry_date",
    )
    .await?;
    Ok(Json(CertificateGroups::from_certificates(certificates)))
}

#[utoipa::path(
    get,
    path = "/ssl-certificates/{id}",
    tag = "SSL Certificates",
    params(("id" = Uuid, Path, description = "Certificate id")),
    responses((status = 200, description = "Certificate detail", body = SslCertificate))
)]
pub async fn get_certificate(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SslCertificate>> {
    authorize_instance(&state, &user, ResourceType::SslCertificate, Action::View, id).await?;
    let mut conn = state.pool.acquire().await?;
    let certificate = fetch_by_id::<DbSslCertificate, SslCertificate>(
        &mut conn,
        ResourceType::SslCertificate,
        SSL_CERTIFICATE_COLUMNS,
        id,
    )
    .await?;
    Ok(Json(certificate))
}

#[utoipa::path(
    post,
    path = "/ssl-certificates/run-check",
    tag = "SSL Certificates",
    responses(
        (status = 200, description = "Batch check finished", body = CheckSummary),
        (status = 403, description = "Admin only")
    )
)]
pub async fn run_check(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<CheckSummary>> {
    let op = Operation::new(ResourceType::SslCertificate, Action::Update).with_allowed_roles(&[]);
    state.policy.authorize(&user.identity, &op, None)?;

    let summary = ssl::check_all(&state.pool, state.probe.as_ref(), &user.audit_context()).await?;
    Ok(Json(summary))
}
