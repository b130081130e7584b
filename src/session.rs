//! Per-request identity
//!
//! [`CurrentUser`] turns the bearer token into the identity the policy evaluates,
//! applying the session's impersonation markers on the way.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{client_ip, AuditContext};
use crate::authz::impersonation::BYPASS_HEADER;
use crate::authz::{resolve, Identity, Principal};
use crate::db::{sessions, users};
use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub session_id: Uuid,
    /// The principal whose permissions apply (the impersonated one while impersonating)
    pub principal: Principal,
    pub identity: Identity,
    /// The real principal behind an impersonated request
    pub impersonator_id: Option<Uuid>,
    pub ip_address: Option<String>,
}

impl CurrentUser {
    pub fn user_id(&self) -> Uuid {
        self.identity.user_id
    }

    /// The authenticated (original) principal, regardless of impersonation.
    pub fn real_user_id(&self) -> Uuid {
        self.impersonator_id.unwrap_or(self.identity.user_id)
    }

    pub fn is_impersonating(&self) -> bool {
        self.impersonator_id.is_some()
    }

    pub fn audit_context(&self) -> AuditContext {
        AuditContext::for_actor(self.user_id())
            .with_impersonator(self.impersonator_id)
            .with_ip(self.ip_address.clone())
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = crate::jwt::bearer_token(&parts.headers)?;
        let claims = state.jwt.decode(token)?;

        let session = sessions::find(&state.pool, claims.sid)
            .await?
            .filter(|session| session.user_id == claims.sub)
            .ok_or_else(|| AppError::unauthorized("session expired"))?;

        let real = users::load_principal(&state.pool, session.user_id)
            .await?
            .ok_or_else(|| AppError::unauthorized("user no longer active"))?;

        let bypass = parts.headers.contains_key(BYPASS_HEADER);
        let markers = if bypass {
            None
        } else {
            state.sessions.impersonation(session.id).await?
        };

        let (principal, impersonator_id) = match markers {
            Some(markers) if markers.original_principal_id == real.user_id => {
                match users::load_principal(&state.pool, markers.impersonated_principal_id).await? {
                    Some(target) if target.is_admin() => {
                        tracing::warn!(
                            session_id = %session.id,
                            impersonated = %target.user_id,
                            "impersonated user became an administrator; clearing impersonation"
                        );
                        state.sessions.clear_impersonation(session.id).await?;
                        (real, None)
                    }
                    Some(target) => (target, Some(real.user_id)),
                    None => {
                        tracing::warn!(
                            session_id = %session.id,
                            impersonated = %markers.impersonated_principal_id,
                            "impersonated user no longer exists; clearing impersonation"
                        );
                        state.sessions.clear_impersonation(session.id).await?;
                        (real, None)
                    }
                }
            }
            Some(markers) => {
                tracing::warn!(
                    session_id = %session.id,
                    original = %markers.original_principal_id,
                    "impersonation markers do not belong to the session user; clearing"
                );
                state.sessions.clear_impersonation(session.id).await?;
                (real, None)
            }
            None => (real, None),
        };

        let identity = resolve(&principal);

        Ok(CurrentUser {
            session_id: session.id,
            principal,
            identity,
            impersonator_id,
            ip_address: client_ip(&parts.headers),
        })
    }
}
