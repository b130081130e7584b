//! Admin impersonation
//!
//! An Admin may act as a non-admin principal for the rest of a session. The markers
//! live in a [`SessionStore`]; while they are set, request identity resolution swaps
//! in the impersonated principal and keeps the original one as `impersonator`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{AuthzError, Identity, Principal};
use crate::errors::AppResult;

/// Request header that disables the identity switch for a single request.
pub const BYPASS_HEADER: &str = "x-test-bypass-impersonation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ImpersonationState {
    pub original_principal_id: Uuid,
    pub impersonated_principal_id: Uuid,
}

/// Key-value session storage for impersonation markers
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn impersonation(&self, session_id: Uuid) -> AppResult<Option<ImpersonationState>>;

    async fn set_impersonation(&self, session_id: Uuid, state: &ImpersonationState) -> AppResult<()>;

    async fn clear_impersonation(&self, session_id: Uuid) -> AppResult<()>;
}

/// Validates an impersonation request.
pub fn start(actor: &Identity, target: Option<&Principal>) -> Result<ImpersonationState, AuthzError> {
    if !actor.is_admin() {
        return Err(AuthzError::Forbidden(
            "You do not have permission to impersonate users.".to_string(),
        ));
    }

    let target = target.ok_or_else(|| AuthzError::NotFound("User not found.".to_string()))?;

    if target.is_admin() {
        return Err(AuthzError::Forbidden(
            "You cannot impersonate another administrator or superuser.".to_string(),
        ));
    }

    Ok(ImpersonationState {
        original_principal_id: actor.user_id,
        impersonated_principal_id: target.user_id,
    })
}

pub fn stop(active: Option<ImpersonationState>) -> Result<ImpersonationState, AuthzError> {
    active.ok_or_else(|| AuthzError::InvalidState("You are not impersonating anyone.".to_string()))
}

/// Starts impersonating `target` in the given session.
pub async fn begin(
    store: &dyn SessionStore,
    session_id: Uuid,
    actor: &Identity,
    target: Option<&Principal>,
) -> AppResult<ImpersonationState> {
    let state = start(actor, target)?;
    store.set_impersonation(session_id, &state).await?;

    tracing::info!(
        session_id = %session_id,
        original = %state.original_principal_id,
        impersonated = %state.impersonated_principal_id,
        "impersonation started"
    );
    Ok(state)
}

/// Ends the session's impersonation, returning the markers that were cleared.
pub async fn end(store: &dyn SessionStore, session_id: Uuid) -> AppResult<ImpersonationState> {
    let state = stop(store.impersonation(session_id).await?)?;
    store.clear_impersonation(session_id).await?;

    tracing::info!(
        session_id = %session_id,
        original = %state.original_principal_id,
        "impersonation stopped"
    );
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::{resolve, Role};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        markers: Mutex<HashMap<Uuid, ImpersonationState>>,
    }

    #[async_trait]
    impl SessionStore for MemoryStore {
        async fn impersonation(&self, session_id: Uuid) -> AppResult<Option<ImpersonationState>> {
            Ok(self.markers.lock().unwrap().get(&session_id).copied())
        }

        async fn set_impersonation(&self, session_id: Uuid, state: &ImpersonationState) -> AppResult<()> {
            self.markers.lock().unwrap().insert(session_id, *state);
            Ok(())
        }

        async fn clear_impersonation(&self, session_id: Uuid) -> AppResult<()> {
            self.markers.lock().unwrap().remove(&session_id);
            Ok(())
        }
    }

    fn admin() -> Identity {
        resolve(&Principal::new(Uuid::new_v4(), "admin").with_groups([Role::Admin]))
    }

    #[test]
    fn admin_cannot_impersonate_admins_or_superusers() {
        let actor = admin();
        let other_admin = Principal::new(Uuid::new_v4(), "other").with_groups([Role::Admin]);
        let root = Principal::new(Uuid::new_v4(), "root").superuser();

        assert!(matches!(start(&actor, Some(&other_admin)), Err(AuthzError::Forbidden(_))));
        assert!(matches!(start(&actor, Some(&root)), Err(AuthzError::Forbidden(_))));
    }

    #[test]
    fn non_admin_cannot_impersonate() {
        let manager = resolve(&Principal::new(Uuid::new_v4(), "m").with_groups([Role::Manager]));
        let viewer = Principal::new(Uuid::new_v4(), "v").with_groups([Role::Viewer]);
        assert!(matches!(start(&manager, Some(&viewer)), Err(AuthzError::Forbidden(_))));
    }

    #[test]
    fn missing_target_is_not_found() {
        assert!(matches!(start(&admin(), None), Err(AuthzError::NotFound(_))));
    }

    #[test]
    fn stop_without_impersonation_is_invalid_state() {
        assert!(matches!(stop(None), Err(AuthzError::InvalidState(_))));
    }

    #[tokio::test]
    async fn round_trip_clears_markers() {
        let store = MemoryStore::default();
        let session_id = Uuid::new_v4();
        let actor = admin();
        let manager = Principal::new(Uuid::new_v4(), "manager").with_groups([Role::Manager]);

        let state = begin(&store, session_id, &actor, Some(&manager)).await.unwrap();
        assert_eq!(state.original_principal_id, actor.user_id);
        assert_eq!(state.impersonated_principal_id, manager.user_id);
        assert_eq!(store.impersonation(session_id).await.unwrap(), Some(state));

        let ended = end(&store, session_id).await.unwrap();
        assert_eq!(ended.original_principal_id, actor.user_id);
        assert_eq!(store.impersonation(session_id).await.unwrap(), None);

        assert!(end(&store, session_id).await.is_err());
    }
}
