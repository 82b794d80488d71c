//! Credential gate.
//!
//! Every request resolves to one of three principals before any handler
//! runs. This module is the only place that reads the raw header;
//! downstream code sees the resolved principal in request extensions.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose, Engine as _};
use reyestr_domain::repositories::ClientRepository;
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;

pub const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub enabled: bool,
    pub admin_keys: HashSet<String>,
}

impl AuthSettings {
    pub fn from_config(config: &reyestr_config::ApiConfig) -> Self {
        Self {
            enabled: config.auth_enabled,
            admin_keys: config.admin_api_keys.iter().cloned().collect(),
        }
    }
}

/// Resolved caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Admin,
    Worker { client_id: Uuid },
    Anonymous,
}

impl Principal {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        match self {
            Principal::Admin => Ok(()),
            Principal::Worker { .. } => {
                Err(ApiError::Forbidden("admin credential required".to_string()))
            }
            Principal::Anonymous => Err(ApiError::Unauthorized),
        }
    }

    pub fn worker_id(&self) -> Option<Uuid> {
        match self {
            Principal::Worker { client_id } => Some(*client_id),
            _ => None,
        }
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Resolve the worker acting on a worker-facing endpoint.
///
/// With authentication enabled only a worker credential passes. With it
/// disabled every caller is an admin and the worker id comes from the
/// request body instead.
pub fn resolve_worker(
    settings: &AuthSettings,
    principal: &Principal,
    body_client_id: Option<Uuid>,
) -> Result<Uuid, ApiError> {
    match principal {
        Principal::Worker { client_id } => Ok(*client_id),
        Principal::Admin if !settings.enabled => {
            body_client_id.ok_or_else(|| {
                ApiError::Validation("client_id is required when authentication is disabled".to_string())
            })
        }
        Principal::Admin => Err(ApiError::Forbidden(
            "worker credential required".to_string(),
        )),
        Principal::Anonymous => Err(ApiError::Unauthorized),
    }
}

/// Admin, or the worker whose own id is being read.
pub fn require_admin_or_self(principal: &Principal, client_id: Uuid) -> Result<(), ApiError> {
    match principal {
        Principal::Admin => Ok(()),
        Principal::Worker { client_id: own } if *own == client_id => Ok(()),
        Principal::Worker { .. } => Err(ApiError::Forbidden(
            "you can only view your own statistics".to_string(),
        )),
        Principal::Anonymous => Err(ApiError::Unauthorized),
    }
}

/// Mint an opaque worker key: 32 random bytes, base64.
pub fn generate_api_key() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let key: [u8; 32] = rng.random();
    general_purpose::STANDARD.encode(key)
}

#[derive(Clone)]
pub struct AuthLayerState {
    pub settings: Arc<AuthSettings>,
    pub client_repo: Arc<dyn ClientRepository>,
}

/// Resolve `X-API-Key` into a principal. A present-but-unknown key is
/// rejected here with 401 and no side effects; an absent key resolves to
/// `Anonymous` and the endpoint guards decide.
pub async fn auth_middleware(
    State(state): State<AuthLayerState>,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    if !state.settings.enabled {
        req.extensions_mut().insert(Principal::Admin);
        return Ok(next.run(req).await);
    }

    let header = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let principal = match header {
        None => Principal::Anonymous,
        Some(key) if state.settings.admin_keys.contains(&key) => Principal::Admin,
        Some(key) => match state.client_repo.find_by_api_key(&key).await {
            Ok(Some(client)) => Principal::Worker {
                client_id: client.id,
            },
            Ok(None) => {
                warn!("rejected request with unknown API key");
                return Err(ApiError::Unauthorized.into_response());
            }
            Err(err) => {
                warn!(error = %err, "credential lookup failed");
                return Err(ApiError::from(err).into_response());
            }
        },
    };

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(enabled: bool) -> AuthSettings {
        AuthSettings {
            enabled,
            admin_keys: HashSet::from(["admin-key".to_string()]),
        }
    }

    #[test]
    fn admin_guard() {
        assert!(Principal::Admin.require_admin().is_ok());
        assert!(matches!(
            Principal::Worker {
                client_id: Uuid::new_v4()
            }
            .require_admin(),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            Principal::Anonymous.require_admin(),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn worker_resolution_with_auth_enabled() {
        let id = Uuid::new_v4();
        let resolved = resolve_worker(
            &settings(true),
            &Principal::Worker { client_id: id },
            None,
        )
        .unwrap();
        assert_eq!(resolved, id);

        // admins are not workers
        assert!(matches!(
            resolve_worker(&settings(true), &Principal::Admin, Some(id)),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            resolve_worker(&settings(true), &Principal::Anonymous, Some(id)),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn worker_resolution_with_auth_disabled() {
        let id = Uuid::new_v4();
        let resolved = resolve_worker(&settings(false), &Principal::Admin, Some(id)).unwrap();
        assert_eq!(resolved, id);

        assert!(matches!(
            resolve_worker(&settings(false), &Principal::Admin, None),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn admin_or_self_guard() {
        let own = Uuid::new_v4();
        let other = Uuid::new_v4();

        assert!(require_admin_or_self(&Principal::Admin, own).is_ok());
        assert!(
            require_admin_or_self(&Principal::Worker { client_id: own }, own).is_ok()
        );
        assert!(matches!(
            require_admin_or_self(&Principal::Worker { client_id: own }, other),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn generated_keys_are_unique_and_opaque() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a, b);
        assert!(a.len() >= 40);
        assert!(general_purpose::STANDARD.decode(&a).is_ok());
    }
}
