//! Credential exchange
//!
//! Trades a verified identity for session credentials issued by the
//! identity pool. Only ever called after verification succeeded.

mod cognito;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};
use crate::oidc::{IdentityProvider, VerifiedIdentity};
use crate::platform::with_timeout;

pub use cognito::CognitoIssuer;

/// Session credentials minted by the identity pool, passed through untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredential {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: String,
}

/// Provider-specific auth flow and parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeParams {
    pub auth_flow: String,
    pub auth_parameters: BTreeMap<String, String>,
}

/// Request to the credential-issuing backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateAuthRequest {
    pub auth_flow: String,
    pub client_id: String,
    pub auth_parameters: BTreeMap<String, String>,
}

/// Credential-issuing backend
///
/// Implementations report `ExchangeBackendUnavailable` (or `UpstreamTimeout`)
/// when no session could be minted for reasons other than the identity, and
/// `ExchangeRejected` when the backend refused the identity.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn initiate_auth(&self, request: &InitiateAuthRequest) -> Result<SessionCredential>;
}

struct Backend {
    issuer: Arc<dyn CredentialIssuer>,
    client_id: String,
}

/// Adapter between verified identities and the credential backend
pub struct CredentialExchange {
    backend: Option<Backend>,
    timeout: Duration,
}

impl CredentialExchange {
    pub fn new(issuer: Arc<dyn CredentialIssuer>, client_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            backend: Some(Backend {
                issuer,
                client_id: client_id.into(),
            }),
            timeout,
        }
    }

    /// An exchange with no backend; every call reports the backend unavailable
    pub fn not_configured() -> Self {
        Self {
            backend: None,
            timeout: Duration::ZERO,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn exchange(
        &self,
        provider: &dyn IdentityProvider,
        identity: &VerifiedIdentity,
        raw_token: &str,
    ) -> Result<SessionCredential> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| ApiError::exchange_unavailable("credential backend not configured"))?;

        let params = provider.exchange_params(identity, raw_token);
        let request = InitiateAuthRequest {
            auth_flow: params.auth_flow,
            client_id: backend.client_id.clone(),
            auth_parameters: params.auth_parameters,
        };

        with_timeout(
            self.timeout,
            "credential exchange",
            backend.issuer.initiate_auth(&request),
        )
        .await
    }
}
