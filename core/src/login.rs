//! Login endpoint implementation
//!
//! Decodes a login request, verifies the presented token with the matching
//! provider and exchanges the verified identity for session credentials.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{ApiError, ErrorResponse};
use crate::exchange::{CognitoIssuer, CredentialExchange, CredentialIssuer, SessionCredential};
use crate::oidc::{
    AppleProvider, GoogleProvider, IdentityProvider, KeyResolver, Provider, TokenVerifier,
    VerifiedIdentity,
};
use crate::platform::{Clock, HttpClient};

/// Login request body
#[derive(Deserialize)]
pub struct LoginRequest {
    pub id_token: String,
}

/// Result of one login attempt
#[derive(Debug)]
pub enum AuthOutcome {
    /// Verified and exchanged
    Success(SessionCredential),
    /// Verified, but no session could be minted
    VerifiedOnly {
        identity: VerifiedIdentity,
        reason: String,
    },
    Failure(ApiError),
}

/// Login response body
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LoginResponse {
    Credentials(SessionCredential),
    Verified { message: String },
    Error(ErrorResponse),
}

impl AuthOutcome {
    /// Degraded mode is not a client error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Success(_) | Self::VerifiedOnly { .. } => 200,
            Self::Failure(e) => e.status_code(),
        }
    }

    pub fn into_response(self) -> LoginResponse {
        match self {
            Self::Success(credential) => LoginResponse::Credentials(credential),
            Self::VerifiedOnly { identity, .. } => LoginResponse::Verified {
                message: format!(
                    "{} login verified for {} (Cognito not configured)",
                    identity.provider,
                    identity.username()
                ),
            },
            Self::Failure(e) => LoginResponse::Error(ErrorResponse::from(&e)),
        }
    }
}

/// Request gateway: one instance serves every request
pub struct Gateway {
    verifier: TokenVerifier,
    exchange: CredentialExchange,
    google: GoogleProvider,
    apple: AppleProvider,
}

impl Gateway {
    pub fn new(config: &Config, http: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Self {
        let issuer: Option<Arc<dyn CredentialIssuer>> = config
            .cognito
            .as_ref()
            .map(|settings| Arc::new(CognitoIssuer::new(settings, http.clone())) as Arc<dyn CredentialIssuer>);

        Self::with_issuer(config, http, clock, issuer)
    }

    /// Build a gateway around an explicit credential backend
    pub fn with_issuer(
        config: &Config,
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        issuer: Option<Arc<dyn CredentialIssuer>>,
    ) -> Self {
        let resolver = Arc::new(KeyResolver::new(config, http, clock.clone()));

        let exchange = match (issuer, &config.cognito) {
            (Some(issuer), Some(cognito)) => {
                CredentialExchange::new(issuer, cognito.client_id.clone(), config.upstream_timeout)
            }
            _ => CredentialExchange::not_configured(),
        };

        Self {
            verifier: TokenVerifier::new(resolver, clock, config.clock_skew_secs),
            exchange,
            google: GoogleProvider::new(config.google.clone()),
            apple: AppleProvider::new(config.apple.clone()),
        }
    }

    /// False when logins can only ever answer verified-only
    pub fn exchange_configured(&self) -> bool {
        self.exchange.is_configured()
    }

    fn identity_provider(&self, provider: Provider) -> &dyn IdentityProvider {
        match provider {
            Provider::Google => &self.google,
            Provider::Apple => &self.apple,
        }
    }

    /// Handle one login request body for `provider`
    #[tracing::instrument(skip(self, body), fields(provider = %provider))]
    pub async fn login(&self, provider: Provider, body: &[u8]) -> AuthOutcome {
        let request: LoginRequest = match serde_json::from_slice(body) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "rejecting request body");
                return AuthOutcome::Failure(ApiError::malformed_request_body(
                    "expected a JSON object with an 'id_token' string",
                ));
            }
        };
        if request.id_token.trim().is_empty() {
            return AuthOutcome::Failure(ApiError::malformed_request_body("'id_token' is empty"));
        }

        let idp = self.identity_provider(provider);

        // 1. Verify
        let identity = match self.verifier.verify(idp, &request.id_token, idp.audience()).await {
            Ok(identity) => identity,
            Err(e) if e.is_verification_failure() => {
                tracing::warn!(error = %e, code = e.error_key(), "token rejected");
                return AuthOutcome::Failure(e);
            }
            Err(e) => {
                tracing::error!(error = %e, code = e.error_key(), "token could not be verified");
                return AuthOutcome::Failure(e);
            }
        };
        tracing::info!(subject = %identity.subject, "verified {} login", provider);

        // 2. Exchange
        match self.exchange.exchange(idp, &identity, &request.id_token).await {
            Ok(credential) => AuthOutcome::Success(credential),
            Err(e @ ApiError::ExchangeRejected { .. }) => {
                tracing::warn!(subject = %identity.subject, error = %e, "credential exchange rejected");
                AuthOutcome::Failure(e)
            }
            Err(e) => {
                tracing::warn!(subject = %identity.subject, error = %e, "credential exchange unavailable, answering verified-only");
                AuthOutcome::VerifiedOnly {
                    identity,
                    reason: e.to_string(),
                }
            }
        }
    }
}
