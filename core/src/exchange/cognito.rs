//! Cognito user pool backend
//!
//! Calls `InitiateAuth` over the pool's JSON protocol. The call is unsigned;
//! the app client id is the only credential it needs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CredentialIssuer, InitiateAuthRequest, SessionCredential};
use crate::config::CognitoSettings;
use crate::error::{ApiError, Result};
use crate::platform::HttpClient;

const INITIATE_AUTH_TARGET: &str = "AWSCognitoIdentityProviderService.InitiateAuth";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthBody<'a> {
    auth_flow: &'a str,
    client_id: &'a str,
    auth_parameters: &'a BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    #[serde(default)]
    authentication_result: Option<AuthenticationResult>,
    #[serde(default)]
    challenge_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Error body of the AWS JSON protocol
#[derive(Deserialize)]
struct CognitoErrorBody {
    #[serde(rename = "__type", default)]
    kind: Option<String>,
    #[serde(alias = "Message", default)]
    message: Option<String>,
}

/// Error types that describe the pool or its triggers rather than the user
///
/// These mean the exchange is not usable as configured, so the login
/// degrades instead of being refused. An answer with no recognizable error
/// type did not come from Cognito and is treated the same way.
const BACKEND_FAULTS: &[&str] = &[
    "InvalidParameterException",
    "ResourceNotFoundException",
    "InvalidUserPoolConfigurationException",
    "InvalidLambdaResponseException",
    "UnexpectedLambdaException",
    "UserLambdaValidationException",
    "TooManyRequestsException",
    "LimitExceededException",
    "InternalErrorException",
];

fn is_backend_fault(kind: &str) -> bool {
    BACKEND_FAULTS.contains(&kind)
}

/// `CredentialIssuer` backed by a Cognito user pool
pub struct CognitoIssuer {
    http: Arc<dyn HttpClient>,
    endpoint: String,
}

impl CognitoIssuer {
    pub fn new(settings: &CognitoSettings, http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            endpoint: settings.endpoint.clone(),
        }
    }
}

#[async_trait]
impl CredentialIssuer for CognitoIssuer {
    async fn initiate_auth(&self, request: &InitiateAuthRequest) -> Result<SessionCredential> {
        let body = InitiateAuthBody {
            auth_flow: &request.auth_flow,
            client_id: &request.client_id,
            auth_parameters: &request.auth_parameters,
        };
        let body_bytes = serde_json::to_vec(&body)
            .map_err(|e| ApiError::internal(format!("failed to encode InitiateAuth: {}", e)))?;

        let headers = [
            ("Content-Type", "application/x-amz-json-1.1"),
            ("X-Amz-Target", INITIATE_AUTH_TARGET),
            ("User-Agent", "fedlogin"),
        ];

        let response = self
            .http
            .post(&self.endpoint, &headers, &body_bytes)
            .await
            .map_err(|e| match e {
                ApiError::UpstreamTimeout { .. } => e,
                other => ApiError::exchange_unavailable(format!("failed to call Cognito: {}", other)),
            })?;

        if response.status >= 500 {
            return Err(ApiError::exchange_unavailable(format!(
                "Cognito error (HTTP {})",
                response.status
            )));
        }

        if response.status != 200 {
            let error: CognitoErrorBody = response.json().unwrap_or_else(|_| {
                tracing::debug!(
                    status = response.status,
                    body = %response.text().unwrap_or_default(),
                    "Cognito error body is not JSON"
                );
                CognitoErrorBody {
                    kind: None,
                    message: None,
                }
            });
            let kind = error.kind.as_deref().and_then(|k| k.rsplit('#').next());
            let detail = format!(
                "{} (HTTP {}): {}",
                kind.unwrap_or("UnknownError"),
                response.status,
                error.message.unwrap_or_default()
            );
            return Err(match kind {
                Some(kind) if !is_backend_fault(kind) => ApiError::exchange_rejected(detail),
                _ => ApiError::exchange_unavailable(detail),
            });
        }

        let parsed: InitiateAuthResponse = response
            .json()
            .map_err(|e| ApiError::exchange_unavailable(format!("failed to parse Cognito response: {}", e)))?;

        match (parsed.authentication_result, parsed.challenge_name) {
            (Some(result), _) => Ok(SessionCredential {
                access_token: result.access_token.unwrap_or_default(),
                id_token: result.id_token.unwrap_or_default(),
                refresh_token: result.refresh_token.unwrap_or_default(),
            }),
            (None, Some(challenge)) => Err(ApiError::exchange_unavailable(format!(
                "Cognito answered with a '{}' challenge instead of tokens",
                challenge
            ))),
            (None, None) => Err(ApiError::exchange_unavailable(
                "Cognito response carried no authentication result",
            )),
        }
    }
}
