//! Configuration loaded once at start-up and passed to every component

use std::time::Duration;

use crate::error::{ApiError, Result};
use crate::platform::Environment;

/// Google's published signing keys
pub const GOOGLE_JWKS_URI: &str = "https://www.googleapis.com/oauth2/v3/certs";

/// Apple's published signing keys
pub const APPLE_JWKS_URI: &str = "https://appleid.apple.com/auth/keys";

/// Maximum age of a cached key set (1 hour)
pub const DEFAULT_KEY_SET_TTL_SECS: u64 = 3600;

/// Minimum age of a key set before an unknown kid may trigger a refresh
pub const DEFAULT_KEY_REFRESH_COOLDOWN_SECS: u64 = 60;

/// Bound on key-set and credential-exchange calls
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 5;

/// Leeway for `nbf` and `iat`
pub const DEFAULT_CLOCK_SKEW_SECS: u64 = 60;

/// Per-provider verification settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Expected `aud` claim (the application's client id at the provider)
    pub client_id: String,
    /// Key-set endpoint
    pub jwks_uri: String,
}

/// Identity pool that mints session credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CognitoSettings {
    pub region: Option<String>,
    pub user_pool_id: String,
    pub client_id: String,
    pub endpoint: String,
}

/// Application configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    pub google: ProviderSettings,
    pub apple: ProviderSettings,
    /// `None` when the identity pool is not configured; logins then degrade
    pub cognito: Option<CognitoSettings>,
    pub key_set_ttl: Duration,
    pub key_refresh_cooldown: Duration,
    pub upstream_timeout: Duration,
    pub clock_skew_secs: u64,
}

impl Config {
    /// Load configuration from platform environment
    pub fn from_env(env: &dyn Environment) -> Result<Self> {
        let google = ProviderSettings {
            client_id: required(env, "GOOGLE_CLIENT_ID")?,
            jwks_uri: env
                .get_optional("GOOGLE_JWKS_URI")
                .unwrap_or_else(|| GOOGLE_JWKS_URI.to_string()),
        };
        validate_endpoint_url("GOOGLE_JWKS_URI", &google.jwks_uri)?;

        let apple = ProviderSettings {
            client_id: required(env, "APPLE_CLIENT_ID")?,
            jwks_uri: env
                .get_optional("APPLE_JWKS_URI")
                .unwrap_or_else(|| APPLE_JWKS_URI.to_string()),
        };
        validate_endpoint_url("APPLE_JWKS_URI", &apple.jwks_uri)?;

        Ok(Self {
            google,
            apple,
            cognito: cognito_from_env(env)?,
            key_set_ttl: Duration::from_secs(secs(env, "KEY_SET_TTL_SECS", DEFAULT_KEY_SET_TTL_SECS)?),
            key_refresh_cooldown: Duration::from_secs(secs(
                env,
                "KEY_REFRESH_COOLDOWN_SECS",
                DEFAULT_KEY_REFRESH_COOLDOWN_SECS,
            )?),
            upstream_timeout: Duration::from_secs(secs(
                env,
                "UPSTREAM_TIMEOUT_SECS",
                DEFAULT_UPSTREAM_TIMEOUT_SECS,
            )?),
            clock_skew_secs: secs(env, "CLOCK_SKEW_SECS", DEFAULT_CLOCK_SKEW_SECS)?,
        })
    }
}

fn required(env: &dyn Environment, name: &str) -> Result<String> {
    env.get_optional(name)
        .ok_or_else(|| ApiError::internal(format!("{} not configured", name)))
}

fn secs(env: &dyn Environment, name: &str, default: u64) -> Result<u64> {
    match env.get_optional(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::internal(format!("{} must be a whole number of seconds", name))),
        None => Ok(default),
    }
}

/// Cognito is configured only when both the pool id and the app client id
/// are set; anything less leaves the exchange disabled.
fn cognito_from_env(env: &dyn Environment) -> Result<Option<CognitoSettings>> {
    let (Some(user_pool_id), Some(client_id)) = (
        env.get_optional("COGNITO_USER_POOL_ID"),
        env.get_optional("COGNITO_APP_CLIENT_ID"),
    ) else {
        return Ok(None);
    };

    let region = env
        .get_optional("COGNITO_REGION")
        .or_else(|| region_from_pool_id(&user_pool_id))
        .or_else(|| env.get_optional("AWS_REGION"));

    let endpoint = match (env.get_optional("COGNITO_ENDPOINT"), &region) {
        (Some(endpoint), _) => endpoint,
        (None, Some(region)) => format!("https://cognito-idp.{}.amazonaws.com/", region),
        (None, None) => {
            return Err(ApiError::internal(
                "cannot determine Cognito region: set COGNITO_REGION or use a region-prefixed COGNITO_USER_POOL_ID",
            ))
        }
    };
    validate_endpoint_url("COGNITO_ENDPOINT", &endpoint)?;

    Ok(Some(CognitoSettings {
        region,
        user_pool_id,
        client_id,
        endpoint,
    }))
}

/// Pool ids look like `eu-west-1_AbCdEf123`
fn region_from_pool_id(pool_id: &str) -> Option<String> {
    let (region, rest) = pool_id.split_once('_')?;
    if region.contains('-') && !rest.is_empty() {
        Some(region.to_string())
    } else {
        None
    }
}

/// Outbound endpoints must be HTTPS (plain HTTP only for local development)
fn validate_endpoint_url(name: &str, endpoint: &str) -> Result<()> {
    let url = url::Url::parse(endpoint)
        .map_err(|_| ApiError::internal(format!("{} is not a valid URL", name)))?;

    let is_localhost = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"));
    if url.scheme() != "https" && !(url.scheme() == "http" && is_localhost) {
        return Err(ApiError::internal(format!("{} must use HTTPS", name)));
    }

    if url.query().is_some() {
        return Err(ApiError::internal(format!("{} must not have a query string", name)));
    }

    if url.fragment().is_some() {
        return Err(ApiError::internal(format!("{} must not have a fragment", name)));
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(ApiError::internal(format!("{} must not have userinfo", name)));
    }

    Ok(())
}
