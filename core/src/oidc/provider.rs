//! Identity provider strategies
//!
//! Google and Apple tokens go through the same pipeline; what differs is
//! the algorithm allow-list, the accepted issuers and the parameters handed
//! to the credential backend.

use std::collections::BTreeMap;
use std::fmt;

use jsonwebtoken::Algorithm;
use serde::Serialize;

use super::validate::VerifiedIdentity;
use crate::config::ProviderSettings;
use crate::exchange::ExchangeParams;

/// Supported identity providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Apple,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::Apple => "Apple",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Provider-specific verification and exchange rules
pub trait IdentityProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// The only signing algorithms a token from this provider may declare
    fn allowed_algorithms(&self) -> &'static [Algorithm];

    /// Accepted values of the `iss` claim
    fn issuers(&self) -> &'static [&'static str];

    /// Expected `aud` claim
    fn audience(&self) -> &str;

    /// Auth flow and parameters for the credential backend
    fn exchange_params(&self, identity: &VerifiedIdentity, raw_token: &str) -> ExchangeParams;
}

/// Sign in with Google
pub struct GoogleProvider {
    settings: ProviderSettings,
}

impl GoogleProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

impl IdentityProvider for GoogleProvider {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn allowed_algorithms(&self) -> &'static [Algorithm] {
        &[Algorithm::RS256]
    }

    fn issuers(&self) -> &'static [&'static str] {
        &["accounts.google.com", "https://accounts.google.com"]
    }

    fn audience(&self) -> &str {
        &self.settings.client_id
    }

    fn exchange_params(&self, identity: &VerifiedIdentity, raw_token: &str) -> ExchangeParams {
        let mut auth_parameters = BTreeMap::new();
        auth_parameters.insert("IDENTITY_PROVIDER".to_string(), "Google".to_string());
        auth_parameters.insert("USERNAME".to_string(), identity.username().to_string());
        auth_parameters.insert("ID_TOKEN".to_string(), raw_token.to_string());

        ExchangeParams {
            auth_flow: "USER_SRP_AUTH".to_string(),
            auth_parameters,
        }
    }
}

/// Sign in with Apple
pub struct AppleProvider {
    settings: ProviderSettings,
}

impl AppleProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

impl IdentityProvider for AppleProvider {
    fn provider(&self) -> Provider {
        Provider::Apple
    }

    fn allowed_algorithms(&self) -> &'static [Algorithm] {
        &[Algorithm::ES256, Algorithm::ES384]
    }

    fn issuers(&self) -> &'static [&'static str] {
        &["https://appleid.apple.com"]
    }

    fn audience(&self) -> &str {
        &self.settings.client_id
    }

    fn exchange_params(&self, identity: &VerifiedIdentity, _raw_token: &str) -> ExchangeParams {
        let mut auth_parameters = BTreeMap::new();
        auth_parameters.insert("USERNAME".to_string(), identity.username().to_string());

        ExchangeParams {
            auth_flow: "CUSTOM_AUTH".to_string(),
            auth_parameters,
        }
    }
}
