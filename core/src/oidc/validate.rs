//! Identity token verification
//!
//! Verifies provider tokens by checking the declared algorithm, resolving
//! the signing key, verifying the signature and validating claims, in that
//! order. The first failing step decides the error.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, Validation};
use serde::{Deserialize, Serialize};

use super::jwks::KeyResolver;
use super::provider::{IdentityProvider, Provider};
use super::token::IdentityToken;
use crate::error::{ApiError, Result};
use crate::platform::Clock;

/// Identity token claims
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    /// Subject
    pub sub: String,

    /// Issuer
    #[serde(default)]
    pub iss: Option<String>,

    /// Audience (can be string or array)
    #[serde(default, deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,

    /// Expiration time
    #[serde(default)]
    pub exp: Option<u64>,

    /// Issued at
    #[serde(default)]
    pub iat: Option<u64>,

    /// Not before
    #[serde(default)]
    pub nbf: Option<u64>,

    #[serde(default)]
    pub email: Option<String>,

    /// Apple sends this as the string "true" or "false"
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub email_verified: Option<bool>,
}

/// Deserialize audience as either string or array
fn deserialize_audience<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct AudienceVisitor;

    impl<'de> Visitor<'de> for AudienceVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("string or array of strings")
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Vec<String>, E>
        where
            E: de::Error,
        {
            Ok(vec![value.to_string()])
        }

        fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Vec<String>, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut values = Vec::new();
            while let Some(value) = seq.next_element()? {
                values.push(value);
            }
            Ok(values)
        }
    }

    deserializer.deserialize_any(AudienceVisitor)
}

/// Deserialize a boolean that may arrive as a JSON string
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => Some(b),
        Some(Flag::Text(s)) => Some(s.eq_ignore_ascii_case("true")),
        None => None,
    })
}

/// The identity a verified token proves
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub audience: String,
    pub issuer: String,
    pub expires_at: DateTime<Utc>,
    pub provider: Provider,
}

impl VerifiedIdentity {
    /// Name to present to the credential backend: the email, or the subject
    pub fn username(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.subject)
    }
}

/// Verifies provider tokens against their published keys
pub struct TokenVerifier {
    resolver: Arc<KeyResolver>,
    clock: Arc<dyn Clock>,
    clock_skew_secs: u64,
}

impl TokenVerifier {
    pub fn new(resolver: Arc<KeyResolver>, clock: Arc<dyn Clock>, clock_skew_secs: u64) -> Self {
        Self {
            resolver,
            clock,
            clock_skew_secs,
        }
    }

    /// Verify `raw_token` as a token from `provider` issued for `expected_audience`
    pub async fn verify(
        &self,
        provider: &dyn IdentityProvider,
        raw_token: &str,
        expected_audience: &str,
    ) -> Result<VerifiedIdentity> {
        // 1. Structure
        let token = IdentityToken::parse(raw_token)?;

        // 2. Algorithm allow-list, before anything touches a key
        let algorithm = allowed_algorithm(provider, &token.algorithm)?;

        // 3. Key resolution
        let kid = token
            .key_id
            .as_deref()
            .ok_or_else(|| ApiError::unknown_key("token header has no 'kid'"))?;
        let key = self.resolver.resolve(provider.provider(), kid).await?;

        if let Some(key_alg) = &key.algorithm {
            if key_alg != &token.algorithm {
                return Err(ApiError::unknown_key(format!(
                    "key '{}' is published for {}, not {}",
                    kid, key_alg, token.algorithm
                )));
            }
        }

        // 4. Signature. Time and audience checks are done below against our clock.
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let token_data = decode::<IdTokenClaims>(token.raw(), &key.decoding_key, &validation)
            .map_err(|e| map_decode_error(e.kind()))?;

        // 5. Claims
        let claims = token_data.claims;
        let now = self.clock.now_secs();
        validate_times(&claims, now, self.clock_skew_secs)?;
        validate_audience(&claims, expected_audience)?;
        let issuer = validate_issuer(provider, &claims)?;
        validate_subject(&claims.sub)?;

        // 6. Identity
        let exp = claims.exp.unwrap_or_default();
        let expires_at = DateTime::<Utc>::from_timestamp(exp as i64, 0)
            .ok_or_else(|| ApiError::malformed_token("'exp' is out of range"))?;

        Ok(VerifiedIdentity {
            subject: claims.sub,
            email: claims.email.filter(|e| !e.is_empty()),
            email_verified: claims.email_verified.unwrap_or(false),
            audience: expected_audience.to_string(),
            issuer,
            expires_at,
            provider: provider.provider(),
        })
    }
}

fn allowed_algorithm(provider: &dyn IdentityProvider, declared: &str) -> Result<Algorithm> {
    provider
        .allowed_algorithms()
        .iter()
        .copied()
        .find(|alg| format!("{:?}", alg) == declared)
        .ok_or_else(|| ApiError::unsupported_algorithm(declared))
}

fn map_decode_error(kind: &ErrorKind) -> ApiError {
    match kind {
        ErrorKind::Json(e) => ApiError::malformed_token(format!("invalid JWT claims: {}", e)),
        ErrorKind::Base64(_) | ErrorKind::Utf8(_) | ErrorKind::InvalidToken => {
            ApiError::malformed_token("invalid JWT encoding")
        }
        _ => ApiError::InvalidSignature,
    }
}

fn validate_times(claims: &IdTokenClaims, now: u64, skew: u64) -> Result<()> {
    let exp = claims
        .exp
        .ok_or_else(|| ApiError::token_expired("token has no 'exp' claim"))?;
    if exp <= now {
        return Err(ApiError::token_expired(format!("token expired at {}", exp)));
    }

    if let Some(nbf) = claims.nbf {
        if nbf > now.saturating_add(skew) {
            return Err(ApiError::token_not_yet_valid("'nbf' is in the future"));
        }
    }

    if let Some(iat) = claims.iat {
        if iat > now.saturating_add(skew) {
            return Err(ApiError::token_not_yet_valid("token issued in the future"));
        }
    }

    Ok(())
}

fn validate_audience(claims: &IdTokenClaims, expected: &str) -> Result<()> {
    if claims.aud.is_empty() {
        return Err(ApiError::audience_mismatch("token has no 'aud' claim"));
    }
    if !claims.aud.iter().any(|aud| aud == expected) {
        return Err(ApiError::audience_mismatch(
            "token was issued for a different client",
        ));
    }
    Ok(())
}

fn validate_issuer(provider: &dyn IdentityProvider, claims: &IdTokenClaims) -> Result<String> {
    let iss = claims
        .iss
        .as_deref()
        .ok_or_else(|| ApiError::issuer_mismatch("token has no 'iss' claim"))?;
    if !provider.issuers().contains(&iss) {
        return Err(ApiError::issuer_mismatch(format!(
            "token was not issued by {}",
            provider.provider()
        )));
    }
    Ok(iss.to_string())
}

fn validate_subject(subject: &str) -> Result<()> {
    if subject.is_empty() {
        return Err(ApiError::malformed_token("subject cannot be empty"));
    }

    if subject.len() > 255 {
        return Err(ApiError::malformed_token("subject too long"));
    }

    if subject.chars().any(|c| c.is_control()) {
        return Err(ApiError::malformed_token("subject contains control characters"));
    }

    Ok(())
}
