//! Compact JWS parsing
//!
//! Structural checks only. Nothing here is trusted until the signature has
//! been verified.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;

use crate::error::{ApiError, Result};

/// Upper bound on a presented token; provider id tokens are a few KiB
pub const MAX_TOKEN_LEN: usize = 16 * 1024;

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// A structurally valid, not yet verified identity token
#[derive(Debug)]
pub struct IdentityToken<'a> {
    raw: &'a str,
    /// Declared signing algorithm, exactly as written in the header
    pub algorithm: String,
    pub key_id: Option<String>,
}

impl<'a> IdentityToken<'a> {
    /// Split a compact token into header, payload and signature
    pub fn parse(raw: &'a str) -> Result<Self> {
        if raw.len() > MAX_TOKEN_LEN {
            return Err(ApiError::malformed_token("token too long"));
        }

        let parts: Vec<&str> = raw.split('.').collect();
        if parts.len() != 3 {
            return Err(ApiError::malformed_token("invalid JWT format"));
        }

        let header_bytes = base64_url_decode(parts[0])?;
        let header: RawHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| ApiError::malformed_token(format!("invalid JWT header: {}", e)))?;

        let payload_bytes = base64_url_decode(parts[1])?;
        let payload: serde_json::Value = serde_json::from_slice(&payload_bytes)
            .map_err(|e| ApiError::malformed_token(format!("invalid JWT payload: {}", e)))?;
        if !payload.is_object() {
            return Err(ApiError::malformed_token("JWT payload is not an object"));
        }

        if parts[2].is_empty() {
            return Err(ApiError::malformed_token("JWT has no signature"));
        }
        base64_url_decode(parts[2])?;

        Ok(Self {
            raw,
            algorithm: header.alg,
            key_id: header.kid.filter(|kid| !kid.is_empty()),
        })
    }

    pub fn raw(&self) -> &'a str {
        self.raw
    }
}

/// Base64 URL decode
fn base64_url_decode(input: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(input)
        .or_else(|_| URL_SAFE.decode(input))
        .map_err(|e| ApiError::malformed_token(format!("invalid base64: {}", e)))
}
