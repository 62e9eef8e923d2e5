//! OIDC (OpenID Connect) module
//!
//! Handles identity token verification including key-set caching, signature
//! verification and claim checks.

mod jwks;
mod provider;
mod token;
mod validate;

pub use jwks::{fetch_jwks, KeyResolver, SigningKey, SigningKeySet};
pub use provider::{AppleProvider, GoogleProvider, IdentityProvider, Provider};
pub use token::IdentityToken;
pub use validate::{IdTokenClaims, TokenVerifier, VerifiedIdentity};
