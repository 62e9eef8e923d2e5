//! fedlogin-core: Platform-agnostic core logic for the federated login gateway
//!
//! This crate verifies Google and Apple identity tokens against the
//! providers' published signing keys and exchanges verified identities for
//! session credentials. It depends only on abstract platform traits
//! (HttpClient, Clock, Environment) and never imports server-specific code.

pub mod config;
pub mod error;
pub mod exchange;
pub mod login;
pub mod oidc;
pub mod platform;

#[cfg(test)]
pub mod test_support;
