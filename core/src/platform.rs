//! Platform abstraction traits
//!
//! These traits define the boundary between the platform-agnostic login core
//! and the process that hosts it (HTTP client, wall clock, environment).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{ApiError, Result};

/// HTTP client for outbound requests (key-set endpoints, credential backend)
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse>;
    async fn post(&self, url: &str, headers: &[(&str, &str)], body: &[u8]) -> Result<HttpResponse>;
}

/// HTTP response from an outbound request
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Parse body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Body as UTF-8 text
    pub fn text(&self) -> std::result::Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.body.clone())
    }
}

/// Clock for current time (enables testing with deterministic timestamps)
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

/// Environment access
pub trait Environment {
    fn get_var(&self, name: &str) -> Result<String>;

    /// Like `get_var`, but unset and empty values both come back as `None`
    fn get_optional(&self, name: &str) -> Option<String> {
        self.get_var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Run an outbound call with an upper bound on its duration
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::upstream_timeout(format!(
            "{} did not complete within {}s",
            what,
            limit.as_secs_f64()
        ))),
    }
}
