//! Process implementations of the core platform traits

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fedlogin_core::error::{ApiError, Result};
use fedlogin_core::platform::{Clock, Environment, HttpClient, HttpResponse};

/// reqwest-based HTTP client
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fedlogin/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn send(&self, method: &str, builder: reqwest::RequestBuilder) -> Result<HttpResponse> {
        let response = builder.send().await.map_err(|e| transport_error(method, e))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(method, e))?
            .to_vec();

        Ok(HttpResponse { status, body })
    }
}

fn transport_error(method: &str, e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::upstream_timeout(format!("HTTP {} timed out: {}", method, e))
    } else {
        ApiError::upstream_error(format!("HTTP {} failed: {}", method, e))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse> {
        let mut builder = self.client.get(url);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send("GET", builder).await
    }

    async fn post(&self, url: &str, headers: &[(&str, &str)], body: &[u8]) -> Result<HttpResponse> {
        let mut builder = self.client.post(url).body(body.to_vec());
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send("POST", builder).await
    }
}

/// System clock using std::time
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }
}

/// Process environment variables
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn get_var(&self, name: &str) -> Result<String> {
        std::env::var(name)
            .map_err(|_| ApiError::internal(format!("environment variable '{}' not set", name)))
    }
}
