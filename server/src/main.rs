//! fedlogin-server: federated login gateway
//!
//! Lightweight HTTP server using hyper. Verifies Google and Apple identity
//! tokens and exchanges them for Cognito session credentials.

use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fedlogin_core::config::Config;
use fedlogin_core::error::{ApiError, ErrorResponse};
use fedlogin_core::login::Gateway;
use fedlogin_core::oidc::Provider;
use fedlogin_core::platform::Environment;

mod platform;

use platform::{ProcessEnv, ReqwestHttpClient, SystemClock};

const DEFAULT_PORT: u16 = 3333;

/// Upper bound on request bodies
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared application state
struct AppState {
    gateway: Gateway,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(message) = run().await {
        tracing::error!("{}", message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let env = ProcessEnv;
    let port = listen_port(&env)?;

    let config = Config::from_env(&env).map_err(|e| format!("invalid configuration: {}", e))?;
    let http = ReqwestHttpClient::new(config.upstream_timeout).map_err(|e| e.to_string())?;

    let state = Arc::new(AppState {
        gateway: Gateway::new(&config, Arc::new(http), Arc::new(SystemClock)),
    });

    if let Some(cognito) = &config.cognito {
        tracing::info!(
            region = cognito.region.as_deref().unwrap_or("custom endpoint"),
            user_pool = %cognito.user_pool_id,
            "credential exchange enabled"
        );
    } else {
        tracing::warn!("Cognito not configured; verified logins will not receive session credentials");
    }

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| format!("failed to bind port {}: {}", port, e))?;

    tracing::info!(port, "fedlogin listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let state = state.clone();

        tokio::spawn(async move {
            let io = hyper_util::rt::TokioIo::new(stream);
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { handle_request(req, &state).await }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(%peer, error = %e, "connection error");
            }
        });
    }
}

/// `PORT`, or the default when unset
fn listen_port(env: &dyn Environment) -> Result<u16, String> {
    match env.get_optional("PORT") {
        Some(value) => value
            .parse()
            .map_err(|_| format!("PORT must be a number, got '{}'", value)),
        None => Ok(DEFAULT_PORT),
    }
}

type HyperResponse = Response<Full<Bytes>>;

async fn handle_request<B>(
    req: Request<B>,
    state: &AppState,
) -> Result<HyperResponse, std::convert::Infallible>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = route_request(req, state).await;
    tracing::debug!(%method, %path, status = response.status().as_u16(), "request served");
    Ok(response)
}

async fn route_request<B>(req: Request<B>, state: &AppState) -> HyperResponse
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let provider = match req.uri().path() {
        "/" => {
            return match *req.method() {
                Method::GET => handle_health(state),
                _ => method_not_allowed("GET"),
            }
        }
        "/auth/loginWithGoogle" => Provider::Google,
        "/auth/loginWithApple" => Provider::Apple,
        path => return error_response(&ApiError::not_found(format!("no route for {}", path))),
    };

    if req.method() != Method::POST {
        return method_not_allowed("POST");
    }

    handle_login(req, provider, state).await
}

fn handle_health(state: &AppState) -> HyperResponse {
    json_response(
        StatusCode::OK,
        &serde_json::json!({
            "name": "fedlogin",
            "status": "ok",
            "providers": [Provider::Google, Provider::Apple],
            "exchange": if state.gateway.exchange_configured() { "configured" } else { "not_configured" },
        }),
    )
}

async fn handle_login<B>(req: Request<B>, provider: Provider, state: &AppState) -> HyperResponse
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(error = %e, "failed to read request body");
            return error_response(&ApiError::malformed_request_body(format!(
                "request body unreadable or larger than {} bytes",
                MAX_BODY_BYTES
            )));
        }
    };

    let outcome = state.gateway.login(provider, &body).await;
    let status = StatusCode::from_u16(outcome.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &outcome.into_response())
}

fn method_not_allowed(allow: &'static str) -> HyperResponse {
    let mut response = json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &serde_json::json!({"error": "method not allowed", "code": "method_not_allowed"}),
    );
    response.headers_mut().insert(ALLOW, HeaderValue::from_static(allow));
    response
}

fn error_response(err: &ApiError) -> HyperResponse {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse::from(err);
    json_response(status, &body)
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> HyperResponse {
    let json = serde_json::to_vec(body).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
