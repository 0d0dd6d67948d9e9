//! API middleware for request ids and access logging.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, Span};
use uuid::Uuid;

/// Header name for request ID.
pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Request ID extension for extracting in handlers.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Middleware switches.
///
/// Environment:
/// - TALLER_TRUST_REQUEST_ID: keep incoming `x-request-id` headers (default: false)
/// - TALLER_ACCESS_LOG: set to "false" to disable access logging (default: true)
#[derive(Debug, Clone)]
pub struct MiddlewareConfig {
    pub trust_request_id: bool,
    pub access_log: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            trust_request_id: env_flag("TALLER_TRUST_REQUEST_ID").unwrap_or(false),
            access_log: env_flag("TALLER_ACCESS_LOG").unwrap_or(true),
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| !matches!(v.to_lowercase().as_str(), "false" | "0" | "no"))
}

/// Give every request an id, echoed in the `x-request-id` response header.
pub async fn request_id_middleware(
    State(config): State<MiddlewareConfig>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let incoming = config
        .trust_request_id
        .then(|| {
            request
                .headers()
                .get(&REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|s| !s.is_empty() && s.len() <= 128)
                .map(|s| s.to_string())
        })
        .flatten();
    let request_id = incoming.unwrap_or_else(|| Uuid::new_v4().to_string());

    Span::current().record("request_id", &request_id);
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER.clone(), header_value);
    }

    response
}

/// Log method, path, status, duration and request id of every request.
pub async fn access_log_middleware(
    State(config): State<MiddlewareConfig>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !config.access_log {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request.extensions().get::<RequestId>().map(|r| r.0.clone());
    let actor = request
        .headers()
        .get("x-actor")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let response = next.run(request).await;

    info!(
        target: "tallerflow::access",
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        request_id = ?request_id,
        actor = ?actor,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Extension, Router};
    use tower::ServiceExt;

    async fn echo_request_id(Extension(id): Extension<RequestId>) -> String {
        id.0
    }

    fn app(config: MiddlewareConfig) -> Router {
        Router::new()
            .route("/test", get(echo_request_id))
            .layer(axum::middleware::from_fn_with_state(
                config.clone(),
                access_log_middleware,
            ))
            .layer(axum::middleware::from_fn_with_state(
                config,
                request_id_middleware,
            ))
    }

    #[tokio::test]
    async fn test_request_id_generated() {
        let config = MiddlewareConfig {
            trust_request_id: false,
            access_log: true,
        };
        let response = app(config)
            .oneshot(
                Request::builder()
                    .uri("/test")
                    .header("x-request-id", "client-supplied")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let request_id = response
            .headers()
            .get("x-request-id")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(Uuid::parse_str(request_id).is_ok());
    }

    #[tokio::test]
    async fn test_trusted_request_id_kept() {
        let config = MiddlewareConfig {
            trust_request_id: true,
            access_log: false,
        };
        let response = app(config)
            .oneshot(
                Request::builder()
                    .uri("/test")
                    .header("x-request-id", "taller-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-request-id"], "taller-42");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"taller-42");
    }
}
