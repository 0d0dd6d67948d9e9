//! HTTP API server for tallerflow.

pub mod middleware;

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::engine::{TransitionOptions, WorkflowEngine};
use crate::error::Error;
use crate::metrics::render_metrics;

use middleware::{access_log_middleware, request_id_middleware, MiddlewareConfig};

/// Turn an engine error into a JSON response with its HTTP status.
///
/// Internal details are logged, never returned.
fn error_response(e: Error) -> Response {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("API error: {:?}", e);
    } else {
        debug!("API request rejected: {}", e);
    }
    (status, Json(e.to_external_json())).into_response()
}

/// Create CORS layer based on environment configuration.
///
/// - TALLER_CORS_ORIGINS: Comma-separated list of allowed origins (default: http://localhost:3000)
/// - TALLER_CORS_ALLOW_ALL: Set to "true" to allow all origins
pub fn create_cors_layer() -> CorsLayer {
    let allow_all = std::env::var("TALLER_CORS_ALLOW_ALL")
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(false);

    if allow_all {
        warn!("CORS configured to allow all origins");
        return CorsLayer::very_permissive();
    }

    let origins_str = std::env::var("TALLER_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000".to_string());

    let origins: Vec<HeaderValue> = origins_str
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<HeaderValue>() {
            Ok(hv) => Some(hv),
            Err(e) => {
                warn!("Invalid CORS origin '{}': {}", s, e);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        warn!("No valid CORS origins configured, allowing localhost:3000");
    }
    let origins = if origins.is_empty() {
        vec![HeaderValue::from_static("http://localhost:3000")]
    } else {
        origins
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Default maximum concurrent requests.
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests, from TALLER_MAX_CONCURRENT_REQUESTS (default: 100).
pub fn get_max_concurrent_requests() -> usize {
    std::env::var("TALLER_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS)
}

pub fn create_concurrency_limit() -> tower::limit::ConcurrencyLimitLayer {
    tower::limit::ConcurrencyLimitLayer::new(get_max_concurrent_requests())
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: WorkflowEngine,
}

/// Create the API router (without state applied - call with_state on the result).
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/stages", get(list_stages))
        .route("/api/wait-causes", get(list_wait_causes))
        .route(
            "/api/wait-causes/{id}",
            axum::routing::delete(remove_wait_cause),
        )
        .route("/api/wait-causes/{id}/deactivate", post(deactivate_wait_cause))
        .route("/api/catalog/reload", post(reload_catalog))
        .route("/api/orders", post(open_order))
        .route("/api/orders/{id}/status", get(order_status))
        .route("/api/orders/{id}/sla", get(order_sla))
        .route("/api/orders/{id}/history", get(order_history))
        .route("/api/orders/{id}/pauses", get(order_pauses))
        .route("/api/orders/{id}/transition", post(transition_order))
        .route("/api/orders/{id}/pause", post(pause_order))
        .route("/api/orders/{id}/resume", post(resume_order))
        .route("/api/dashboard", get(dashboard))
        .route("/metrics", get(metrics_endpoint))
}

/// Create the complete API router with state.
pub fn create_router(state: AppState) -> Router {
    let middleware_config = MiddlewareConfig::default();
    create_api_routes()
        .layer(create_concurrency_limit())
        .layer(axum::middleware::from_fn_with_state(
            middleware_config.clone(),
            access_log_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            middleware_config,
            request_id_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(create_cors_layer())
        .with_state(state)
}

// ============================================================================
// Health Check & Metrics
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.storage().check_health().await {
        Ok(health) => {
            let healthy = health.is_healthy();
            let status = if healthy {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (
                status,
                Json(json!({
                    "status": if healthy { "ok" } else { "degraded" },
                    "catalog_version": state.engine.catalog().snapshot().version(),
                    "foreign_keys_enabled": health.foreign_keys_enabled,
                    "integrity_check": health.integrity_check,
                    "journal_mode": health.journal_mode,
                    "busy_timeout_ms": health.busy_timeout_ms,
                    "orders_without_open_stage": health.orders_without_open_stage,
                    "dangling_pauses": health.dangling_pauses,
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!("Health check failed: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "message": "Health check failed"})),
            )
                .into_response()
        }
    }
}

async fn metrics_endpoint() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_metrics(),
    )
}

// ============================================================================
// Catalog Endpoints
// ============================================================================

async fn list_stages(State(state): State<AppState>) -> impl IntoResponse {
    let catalog = state.engine.catalog().snapshot();
    Json(json!({
        "version": catalog.version(),
        "stages": catalog.list_stages(),
    }))
}

async fn list_wait_causes(State(state): State<AppState>) -> impl IntoResponse {
    let catalog = state.engine.catalog().snapshot();
    Json(json!({
        "version": catalog.version(),
        "wait_causes": catalog.list_wait_causes(),
    }))
}

async fn reload_catalog(State(state): State<AppState>) -> Response {
    match state.engine.reload_catalog().await {
        Ok(catalog) => Json(json!({
            "version": catalog.version(),
            "stages": catalog.list_stages().len(),
            "wait_causes": catalog.list_wait_causes().len(),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn deactivate_wait_cause(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.engine.deactivate_wait_cause(&id).await {
        Ok(catalog) => Json(json!({
            "id": id,
            "is_active": false,
            "catalog_version": catalog.version(),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn remove_wait_cause(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.remove_wait_cause(&id).await {
        Ok(outcome) => Json(json!({"id": id, "outcome": outcome})).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Work Order Endpoints
// ============================================================================

#[derive(Deserialize)]
struct OpenOrderRequest {
    order_id: String,
}

async fn open_order(
    State(state): State<AppState>,
    Json(request): Json<OpenOrderRequest>,
) -> Response {
    match state.engine.open_order(&request.order_id).await {
        Ok(status) => (StatusCode::CREATED, Json(status)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn order_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.status(&id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(e),
    }
}

async fn order_sla(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.evaluate_order(&id).await {
        Ok(evaluation) => Json(evaluation).into_response(),
        Err(e) => error_response(e),
    }
}

async fn order_history(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.history(&id).await {
        Ok(history) => Json(json!({"order_id": id, "history": history})).into_response(),
        Err(e) => error_response(e),
    }
}

async fn order_pauses(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.pauses(&id).await {
        Ok(pauses) => Json(json!({"order_id": id, "pauses": pauses})).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct TransitionRequest {
    to_stage: String,
    #[serde(flatten)]
    options: TransitionOptions,
}

async fn transition_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TransitionRequest>,
) -> Response {
    match state
        .engine
        .transition(&id, &request.to_stage, request.options)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct PauseRequest {
    wait_cause_id: String,
}

async fn pause_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PauseRequest>,
) -> Response {
    match state.engine.pause(&id, &request.wait_cause_id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(e),
    }
}

async fn resume_order(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.resume(&id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(e),
    }
}

async fn dashboard(State(state): State<AppState>) -> Response {
    match state.engine.dashboard().await {
        Ok(dashboard) => Json(dashboard).into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogHandle;
    use crate::engine::bootstrap_catalog;
    use crate::storage::SqliteStorage;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn router() -> Router {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let catalog = bootstrap_catalog(&storage, None).await.unwrap();
        let engine = WorkflowEngine::new(storage, CatalogHandle::new(catalog));
        create_api_routes().with_state(AppState { engine })
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let app = router().await;
        let (status, body) = send(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["integrity_check"], "ok");
    }

    #[tokio::test]
    async fn test_list_stages_and_causes() {
        let app = router().await;
        let (status, body) = send(&app, "GET", "/api/stages", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stages"].as_array().unwrap().len(), 9);
        assert_eq!(body["stages"][0]["id"], "RECEPCION");

        let (_, body) = send(&app, "GET", "/api/wait-causes", None).await;
        assert_eq!(body["wait_causes"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_order_lifecycle() {
        let app = router().await;
        let (status, body) = send(&app, "POST", "/api/orders", Some(json!({"order_id": "OT-7"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["stage"], "RECEPCION");
        assert_eq!(body["timer"]["status"], "RUNNING");

        let (status, body) = send(
            &app,
            "POST",
            "/api/orders/OT-7/transition",
            Some(json!({"to_stage": "INGRESO", "actor": "recepcion"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["from_stage"], "RECEPCION");
        assert_eq!(body["status"]["stage"], "INGRESO");

        let (status, body) = send(
            &app,
            "POST",
            "/api/orders/OT-7/pause",
            Some(json!({"wait_cause_id": "AUTORIZACION_CLIENTE"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["timer"]["status"], "PAUSED");

        let (status, body) = send(&app, "POST", "/api/orders/OT-7/resume", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["timer"]["status"], "RUNNING");

        let (_, body) = send(&app, "GET", "/api/orders/OT-7/history", None).await;
        assert_eq!(body["history"].as_array().unwrap().len(), 2);
        assert_eq!(body["history"][1]["actor"], "recepcion");

        let (_, body) = send(&app, "GET", "/api/orders/OT-7/pauses", None).await;
        assert_eq!(body["pauses"][0]["wait_cause_id"], "AUTORIZACION_CLIENTE");

        let (_, body) = send(&app, "GET", "/api/orders/OT-7/sla", None).await;
        assert_eq!(body["status"], "ON_TIME");

        let (_, body) = send(&app, "GET", "/api/dashboard", None).await;
        assert_eq!(body["open_orders"], 1);
        assert_eq!(body["by_stage"]["INGRESO"], 1);
    }

    #[tokio::test]
    async fn test_errors_carry_code_and_category() {
        let app = router().await;

        let (status, body) = send(&app, "GET", "/api/orders/OT-404/status", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "ORDER_NOT_FOUND");

        send(&app, "POST", "/api/orders", Some(json!({"order_id": "OT-1"}))).await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/orders/OT-1/transition",
            Some(json!({"to_stage": "ENTREGA"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "ILLEGAL_TRANSITION");
        assert_eq!(body["error"]["category"], "no_longer_valid");

        let (_, body) = send(
            &app,
            "POST",
            "/api/orders/OT-1/pause",
            Some(json!({"wait_cause_id": "nonexistent-cause"})),
        )
        .await;
        assert_eq!(body["error"]["code"], "UNKNOWN_WAIT_CAUSE");

        let (status, body) = send(
            &app,
            "POST",
            "/api/orders/OT-1/transition",
            Some(json!({"to_stage": "INGRESO", "expected_stage": "DIAGNOSTICO"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["category"], "retry");

        let (status, _) = send(&app, "POST", "/api/orders", Some(json!({"order_id": "OT-1"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_wait_cause_admin_and_reload() {
        let app = router().await;
        let (status, body) = send(&app, "POST", "/api/wait-causes/OTRO/deactivate", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["catalog_version"], 2);

        let (status, body) = send(&app, "DELETE", "/api/wait-causes/OTRO", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "deleted");

        let (status, _) = send(&app, "DELETE", "/api/wait-causes/OTRO", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = send(&app, "POST", "/api/catalog/reload", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["wait_causes"], 3);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = router().await;
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
