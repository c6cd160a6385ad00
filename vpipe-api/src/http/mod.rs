//! Axum HTTP surface: the subscriber-facing WebSocket endpoint plus the
//! operator-facing health/ready/metrics/admin routes.

mod websocket;

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use vpipe_core::ids::StreamKey;
use vpipe_core::metrics::Metrics;
use vpipe_ingest::WebhookReceiver;
use vpipe_registry::ProviderRegistry;

use crate::bus::Bus;

pub use websocket::websocket_handler;

#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<Bus>,
    pub registry: Arc<ProviderRegistry>,
    pub db_pool: sqlx::PgPool,
    pub redis_client: redis::Client,
    pub metrics: Arc<Metrics>,
    /// Only `Some` when `IngestConfig::source == "webhook"`.
    pub webhook: Option<Arc<WebhookReceiver>>,
}

#[must_use]
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/ws/streams/:stream_id", get(websocket_handler))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/admin/providers/reload", post(reload_providers));

    if state.webhook.is_some() {
        router = router.route("/ingest/webhook/:stream_id", post(ingest_webhook));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

#[derive(Deserialize)]
struct WebhookQuery {
    segment_path: String,
}

async fn ingest_webhook(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path(stream_id): Path<String>,
    axum::extract::Query(query): axum::extract::Query<WebhookQuery>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> StatusCode {
    let Some(webhook) = &state.webhook else {
        return StatusCode::NOT_FOUND;
    };
    let signature = headers
        .get("X-Vpipe-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match webhook
        .handle(&body, signature, StreamKey::from_string(stream_id), query.segment_path)
        .await
    {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            tracing::warn!(error = %e, "webhook ingest rejected");
            StatusCode::BAD_REQUEST
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn ready(axum::extract::State(state): axum::extract::State<AppState>) -> Json<serde_json::Value> {
    let db = sqlx::query("SELECT 1").execute(&state.db_pool).await.is_ok();
    let queue = match state.redis_client.get_multiplexed_async_connection().await {
        Ok(mut conn) => redis::cmd("PING").query_async::<String>(&mut conn).await.is_ok(),
        Err(_) => false,
    };

    let status = if db && queue { "ready" } else { "degraded" };
    Json(json!({ "status": status, "db": db, "queue": queue }))
}

async fn metrics(axum::extract::State(state): axum::extract::State<AppState>) -> String {
    state.metrics.render()
}

async fn reload_providers(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<serde_json::Value>, axum::http::StatusCode> {
    match state.registry.reload().await {
        Ok(live) => {
            if live {
                state.metrics.provider_reloads.inc();
            } else {
                state.metrics.provider_reload_failures.inc();
            }
            let capabilities: Vec<&str> = state
                .registry
                .current()
                .active_capabilities()
                .iter()
                .map(vpipe_core::models::Capability::as_str)
                .collect();
            Ok(Json(json!({ "live": live, "active_capabilities": capabilities })))
        }
        Err(e) => {
            state.metrics.provider_reload_failures.inc();
            tracing::error!(error = %e, "admin: provider reload failed");
            Err(axum::http::StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
