//! HTTP + WebSocket transport shell.
//!
//! One `AppState` wraps a single Controller behind a tokio mutex; every
//! tick-driving entry point locks it, which serializes concurrent clients.

pub mod routes;
pub mod ws;

use crate::config::TransportConfig;
use crate::controller::Controller;
use crate::middleware::{require_bearer, RateLimiter};
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<tokio::sync::Mutex<Controller>>,
    /// Global tick budget shared by HTTP and every WebSocket connection.
    pub tick_limiter: Arc<RateLimiter>,
    pub transport: Arc<TransportConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(controller: Controller, transport: TransportConfig) -> Self {
        let tick_limiter = Arc::new(RateLimiter::per_second(transport.global_ticks_per_sec));
        Self {
            controller: Arc::new(tokio::sync::Mutex::new(controller)),
            tick_limiter,
            transport: Arc::new(transport),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Builds the full transport router. Mutation routes sit behind bearer auth
/// when an API key is configured.
pub fn router(state: AppState) -> Router {
    let api_key = Arc::new(state.transport.api_key.clone());

    let mutating = Router::new()
        .route("/tick", post(routes::post_tick))
        .route("/config", post(routes::post_config))
        .route("/approve", post(routes::post_approve))
        .route("/reject", post(routes::post_reject))
        .route_layer(axum_mw::from_fn_with_state(api_key, require_bearer))
        .with_state(state.clone());

    let public = Router::new()
        .route("/diagnose", post(routes::post_diagnose))
        .route("/health", get(routes::get_health))
        .route("/decisions", get(routes::get_decisions))
        .route("/metrics", get(routes::get_metrics))
        .route("/principles", get(routes::get_principles))
        .route("/pending", get(routes::get_pending))
        .route("/ws", get(ws::websocket_handler))
        .with_state(state.clone());

    let cors = match &state.transport.cors_origin {
        Some(origin) => match origin.parse::<axum::http::HeaderValue>() {
            Ok(value) => CorsLayer::new()
                .allow_origin(value)
                .allow_methods(Any)
                .allow_headers(Any),
            Err(_) => CorsLayer::permissive(),
        },
        None => CorsLayer::permissive(),
    };

    Router::new()
        .merge(mutating)
        .merge(public)
        .layer(cors)
        .layer(axum_mw::from_fn_with_state(
            state,
            crate::middleware::request_logging,
        ))
}

/// Recursively strips prototype-polluting keys from parsed JSON before it is
/// interpreted. Applied to every inbound WebSocket envelope.
pub fn sanitize_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.retain(|key, _| {
                !matches!(key.as_str(), "__proto__" | "constructor" | "prototype")
            });
            for child in map.values_mut() {
                sanitize_json(child);
            }
        }
        serde_json::Value::Array(items) => {
            for child in items {
                sanitize_json(child);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_strips_polluting_keys_recursively() {
        let mut value = json!({
            "type": "tick",
            "__proto__": { "polluted": true },
            "state": {
                "constructor": "bad",
                "nested": [{ "prototype": 1, "ok": 2 }]
            }
        });
        sanitize_json(&mut value);

        assert!(value.get("__proto__").is_none());
        assert!(value["state"].get("constructor").is_none());
        assert!(value["state"]["nested"][0].get("prototype").is_none());
        assert_eq!(value["state"]["nested"][0]["ok"], 2);
        assert_eq!(value["type"], "tick");
    }
}
