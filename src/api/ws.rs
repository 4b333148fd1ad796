//! WebSocket surface.
//!
//! JSON envelopes `{type, ...}` map onto the HTTP routes: `tick`, `event`,
//! `diagnose`, `health`. Every inbound payload is size-capped, parsed, and
//! sanitized before interpretation. A heartbeat ping goes out every 30s and
//! one missed pong terminates the connection.

use super::{sanitize_json, AppState};
use crate::middleware::RateLimiter;
use crate::models::{EconomicEvent, EconomyState};
use crate::validation::validate_state;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickEnvelope {
    state: EconomyState,
    #[serde(default)]
    events: Vec<EconomicEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiagnoseEnvelope {
    state: EconomyState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventEnvelope {
    event: EconomicEvent,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    // Origin check against the configured CORS origin.
    if let Some(expected) = &state.transport.cors_origin {
        let origin = headers
            .get("origin")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if origin != expected {
            warn!(origin, "websocket upgrade rejected: origin mismatch");
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    // Bearer auth mirrors the HTTP mutation routes; browser clients fall
    // back to the `token` query parameter.
    if let Some(expected) = &state.transport.api_key {
        let presented = bearer
            .as_ref()
            .map(|header| header.token())
            .or_else(|| query.get("token").map(String::as_str));
        if presented != Some(expected.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let per_conn_limiter = RateLimiter::per_second(state.transport.ws_ticks_per_sec);
    let mut heartbeat =
        tokio::time::interval(Duration::from_secs(state.transport.heartbeat_secs.max(1)));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first interval tick fires immediately; skip it so the first real
    // ping goes out one full period after connect.
    heartbeat.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if awaiting_pong {
                    debug!("websocket missed pong; terminating");
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
            msg = socket.next() => {
                match msg {
                    None | Some(Err(_)) => break,
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let reply = json!({ "type": "error", "error": "binary_unsupported" });
                        if socket.send(Message::Text(reply.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        let reply = process_message(&state, &per_conn_limiter, &text).await;
                        if socket.send(Message::Text(reply.to_string())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}

async fn process_message(
    state: &AppState,
    per_conn_limiter: &RateLimiter,
    text: &str,
) -> serde_json::Value {
    if text.len() > state.transport.max_ws_payload_bytes {
        return json!({ "type": "error", "error": "payload_too_large" });
    }

    let mut value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            return json!({ "type": "error", "error": "invalid_json", "message": err.to_string() })
        }
    };
    sanitize_json(&mut value);

    let envelope_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();

    match envelope_type.as_str() {
        "tick" => handle_tick(state, per_conn_limiter, value).await,
        "event" => handle_event(state, value).await,
        "diagnose" => handle_diagnose(state, value).await,
        "health" => handle_health(state).await,
        other => json!({ "type": "error", "error": "unknown_type", "received": other }),
    }
}

async fn handle_tick(
    state: &AppState,
    per_conn_limiter: &RateLimiter,
    value: serde_json::Value,
) -> serde_json::Value {
    let envelope: TickEnvelope = match serde_json::from_value(value) {
        Ok(envelope) => envelope,
        Err(err) => {
            return json!({ "type": "validation_error", "message": err.to_string() });
        }
    };

    let report = validate_state(&envelope.state);
    if !report.valid {
        return json!({
            "type": "validation_error",
            "validationErrors": report.errors,
            "warnings": report.warnings,
        });
    }

    if per_conn_limiter.try_acquire().is_err() || state.tick_limiter.try_acquire().is_err() {
        return json!({ "type": "error", "error": "rate_limited" });
    }

    let mut controller = state.controller.lock().await;
    for event in envelope.events {
        controller.ingest(event);
    }
    match controller.tick(Some(envelope.state)).await {
        Ok(outcome) => json!({
            "type": "tick_result",
            "tick": outcome.tick,
            "health": outcome.health,
            "adjustments": outcome.adjustments,
            "alerts": outcome.alerts,
        }),
        Err(err) => json!({ "type": "error", "error": "adapter_failure", "message": err.to_string() }),
    }
}

async fn handle_event(state: &AppState, value: serde_json::Value) -> serde_json::Value {
    let envelope: EventEnvelope = match serde_json::from_value(value) {
        Ok(envelope) => envelope,
        Err(err) => {
            return json!({ "type": "validation_error", "message": err.to_string() });
        }
    };
    let mut controller = state.controller.lock().await;
    controller.ingest(envelope.event);
    json!({
        "type": "event_result",
        "ok": true,
        "buffered": controller.buffered_events(),
    })
}

async fn handle_diagnose(state: &AppState, value: serde_json::Value) -> serde_json::Value {
    let envelope: DiagnoseEnvelope = match serde_json::from_value(value) {
        Ok(envelope) => envelope,
        Err(err) => {
            return json!({ "type": "validation_error", "message": err.to_string() });
        }
    };
    let report = validate_state(&envelope.state);
    if !report.valid {
        return json!({
            "type": "validation_error",
            "validationErrors": report.errors,
        });
    }

    let controller = state.controller.lock().await;
    let (health, diagnoses) = controller.diagnose_preview(&envelope.state);
    json!({
        "type": "diagnose_result",
        "health": health,
        "diagnoses": diagnoses,
    })
}

async fn handle_health(state: &AppState) -> serde_json::Value {
    let controller = state.controller.lock().await;
    json!({
        "type": "health_result",
        "health": controller.health(),
        "uptime": state.uptime_secs(),
        "mode": controller.mode().as_str(),
        "tick": controller.current_tick(),
        "activePlans": controller.active_plan_count(),
    })
}
