//! HTTP route handlers.

use super::AppState;
use crate::config::Mode;
use crate::decision_log::DecisionFilter;
use crate::metric_store::{MetricQuery, Resolution};
use crate::models::{EconomicEvent, EconomyState, ParamConstraint};
use crate::validation::validate_state;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickRequest {
    pub state: EconomyState,
    #[serde(default)]
    pub events: Vec<EconomicEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnoseRequest {
    pub state: EconomyState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRequest {
    #[serde(default)]
    pub lock: Vec<String>,
    #[serde(default)]
    pub unlock: Vec<String>,
    #[serde(default)]
    pub constrain: HashMap<String, ParamConstraint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub decision_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionsQuery {
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub metric: Option<String>,
    pub resolution: Option<Resolution>,
    pub from: Option<u64>,
    pub to: Option<u64>,
}

fn invalid_state(report: &crate::validation::ValidationReport) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": "invalid_state",
            "validationErrors": report.errors,
            "warnings": report.warnings,
        })),
    )
        .into_response()
}

fn rate_limited(retry_after: std::time::Duration) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "rate_limited",
            "retryAfterSeconds": retry_after.as_secs_f64(),
        })),
    )
        .into_response()
}

/// `POST /tick` — drive one pipeline tick with a pushed state snapshot.
pub async fn post_tick(
    State(state): State<AppState>,
    Json(request): Json<TickRequest>,
) -> Response {
    let report = validate_state(&request.state);
    if !report.valid {
        return invalid_state(&report);
    }
    if let Err(err) = state.tick_limiter.try_acquire() {
        return rate_limited(err.retry_after);
    }

    let mut controller = state.controller.lock().await;
    for event in request.events {
        controller.ingest(event);
    }
    match controller.tick(Some(request.state)).await {
        Ok(outcome) => Json(json!({
            "tick": outcome.tick,
            "health": outcome.health,
            "adjustments": outcome.adjustments,
            "alerts": outcome.alerts,
        }))
        .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "adapter_failure", "message": err.to_string() })),
        )
            .into_response(),
    }
}

/// `POST /diagnose` — side-effect-free diagnosis of a pushed state.
pub async fn post_diagnose(
    State(state): State<AppState>,
    Json(request): Json<DiagnoseRequest>,
) -> Response {
    let report = validate_state(&request.state);
    if !report.valid {
        return invalid_state(&report);
    }

    let controller = state.controller.lock().await;
    let (health, diagnoses) = controller.diagnose_preview(&request.state);
    let diagnoses: Vec<_> = diagnoses
        .iter()
        .map(|d| {
            json!({
                "principleId": d.principle_id,
                "principleName": d.principle_name,
                "severity": d.severity,
                "suggestedAction": d.suggested_action,
            })
        })
        .collect();
    Json(json!({ "health": health, "diagnoses": diagnoses })).into_response()
}

/// `POST /config` — lock, unlock and constrain parameters.
pub async fn post_config(
    State(state): State<AppState>,
    Json(request): Json<ConfigRequest>,
) -> Response {
    let mut controller = state.controller.lock().await;
    for key in request.lock {
        controller.lock_param(key);
    }
    for key in &request.unlock {
        controller.unlock_param(key);
    }
    for (key, constraint) in request.constrain {
        controller.constrain_param(key, constraint);
    }
    Json(json!({ "ok": true })).into_response()
}

/// `POST /approve` — apply a pending advisor recommendation.
pub async fn post_approve(
    State(state): State<AppState>,
    Json(request): Json<ApprovalRequest>,
) -> Response {
    let mut controller = state.controller.lock().await;
    if controller.mode() != Mode::Advisor {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "not_in_advisor_mode" })),
        )
            .into_response();
    }
    match controller.approve(&request.decision_id).await {
        Ok(plan) => Json(json!({ "ok": true, "applied": plan })).into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": err.to_string() })),
        )
            .into_response(),
    }
}

/// `POST /reject` — discard a pending advisor recommendation.
pub async fn post_reject(
    State(state): State<AppState>,
    Json(request): Json<ApprovalRequest>,
) -> Response {
    let mut controller = state.controller.lock().await;
    if controller.mode() != Mode::Advisor {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "not_in_advisor_mode" })),
        )
            .into_response();
    }
    match controller.reject(&request.decision_id, request.reason) {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": err.to_string() })),
        )
            .into_response(),
    }
}

/// `GET /health`
pub async fn get_health(State(state): State<AppState>) -> Response {
    let controller = state.controller.lock().await;
    Json(json!({
        "health": controller.health(),
        "uptime": state.uptime_secs(),
        "mode": controller.mode().as_str(),
        "tick": controller.current_tick(),
        "activePlans": controller.active_plan_count(),
    }))
    .into_response()
}

/// `GET /decisions?since=&until=&limit=`
pub async fn get_decisions(
    State(state): State<AppState>,
    Query(query): Query<DecisionsQuery>,
) -> Response {
    let controller = state.controller.lock().await;
    let filter = DecisionFilter {
        since: query.since,
        until: query.until,
        ..Default::default()
    };
    let mut decisions = controller.decision_log().query(&filter);
    if let Some(limit) = query.limit {
        let skip = decisions.len().saturating_sub(limit);
        decisions = decisions.split_off(skip);
    }
    Json(json!({ "decisions": decisions })).into_response()
}

/// `GET /metrics?metric=&resolution=&from=&to=`
pub async fn get_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    let controller = state.controller.lock().await;
    let store = controller.metric_store();
    let latest = store.latest(query.resolution.unwrap_or_default());
    let history = query.metric.as_ref().map(|metric| {
        store.query(&MetricQuery {
            metric: metric.clone(),
            from: query.from,
            to: query.to,
            resolution: query.resolution,
        })
    });
    Json(json!({ "latest": latest, "history": history })).into_response()
}

/// `GET /principles`
pub async fn get_principles(State(state): State<AppState>) -> Response {
    let controller = state.controller.lock().await;
    let principles = controller.diagnoser().info();
    Json(json!({ "count": principles.len(), "principles": principles })).into_response()
}

/// `GET /pending`
pub async fn get_pending(State(state): State<AppState>) -> Response {
    let controller = state.controller.lock().await;
    let pending: Vec<_> = controller
        .pending_decisions()
        .into_iter()
        .map(|p| {
            json!({
                "decisionId": p.decision_id,
                "createdTick": p.created_tick,
                "plan": p.plan,
            })
        })
        .collect();
    Json(json!({
        "mode": controller.mode().as_str(),
        "count": pending.len(),
        "pending": pending,
    }))
    .into_response()
}
