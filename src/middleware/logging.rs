//! Request logging with regulator context.
//!
//! Every served request is logged against the regulated economy's clock:
//! the tick is read after the handler runs, so it reflects any tick the
//! request itself drove.

use crate::api::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, warn};

pub async fn request_logging(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
    let tick = state.controller.lock().await.current_tick();

    if status.is_server_error() {
        warn!(
            %method,
            %path,
            status = status.as_u16(),
            tick,
            elapsed_ms,
            "request errored"
        );
    } else if path != "/health" {
        info!(
            %method,
            %path,
            status = status.as_u16(),
            tick,
            elapsed_ms,
            "request served"
        );
    }

    response
}
