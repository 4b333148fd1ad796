//! Bearer-token authentication for mutation routes.
//!
//! The regulator carries one static API key. When configured, mutation
//! routes accept it either as a typed `Authorization: Bearer` header or as a
//! `token` query parameter (the query form exists for WebSocket upgrades,
//! where browser clients cannot set headers). A `None` key disables auth.

use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Header wins over query when both are present.
fn authorized(expected: &str, header_token: Option<&str>, query_token: Option<&str>) -> bool {
    header_token
        .or(query_token)
        .is_some_and(|token| token == expected)
}

pub async fn require_bearer(
    State(api_key): State<Arc<Option<String>>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    token_query: Option<Query<TokenQuery>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = api_key.as_ref() else {
        return next.run(req).await;
    };

    let header_token = bearer.as_ref().map(|header| header.token());
    let query_token = token_query
        .as_ref()
        .and_then(|Query(q)| q.token.as_deref());

    if authorized(expected, header_token, query_token) {
        next.run(req).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "unauthorized" })),
        )
            .into_response()
    }
}
