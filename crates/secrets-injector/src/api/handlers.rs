use axum::{
    body::Bytes,
    extract,
    http::{StatusCode, header},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::Span;

use crate::api::state::ApiServerState;

/// Decide whether the admitted pod needs the secrets init container.
#[tracing::instrument(
    name = "mutating_pods",
    fields(
        host=crate::config::HOSTNAME.as_str(),
        request_size=body.len(),
        request_uid=tracing::field::Empty,
        name=tracing::field::Empty,
        namespace=tracing::field::Empty,
        operation=tracing::field::Empty,
        injected=tracing::field::Empty,
        allowed=tracing::field::Empty,
        response_status=tracing::field::Empty,
    ),
    skip_all)]
pub(crate) async fn mutating_pods_handler(
    extract::State(state): extract::State<Arc<ApiServerState>>,
    body: Bytes,
) -> impl IntoResponse {
    let (status, response_body) = state.review_handler.handle(&body);
    Span::current().record("response_status", status.as_u16());

    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        response_body,
    )
}

pub(crate) async fn readiness_handler() -> StatusCode {
    StatusCode::OK
}
