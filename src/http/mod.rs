//! JSON-over-HTTP surface for bookings and coach schedules.

mod bookings;
mod error;
mod schedules;

pub use error::ApiError;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{FromRequest, FromRequestParts, MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::observability;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// JSON body whose rejections come back as validation errors.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct PathParam<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct QueryParams<T>(pub T);

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(bookings::routes())
        .merge(schedules::routes())
        .layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());
    let method = req.method().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = observability::status_label(response.status().as_u16());
    metrics::histogram!(
        observability::REQUEST_DURATION_SECONDS,
        "route" => route.clone(),
        "method" => method.clone()
    )
    .record(start.elapsed().as_secs_f64());
    metrics::counter!(
        observability::REQUESTS_TOTAL,
        "route" => route,
        "method" => method,
        "status" => status
    )
    .increment(1);
    response
}
