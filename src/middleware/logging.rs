//! Optional request logger (`HTTP_LOGGING_ENABLED`).
//!
//! One debug line per request with method, path, status and latency. Header
//! values are never logged; they carry session cookies.
use std::time::Instant;

use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
};

pub fn apply(router: Router) -> Router {
    router.layer(middleware::from_fn(log_request))
}

async fn log_request(req: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let res = next.run(req).await;

    tracing::debug!(
        %method,
        path,
        status = res.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request handled"
    );
    res
}
