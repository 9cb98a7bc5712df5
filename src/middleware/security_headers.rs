//! Response hardening for the browser-facing admin API.
//!
//! Every response gets the framing/sniffing/referrer headers. Responses that
//! belong to a session (anything under `/api/v0/auth` or anything setting a
//! cookie) are additionally marked uncacheable so sealed session values never
//! land in a shared cache.
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, header},
    middleware::{self, Next},
    response::Response,
};

use crate::api::v0::API_PREFIX;

const STATIC_HEADERS: [(header::HeaderName, &str); 4] = [
    (header::X_FRAME_OPTIONS, "DENY"),
    (header::CONTENT_SECURITY_POLICY, "frame-ancestors 'none'"),
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    // login redirects carry state and code in the URL
    (header::REFERRER_POLICY, "no-referrer"),
];

#[derive(Clone)]
struct SessionPaths {
    auth_prefix: Arc<str>,
}

pub fn apply(router: Router, context_path: &str) -> Router {
    let paths = SessionPaths {
        auth_prefix: format!("{context_path}{API_PREFIX}/auth").into(),
    };
    router.layer(middleware::from_fn_with_state(paths, harden))
}

async fn harden(State(paths): State<SessionPaths>, req: Request<Body>, next: Next) -> Response {
    let session_path = req.uri().path().starts_with(&*paths.auth_prefix);
    let mut res = next.run(req).await;
    let headers = res.headers_mut();

    for (name, value) in STATIC_HEADERS {
        if !headers.contains_key(&name) {
            headers.insert(name, HeaderValue::from_static(value));
        }
    }

    if session_path || headers.contains_key(header::SET_COOKIE) {
        mark_uncacheable(headers);
    }
    res
}

fn mark_uncacheable(headers: &mut HeaderMap) {
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
}
