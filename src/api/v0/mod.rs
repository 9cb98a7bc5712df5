/*
 * Responsibility
 * - v0 の公開ポイント (routes() の re-export など)
 */
mod extractors;
pub mod handlers;
mod routes;

pub use routes::{API_PREFIX, ApiRoutes, routes};
