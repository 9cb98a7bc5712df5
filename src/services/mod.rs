/*
 * Responsibility
 * - ドメインサービスの公開 (auth, authz, worker pool, upstream store)
 * - HTTP (axum) には依存しない層 (cookie の HeaderValue 生成を除く)
 */
pub mod auth;
pub mod authz;
pub mod pool;
pub mod resources;
pub mod upstream;
