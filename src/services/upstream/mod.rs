//! Upstream resource stores (identities, clients, schemas, rules, roles, groups).
//!
//! The gateway treats every store as an opaque request executor behind
//! [`ResourceStore`]. Handlers only ever see JSON values.
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::services::resources::ResourceKind;

mod http;
mod memory;

pub use http::{HttpResourceStore, UpstreamEndpoints};
pub use memory::MemoryResourceStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{} not found", .0.singular())]
    NotFound(ResourceKind),
    #[error("resource already exists")]
    Conflict,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("no upstream configured for {}", .0.collection())]
    Unconfigured(ResourceKind),
    #[error("upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream answered with status {status}")]
    Status { status: u16 },
}

/// Store interface used by the resource handlers.
///
/// Implementations must be shareable across requests (typically `Arc<...>` inside).
#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    // Returns the backend name (for logging).
    fn backend_name(&self) -> &'static str;

    async fn list(&self, kind: ResourceKind) -> StoreResult<Vec<Value>>;

    async fn get(&self, kind: ResourceKind, id: &str) -> StoreResult<Value>;

    async fn create(&self, kind: ResourceKind, item: Value) -> StoreResult<Value>;

    async fn update(&self, kind: ResourceKind, id: &str, item: Value) -> StoreResult<Value>;

    async fn delete(&self, kind: ResourceKind, id: &str) -> StoreResult<()>;
}
