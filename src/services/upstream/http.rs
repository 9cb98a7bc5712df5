//! JSON-over-HTTP adapter for the upstream admin APIs.
//!
//! Each resource kind maps to a collection URL:
//! - identities, schemas: identity server admin API (`KRATOS_ADMIN_URL`)
//! - clients: OAuth2 server admin API (`HYDRA_ADMIN_URL`)
//! - rules, roles, groups, idps: resource API (`RESOURCES_API_URL`)
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

use super::{ResourceStore, StoreError, StoreResult};
use crate::services::resources::ResourceKind;

/// Base URLs of the upstream services. Unset entries leave their kinds unconfigured.
#[derive(Debug, Clone, Default)]
pub struct UpstreamEndpoints {
    pub kratos_admin_url: Option<Url>,
    pub hydra_admin_url: Option<Url>,
    pub resources_api_url: Option<Url>,
}

impl UpstreamEndpoints {
    pub fn is_empty(&self) -> bool {
        self.kratos_admin_url.is_none()
            && self.hydra_admin_url.is_none()
            && self.resources_api_url.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct HttpResourceStore {
    client: reqwest::Client,
    collections: HashMap<ResourceKind, Url>,
}

impl HttpResourceStore {
    pub fn new(endpoints: &UpstreamEndpoints, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let mut collections = HashMap::new();
        for kind in ResourceKind::ALL {
            let (base, path) = match kind {
                ResourceKind::Identity => (&endpoints.kratos_admin_url, "admin/identities"),
                ResourceKind::Schema => (&endpoints.kratos_admin_url, "schemas"),
                ResourceKind::Client => (&endpoints.hydra_admin_url, "admin/clients"),
                ResourceKind::Rule
                | ResourceKind::Role
                | ResourceKind::Group
                | ResourceKind::Idp => {
                    (&endpoints.resources_api_url, kind.collection())
                }
            };
            if let Some(base) = base {
                let url = join_dir(base, path)
                    .map_err(|e| StoreError::InvalidPayload(format!("bad upstream url: {e}")))?;
                collections.insert(kind, url);
            }
        }

        Ok(Self {
            client,
            collections,
        })
    }

    fn collection_url(&self, kind: ResourceKind) -> StoreResult<Url> {
        self.collections
            .get(&kind)
            .cloned()
            .ok_or(StoreError::Unconfigured(kind))
    }

    fn item_url(&self, kind: ResourceKind, id: &str) -> StoreResult<Url> {
        let mut url = self.collection_url(kind)?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Unconfigured(kind))?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }

    async fn read_json(kind: ResourceKind, res: reqwest::Response) -> StoreResult<Value> {
        let res = check_status(kind, res)?;
        Ok(res.json::<Value>().await?)
    }
}

fn join_dir(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    base.join(path)
}

fn check_status(kind: ResourceKind, res: reqwest::Response) -> StoreResult<reqwest::Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }

    tracing::warn!(kind = kind.collection(), %status, "upstream request failed");
    Err(match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(kind),
        StatusCode::CONFLICT => StoreError::Conflict,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            StoreError::InvalidPayload("upstream rejected the payload".to_string())
        }
        other => StoreError::Status {
            status: other.as_u16(),
        },
    })
}

#[async_trait]
impl ResourceStore for HttpResourceStore {
    fn backend_name(&self) -> &'static str {
        "http"
    }

    async fn list(&self, kind: ResourceKind) -> StoreResult<Vec<Value>> {
        let res = self.client.get(self.collection_url(kind)?).send().await?;
        match Self::read_json(kind, res).await? {
            Value::Array(items) => Ok(items),
            // Some admin APIs wrap collections: {"data": [...]}
            Value::Object(mut obj) => match obj.remove("data") {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(StoreError::InvalidPayload(
                    "upstream collection is not a list".to_string(),
                )),
            },
            _ => Err(StoreError::InvalidPayload(
                "upstream collection is not a list".to_string(),
            )),
        }
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> StoreResult<Value> {
        let res = self.client.get(self.item_url(kind, id)?).send().await?;
        Self::read_json(kind, res).await
    }

    async fn create(&self, kind: ResourceKind, item: Value) -> StoreResult<Value> {
        let res = self
            .client
            .post(self.collection_url(kind)?)
            .json(&item)
            .send()
            .await?;
        Self::read_json(kind, res).await
    }

    async fn update(&self, kind: ResourceKind, id: &str, item: Value) -> StoreResult<Value> {
        let res = self
            .client
            .put(self.item_url(kind, id)?)
            .json(&item)
            .send()
            .await?;
        Self::read_json(kind, res).await
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> StoreResult<()> {
        let res = self.client.delete(self.item_url(kind, id)?).send().await?;
        check_status(kind, res)?;
        Ok(())
    }
}
