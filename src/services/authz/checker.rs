//! Relationship backend capability (`check_relation`) and its OpenFGA-compatible client.
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::query::AuthorizationQuery;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("relationship backend transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("relationship backend answered with status {0}")]
    Status(u16),
    #[error("relationship backend timed out")]
    Timeout,
    #[error("relationship backend error: {0}")]
    Backend(String),
}

/// Answers "does principal P have relation R on resource X?".
#[async_trait]
pub trait RelationChecker: Send + Sync + 'static {
    async fn check_relation(&self, query: &AuthorizationQuery) -> Result<bool, CheckError>;
}

#[derive(Debug, Clone)]
pub struct OpenFgaSettings {
    pub api_url: Url,
    pub store_id: String,
    pub model_id: Option<String>,
    pub api_token: Option<String>,
}

#[derive(Serialize)]
struct CheckRequest<'a> {
    tuple_key: TupleKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_model_id: Option<&'a str>,
}

#[derive(Serialize)]
struct TupleKey {
    user: String,
    relation: &'static str,
    object: String,
}

#[derive(Deserialize)]
struct CheckResponse {
    #[serde(default)]
    allowed: bool,
}

/// OpenFGA `POST /stores/{store_id}/check` client.
#[derive(Clone)]
pub struct OpenFgaChecker {
    client: reqwest::Client,
    check_url: Url,
    model_id: Option<String>,
    api_token: Option<String>,
}

impl std::fmt::Debug for OpenFgaChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print the api token
        f.debug_struct("OpenFgaChecker")
            .field("check_url", &self.check_url.as_str())
            .field("model_id", &self.model_id)
            .finish()
    }
}

impl OpenFgaChecker {
    pub fn new(settings: &OpenFgaSettings, timeout: Duration) -> Result<Self, CheckError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let mut check_url = settings.api_url.clone();
        check_url
            .path_segments_mut()
            .map_err(|_| CheckError::Backend("authorization api url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["stores", settings.store_id.as_str(), "check"]);

        Ok(Self {
            client,
            check_url,
            model_id: settings.model_id.clone(),
            api_token: settings.api_token.clone(),
        })
    }
}

#[async_trait]
impl RelationChecker for OpenFgaChecker {
    async fn check_relation(&self, query: &AuthorizationQuery) -> Result<bool, CheckError> {
        let body = CheckRequest {
            tuple_key: TupleKey {
                user: query.principal_id.clone(),
                relation: query.relation.as_str(),
                object: query.object(),
            },
            authorization_model_id: self.model_id.as_deref(),
        };

        let mut req = self.client.post(self.check_url.clone()).json(&body);
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }

        let res = req.send().await.map_err(|e| {
            if e.is_timeout() {
                CheckError::Timeout
            } else {
                CheckError::Transport(e)
            }
        })?;

        let status = res.status();
        if !status.is_success() {
            return Err(CheckError::Status(status.as_u16()));
        }

        Ok(res.json::<CheckResponse>().await?.allowed)
    }
}
