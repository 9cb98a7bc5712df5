//! Payload validation slot (`PAYLOAD_VALIDATION_ENABLED`).
//!
//! Resource APIs register a [`PayloadValidator`] per create/update route. The
//! middleware buffers the JSON body, runs the validator and rejects with `422`
//! before the handler sees anything. Routes without a validator pass untouched.
use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::{MatchedPath, State},
    http::{Method, Request},
    middleware::{self, Next},
    response::Response,
};
use serde_json::Value;

use crate::error::AppError;
use crate::state::AppState;

const MAX_VALIDATED_BODY: usize = 1024 * 1024;

pub trait PayloadValidator: Send + Sync + 'static {
    /// Returns one human-readable detail per violation.
    fn validate(&self, payload: &Value) -> Result<(), Vec<String>>;
}

/// Object with every listed field present and non-null.
#[derive(Debug, Clone, Copy)]
pub struct RequiredFields(pub &'static [&'static str]);

impl PayloadValidator for RequiredFields {
    fn validate(&self, payload: &Value) -> Result<(), Vec<String>> {
        let Some(object) = payload.as_object() else {
            return Err(vec!["payload must be a JSON object".to_string()]);
        };

        let missing: Vec<String> = self
            .0
            .iter()
            .filter(|field| object.get(**field).is_none_or(Value::is_null))
            .map(|field| format!("missing field: {field}"))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }
}

#[derive(Clone, Default)]
pub struct ValidationRegistry {
    validators: HashMap<(Method, String), Arc<dyn PayloadValidator>>,
}

impl std::fmt::Debug for ValidationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationRegistry")
            .field("routes", &self.validators.len())
            .finish()
    }
}

impl ValidationRegistry {
    pub fn register(&mut self, method: Method, template: &str, validator: Arc<dyn PayloadValidator>) {
        self.validators
            .insert((method, template.to_string()), validator);
    }

    pub fn get(&self, method: &Method, template: &str) -> Option<Arc<dyn PayloadValidator>> {
        self.validators
            .get(&(method.clone(), template.to_string()))
            .cloned()
    }
}

#[derive(Clone)]
pub struct ValidationState {
    pub registry: Arc<ValidationRegistry>,
    pub context_path: String,
}

pub fn apply(router: Router<AppState>, state: ValidationState) -> Router<AppState> {
    router.route_layer(middleware::from_fn_with_state(state, validation_middleware))
}

async fn validation_middleware(
    State(state): State<ValidationState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let matched = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_default();

    let validator = super::lookup_template(&matched, &state.context_path, |template| {
        state.registry.get(req.method(), template)
    });
    let Some(validator) = validator else {
        return Ok(next.run(req).await);
    };

    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_VALIDATED_BODY)
        .await
        .map_err(|_| AppError::bad_request("invalid_body", "request body could not be read"))?;

    let payload: Value = serde_json::from_slice(&bytes)
        .map_err(|e| AppError::validation(vec![format!("invalid JSON: {e}")]))?;

    if let Err(details) = validator.validate(&payload) {
        tracing::debug!(route = %matched, ?details, "payload rejected");
        return Err(AppError::validation(details));
    }

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}
