//! Route-level authorization.
//!
//! Every API route is registered together with an [`AuthzRule`]. The middleware
//! looks the rule up by method and route template and either lets the request
//! through, runs one relationship check, or defers to the handler (collections,
//! which filter per item through the worker pool).
//!
//! A matched route without a rule is denied.
use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{FromRequestParts, MatchedPath, RawPathParams, State},
    http::{Method, Request},
    middleware::{self, Next},
    response::Response,
};

use crate::error::AppError;
use crate::services::auth::Principal;
use crate::services::authz::{AuthorizationQuery, AuthorizationService, GLOBAL_OBJECT, Relation};
use crate::services::resources::ResourceKind;
use crate::state::AppState;

/// Which object a single check targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Value of the named path parameter.
    Param(&'static str),
    /// The `<type>:global` object (creation).
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzRule {
    Public,
    /// Any principal.
    Authenticated,
    Check {
        resource: ResourceKind,
        relation: Relation,
        target: Target,
    },
    /// Checked per item by the handler.
    Collection {
        resource: ResourceKind,
        relation: Relation,
    },
}

/// Rules keyed by method and route template (without context path).
#[derive(Debug, Clone, Default)]
pub struct RouteRules {
    rules: HashMap<(Method, String), AuthzRule>,
}

impl RouteRules {
    pub fn insert(&mut self, method: Method, template: &str, rule: AuthzRule) {
        if let Some(previous) = self.rules.insert((method.clone(), template.to_string()), rule) {
            tracing::warn!(%method, template, ?previous, "authorization rule replaced");
        }
    }

    pub fn get(&self, method: &Method, template: &str) -> Option<AuthzRule> {
        let method = if *method == Method::HEAD {
            &Method::GET
        } else {
            method
        };
        self.rules.get(&(method.clone(), template.to_string())).copied()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[derive(Clone)]
pub struct AuthzState {
    pub authz: AuthorizationService,
    pub rules: Arc<RouteRules>,
    pub context_path: String,
}

pub fn apply(router: Router<AppState>, state: AuthzState) -> Router<AppState> {
    router.route_layer(middleware::from_fn_with_state(state, authorization_middleware))
}

async fn authorization_middleware(
    State(state): State<AuthzState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let matched = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_default();

    let rule = crate::middleware::lookup_template(&matched, &state.context_path, |template| {
        state.rules.get(req.method(), template)
    });
    let Some(rule) = rule else {
        tracing::warn!(method = %req.method(), route = %matched, "route has no authorization rule");
        return Err(AppError::AuthorizationDenied);
    };

    if rule == AuthzRule::Public {
        return Ok(next.run(req).await);
    }

    let Some(principal) = req.extensions().get::<Principal>().cloned() else {
        return Err(AppError::AuthenticationRequired);
    };

    match rule {
        AuthzRule::Public | AuthzRule::Authenticated | AuthzRule::Collection { .. } => {
            Ok(next.run(req).await)
        }
        AuthzRule::Check {
            resource,
            relation,
            target,
        } => {
            let (mut parts, body) = req.into_parts();

            let resource_id = match target {
                Target::Global => GLOBAL_OBJECT.to_string(),
                Target::Param(name) => {
                    let params = RawPathParams::from_request_parts(&mut parts, &())
                        .await
                        .map_err(|_| AppError::AuthorizationDenied)?;
                    let id = params
                        .iter()
                        .find(|(key, _)| *key == name)
                        .map(|(_, value)| value.to_string())
                        .ok_or_else(|| {
                            tracing::error!(route = %matched, param = name, "authorization target missing");
                            AppError::AuthorizationDenied
                        })?;
                    // the collection-wide object is never addressable as an item
                    if id == GLOBAL_OBJECT {
                        tracing::warn!(route = %matched, "item route addressed the global object");
                        return Err(AppError::AuthorizationDenied);
                    }
                    id
                }
            };

            let query =
                AuthorizationQuery::new(principal.authz_id(), resource, resource_id, relation);
            state.authz.check(&query).await?;

            Ok(next.run(Request::from_parts(parts, body)).await)
        }
    }
}

/// Keep the items of a collection the principal may see, in upstream order.
pub async fn filter_collection<T>(
    authz: &AuthorizationService,
    principal: &Principal,
    resource: ResourceKind,
    relation: Relation,
    items: Vec<(String, T)>,
) -> Result<Vec<T>, AppError> {
    Ok(authz
        .filter_allowed(&principal.authz_id(), resource, relation, items)
        .await?)
}
