/*
 * Responsibility
 * - v0 の URL 構造を定義
 * - route ごとに認可 rule (と validator) を同時に登録する: rule のない route は 403
 */
use std::sync::Arc;

use axum::{
    Router,
    handler::Handler,
    http::Method,
    routing::{self, MethodRouter},
};

use crate::api::v0::handlers::{auth, resources, status};
use crate::middleware::auth::{AuthzRule, RouteRules, Target};
use crate::middleware::validation::{PayloadValidator, RequiredFields, ValidationRegistry};
use crate::services::authz::Relation;
use crate::services::resources::ResourceKind;
use crate::state::AppState;

pub const API_PREFIX: &str = "/api/v0";

/// Router plus the per-route authorization rules and payload validators.
pub struct ApiRoutes {
    router: Router<AppState>,
    rules: RouteRules,
    validators: ValidationRegistry,
}

impl ApiRoutes {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            rules: RouteRules::default(),
            validators: ValidationRegistry::default(),
        }
    }

    fn on(
        mut self,
        method: Method,
        path: &str,
        route: MethodRouter<AppState>,
        rule: AuthzRule,
    ) -> Self {
        self.rules.insert(method, path, rule);
        self.router = self.router.route(path, route);
        self
    }

    pub fn get<H, T>(self, path: &str, handler: H, rule: AuthzRule) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.on(Method::GET, path, routing::get(handler), rule)
    }

    pub fn post<H, T>(self, path: &str, handler: H, rule: AuthzRule) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.on(Method::POST, path, routing::post(handler), rule)
    }

    pub fn put<H, T>(self, path: &str, handler: H, rule: AuthzRule) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.on(Method::PUT, path, routing::put(handler), rule)
    }

    pub fn delete<H, T>(self, path: &str, handler: H, rule: AuthzRule) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.on(Method::DELETE, path, routing::delete(handler), rule)
    }

    pub fn validate(mut self, method: Method, path: &str, validator: impl PayloadValidator) -> Self {
        self.validators.register(method, path, Arc::new(validator));
        self
    }

    /// Route registered without an authorization rule.
    #[cfg(test)]
    pub fn unruled(mut self, path: &str, route: MethodRouter<AppState>) -> Self {
        self.router = self.router.route(path, route);
        self
    }

    pub fn into_parts(self) -> (Router<AppState>, RouteRules, ValidationRegistry) {
        (self.router, self.rules, self.validators)
    }
}

impl Default for ApiRoutes {
    fn default() -> Self {
        Self::new()
    }
}

fn resource_routes(api: ApiRoutes, kind: ResourceKind) -> ApiRoutes {
    let collection = format!("{API_PREFIX}/{}", kind.collection());
    let item = format!("{collection}/{{id}}");
    let check = |relation, target| AuthzRule::Check {
        resource: kind,
        relation,
        target,
    };

    api.get(
        &collection,
        move |state, principal| resources::list(kind, state, principal),
        AuthzRule::Collection {
            resource: kind,
            relation: Relation::CanView,
        },
    )
    .post(
        &collection,
        move |state, body| resources::create(kind, state, body),
        check(Relation::CanCreate, Target::Global),
    )
    .validate(Method::POST, &collection, RequiredFields(kind.required_fields()))
    .get(
        &item,
        move |state, id| resources::get(kind, state, id),
        check(Relation::CanView, Target::Param("id")),
    )
    .put(
        &item,
        move |state, id, body| resources::update(kind, state, id, body),
        check(Relation::CanEdit, Target::Param("id")),
    )
    .validate(Method::PUT, &item, RequiredFields(kind.required_fields()))
    .delete(
        &item,
        move |state, id| resources::delete(kind, state, id),
        check(Relation::CanDelete, Target::Param("id")),
    )
}

pub fn routes() -> ApiRoutes {
    let api = ApiRoutes::new()
        .get(
            &format!("{API_PREFIX}/status"),
            status::status,
            AuthzRule::Public,
        )
        .get(
            &format!("{API_PREFIX}/metrics"),
            status::metrics,
            AuthzRule::Public,
        )
        .get(&format!("{API_PREFIX}/auth"), auth::login, AuthzRule::Public)
        .get(
            &format!("{API_PREFIX}/auth/callback"),
            auth::callback,
            AuthzRule::Public,
        )
        .get(
            &format!("{API_PREFIX}/auth/me"),
            auth::me,
            AuthzRule::Authenticated,
        )
        .post(
            &format!("{API_PREFIX}/auth/logout"),
            auth::logout,
            AuthzRule::Authenticated,
        );

    ResourceKind::ALL.into_iter().fold(api, resource_routes)
}
