//! Builds the immutable request pipeline.
//!
//! Outer to inner: trace, request id, timeout + body limit, monitoring,
//! security headers, CORS, optional request logging; then on API routes
//! authentication, authorization, optional payload validation, handler.
use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use crate::api::v0::{self, ApiRoutes};
use crate::api::v0::handlers::not_found;
use crate::config::{AppEnv, Config};
use crate::middleware::auth::{AllowList, AllowListError, AuthnState, AuthzState};
use crate::middleware::validation::ValidationState;
use crate::middleware::{auth, cors, http, logging, monitoring, security_headers, validation};
use crate::state::AppState;

/// Router-level switches, derived once from [`Config`].
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub app_env: AppEnv,
    pub cors_allowed_origins: Vec<String>,
    pub context_path: String,
    pub payload_validation_enabled: bool,
    pub http_logging_enabled: bool,
    pub request_timeout: Duration,
    pub allow_list: AllowList,
}

impl RouterSettings {
    pub fn from_config(config: &Config) -> Result<Self, AllowListError> {
        Ok(Self {
            app_env: config.app_env,
            cors_allowed_origins: config.cors_allowed_origins.clone(),
            context_path: config.context_path.clone(),
            payload_validation_enabled: config.payload_validation_enabled,
            http_logging_enabled: config.http_logging_enabled,
            request_timeout: config.request_timeout,
            allow_list: AllowList::new(&config.auth_allowlist)?,
        })
    }
}

pub fn build_router(settings: &RouterSettings, state: AppState) -> Router {
    assemble(settings, state, v0::routes())
}

pub(crate) fn assemble(settings: &RouterSettings, state: AppState, api: ApiRoutes) -> Router {
    let (api, rules, validators) = api.into_parts();
    if rules.is_empty() {
        tracing::warn!("no authorization rules registered, every api route is forbidden");
    }
    tracing::debug!(rules = rules.len(), "api routes registered");

    // route_layer: the last one added runs first
    let mut api = api;
    if settings.payload_validation_enabled {
        api = validation::apply(
            api,
            ValidationState {
                registry: Arc::new(validators),
                context_path: settings.context_path.clone(),
            },
        );
    }
    let api = auth::authorization::apply(
        api,
        AuthzState {
            authz: state.authz.clone(),
            rules: Arc::new(rules),
            context_path: settings.context_path.clone(),
        },
    );
    let api = auth::authentication::apply(
        api,
        AuthnState {
            authenticator: state.authenticator.clone(),
            allow_list: Arc::new(settings.allow_list.clone()),
        },
    );

    let app = if settings.context_path.is_empty() {
        api
    } else {
        Router::new().nest(&settings.context_path, api)
    };
    let app = app.fallback(not_found).with_state(state);

    let app = if settings.http_logging_enabled {
        logging::apply(app)
    } else {
        app
    };
    let app = cors::apply(app, settings);
    let app = security_headers::apply(app, &settings.context_path);
    let app = monitoring::apply(app);
    http::apply(app, settings.request_timeout)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use axum::body::{Body, to_bytes};
    use axum::http::{HeaderMap, Method, Request, StatusCode, header};
    use axum::response::Response;
    use axum::routing::get;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::services::auth::principal::SessionClaims;
    use crate::services::auth::{AUTH_COOKIE, LOGIN_STATE_COOKIE, USER_SESSION_COOKIE};
    use crate::services::resources::ResourceKind;
    use crate::test_support::{FakeChecker, FakeProvider, TestGateway};

    fn settings(context_path: &str) -> RouterSettings {
        RouterSettings {
            app_env: AppEnv::Development,
            cors_allowed_origins: Vec::new(),
            context_path: context_path.to_string(),
            payload_validation_enabled: true,
            http_logging_enabled: false,
            request_timeout: Duration::from_secs(5),
            allow_list: AllowList::new::<&str>(&[]).expect("allow list"),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> Response {
        app.clone().oneshot(req).await.expect("infallible")
    }

    fn request(method: Method, uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).expect("request")
    }

    fn json_request(method: Method, uri: &str, cookie: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, cookie)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_json(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    fn set_cookies(headers: &HeaderMap) -> Vec<String> {
        headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    /// `name=value` pair of a `Set-Cookie` header.
    fn cookie_pair(set_cookie: &str) -> &str {
        set_cookie.split(';').next().unwrap_or_default()
    }

    fn alice() -> SessionClaims {
        SessionClaims {
            subject: "alice".into(),
            issuer: FakeProvider::ISSUER.into(),
            email: None,
            name: None,
            refresh_token: Some("rt-1".into()),
        }
    }

    #[tokio::test]
    async fn status_is_reachable_without_a_cookie() {
        let gw = TestGateway::new(FakeChecker::deny_all());
        let app = build_router(&settings(""), gw.state());

        let res = send(&app, request(Method::GET, "/api/v0/status", None)).await;

        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("x-request-id"));
        assert_eq!(res.headers()["x-content-type-options"], "nosniff");
        assert_eq!(gw.checker.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_cookie_is_rejected_before_any_authorization_call() {
        let gw = TestGateway::new(FakeChecker::allow_all());
        let app = build_router(&settings(""), gw.state());

        let res = send(
            &app,
            request(Method::GET, "/api/v0/groups", Some("auth_session=forged")),
        )
        .await;

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["error"]["code"], "authentication_required");
        assert_eq!(gw.checker.calls(), 0);
    }

    #[tokio::test]
    async fn group_list_keeps_only_permitted_items() {
        let gw = TestGateway::new(FakeChecker::allow_all().denying(["g2", "g4"]));
        gw.seed_groups(&["g1", "g2", "g3", "g4", "g5"]);
        let app = build_router(&settings(""), gw.state());

        let res = send(
            &app,
            request(Method::GET, "/api/v0/groups", Some(gw.session_cookie(&alice()).as_str())),
        )
        .await;

        assert_eq!(res.status(), StatusCode::OK);
        let ids: Vec<String> = body_json(res)
            .await
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|g| g["id"].as_str().map(str::to_string))
            .collect();
        assert_eq!(ids, vec!["g1", "g3", "g5"]);
        assert_eq!(gw.checker.calls(), 5);
        assert!(
            gw.checker
                .queries()
                .iter()
                .all(|q| q.principal_id == "user:alice" && q.resource_type == ResourceKind::Group)
        );
    }

    #[tokio::test]
    async fn list_fails_closed_when_every_check_errors() {
        let gw = TestGateway::new(FakeChecker::allow_all().failing(["g1", "g2"]));
        gw.seed_groups(&["g1", "g2"]);
        let app = build_router(&settings(""), gw.state());

        let res = send(
            &app,
            request(Method::GET, "/api/v0/groups", Some(gw.session_cookie(&alice()).as_str())),
        )
        .await;

        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(res).await["error"]["code"], "authorization_unavailable");
    }

    #[tokio::test]
    async fn saturated_pool_answers_pool_saturated_within_the_submit_timeout() {
        let gw = TestGateway::new(FakeChecker::allow_all());
        let ids: Vec<String> = (0..20).map(|i| format!("g{i}")).collect();
        gw.seed_groups(&ids.iter().map(String::as_str).collect::<Vec<_>>());
        let state = gw.state();
        let pool = state.authz.pool().clone();
        let app = build_router(&settings(""), state);

        // 4 busy workers plus 16 queued jobs leave no room
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let mut blockers = Vec::new();
        for _ in 0..20 {
            let gate = gate.clone();
            let handle = pool
                .submit(async move {
                    let _ = gate.acquire().await;
                })
                .await
                .expect("fill pool");
            blockers.push(handle);
        }

        let started = std::time::Instant::now();
        let res = send(
            &app,
            request(Method::GET, "/api/v0/groups", Some(gw.session_cookie(&alice()).as_str())),
        )
        .await;
        let elapsed = started.elapsed();

        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(res).await["error"]["code"], "pool_saturated");
        assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");
        assert_eq!(gw.checker.calls(), 0);

        gate.add_permits(20);
        for handle in blockers {
            assert!(handle.await.is_ok());
        }
    }

    #[tokio::test]
    async fn single_item_routes_check_the_path_parameter() {
        let gw = TestGateway::new(FakeChecker::allow_all().denying(["secret"]));
        gw.seed_groups(&["open", "secret"]);
        let app = build_router(&settings(""), gw.state());
        let cookie = gw.session_cookie(&alice());

        let res = send(&app, request(Method::GET, "/api/v0/groups/open", Some(cookie.as_str()))).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = send(&app, request(Method::DELETE, "/api/v0/groups/secret", Some(cookie.as_str()))).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let queries = gw.checker.queries();
        assert_eq!(queries[0].object(), "group:open");
        assert_eq!(queries[0].relation.as_str(), "can_view");
        assert_eq!(queries[1].object(), "group:secret");
        assert_eq!(queries[1].relation.as_str(), "can_delete");
    }

    #[tokio::test]
    async fn item_routes_cannot_address_the_global_object() {
        let gw = TestGateway::new(FakeChecker::allow_all());
        gw.seed_groups(&["global"]);
        let app = build_router(&settings(""), gw.state());
        let cookie = gw.session_cookie(&alice());

        for method in [Method::GET, Method::DELETE] {
            let res = send(&app, request(method, "/api/v0/groups/global", Some(cookie.as_str()))).await;
            assert_eq!(res.status(), StatusCode::FORBIDDEN);
        }
        assert_eq!(gw.checker.calls(), 0);
    }

    #[tokio::test]
    async fn creation_is_checked_against_the_global_object() {
        let gw = TestGateway::new(FakeChecker::allow_all());
        let app = build_router(&settings(""), gw.state());

        let res = send(
            &app,
            json_request(
                Method::POST,
                "/api/v0/roles",
                &gw.session_cookie(&alice()),
                json!({"id": "admin", "name": "Admin"}),
            ),
        )
        .await;

        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(gw.checker.queries()[0].object(), "role:global");
        assert_eq!(gw.checker.queries()[0].relation.as_str(), "can_create");
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected_with_details() {
        let gw = TestGateway::new(FakeChecker::allow_all());
        let app = build_router(&settings(""), gw.state());

        let res = send(
            &app,
            json_request(
                Method::POST,
                "/api/v0/rules",
                &gw.session_cookie(&alice()),
                json!({"id": "r1"}),
            ),
        )
        .await;

        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(res).await;
        assert_eq!(body["error"]["code"], "validation_failed");
        assert_eq!(body["error"]["details"][0], "missing field: match");
    }

    #[tokio::test]
    async fn identity_providers_are_guarded_by_the_provider_object_type() {
        let gw = TestGateway::new(FakeChecker::allow_all());
        let app = build_router(&settings(""), gw.state());
        let cookie = gw.session_cookie(&alice());

        let res = send(
            &app,
            json_request(Method::POST, "/api/v0/idps", &cookie, json!({"id": "github"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let details = body_json(res).await["error"]["details"].clone();
        assert_eq!(details, json!(["missing field: provider", "missing field: client_id"]));

        let res = send(
            &app,
            json_request(
                Method::POST,
                "/api/v0/idps",
                &cookie,
                json!({"id": "github", "provider": "github", "client_id": "abc"}),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);

        let res = send(&app, request(Method::GET, "/api/v0/idps/github", Some(cookie.as_str()))).await;
        assert_eq!(res.status(), StatusCode::OK);

        let objects: Vec<String> = gw.checker.queries().iter().map(|q| q.object()).collect();
        assert_eq!(objects, vec!["provider:global", "provider:global", "provider:github"]);
    }

    #[tokio::test]
    async fn route_without_rule_is_forbidden() {
        let gw = TestGateway::new(FakeChecker::allow_all());
        let api = v0::routes().unruled("/api/v0/unruled", get(|| async { "reached" }));
        let app = assemble(&settings(""), gw.state(), api);

        let res = send(
            &app,
            request(Method::GET, "/api/v0/unruled", Some(gw.session_cookie(&alice()).as_str())),
        )
        .await;

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(gw.checker.calls(), 0);
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let gw = TestGateway::new(FakeChecker::allow_all());
        let app = build_router(&settings(""), gw.state());

        let res = send(&app, request(Method::GET, "/nope", None)).await;

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(res).await["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn mismatched_callback_state_sets_no_session() {
        let gw = TestGateway::new(FakeChecker::allow_all());
        let app = build_router(&settings(""), gw.state());

        let res = send(&app, request(Method::GET, "/api/v0/auth", None)).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        let login_state = set_cookies(res.headers())
            .into_iter()
            .find(|c| c.starts_with(LOGIN_STATE_COOKIE))
            .expect("login_state cookie");

        let res = send(
            &app,
            request(
                Method::GET,
                "/api/v0/auth/callback?code=c1&state=forged",
                Some(cookie_pair(&login_state)),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookies(res.headers()).is_empty());
        assert_eq!(body_json(res).await["error"]["code"], "csrf_mismatch");

        // Nothing was established, so the next protected call is still anonymous
        let res = send(&app, request(Method::GET, "/api/v0/auth/me", None)).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(gw.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn completed_login_establishes_a_session() {
        let gw = TestGateway::new(FakeChecker::allow_all());
        let app = build_router(&settings(""), gw.state());

        let res = send(
            &app,
            request(Method::GET, "/api/v0/auth?return_to=/ui/groups", None),
        )
        .await;
        let location = res.headers()[header::LOCATION].to_str().expect("location").to_string();
        let state = url::Url::parse(&location)
            .expect("url")
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .expect("state");
        let login_state = set_cookies(res.headers()).remove(0);

        let res = send(
            &app,
            request(
                Method::GET,
                &format!("/api/v0/auth/callback?code=c1&state={state}"),
                Some(cookie_pair(&login_state)),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(res.headers()[header::LOCATION], "/ui/groups");

        let cookies = set_cookies(res.headers());
        let session: Vec<&str> = cookies
            .iter()
            .filter(|c| c.starts_with(AUTH_COOKIE) || c.starts_with(USER_SESSION_COOKIE))
            .map(|c| cookie_pair(c))
            .collect();
        assert_eq!(session.len(), 2);
        assert!(cookies.iter().any(|c| c.starts_with("login_state=;")));

        let res = send(
            &app,
            request(Method::GET, "/api/v0/auth/me", Some(session.join("; ").as_str())),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["subject"], "alice");
    }

    #[tokio::test]
    async fn expired_auth_cookie_is_refreshed_transparently() {
        let gw = TestGateway::new(FakeChecker::allow_all());
        let app = build_router(&settings(""), gw.state());

        let res = send(
            &app,
            request(Method::GET, "/api/v0/auth/me", Some(gw.expired_session_cookie(&alice()).as_str())),
        )
        .await;

        assert_eq!(res.status(), StatusCode::OK);
        let renewed = set_cookies(res.headers());
        assert!(renewed.iter().any(|c| c.starts_with("auth_session=")));
        assert!(renewed.iter().any(|c| c.starts_with("user_session=")));
    }

    #[tokio::test]
    async fn failed_refresh_is_unauthenticated() {
        let gw = TestGateway::with_provider(
            FakeChecker::allow_all(),
            FakeProvider::new("alice").refresh_fails(),
        );
        let app = build_router(&settings(""), gw.state());

        let res = send(
            &app,
            request(Method::GET, "/api/v0/auth/me", Some(gw.expired_session_cookie(&alice()).as_str())),
        )
        .await;

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let cleared = set_cookies(res.headers());
        assert_eq!(cleared.len(), 2);
        assert!(cleared.iter().all(|c| c.contains("=;") && c.contains("Max-Age=0")));
    }

    #[tokio::test]
    async fn logout_ends_the_session() {
        let gw = TestGateway::new(FakeChecker::deny_all());
        let app = build_router(&settings(""), gw.state());

        let res = send(
            &app,
            request(Method::POST, "/api/v0/auth/logout", Some(gw.session_cookie(&alice()).as_str())),
        )
        .await;

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(res.headers()[header::CACHE_CONTROL], "no-store");
        let cleared = set_cookies(res.headers());
        assert!(cleared.iter().any(|c| c.starts_with("auth_session=;")));
        assert!(cleared.iter().any(|c| c.starts_with("user_session=;")));
        assert_eq!(gw.checker.calls(), 0);

        let res = send(&app, request(Method::POST, "/api/v0/auth/logout", None)).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn failed_code_exchange_discards_the_login_attempt() {
        let gw = TestGateway::new(FakeChecker::allow_all());
        let app = build_router(&settings(""), gw.state());

        let res = send(&app, request(Method::GET, "/api/v0/auth", None)).await;
        let location = res.headers()[header::LOCATION].to_str().expect("location").to_string();
        let state = url::Url::parse(&location)
            .expect("url")
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .expect("state");
        let login_state = set_cookies(res.headers()).remove(0);

        let res = send(
            &app,
            request(
                Method::GET,
                &format!("/api/v0/auth/callback?code=bad-code&state={state}"),
                Some(cookie_pair(&login_state)),
            ),
        )
        .await;

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(set_cookies(res.headers()), vec![format!(
            "{LOGIN_STATE_COOKIE}=; Max-Age=0; Path=/; HttpOnly; Secure; SameSite=Lax"
        )]);
        assert_eq!(gw.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_authentication_still_authorizes_as_anonymous() {
        let gw = TestGateway::new(FakeChecker::allow_all().denying(["g2"]));
        gw.seed_groups(&["g1", "g2"]);
        let app = build_router(&settings(""), gw.state_without_authentication());

        let res = send(&app, request(Method::GET, "/api/v0/groups", None)).await;

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await.as_array().map(Vec::len), Some(1));
        assert!(
            gw.checker
                .queries()
                .iter()
                .all(|q| q.principal_id == "user:anonymous")
        );

        let res = send(&app, request(Method::GET, "/api/v0/auth", None)).await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        let res = send(&app, request(Method::POST, "/api/v0/auth/logout", None)).await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn context_path_prefixes_every_route() {
        let gw = TestGateway::new(FakeChecker::allow_all());
        gw.seed_groups(&["g1"]);
        let app = build_router(&settings("/admin"), gw.state());

        let res = send(&app, request(Method::GET, "/admin/api/v0/status", None)).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = send(&app, request(Method::GET, "/api/v0/status", None)).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = send(
            &app,
            request(
                Method::GET,
                "/admin/api/v0/groups/g1",
                Some(gw.session_cookie(&alice()).as_str()),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(gw.checker.queries()[0].object(), "group:g1");
    }
}
