//! Fakes shared by unit and router tests.
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;

use crate::observability::Observability;
use crate::services::auth::provider::{
    AuthorizationRequest, IdTokenClaims, IdentityProvider, ProviderError, TokenSet,
};
use crate::services::auth::principal::SessionClaims;
use crate::services::auth::{
    AUTH_COOKIE, Authenticator, CookieManager, CookieSettings, Encrypt, OAuth2Context,
    USER_SESSION_COOKIE,
};
use crate::services::authz::checker::CheckError;
use crate::services::authz::{AuthorizationQuery, AuthorizationService, RelationChecker};
use crate::services::pool::{PoolConfig, WorkerPool};
use crate::services::resources::ResourceKind;
use crate::services::upstream::MemoryResourceStore;
use crate::state::AppState;

pub const TEST_KEY: [u8; 32] = [42u8; 32];

pub fn test_cookies() -> CookieManager {
    CookieManager::new(
        Encrypt::new(&TEST_KEY),
        CookieSettings {
            auth_ttl: Duration::from_secs(60),
            session_ttl: Duration::from_secs(3600),
            login_ttl: Duration::from_secs(300),
            path: "/".into(),
        },
    )
}

/// Relationship backend answering from fixed id lists.
#[derive(Debug, Default)]
pub struct FakeChecker {
    allow_by_default: bool,
    failing: HashSet<String>,
    denying: HashSet<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    queries: Mutex<Vec<AuthorizationQuery>>,
}

impl FakeChecker {
    pub fn allow_all() -> Self {
        Self {
            allow_by_default: true,
            ..Self::default()
        }
    }

    pub fn deny_all() -> Self {
        Self::default()
    }

    pub fn failing<'a>(mut self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        self.failing.extend(ids.into_iter().map(str::to_string));
        self
    }

    pub fn denying<'a>(mut self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        self.denying.extend(ids.into_iter().map(str::to_string));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<AuthorizationQuery> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl RelationChecker for FakeChecker {
    async fn check_relation(&self, query: &AuthorizationQuery) -> Result<bool, CheckError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&query.resource_id) {
            return Err(CheckError::Backend("injected failure".into()));
        }
        if self.denying.contains(&query.resource_id) {
            return Ok(false);
        }
        Ok(self.allow_by_default)
    }
}

/// Identity provider that accepts any code and echoes the last nonce it was asked for.
#[derive(Debug)]
pub struct FakeProvider {
    subject: String,
    last_nonce: Mutex<Option<String>>,
    exchanges: Arc<AtomicUsize>,
    refresh_fails: bool,
}

impl FakeProvider {
    pub const ISSUER: &'static str = "https://idp.test";

    pub fn new(subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            last_nonce: Mutex::new(None),
            exchanges: Arc::new(AtomicUsize::new(0)),
            refresh_fails: false,
        }
    }

    pub fn refresh_fails(mut self) -> Self {
        self.refresh_fails = true;
        self
    }

    /// Count of code exchanges performed.
    pub fn exchanges(&self) -> Arc<AtomicUsize> {
        self.exchanges.clone()
    }

    fn tokens(&self) -> TokenSet {
        TokenSet {
            id_token: Some(format!("id-token-for-{}", self.subject)),
            refresh_token: Some("rt-rotated".into()),
            expires_in: Some(60),
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn issuer(&self) -> &str {
        Self::ISSUER
    }

    fn authorization_url(&self, request: &AuthorizationRequest) -> Url {
        *self.last_nonce.lock() = Some(request.nonce.clone());

        let mut url = Url::parse("https://idp.test/oauth2/auth").expect("static url");
        url.query_pairs_mut()
            .append_pair("state", &request.state)
            .append_pair("code_challenge", &request.code_challenge);
        url
    }

    async fn exchange_code(
        &self,
        code: &str,
        _pkce_verifier: &str,
    ) -> Result<TokenSet, ProviderError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if code == "bad-code" {
            return Err(ProviderError::Status { status: 400 });
        }
        Ok(self.tokens())
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, ProviderError> {
        if self.refresh_fails {
            return Err(ProviderError::Status { status: 400 });
        }
        Ok(self.tokens())
    }

    async fn verify_id_token(&self, _id_token: &str) -> Result<IdTokenClaims, ProviderError> {
        Ok(IdTokenClaims {
            iss: Self::ISSUER.into(),
            sub: self.subject.clone(),
            email: Some(format!("{}@example.com", self.subject)),
            name: None,
            nonce: self.last_nonce.lock().clone(),
        })
    }
}

/// Fakes wired into an [`AppState`] the way `app::build_state` wires the real services.
pub struct TestGateway {
    pub checker: Arc<FakeChecker>,
    pub store: Arc<MemoryResourceStore>,
    pub exchanges: Arc<AtomicUsize>,
    provider: Arc<FakeProvider>,
    obs: Observability,
}

impl TestGateway {
    pub fn new(checker: FakeChecker) -> Self {
        Self::with_provider(checker, FakeProvider::new("alice"))
    }

    pub fn with_provider(checker: FakeChecker, provider: FakeProvider) -> Self {
        Self {
            checker: Arc::new(checker),
            store: Arc::new(MemoryResourceStore::new()),
            exchanges: provider.exchanges(),
            provider: Arc::new(provider),
            obs: Observability::detached(),
        }
    }

    fn state_with(&self, authenticator: Option<Authenticator>) -> AppState {
        let pool = WorkerPool::new(
            PoolConfig {
                workers: 4,
                queue_depth: 16,
                submit_timeout: Duration::from_millis(200),
            },
            &self.obs,
        );
        AppState {
            authenticator,
            authz: AuthorizationService::new(
                self.checker.clone(),
                pool,
                Duration::from_millis(500),
                &self.obs,
            ),
            store: self.store.clone(),
            obs: self.obs.clone(),
            post_login_redirect: "/".into(),
        }
    }

    /// Must be called inside a tokio runtime (the pool spawns its workers).
    pub fn state(&self) -> AppState {
        let oauth2 = OAuth2Context::new(self.provider.clone(), &self.obs);
        self.state_with(Some(Authenticator::new(
            test_cookies(),
            Some(oauth2),
            &self.obs,
        )))
    }

    pub fn state_without_authentication(&self) -> AppState {
        self.state_with(None)
    }

    pub fn seed_groups(&self, ids: &[&str]) {
        self.store.seed(
            ResourceKind::Group,
            ids.iter()
                .map(|id| serde_json::json!({"id": id, "name": format!("group {id}")})),
        );
    }

    /// `Cookie` header value for a live session.
    pub fn session_cookie(&self, claims: &SessionClaims) -> String {
        let cookies = test_cookies();
        let auth = cookies
            .issue(&claims.without_refresh_token(), cookies.settings().auth_ttl)
            .expect("issue auth cookie");
        let session = cookies
            .issue(claims, cookies.settings().session_ttl)
            .expect("issue session cookie");
        format!("{AUTH_COOKIE}={auth}; {USER_SESSION_COOKIE}={session}")
    }

    /// Like [`Self::session_cookie`] but with the auth cookie already expired.
    pub fn expired_session_cookie(&self, claims: &SessionClaims) -> String {
        let cookies = test_cookies();
        let past = chrono::Utc::now() - chrono::Duration::seconds(600);
        let auth = cookies
            .issue_at(
                &claims.without_refresh_token(),
                cookies.settings().auth_ttl,
                past,
            )
            .expect("issue auth cookie");
        let session = cookies
            .issue(claims, cookies.settings().session_ttl)
            .expect("issue session cookie");
        format!("{AUTH_COOKIE}={auth}; {USER_SESSION_COOKIE}={session}")
    }
}
