/*
 * Responsibility
 * - 環境変数や設定の読み込み (認証, 認可バックエンド, worker pool, upstream など)
 * - 設定値のバリデーション (不足・不正なら起動失敗)
 */
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::services::auth::{OidcSettings, parse_key_material};
use crate::services::authz::OpenFgaSettings;
use crate::services::pool::PoolConfig;
use crate::services::upstream::UpstreamEndpoints;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(raw: Option<String>) -> Self {
        match raw
            .unwrap_or_else(|| "development".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

/// What to do when the identity provider cannot be discovered at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryFailurePolicy {
    /// Abort startup.
    Fail,
    /// Start without login; existing valid cookies keep working.
    Degraded,
}

#[derive(Clone)]
pub struct OAuth2Config {
    pub oidc: OidcSettings,
    pub post_login_redirect: String,
    pub auth_cookie_ttl: Duration,
    pub user_session_ttl: Duration,
    pub cookies_encryption_key: [u8; 32],
    pub discovery_failure_policy: DiscoveryFailurePolicy,
}

impl fmt::Debug for OAuth2Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secrets stay out of logs
        f.debug_struct("OAuth2Config")
            .field("issuer", &self.oidc.issuer.as_str())
            .field("client_id", &self.oidc.client_id)
            .field("redirect_uri", &self.oidc.redirect_uri.as_str())
            .field("auth_cookie_ttl", &self.auth_cookie_ttl)
            .field("user_session_ttl", &self.user_session_ttl)
            .field("discovery_failure_policy", &self.discovery_failure_policy)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct AuthorizationConfig {
    pub backend: OpenFgaSettings,
    pub check_timeout: Duration,
}

pub struct Config {
    pub addr: SocketAddr,

    pub app_env: AppEnv,
    pub cors_allowed_origins: Vec<String>,

    pub context_path: String,
    pub payload_validation_enabled: bool,
    pub http_logging_enabled: bool,
    pub request_timeout: Duration,
    /// Extra `METHOD /path` (or `/path`) entries.
    pub auth_allowlist: Vec<String>,

    /// Present iff authentication is enabled.
    pub oauth2: Option<OAuth2Config>,
    pub authorization: AuthorizationConfig,
    pub pool: PoolConfig,
    pub upstream: UpstreamEndpoints,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let port: u16 = env.parse_or("PORT", 8000)?;
        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::parse(env.get("APP_ENV"));
        let cors_allowed_origins = env.list("CORS_ALLOWED_ORIGINS");

        let context_path = normalize_context_path(&env.get("CONTEXT_PATH").unwrap_or_default())
            .ok_or(ConfigError::Invalid("CONTEXT_PATH"))?;

        let authentication_enabled = env.flag("AUTHENTICATION_ENABLED", true)?;
        let payload_validation_enabled = env.flag("PAYLOAD_VALIDATION_ENABLED", true)?;
        let http_logging_enabled = env.flag("HTTP_LOGGING_ENABLED", false)?;
        let request_timeout = Duration::from_secs(env.parse_or("REQUEST_TIMEOUT_SECONDS", 30)?);
        if request_timeout.is_zero() {
            return Err(ConfigError::Invalid("REQUEST_TIMEOUT_SECONDS"));
        }
        let auth_allowlist = env.list("AUTH_ALLOWLIST");

        let oauth2 = if authentication_enabled {
            Some(Self::oauth2_from(&env, &context_path)?)
        } else {
            None
        };

        let authorization = AuthorizationConfig {
            backend: OpenFgaSettings {
                api_url: env.url("AUTHORIZATION_API_URL")?,
                store_id: env.required("AUTHORIZATION_STORE_ID")?,
                model_id: env.get("AUTHORIZATION_MODEL_ID"),
                api_token: env.get("AUTHORIZATION_API_TOKEN"),
            },
            check_timeout: Duration::from_millis(
                env.parse_or("AUTHORIZATION_CHECK_TIMEOUT_MS", 2000)?,
            ),
        };
        if authorization.check_timeout.is_zero() {
            return Err(ConfigError::Invalid("AUTHORIZATION_CHECK_TIMEOUT_MS"));
        }

        let pool = PoolConfig {
            workers: env.parse_or("WORKER_POOL_SIZE", 10)?,
            queue_depth: env.parse_or("WORKER_POOL_QUEUE_DEPTH", 100)?,
            submit_timeout: Duration::from_millis(
                env.parse_or("WORKER_POOL_SUBMIT_TIMEOUT_MS", 500)?,
            ),
        };
        if pool.workers == 0 {
            return Err(ConfigError::Invalid("WORKER_POOL_SIZE"));
        }
        if pool.queue_depth == 0 {
            return Err(ConfigError::Invalid("WORKER_POOL_QUEUE_DEPTH"));
        }

        let upstream = UpstreamEndpoints {
            kratos_admin_url: env.optional_url("KRATOS_ADMIN_URL")?,
            hydra_admin_url: env.optional_url("HYDRA_ADMIN_URL")?,
            resources_api_url: env.optional_url("RESOURCES_API_URL")?,
        };

        Ok(Self {
            addr,
            app_env,
            cors_allowed_origins,
            context_path,
            payload_validation_enabled,
            http_logging_enabled,
            request_timeout,
            auth_allowlist,
            oauth2,
            authorization,
            pool,
            upstream,
        })
    }

    fn oauth2_from<F>(env: &Env<F>, context_path: &str) -> Result<OAuth2Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let scopes = match env.get("OAUTH2_SCOPES") {
            Some(_) => env.list("OAUTH2_SCOPES"),
            None => ["openid", "email", "profile", "offline_access"]
                .map(String::from)
                .to_vec(),
        };

        let oidc = OidcSettings {
            issuer: env.url("OIDC_ISSUER")?,
            client_id: env.required("OAUTH2_CLIENT_ID")?,
            client_secret: env.required("OAUTH2_CLIENT_SECRET")?,
            redirect_uri: env.url("OAUTH2_REDIRECT_URI")?,
            scopes,
        };

        let key_raw = env.required("OAUTH2_COOKIES_ENCRYPTION_KEY")?;
        let cookies_encryption_key = parse_key_material(&key_raw)
            .ok_or(ConfigError::Invalid("OAUTH2_COOKIES_ENCRYPTION_KEY"))?;

        let auth_cookie_ttl = env.parse_or("OAUTH2_AUTH_COOKIES_TTL_SECONDS", 300)?;
        let user_session_ttl = env.parse_or("OAUTH2_USER_SESSION_TTL_SECONDS", 3600)?;
        if auth_cookie_ttl == 0 {
            return Err(ConfigError::Invalid("OAUTH2_AUTH_COOKIES_TTL_SECONDS"));
        }
        if user_session_ttl < auth_cookie_ttl {
            return Err(ConfigError::Invalid("OAUTH2_USER_SESSION_TTL_SECONDS"));
        }

        let discovery_failure_policy = match env
            .get("OAUTH2_DISCOVERY_FAILURE_POLICY")
            .unwrap_or_else(|| "fail".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "fail" => DiscoveryFailurePolicy::Fail,
            "degraded" => DiscoveryFailurePolicy::Degraded,
            _ => return Err(ConfigError::Invalid("OAUTH2_DISCOVERY_FAILURE_POLICY")),
        };

        Ok(OAuth2Config {
            oidc,
            post_login_redirect: env
                .get("OAUTH2_POST_LOGIN_REDIRECT")
                .unwrap_or_else(|| format!("{context_path}/")),
            auth_cookie_ttl: Duration::from_secs(auth_cookie_ttl),
            user_session_ttl: Duration::from_secs(user_session_ttl),
            cookies_encryption_key,
            discovery_failure_policy,
        })
    }
}

/// `""`, `"/"` -> `""`; otherwise a leading slash and no trailing slash.
pub fn normalize_context_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Some(String::new());
    }
    if trimmed.contains(['?', '#', '{', '}', '*']) {
        return None;
    }
    if trimmed.starts_with('/') {
        Some(trimmed.to_string())
    } else {
        Some(format!("/{trimmed}"))
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parse_or<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid(key)),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(default),
            Some("true" | "1" | "yes" | "on") => Ok(true),
            Some("false" | "0" | "no" | "off") => Ok(false),
            Some(_) => Err(ConfigError::Invalid(key)),
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn url(&self, key: &'static str) -> Result<Url, ConfigError> {
        Url::parse(&self.required(key)?).map_err(|_| ConfigError::Invalid(key))
    }

    fn optional_url(&self, key: &'static str) -> Result<Option<Url>, ConfigError> {
        self.get(key)
            .map(|v| Url::parse(&v).map_err(|_| ConfigError::Invalid(key)))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const AUTHZ: [(&str, &str); 2] = [
        ("AUTHORIZATION_API_URL", "http://openfga:8080"),
        ("AUTHORIZATION_STORE_ID", "store-1"),
    ];

    #[test]
    fn defaults_without_authentication() {
        let mut vars = AUTHZ.to_vec();
        vars.push(("AUTHENTICATION_ENABLED", "false"));
        let config = load(&vars).expect("config");

        assert_eq!(config.addr.port(), 8000);
        assert!(config.oauth2.is_none());
        assert!(config.payload_validation_enabled);
        assert!(!config.http_logging_enabled);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.pool.workers, 10);
        assert_eq!(config.pool.queue_depth, 100);
        assert_eq!(config.authorization.check_timeout, Duration::from_millis(2000));
        assert!(config.upstream.is_empty());
    }

    #[test]
    fn authentication_requires_oauth2_settings() {
        let err = load(&AUTHZ).err().expect("must fail");
        assert!(matches!(err, ConfigError::Missing("OIDC_ISSUER")));
    }

    #[test]
    fn oauth2_settings_are_loaded() {
        let mut vars = AUTHZ.to_vec();
        vars.extend([
            ("CONTEXT_PATH", "admin/"),
            ("OIDC_ISSUER", "https://idp.example"),
            ("OAUTH2_CLIENT_ID", "gateway"),
            ("OAUTH2_CLIENT_SECRET", "secret"),
            ("OAUTH2_REDIRECT_URI", "https://gw.example/admin/api/v0/auth/callback"),
            (
                "OAUTH2_COOKIES_ENCRYPTION_KEY",
                "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
            ),
            ("OAUTH2_DISCOVERY_FAILURE_POLICY", "degraded"),
        ]);
        let config = load(&vars).expect("config");
        let oauth2 = config.oauth2.expect("oauth2");

        assert_eq!(config.context_path, "/admin");
        assert_eq!(oauth2.post_login_redirect, "/admin/");
        assert_eq!(oauth2.discovery_failure_policy, DiscoveryFailurePolicy::Degraded);
        assert_eq!(oauth2.oidc.scopes.len(), 4);
        assert!(!format!("{oauth2:?}").contains("secret"));
    }

    #[test]
    fn invalid_values_fail_instead_of_defaulting() {
        let mut vars = AUTHZ.to_vec();
        vars.extend([("AUTHENTICATION_ENABLED", "false"), ("WORKER_POOL_SIZE", "lots")]);
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid("WORKER_POOL_SIZE"))
        ));

        let mut vars = AUTHZ.to_vec();
        vars.push(("AUTHENTICATION_ENABLED", "maybe"));
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid("AUTHENTICATION_ENABLED"))
        ));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        for key in ["REQUEST_TIMEOUT_SECONDS", "AUTHORIZATION_CHECK_TIMEOUT_MS"] {
            let mut vars = AUTHZ.to_vec();
            vars.extend([("AUTHENTICATION_ENABLED", "false"), (key, "0")]);
            assert!(
                matches!(load(&vars), Err(ConfigError::Invalid(k)) if k == key),
                "{key}"
            );
        }
    }

    #[test]
    fn context_path_normalization() {
        assert_eq!(normalize_context_path("").as_deref(), Some(""));
        assert_eq!(normalize_context_path("/").as_deref(), Some(""));
        assert_eq!(normalize_context_path("/admin/").as_deref(), Some("/admin"));
        assert_eq!(normalize_context_path("admin").as_deref(), Some("/admin"));
        assert_eq!(normalize_context_path("/a/{b}"), None);
    }
}
