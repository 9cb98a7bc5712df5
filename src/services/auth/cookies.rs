//! Session cookies: sealing, validation and `Set-Cookie` rendering.
//!
//! Every cookie value is `Encrypt`-sealed JSON of an [`Envelope`] carrying its own
//! issue/expiry timestamps. The sealed `exp` is authoritative; the browser-side
//! `Max-Age` only decides whether the cookie is sent at all.
//!
//! Cookies:
//! - `auth_session`: short-lived, proves a recent login or refresh
//! - `user_session`: long-lived, carries the refresh token
//! - `login_state`: one login attempt (state, nonce, PKCE verifier)
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, header};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use super::encrypt::Encrypt;
use super::principal::SessionClaims;

pub const AUTH_COOKIE: &str = "auth_session";
pub const USER_SESSION_COOKIE: &str = "user_session";
pub const LOGIN_STATE_COOKIE: &str = "login_state";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CookieError {
    #[error("cookie expired")]
    Expired,
    #[error("cookie malformed")]
    Malformed,
    #[error("cookie invalid: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub auth_ttl: Duration,
    pub session_ttl: Duration,
    pub login_ttl: Duration,
    /// Cookie `Path`, usually `<context path>/`.
    pub path: String,
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    iat: i64,
    exp: i64,
    data: T,
}

#[derive(Debug, Clone)]
pub struct CookieManager {
    encrypt: Encrypt,
    settings: CookieSettings,
}

impl CookieManager {
    pub fn new(encrypt: Encrypt, settings: CookieSettings) -> Self {
        Self { encrypt, settings }
    }

    pub fn settings(&self) -> &CookieSettings {
        &self.settings
    }

    pub fn issue(&self, claims: &SessionClaims, ttl: Duration) -> Result<String, CookieError> {
        self.issue_at(claims, ttl, Utc::now())
    }

    pub fn issue_at(
        &self,
        claims: &SessionClaims,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, CookieError> {
        if claims.subject.is_empty() {
            return Err(CookieError::Invalid("empty subject"));
        }
        self.seal_at(claims, ttl, now)
    }

    pub fn validate(&self, value: &str) -> Result<SessionClaims, CookieError> {
        self.validate_at(value, Utc::now()).map(|(claims, _)| claims)
    }

    /// Validate a session cookie, returning its claims and sealed expiry.
    pub fn validate_at(
        &self,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<(SessionClaims, DateTime<Utc>), CookieError> {
        let (claims, exp) = self.open_at::<SessionClaims>(value, now)?;
        if claims.subject.is_empty() {
            return Err(CookieError::Invalid("empty subject"));
        }
        Ok((claims, exp))
    }

    pub fn seal<T: Serialize>(&self, data: &T, ttl: Duration) -> Result<String, CookieError> {
        self.seal_at(data, ttl, Utc::now())
    }

    pub fn seal_at<T: Serialize>(
        &self,
        data: &T,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, CookieError> {
        let ttl_secs = i64::try_from(ttl.as_secs()).map_err(|_| CookieError::Invalid("ttl"))?;
        if ttl_secs <= 0 {
            return Err(CookieError::Invalid("ttl"));
        }

        let iat = now.timestamp();
        let envelope = Envelope {
            iat,
            exp: iat.saturating_add(ttl_secs),
            data,
        };
        let json = serde_json::to_vec(&envelope).map_err(|_| CookieError::Malformed)?;

        self.encrypt
            .encrypt(&json)
            .map_err(|_| CookieError::Invalid("encryption failed"))
    }

    pub fn open<T: DeserializeOwned>(&self, value: &str) -> Result<T, CookieError> {
        self.open_at(value, Utc::now()).map(|(data, _)| data)
    }

    pub fn open_at<T: DeserializeOwned>(
        &self,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<(T, DateTime<Utc>), CookieError> {
        let plaintext = self
            .encrypt
            .decrypt(value)
            .map_err(|_| CookieError::Malformed)?;
        let envelope: Envelope<T> =
            serde_json::from_slice(&plaintext).map_err(|_| CookieError::Malformed)?;

        if envelope.exp <= envelope.iat {
            return Err(CookieError::Invalid("empty validity window"));
        }
        if now.timestamp() >= envelope.exp {
            return Err(CookieError::Expired);
        }

        let exp = Utc
            .timestamp_opt(envelope.exp, 0)
            .single()
            .ok_or(CookieError::Malformed)?;

        Ok((envelope.data, exp))
    }

    /// `Set-Cookie` values for a freshly established (or refreshed) session.
    pub fn session_cookies(&self, claims: &SessionClaims) -> Result<Vec<HeaderValue>, CookieError> {
        let now = Utc::now();
        let auth = self.issue_at(&claims.without_refresh_token(), self.settings.auth_ttl, now)?;
        let session = self.issue_at(claims, self.settings.session_ttl, now)?;

        // auth cookie outlives its sealed expiry in the browser so refresh can see it
        Ok(vec![
            self.set_cookie(AUTH_COOKIE, &auth, self.settings.session_ttl)?,
            self.set_cookie(USER_SESSION_COOKIE, &session, self.settings.session_ttl)?,
        ])
    }

    pub fn login_state_cookie(&self, sealed: &str) -> Result<HeaderValue, CookieError> {
        self.set_cookie(LOGIN_STATE_COOKIE, sealed, self.settings.login_ttl)
    }

    pub fn clear(&self, name: &str) -> Result<HeaderValue, CookieError> {
        render(name, "", 0, &self.settings.path)
    }

    /// Clear both session cookies.
    pub fn clear_session(&self) -> Result<Vec<HeaderValue>, CookieError> {
        Ok(vec![self.clear(AUTH_COOKIE)?, self.clear(USER_SESSION_COOKIE)?])
    }

    fn set_cookie(&self, name: &str, value: &str, max_age: Duration) -> Result<HeaderValue, CookieError> {
        render(name, value, max_age.as_secs(), &self.settings.path)
    }
}

fn render(name: &str, value: &str, max_age: u64, path: &str) -> Result<HeaderValue, CookieError> {
    let cookie = format!("{name}={value}; Max-Age={max_age}; Path={path}; HttpOnly; Secure; SameSite=Lax");
    HeaderValue::from_str(&cookie).map_err(|_| CookieError::Invalid("header value"))
}

/// First value of cookie `name` across all `Cookie` headers.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}
