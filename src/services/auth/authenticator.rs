use axum::http::{HeaderMap, HeaderValue};
use chrono::Utc;
use thiserror::Error;

use super::cookies::{AUTH_COOKIE, CookieError, CookieManager, USER_SESSION_COOKIE, read_cookie};
use super::oauth2::{LoginEvent, LoginPhase, OAuth2Context, OAuth2Error};
use super::principal::Principal;
use crate::observability::{Monitor, Observability};

#[derive(Debug, Error)]
pub enum AuthnError {
    #[error("no session cookie")]
    Missing,
    #[error("session cookie rejected: {0}")]
    Rejected(#[from] CookieError),
    #[error("session expired and cannot be refreshed")]
    RefreshUnavailable,
    #[error("session refresh failed: {0}")]
    RefreshFailed(#[from] OAuth2Error),
}

#[derive(Debug)]
pub enum Authenticated {
    Session(Principal),
    /// Auth cookie was expired; new cookies must be set on the response.
    Refreshed {
        principal: Principal,
        cookies: Vec<HeaderValue>,
    },
}

impl Authenticated {
    pub fn principal(&self) -> &Principal {
        match self {
            Authenticated::Session(p) => p,
            Authenticated::Refreshed { principal, .. } => principal,
        }
    }
}

/// Turns request cookies into a [`Principal`], refreshing expired sessions.
#[derive(Debug, Clone)]
pub struct Authenticator {
    cookies: CookieManager,
    oauth2: Option<OAuth2Context>,
    monitor: Monitor,
}

impl Authenticator {
    /// `oauth2` is `None` when discovery failed under the degraded policy.
    pub fn new(cookies: CookieManager, oauth2: Option<OAuth2Context>, obs: &Observability) -> Self {
        Self {
            cookies,
            oauth2,
            monitor: obs.monitor("authentication"),
        }
    }

    pub fn cookies(&self) -> &CookieManager {
        &self.cookies
    }

    pub fn oauth2(&self) -> Option<&OAuth2Context> {
        self.oauth2.as_ref()
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Authenticated, AuthnError> {
        let res = self.authenticate_inner(headers).await;
        let outcome = match &res {
            Ok(Authenticated::Session(_)) => "session",
            Ok(Authenticated::Refreshed { .. }) => "refreshed",
            Err(AuthnError::Missing) => "missing",
            Err(AuthnError::Rejected(_)) => "rejected",
            Err(AuthnError::RefreshUnavailable | AuthnError::RefreshFailed(_)) => "refresh_failed",
        };
        self.monitor.incr("authentication_outcomes_total", outcome);
        res
    }

    async fn authenticate_inner(&self, headers: &HeaderMap) -> Result<Authenticated, AuthnError> {
        let value = read_cookie(headers, AUTH_COOKIE).ok_or(AuthnError::Missing)?;

        match self.cookies.validate_at(value, Utc::now()) {
            Ok((claims, exp)) => Ok(Authenticated::Session(Principal::from_session(&claims, exp))),
            Err(CookieError::Expired) => self.refresh(headers).await,
            Err(err) => Err(err.into()),
        }
    }

    async fn refresh(&self, headers: &HeaderMap) -> Result<Authenticated, AuthnError> {
        let oauth2 = self.oauth2.as_ref().ok_or(AuthnError::RefreshUnavailable)?;

        let session_value =
            read_cookie(headers, USER_SESSION_COOKIE).ok_or(AuthnError::RefreshUnavailable)?;
        let session = self.cookies.validate(session_value)?;
        // a readable user session is an established one
        let phase = LoginPhase::SessionEstablished;

        let refreshed = match oauth2.refresh(&session).await {
            Ok(refreshed) => {
                phase.advance(LoginEvent::Refreshed)?;
                refreshed
            }
            Err(err) => {
                let phase = phase.advance(LoginEvent::RefreshFailed)?;
                tracing::debug!(subject = %session.subject, ?phase, "session ended by failed refresh");
                return Err(AuthnError::RefreshFailed(err));
            }
        };
        let cookies = self.cookies.session_cookies(&refreshed)?;

        let ttl = chrono::Duration::from_std(self.cookies.settings().auth_ttl)
            .unwrap_or(chrono::Duration::zero());
        let principal = Principal::from_session(&refreshed, Utc::now() + ttl);
        tracing::debug!(subject = %principal.subject, "session refreshed");

        Ok(Authenticated::Refreshed { principal, cookies })
    }
}
