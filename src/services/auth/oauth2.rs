//! OAuth2 authorization-code flow (PKCE S256 + nonce) on top of an [`IdentityProvider`].
//!
//! Login phases:
//!
//! ```text
//! Unauthenticated --begin--> AwaitingCallback --callback--> TokenExchanged --establish--> SessionEstablished
//!                                                             |                              |
//!                                                       exchange failed              logout / refresh failed
//!                                                             v                              v
//!                                                       Unauthenticated               Unauthenticated
//! ```
//!
//! Nothing here is stored server-side: the login attempt (and its phase) travels in
//! the sealed `login_state` cookie and the established session in the session cookies.
//! A callback is only accepted for an attempt sealed in `AwaitingCallback`.
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use url::Url;

use super::principal::SessionClaims;
use super::provider::{AuthorizationRequest, IdentityProvider, ProviderError};
use crate::observability::{Monitor, Observability};

const RANDOM_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum OAuth2Error {
    #[error("login state mismatch")]
    CsrfMismatch,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("id token nonce mismatch")]
    NonceMismatch,
    #[error("token response without id token")]
    MissingIdToken,
    #[error("session has no refresh token")]
    MissingRefreshToken,
    #[error("refreshed token belongs to another subject")]
    SubjectMismatch,
    #[error("illegal login transition {event:?} from {from:?}")]
    IllegalTransition { from: LoginPhase, event: LoginEvent },
    #[error("random source unavailable")]
    Randomness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginPhase {
    Unauthenticated,
    AwaitingCallback,
    TokenExchanged,
    SessionEstablished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginEvent {
    Begin,
    CallbackAccepted,
    ExchangeFailed,
    Established,
    Refreshed,
    RefreshFailed,
    LoggedOut,
}

impl LoginPhase {
    pub fn advance(self, event: LoginEvent) -> Result<LoginPhase, OAuth2Error> {
        use LoginEvent as E;
        use LoginPhase as P;

        match (self, event) {
            (P::Unauthenticated | P::AwaitingCallback, E::Begin) => Ok(P::AwaitingCallback),
            (P::AwaitingCallback, E::CallbackAccepted) => Ok(P::TokenExchanged),
            (P::TokenExchanged, E::ExchangeFailed) => Ok(P::Unauthenticated),
            (P::TokenExchanged, E::Established) => Ok(P::SessionEstablished),
            (P::SessionEstablished, E::Refreshed) => Ok(P::SessionEstablished),
            (P::SessionEstablished, E::RefreshFailed | E::LoggedOut) => Ok(P::Unauthenticated),
            (from, event) => Err(OAuth2Error::IllegalTransition { from, event }),
        }
    }
}

/// One in-flight login, sealed into the `login_state` cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub phase: LoginPhase,
    pub state: String,
    pub nonce: String,
    pub pkce_verifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_to: Option<String>,
}

/// Result of a successful code exchange, not yet turned into a session.
#[derive(Debug)]
pub struct TokenExchange {
    phase: LoginPhase,
    claims: SessionClaims,
    return_to: Option<String>,
}

impl TokenExchange {
    pub fn phase(&self) -> LoginPhase {
        self.phase
    }

    pub fn return_to(&self) -> Option<&str> {
        self.return_to.as_deref()
    }

    pub fn establish(self) -> Result<SessionClaims, OAuth2Error> {
        self.phase.advance(LoginEvent::Established)?;
        Ok(self.claims)
    }
}

fn random_token() -> Result<String, OAuth2Error> {
    let mut buf = [0u8; RANDOM_BYTES];
    getrandom::fill(&mut buf).map_err(|_| OAuth2Error::Randomness)?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}

fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn ct_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Only same-site absolute paths are accepted as post-login targets.
pub fn sanitize_return_to(raw: Option<&str>) -> Option<String> {
    raw.filter(|p| p.starts_with('/') && !p.starts_with("//") && !p.contains('\\'))
        .map(str::to_string)
}

#[derive(Clone)]
pub struct OAuth2Context {
    provider: Arc<dyn IdentityProvider>,
    monitor: Monitor,
}

impl std::fmt::Debug for OAuth2Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Context")
            .field("issuer", &self.provider.issuer())
            .finish()
    }
}

impl OAuth2Context {
    pub fn new(provider: Arc<dyn IdentityProvider>, obs: &Observability) -> Self {
        Self {
            provider,
            monitor: obs.monitor("oauth2"),
        }
    }

    /// Start a login. `pending` is the attempt already in flight, if any; starting
    /// over replaces it.
    pub fn begin_login(
        &self,
        pending: Option<&LoginAttempt>,
        return_to: Option<String>,
    ) -> Result<(LoginAttempt, Url), OAuth2Error> {
        let from = pending.map_or(LoginPhase::Unauthenticated, |a| a.phase);
        let phase = from.advance(LoginEvent::Begin)?;

        let attempt = LoginAttempt {
            phase,
            state: random_token()?,
            nonce: random_token()?,
            pkce_verifier: random_token()?,
            return_to,
        };
        let url = self.provider.authorization_url(&AuthorizationRequest {
            state: attempt.state.clone(),
            nonce: attempt.nonce.clone(),
            code_challenge: pkce_challenge(&attempt.pkce_verifier),
        });

        self.monitor.incr("oauth2_logins_total", "started");
        Ok((attempt, url))
    }

    /// Verify the callback against the pending attempt and exchange the code.
    pub async fn handle_callback(
        &self,
        attempt: Option<&LoginAttempt>,
        code: &str,
        state: &str,
    ) -> Result<TokenExchange, OAuth2Error> {
        let attempt = match attempt {
            Some(a) if ct_equal(&a.state, state) => a,
            _ => {
                self.monitor.incr("oauth2_logins_total", "csrf_mismatch");
                return Err(OAuth2Error::CsrfMismatch);
            }
        };

        let phase = attempt.phase.advance(LoginEvent::CallbackAccepted)?;

        match self.exchange(attempt, code).await {
            Ok(claims) => {
                self.monitor.incr("oauth2_logins_total", "exchanged");
                Ok(TokenExchange {
                    phase,
                    claims,
                    return_to: attempt.return_to.clone(),
                })
            }
            Err(err) => {
                let phase = phase.advance(LoginEvent::ExchangeFailed)?;
                self.monitor.incr("oauth2_logins_total", "exchange_failed");
                tracing::warn!(error = %err, ?phase, "authorization code exchange failed");
                Err(err)
            }
        }
    }

    async fn exchange(
        &self,
        attempt: &LoginAttempt,
        code: &str,
    ) -> Result<SessionClaims, OAuth2Error> {
        let tokens = self
            .provider
            .exchange_code(code, &attempt.pkce_verifier)
            .await?;
        let id_token = tokens.id_token.as_deref().ok_or(OAuth2Error::MissingIdToken)?;
        let id = self.provider.verify_id_token(id_token).await?;

        let nonce_ok = id
            .nonce
            .as_deref()
            .is_some_and(|n| ct_equal(n, &attempt.nonce));
        if !nonce_ok {
            return Err(OAuth2Error::NonceMismatch);
        }

        Ok(SessionClaims {
            subject: id.sub,
            issuer: id.iss,
            email: id.email,
            name: id.name,
            refresh_token: tokens.refresh_token,
        })
    }

    /// Trade the session's refresh token for fresh claims (same subject).
    pub async fn refresh(&self, session: &SessionClaims) -> Result<SessionClaims, OAuth2Error> {
        let res = self.refresh_inner(session).await;

        match &res {
            Ok(_) => self.monitor.incr("oauth2_refreshes_total", "ok"),
            Err(err) => {
                self.monitor.incr("oauth2_refreshes_total", "failed");
                tracing::warn!(subject = %session.subject, error = %err, "session refresh failed");
            }
        }
        res
    }

    async fn refresh_inner(&self, session: &SessionClaims) -> Result<SessionClaims, OAuth2Error> {
        let refresh_token = session
            .refresh_token
            .as_deref()
            .ok_or(OAuth2Error::MissingRefreshToken)?;
        let tokens = self.provider.refresh(refresh_token).await?;
        tracing::debug!(expires_in = ?tokens.expires_in, "tokens refreshed");

        let mut claims = session.clone();
        if let Some(id_token) = tokens.id_token.as_deref() {
            let id = self.provider.verify_id_token(id_token).await?;
            if id.sub != session.subject {
                return Err(OAuth2Error::SubjectMismatch);
            }
            claims.email = id.email.or(claims.email);
            claims.name = id.name.or(claims.name);
        }
        // providers may rotate the refresh token
        if let Some(rotated) = tokens.refresh_token {
            claims.refresh_token = Some(rotated);
        }
        Ok(claims)
    }
}
