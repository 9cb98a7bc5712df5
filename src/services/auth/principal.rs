/*
 * Responsibility
 * - The authenticated identity attached to a request (Principal)
 * - The claims sealed into session cookies (SessionClaims)
 *
 * Notes
 * - Principal lives in request extensions for one request only; it is never persisted.
 * - The middleware builds it from a validated cookie; handlers only read it.
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::oauth2::LoginPhase;

const ANONYMOUS_SUBJECT: &str = "anonymous";

/// Claims carried by the auth and user-session cookies.
///
/// The refresh token is only ever sealed into the user-session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub subject: String,
    pub issuer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl SessionClaims {
    pub fn without_refresh_token(&self) -> Self {
        Self {
            refresh_token: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub subject: String,
    pub issuer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    phase: LoginPhase,
}

impl Principal {
    pub fn from_session(claims: &SessionClaims, expires_at: DateTime<Utc>) -> Self {
        Self {
            subject: claims.subject.clone(),
            issuer: claims.issuer.clone(),
            email: claims.email.clone(),
            name: claims.name.clone(),
            expires_at: Some(expires_at),
            phase: LoginPhase::SessionEstablished,
        }
    }

    /// Principal used when authentication is disabled gateway-wide.
    pub fn anonymous() -> Self {
        Self {
            subject: ANONYMOUS_SUBJECT.to_string(),
            issuer: String::new(),
            email: None,
            name: None,
            expires_at: None,
            phase: LoginPhase::Unauthenticated,
        }
    }

    /// `SessionEstablished` for a cookie-backed principal, `Unauthenticated` otherwise.
    pub fn login_phase(&self) -> LoginPhase {
        self.phase
    }

    /// Identifier used in relationship tuples.
    pub fn authz_id(&self) -> String {
        format!("user:{}", self.subject)
    }
}
