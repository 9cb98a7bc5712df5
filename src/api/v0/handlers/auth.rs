/*
 * Responsibility
 * - GET  /api/v0/auth           : IdP へ redirect (login_state cookie を発行)
 * - GET  /api/v0/auth/callback  : code 交換 → session cookie 発行 → UI へ redirect
 * - GET  /api/v0/auth/me        : 現在の Principal
 * - POST /api/v0/auth/logout    : session cookie の削除 (SessionEstablished -> Unauthenticated)
 *
 * Notes
 * - code 交換に失敗した login_state は再利用させない (cookie を消す)
 * - state 不一致のときは cookie に触らない (正規の login を横取りさせない)
 */
use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::error::AppError;
use crate::services::auth::oauth2::LoginEvent;
use crate::services::auth::{
    Authenticator, CookieManager, LOGIN_STATE_COOKIE, LoginAttempt, OAuth2Context, OAuth2Error,
    Principal, read_cookie, sanitize_return_to,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub return_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Login needs both the cookie manager and a discovered provider.
fn login_services(state: &AppState) -> Result<(&Authenticator, &OAuth2Context), AppError> {
    let authn = state
        .authenticator
        .as_ref()
        .ok_or(AppError::AuthenticationUnavailable)?;
    let oauth2 = authn.oauth2().ok_or(AppError::AuthenticationUnavailable)?;
    Ok((authn, oauth2))
}

fn see_other(location: &str, cookies: Vec<HeaderValue>) -> Result<Response, AppError> {
    let location = HeaderValue::from_str(location).map_err(|_| AppError::Internal)?;

    let mut res = StatusCode::SEE_OTHER.into_response();
    res.headers_mut().insert(header::LOCATION, location);
    for cookie in cookies {
        res.headers_mut().append(header::SET_COOKIE, cookie);
    }
    Ok(res)
}

/// The in-flight login attempt; an unreadable cookie counts as none.
fn pending_attempt(cookies: &CookieManager, headers: &HeaderMap) -> Option<LoginAttempt> {
    read_cookie(headers, LOGIN_STATE_COOKIE).and_then(|v| cookies.open::<LoginAttempt>(v).ok())
}

pub async fn login(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (authn, oauth2) = login_services(&state)?;
    let cookies = authn.cookies();

    let pending = pending_attempt(cookies, &headers);
    let (attempt, url) = oauth2.begin_login(
        pending.as_ref(),
        sanitize_return_to(query.return_to.as_deref()),
    )?;
    let sealed = cookies.seal(&attempt, cookies.settings().login_ttl)?;

    see_other(url.as_str(), vec![cookies.login_state_cookie(&sealed)?])
}

pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (authn, oauth2) = login_services(&state)?;
    let cookies = authn.cookies();

    if let Some(error) = query.error {
        tracing::warn!(error, "identity provider returned an error");
        return Err(AppError::AuthenticationRequired);
    }
    let code = query
        .code
        .ok_or_else(|| AppError::bad_request("missing_code", "authorization code is missing"))?;

    let attempt = pending_attempt(cookies, &headers);
    let exchange = match oauth2
        .handle_callback(
            attempt.as_ref(),
            &code,
            query.state.as_deref().unwrap_or_default(),
        )
        .await
    {
        Ok(exchange) => exchange,
        Err(err @ OAuth2Error::CsrfMismatch) => {
            tracing::warn!(error = %err, "login callback rejected");
            return Err(err.into());
        }
        Err(err) => {
            tracing::warn!(error = %err, "login callback failed, attempt discarded");
            let mut res = AppError::from(err).into_response();
            res.headers_mut()
                .append(header::SET_COOKIE, cookies.clear(LOGIN_STATE_COOKIE)?);
            return Ok(res);
        }
    };

    tracing::debug!(phase = ?exchange.phase(), "authorization code exchanged");
    let target = exchange
        .return_to()
        .map(str::to_string)
        .unwrap_or_else(|| state.post_login_redirect.clone());
    let claims = exchange.establish()?;

    let mut set_cookies = cookies.session_cookies(&claims)?;
    set_cookies.push(cookies.clear(LOGIN_STATE_COOKIE)?);

    tracing::info!(subject = %claims.subject, "login completed");
    see_other(&target, set_cookies)
}

pub async fn me(principal: Principal) -> Json<Principal> {
    Json(principal)
}

pub async fn logout(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Response, AppError> {
    let authn = state
        .authenticator
        .as_ref()
        .ok_or(AppError::AuthenticationUnavailable)?;
    let phase = principal.login_phase().advance(LoginEvent::LoggedOut)?;

    let mut res = StatusCode::NO_CONTENT.into_response();
    for cookie in authn.cookies().clear_session()? {
        res.headers_mut().append(header::SET_COOKIE, cookie);
    }

    tracing::info!(subject = %principal.subject, ?phase, "logout");
    Ok(res)
}
