//! session cookie 検証 → Principal を extensions に入れる
//!
//! - allow-list に一致するリクエストは Principal なしで通す
//! - auth cookie が期限切れなら user-session cookie の refresh token で更新し、
//!   新しい cookie を response に付ける
//! - refresh に失敗した session は終了扱い: 401 と一緒に session cookie を消す
//! - 認証が無効な構成では anonymous principal を入れる (認可は省略しない)
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};

use super::allow_list::AllowList;
use crate::error::AppError;
use crate::services::auth::{Authenticated, AuthnError, Authenticator, Principal};
use crate::state::AppState;

#[derive(Clone)]
pub struct AuthnState {
    /// `None` when authentication is disabled.
    pub authenticator: Option<Authenticator>,
    pub allow_list: Arc<AllowList>,
}

pub fn apply(router: Router<AppState>, state: AuthnState) -> Router<AppState> {
    router.route_layer(middleware::from_fn_with_state(state, authentication_middleware))
}

async fn authentication_middleware(
    State(state): State<AuthnState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(authenticator) = &state.authenticator else {
        req.extensions_mut().insert(Principal::anonymous());
        return Ok(next.run(req).await);
    };

    // Nested routers see the path without the context prefix
    if state.allow_list.matches(req.method(), req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let authenticated = match authenticator.authenticate(req.headers()).await {
        Ok(a) => a,
        Err(err) => {
            tracing::warn!(error = %err, path = req.uri().path(), "authentication failed");
            let mut res = AppError::AuthenticationRequired.into_response();
            if matches!(err, AuthnError::RefreshFailed(_)) {
                for cookie in authenticator.cookies().clear_session()? {
                    res.headers_mut().append(header::SET_COOKIE, cookie);
                }
            }
            return Ok(res);
        }
    };

    tracing::debug!(subject = %authenticated.principal().subject, "authenticated");
    match authenticated {
        Authenticated::Session(principal) => {
            req.extensions_mut().insert(principal);
            Ok(next.run(req).await)
        }
        Authenticated::Refreshed { principal, cookies } => {
            req.extensions_mut().insert(principal);
            let mut res = next.run(req).await;
            for cookie in cookies {
                res.headers_mut().append(header::SET_COOKIE, cookie);
            }
            Ok(res)
        }
    }
}
