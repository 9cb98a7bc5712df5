use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::services::auth::Principal;

/// Handler で Principal を受け取るための extractor
/// authentication middleware が extensions に insert 済みである前提
/// 見つからない場合は 401 を返す (allow-list 上の route など)
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(AppError::AuthenticationRequired)
    }
}
