/*
 * Responsibility
 * - ログイン (OIDC authorization code + PKCE) とセッション cookie の公開インターフェース
 * - Authenticator: cookie -> Principal (期限切れなら refresh)
 */
pub mod authenticator;
pub mod cookies;
pub mod encrypt;
pub mod oauth2;
pub mod principal;
pub mod provider;

pub use authenticator::{Authenticated, AuthnError, Authenticator};
pub use cookies::{
    AUTH_COOKIE, CookieError, CookieManager, CookieSettings, LOGIN_STATE_COOKIE,
    USER_SESSION_COOKIE, read_cookie,
};
pub use encrypt::{Encrypt, parse_key_material};
pub use oauth2::{LoginAttempt, OAuth2Context, OAuth2Error, sanitize_return_to};
pub use principal::Principal;
pub use provider::{OidcProvider, OidcSettings, ProviderError};
