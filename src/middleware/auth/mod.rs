/*
 * Responsibility
 * - API route 用の認証 (authentication) / 認可 (authorization) middleware
 * - allow-list (認証不要 endpoint)
 */
pub mod allow_list;
pub mod authentication;
pub mod authorization;

pub use allow_list::{AllowList, AllowListError};
pub use authentication::AuthnState;
pub use authorization::{AuthzRule, AuthzState, RouteRules, Target};
