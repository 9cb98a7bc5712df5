/*
 * Responsibility
 * - Router に紐づける共有コンテキスト (AppState)
 *   - authenticator, authz (worker pool 込み), upstream store, observability
 * - Clone 前提で持つ (内部は Arc/Clone cheap)
 */
use std::sync::Arc;

use crate::observability::Observability;
use crate::services::auth::Authenticator;
use crate::services::authz::AuthorizationService;
use crate::services::upstream::ResourceStore;

#[derive(Clone)]
pub struct AppState {
    /// `None` when authentication is disabled.
    pub authenticator: Option<Authenticator>,
    pub authz: AuthorizationService,
    pub store: Arc<dyn ResourceStore>,
    pub obs: Observability,
    /// Landing page after a completed login.
    pub post_login_redirect: String,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("authentication", &self.authenticator.is_some())
            .field("authz", &self.authz)
            .field("store", &self.store.backend_name())
            .finish()
    }
}
