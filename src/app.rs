/*
 * Responsibility
 * - Config読み込み → 依存生成 (authenticator, authz + worker pool, upstream store) → Router 組み立て
 * - axum::serve() で起動し、SIGINT/SIGTERM で graceful shutdown
 * - shutdown 後に worker pool を drain する
 */
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use crate::config::{Config, DiscoveryFailurePolicy};
use crate::observability::{self, Observability};
use crate::router::{RouterSettings, build_router};
use crate::services::auth::{
    Authenticator, CookieManager, CookieSettings, Encrypt, OAuth2Context, OidcProvider,
};
use crate::services::authz::{AuthorizationService, OpenFgaChecker, RelationChecker};
use crate::services::pool::WorkerPool;
use crate::services::upstream::{HttpResourceStore, MemoryResourceStore, ResourceStore};
use crate::state::AppState;

const LOGIN_STATE_TTL: Duration = Duration::from_secs(300);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run() -> Result<()> {
    observability::init_tracing();
    let config = Config::from_env()?;

    // Development: fail fast on panic.
    observability::init_panic_hook(!config.app_env.is_production());

    let obs = Observability::install().context("install metrics recorder")?;

    tracing::info!(
        "starting gateway in {:?} mode on {} (context path {:?})",
        config.app_env,
        config.addr,
        config.context_path
    );

    let settings = RouterSettings::from_config(&config)?;
    let state = build_state(&config, &obs).await?;
    let pool = state.authz.pool().clone();

    let app = build_router(&settings, state);
    let listener = TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("bind {}", config.addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.drain().await;
    tracing::info!("worker pool drained, bye");
    Ok(())
}

pub async fn build_state(config: &Config, obs: &Observability) -> Result<AppState> {
    let pool = WorkerPool::new(config.pool, obs);
    let checker: Arc<dyn RelationChecker> = Arc::new(OpenFgaChecker::new(
        &config.authorization.backend,
        config.authorization.check_timeout,
    )?);
    let authz = AuthorizationService::new(
        checker,
        pool,
        config.authorization.check_timeout,
        obs,
    );

    let (authenticator, post_login_redirect) = match &config.oauth2 {
        Some(oauth2) => {
            let cookies = CookieManager::new(
                Encrypt::new(&oauth2.cookies_encryption_key),
                CookieSettings {
                    auth_ttl: oauth2.auth_cookie_ttl,
                    session_ttl: oauth2.user_session_ttl,
                    login_ttl: LOGIN_STATE_TTL,
                    path: format!("{}/", config.context_path),
                },
            );

            let context = match OidcProvider::discover(oauth2.oidc.clone(), DISCOVERY_TIMEOUT).await
            {
                Ok(provider) => Some(OAuth2Context::new(Arc::new(provider), obs)),
                Err(e) => match oauth2.discovery_failure_policy {
                    DiscoveryFailurePolicy::Fail => {
                        return Err(e).context("oidc discovery failed");
                    }
                    DiscoveryFailurePolicy::Degraded => {
                        tracing::warn!(
                            error = %e,
                            issuer = %oauth2.oidc.issuer,
                            "oidc discovery failed, login and refresh are unavailable"
                        );
                        None
                    }
                },
            };

            (
                Some(Authenticator::new(cookies, context, obs)),
                oauth2.post_login_redirect.clone(),
            )
        }
        None => {
            tracing::warn!("authentication disabled, every request runs as the anonymous principal");
            (None, format!("{}/", config.context_path))
        }
    };

    let store: Arc<dyn ResourceStore> = if config.upstream.is_empty() {
        tracing::warn!("no upstream endpoints configured, serving resources from memory");
        Arc::new(MemoryResourceStore::new())
    } else {
        Arc::new(HttpResourceStore::new(
            &config.upstream,
            config.request_timeout,
        )?)
    };

    Ok(AppState {
        authenticator,
        authz,
        store,
        obs: obs.clone(),
        post_login_redirect,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
