//! Fail-closed authorization decisions on top of a [`RelationChecker`].
//!
//! - A single check that errors, times out or cannot be scheduled is never an allow.
//! - Batch checks fan out through the [`WorkerPool`]; an erroring item is dropped
//!   from the result, and only a request where *every* check errored surfaces as
//!   "backend unavailable" (or "saturated" when every failure was backpressure).
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::checker::{CheckError, RelationChecker};
use super::query::{AuthorizationQuery, Relation};
use crate::observability::{Monitor, Observability};
use crate::services::pool::{PoolError, WorkerPool};
use crate::services::resources::ResourceKind;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthzError {
    #[error("denied")]
    Denied,
    #[error("authorization checks could not be scheduled")]
    Saturated,
    #[error("authorization backend unavailable")]
    BackendUnavailable,
}

#[derive(Clone)]
pub struct AuthorizationService {
    checker: Arc<dyn RelationChecker>,
    pool: WorkerPool,
    check_timeout: Duration,
    monitor: Monitor,
}

impl std::fmt::Debug for AuthorizationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationService")
            .field("pool", &self.pool)
            .field("check_timeout", &self.check_timeout)
            .finish()
    }
}

async fn check_with_timeout(
    checker: &dyn RelationChecker,
    query: &AuthorizationQuery,
    timeout: Duration,
) -> Result<bool, CheckError> {
    match tokio::time::timeout(timeout, checker.check_relation(query)).await {
        Ok(res) => res,
        Err(_) => Err(CheckError::Timeout),
    }
}

impl AuthorizationService {
    pub fn new(
        checker: Arc<dyn RelationChecker>,
        pool: WorkerPool,
        check_timeout: Duration,
        obs: &Observability,
    ) -> Self {
        Self {
            checker,
            pool,
            check_timeout,
            monitor: obs.monitor("authorization"),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// One synchronous check. `Ok(())` only on an explicit allow.
    pub async fn check(&self, query: &AuthorizationQuery) -> Result<(), AuthzError> {
        let started = Instant::now();
        let res = check_with_timeout(self.checker.as_ref(), query, self.check_timeout).await;
        self.monitor
            .observe("authorization_check_duration_seconds", started.elapsed());

        match res {
            Ok(true) => {
                self.monitor.incr("authorization_checks_total", "allowed");
                tracing::debug!(%query, "authorization allowed");
                Ok(())
            }
            Ok(false) => {
                self.monitor.incr("authorization_checks_total", "denied");
                tracing::debug!(%query, "authorization denied");
                Err(AuthzError::Denied)
            }
            Err(err) => {
                self.monitor.incr("authorization_checks_total", "error");
                tracing::warn!(%query, error = %err, "authorization check failed");
                Err(AuthzError::BackendUnavailable)
            }
        }
    }

    /// Keep the candidates `principal_id` holds `relation` on, in their original order.
    ///
    /// `candidates` pairs each item with its resource id.
    pub async fn filter_allowed<T>(
        &self,
        principal_id: &str,
        resource_type: ResourceKind,
        relation: Relation,
        candidates: Vec<(String, T)>,
    ) -> Result<Vec<T>, AuthzError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let (ids, items): (Vec<String>, Vec<T>) = candidates.into_iter().unzip();
        let tasks = ids.into_iter().map(|id| {
            let checker = self.checker.clone();
            let timeout = self.check_timeout;
            let query = AuthorizationQuery::new(principal_id, resource_type, id, relation);
            async move {
                let res = check_with_timeout(checker.as_ref(), &query, timeout).await;
                (query, res)
            }
        });

        let started = Instant::now();
        let results = self.pool.submit_batch(tasks).await;
        self.monitor
            .observe("authorization_batch_duration_seconds", started.elapsed());
        let total = results.len();

        let mut allowed = Vec::new();
        let mut errored = 0usize;
        let mut saturated = 0usize;

        for (item, result) in items.into_iter().zip(results) {
            match result {
                Ok((_, Ok(true))) => {
                    self.monitor.incr("authorization_checks_total", "allowed");
                    allowed.push(item);
                }
                Ok((query, Ok(false))) => {
                    self.monitor.incr("authorization_checks_total", "denied");
                    tracing::debug!(%query, "authorization denied");
                }
                Ok((query, Err(err))) => {
                    errored += 1;
                    self.monitor.incr("authorization_checks_total", "error");
                    tracing::warn!(%query, error = %err, "authorization check failed, item denied");
                }
                Err(PoolError::Saturated) => {
                    saturated += 1;
                    self.monitor.incr("authorization_checks_total", "saturated");
                }
                Err(err) => {
                    errored += 1;
                    self.monitor.incr("authorization_checks_total", "error");
                    tracing::warn!(error = %err, "authorization task failed, item denied");
                }
            }
        }

        if errored + saturated == total {
            tracing::warn!(
                resource = resource_type.collection(),
                total,
                saturated,
                "every authorization check failed"
            );
            return Err(if saturated == total {
                AuthzError::Saturated
            } else {
                AuthzError::BackendUnavailable
            });
        }

        Ok(allowed)
    }
}
