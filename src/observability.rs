//! Observability wiring: tracing subscriber, Prometheus recorder, and the
//! per-component `Monitor` handles that every service constructor accepts.
//!
//! The recorder is installed once per process (the `metrics` facade is global).
//! Tests build a detached recorder so they never touch process-wide state.
use std::panic;
use std::process;
use std::sync::OnceLock;
use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_tracing() {
    // Prefer RUST_LOG if set; otherwise use a sensible default.
    // Ex:
    // RUST_LOG=info,identity_gateway=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

pub fn init_panic_hook(abort_on_panic: bool) {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // Always surface panics via tracing, stderr may be hidden by the launcher.
        tracing::error!(?info, "panic");

        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

/// Shared observability handle.
///
/// Cheap to clone. Owns the handle used to render `/api/v0/metrics` and hands
/// out component-scoped [`Monitor`]s.
#[derive(Clone)]
pub struct Observability {
    metrics: PrometheusHandle,
}

impl std::fmt::Debug for Observability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observability").finish_non_exhaustive()
    }
}

impl Observability {
    /// Install the global Prometheus recorder (idempotent) and return a handle to it.
    pub fn install() -> Result<Self, metrics_exporter_prometheus::BuildError> {
        if let Some(handle) = METRICS_HANDLE.get() {
            return Ok(Self {
                metrics: handle.clone(),
            });
        }

        let handle = PrometheusBuilder::new().install_recorder()?;
        let _ = METRICS_HANDLE.set(handle.clone());

        Ok(Self { metrics: handle })
    }

    /// A handle backed by a recorder that is not installed globally.
    ///
    /// Metrics recorded through the facade are dropped; rendering yields an
    /// empty exposition. Used by tests and tools that must not own the global recorder.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            metrics: recorder.handle(),
        }
    }

    pub fn render(&self) -> String {
        self.metrics.render()
    }

    pub fn monitor(&self, component: &'static str) -> Monitor {
        Monitor { component }
    }
}

/// Component-scoped metric recorder.
#[derive(Clone, Copy, Debug)]
pub struct Monitor {
    component: &'static str,
}

impl Monitor {
    pub fn incr(&self, name: &'static str, outcome: &'static str) {
        metrics::counter!(name, "component" => self.component, "outcome" => outcome).increment(1);
    }

    pub fn set_gauge(&self, name: &'static str, value: f64) {
        metrics::gauge!(name, "component" => self.component).set(value);
    }

    pub fn observe(&self, name: &'static str, elapsed: Duration) {
        metrics::histogram!(name, "component" => self.component).record(elapsed.as_secs_f64());
    }
}
