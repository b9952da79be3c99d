// ============================================================================
// Platform control plane
// ============================================================================
//
// Self-bootstrapping control plane for a self-hosted deployment platform:
// - cluster/    - cluster API seam, service specs, reconciler, runtime mode
// - health/     - readiness engine and predicates
// - bootstrap/  - startup graph and its runner
// - platform/   - proxy, recurring jobs, worker, notifications
// - supervisor/ - parent process restarting the control plane
//
// ============================================================================

pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod db;
pub mod health;
pub mod metrics;
pub mod platform;
pub mod server;
pub mod supervisor;
pub mod utils;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Structured logging for both binaries. `RUST_LOG` wins over the default
/// filter; `verbose` adds connection-level logging from the data and
/// cluster clients.
pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "info,platform_controlplane=debug,sqlx=debug,bollard=debug"
    } else {
        "info,platform_controlplane=debug"
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();
}
