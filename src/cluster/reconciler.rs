use std::sync::Arc;
use std::time::Duration;

use super::{ClusterApi, ClusterError, ReconcileError, ServiceSpec};
use crate::health::{HealthCheckSpec, HealthOrchestrator};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig};

// ============================================================================
// Service Reconciler
// ============================================================================
//
// Realizes a declarative ServiceSpec on the cluster, then waits for it to be
// ready. Idempotence comes only from the cluster API:
//
//   1. pull image                 - failure is fatal
//   2. existing service -> update - stale version token is retried once
//   3. missing service  -> create - 409 conflict means another bootstrap
//                                   attempt won the race: AlreadyExists
//
// No lock is held; concurrent bootstrap attempts converge through the
// version token and the conflict rule.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    AlreadyExists,
    Failed,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Created => "created",
            ReconcileOutcome::Updated => "updated",
            ReconcileOutcome::AlreadyExists => "already-exists",
            ReconcileOutcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An infrastructure dependency: what to run and how to know it is ready
#[derive(Debug, Clone)]
pub struct InfraTarget {
    /// Human-facing name used in failure messages ("Postgres", "Redis")
    pub label: String,
    pub service: ServiceSpec,
    pub health: HealthCheckSpec,
}

pub struct ServiceReconciler {
    cluster: Arc<dyn ClusterApi>,
    orchestrator: HealthOrchestrator,
    startup_buffer: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl ServiceReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>, orchestrator: HealthOrchestrator) -> Self {
        Self {
            cluster,
            orchestrator,
            startup_buffer: Duration::ZERO,
            metrics: None,
        }
    }

    /// Pause between a service change and the first readiness poll
    pub fn with_startup_buffer(mut self, buffer: Duration) -> Self {
        self.startup_buffer = buffer;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Make the cluster match `spec`
    pub async fn ensure(&self, spec: &ServiceSpec) -> Result<ReconcileOutcome, ReconcileError> {
        let result = self.reconcile(spec).await;

        let outcome = match &result {
            Ok(outcome) => *outcome,
            Err(_) => ReconcileOutcome::Failed,
        };
        if let Some(ref metrics) = self.metrics {
            metrics.record_reconcile(&spec.name, outcome.as_str());
        }

        match &result {
            Ok(outcome) => tracing::info!(
                service = %spec.name,
                image = %spec.image,
                outcome = %outcome,
                "Service reconciled"
            ),
            Err(e) => tracing::error!(service = %spec.name, error = %e, "Service reconciliation failed"),
        }

        result
    }

    /// `ensure`, then block until the target passes its readiness budget
    pub async fn ensure_healthy(&self, target: &InfraTarget) -> Result<ReconcileOutcome, ReconcileError> {
        let outcome = self.ensure(&target.service).await?;

        if !self.startup_buffer.is_zero() {
            tokio::time::sleep(self.startup_buffer).await;
        }

        let result = self.orchestrator.wait_for_healthy(&target.health).await;
        if !result.success {
            return Err(ReconcileError::Unhealthy {
                label: target.label.clone(),
                reason: result
                    .error
                    .unwrap_or_else(|| "unknown readiness failure".to_string()),
            });
        }

        Ok(outcome)
    }

    async fn reconcile(&self, spec: &ServiceSpec) -> Result<ReconcileOutcome, ReconcileError> {
        self.cluster
            .pull_image(&spec.image)
            .await
            .map_err(|source| ReconcileError::ImagePull {
                image: spec.image.clone(),
                source,
            })?;

        let existing = self
            .cluster
            .get_service(&spec.name)
            .await
            .map_err(|source| ReconcileError::Lookup {
                service: spec.name.clone(),
                source,
            })?;

        if let Some(info) = existing {
            let first_version = info.version;
            let updated = retry_on_transient(RetryConfig::once(), |attempt| async move {
                self.update_existing(spec, attempt, first_version).await
            })
            .await
            .into_result()
            .map_err(|source| ReconcileError::Update {
                service: spec.name.clone(),
                source,
            })?;

            if updated {
                return Ok(ReconcileOutcome::Updated);
            }
            tracing::warn!(service = %spec.name, "Service disappeared during update, creating it");
        }

        match self.cluster.create_service(spec).await {
            Ok(()) => Ok(ReconcileOutcome::Created),
            Err(e) if e.is_conflict() => {
                tracing::info!(service = %spec.name, "Service already exists, continuing");
                Ok(ReconcileOutcome::AlreadyExists)
            }
            Err(source) => Err(ReconcileError::Create {
                service: spec.name.clone(),
                source,
            }),
        }
    }

    /// First attempt uses the version already read; retries re-fetch it.
    /// `Ok(false)` when the service no longer exists, whether the re-fetch
    /// finds nothing or the update itself answers not-found.
    async fn update_existing(
        &self,
        spec: &ServiceSpec,
        attempt: u32,
        first_version: u64,
    ) -> Result<bool, ClusterError> {
        let version = if attempt == 1 {
            Some(first_version)
        } else {
            self.cluster.get_service(&spec.name).await?.map(|info| info.version)
        };

        match version {
            Some(version) => match self.cluster.update_service(&spec.name, version, spec).await {
                Ok(()) => Ok(true),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e),
            },
            None => Ok(false),
        }
    }
}
