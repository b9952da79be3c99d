// ============================================================================
// Cluster Module
// ============================================================================
//
// Everything that talks to the container-cluster orchestrator:
// - ClusterApi    - the narrow control-API seam (bollard-backed in production)
// - ServiceSpec   - declarative desired state for an infra dependency
// - Reconciler    - idempotent create/update/tolerate-conflict + readiness
// - Mode          - how this process reaches the container runtime
//
// ============================================================================

mod docker;
mod errors;
pub mod infra;
mod mode;
mod reconciler;
mod spec;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use docker::DockerCluster;
pub use errors::{ClusterError, ReconcileError};
pub use mode::{RuntimeMode, RuntimeModeDetector, RuntimeTuning};
pub use reconciler::{InfraTarget, ReconcileOutcome, ServiceReconciler};
pub use spec::{PortProtocol, ContainerHealthcheck, PublishedPort, ServiceSpec, VolumeMount};

/// Identity and optimistic-concurrency token of an existing service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub id: String,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Pending,
    Failed,
    Other,
}

/// One running (or scheduled) instance of a service
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub state: TaskState,
    pub started_at: Option<DateTime<Utc>>,
}

/// Control API of the cluster orchestrator.
///
/// Only the calls the bootstrap path needs. Implementations must be safe to
/// share across the sequencer's parallel groups.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch the image so service creation does not race the registry
    async fn pull_image(&self, image: &str) -> Result<(), ClusterError>;

    /// `Ok(None)` when no service with that name exists
    async fn get_service(&self, name: &str) -> Result<Option<ServiceInfo>, ClusterError>;

    async fn update_service(
        &self,
        name: &str,
        version: u64,
        spec: &ServiceSpec,
    ) -> Result<(), ClusterError>;

    /// Fails with status 409 when the name is already taken
    async fn create_service(&self, spec: &ServiceSpec) -> Result<(), ClusterError>;

    async fn list_tasks(&self, service: &str) -> Result<Vec<TaskSummary>, ClusterError>;

    async fn ping(&self) -> Result<(), ClusterError>;

    /// Returns how many containers were listed
    async fn list_containers(&self, limit: usize) -> Result<usize, ClusterError>;

    /// Create the overlay network if it does not exist yet
    async fn ensure_network(&self, name: &str) -> Result<(), ClusterError>;

    /// Join this node to a cluster as manager if it is not already part of one
    async fn ensure_swarm(&self, listen_addr: &str, advertise_addr: &str) -> Result<(), ClusterError>;
}
