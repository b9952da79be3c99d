// ============================================================================
// Platform collaborators
// ============================================================================
//
// Concrete implementations of the bootstrap seams:
// - proxy/  - default reverse-proxy config + proxy service
// - jobs/   - recurring job loading, stale deployment sweep
// - worker/ - deployment queue consumer
// - notify/ - operator restart notification
//
// ============================================================================

mod jobs;
mod notify;
mod proxy;
mod worker;

pub use jobs::{is_valid_cron, JobRegistry, ScheduleKind, ScheduleLoader, ScheduledJob, StaleDeploymentSweep};
pub use notify::{RedisRestartNotifier, RestartNotification};
pub use proxy::TraefikInstaller;
pub use worker::{decode_job, process_payload, DeploymentJob, JobHandler, LoggingJobHandler, QueueWorker};
