// ============================================================================
// Health Module
// ============================================================================
//
// - orchestrator/ - generic poll-with-backoff readiness engine
// - checks/       - readiness predicates (task state, SELECT 1, PING)
// - status/       - component health aggregation for the /health endpoint
//
// ============================================================================

mod orchestrator;
mod checks;
mod status;

pub use orchestrator::{HealthCheckSpec, HealthOrchestrator, OrchestrationResult};
pub use checks::{PostgresQueryCheck, ReadinessCheck, RedisPingCheck, ServiceTasksCheck};
pub use status::{overall_status, ComponentHealth, HealthStatus};
