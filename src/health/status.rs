use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// Component Health
// ============================================================================
//
// Point-in-time health of the running control plane's dependencies, as
// reported on the `/health` endpoint once traffic is being served.
//
// ============================================================================

/// Health status of a component
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }
}

/// Health information for a component
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub details: Option<String>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            last_check: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Any unhealthy component makes the whole system unhealthy; otherwise any
/// degraded component degrades it.
pub fn overall_status(components: &[ComponentHealth]) -> HealthStatus {
    let mut has_degraded = false;
    let mut unhealthy_components = Vec::new();

    for health in components {
        match &health.status {
            HealthStatus::Unhealthy(msg) => {
                unhealthy_components.push(format!("{}: {}", health.name, msg));
            }
            HealthStatus::Degraded(_) => {
                has_degraded = true;
            }
            HealthStatus::Healthy => {}
        }
    }

    if !unhealthy_components.is_empty() {
        HealthStatus::Unhealthy(unhealthy_components.join(", "))
    } else if has_degraded {
        HealthStatus::Degraded("Some components degraded".to_string())
    } else {
        HealthStatus::Healthy
    }
}
