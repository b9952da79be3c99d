use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgConnection;
use sqlx::Connection;
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{ClusterApi, TaskState};

// ============================================================================
// Readiness Predicates
// ============================================================================
//
// A readiness check answers "is this target actually serving". Errors are
// reported as `Err` and treated by the orchestrator as a failed attempt.
//
// Two layers are combined for infrastructure services:
// - ServiceTasksCheck: coarse, a task is `running` and past its grace period
// - Protocol checks:   fine, the service port answers (SELECT 1 / PING)
//
// ============================================================================

#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    async fn check(&self) -> anyhow::Result<bool>;
}

/// At least one task of `service` has been running for `grace`, then
/// optionally defers to a protocol-level check.
pub struct ServiceTasksCheck {
    cluster: Arc<dyn ClusterApi>,
    service: String,
    grace: Duration,
    then: Option<Arc<dyn ReadinessCheck>>,
}

impl ServiceTasksCheck {
    pub fn new(cluster: Arc<dyn ClusterApi>, service: impl Into<String>, grace: Duration) -> Self {
        Self {
            cluster,
            service: service.into(),
            grace,
            then: None,
        }
    }

    pub fn then(mut self, check: Arc<dyn ReadinessCheck>) -> Self {
        self.then = Some(check);
        self
    }
}

#[async_trait]
impl ReadinessCheck for ServiceTasksCheck {
    async fn check(&self) -> anyhow::Result<bool> {
        let tasks = self.cluster.list_tasks(&self.service).await?;
        let now = Utc::now();

        let settled = tasks.iter().any(|task| {
            task.state == TaskState::Running
                && task
                    .started_at
                    .map(|started| {
                        now.signed_duration_since(started)
                            .to_std()
                            .map(|running_for| running_for >= self.grace)
                            .unwrap_or(false)
                    })
                    .unwrap_or(true)
        });

        if !settled {
            tracing::debug!(
                service = %self.service,
                tasks = tasks.len(),
                "No settled running task yet"
            );
            return Ok(false);
        }

        match &self.then {
            Some(check) => check.check().await,
            None => Ok(true),
        }
    }
}

/// Opens a fresh connection and runs `SELECT 1`
pub struct PostgresQueryCheck {
    url: String,
}

impl PostgresQueryCheck {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ReadinessCheck for PostgresQueryCheck {
    async fn check(&self) -> anyhow::Result<bool> {
        let mut conn = PgConnection::connect(&self.url).await?;
        sqlx::query("SELECT 1").execute(&mut conn).await?;
        conn.close().await?;
        Ok(true)
    }
}

/// Sends `PING` and expects `PONG`
pub struct RedisPingCheck {
    url: String,
}

impl RedisPingCheck {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ReadinessCheck for RedisPingCheck {
    async fn check(&self) -> anyhow::Result<bool> {
        let client = redis::Client::open(self.url.as_str())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}
