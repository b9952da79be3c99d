use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::bootstrap::BackgroundWorker;

// ============================================================================
// Deployment Worker
// ============================================================================
//
// Pops deployment jobs from a Redis list and hands them to a JobHandler.
// `start` only fails when the queue cannot be reached at all; a failing job
// is logged and dropped, a broken connection is retried.
//
// ============================================================================

const POP_TIMEOUT_SECS: u64 = 1;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentJob {
    pub deployment_id: String,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default = "default_job_kind")]
    pub kind: String,
}

fn default_job_kind() -> String {
    "deploy".to_string()
}

pub fn decode_job(payload: &str) -> Result<DeploymentJob, serde_json::Error> {
    serde_json::from_str(payload)
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: DeploymentJob) -> anyhow::Result<()>;
}

/// Default handler; job bodies are provided by the deployment subsystem
pub struct LoggingJobHandler;

#[async_trait]
impl JobHandler for LoggingJobHandler {
    async fn handle(&self, job: DeploymentJob) -> anyhow::Result<()> {
        tracing::info!(
            deployment_id = %job.deployment_id,
            application_id = ?job.application_id,
            kind = %job.kind,
            "Deployment job received"
        );
        Ok(())
    }
}

/// Decode and run one payload. Never fails; returns whether the job ran.
pub async fn process_payload(handler: &dyn JobHandler, payload: &str) -> bool {
    let job = match decode_job(payload) {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(error = %e, payload = %payload, "Dropping undecodable deployment job");
            return false;
        }
    };

    let deployment_id = job.deployment_id.clone();
    match handler.handle(job).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(deployment_id = %deployment_id, error = %e, "Deployment job failed");
            false
        }
    }
}

pub struct QueueWorker {
    redis_url: String,
    queue: String,
    handler: Arc<dyn JobHandler>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl QueueWorker {
    pub fn new(redis_url: impl Into<String>, queue: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            redis_url: redis_url.into(),
            queue: queue.into(),
            handler,
            task: Mutex::new(None),
        }
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }

    async fn run(
        client: redis::Client,
        mut conn: redis::aio::MultiplexedConnection,
        queue: String,
        handler: Arc<dyn JobHandler>,
    ) {
        loop {
            let popped: redis::RedisResult<Option<(String, String)>> = redis::cmd("BLPOP")
                .arg(&queue)
                .arg(POP_TIMEOUT_SECS)
                .query_async(&mut conn)
                .await;

            match popped {
                Ok(Some((_, payload))) => {
                    process_payload(handler.as_ref(), &payload).await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(queue = %queue, error = %e, "Queue connection lost, reconnecting");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    match client.get_multiplexed_async_connection().await {
                        Ok(fresh) => conn = fresh,
                        Err(e) => tracing::warn!(error = %e, "Reconnect failed"),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl BackgroundWorker for QueueWorker {
    async fn start(&self) -> anyhow::Result<()> {
        if self.task.lock().unwrap_or_else(|e| e.into_inner()).is_some() {
            return Ok(());
        }

        let client = redis::Client::open(self.redis_url.as_str()).context("invalid redis url")?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("cannot reach deployment queue")?;

        let task = tokio::spawn(Self::run(client, conn, self.queue.clone(), self.handler.clone()));
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);

        tracing::info!(queue = %self.queue, "Deployment worker started");
        Ok(())
    }
}

impl Drop for QueueWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
